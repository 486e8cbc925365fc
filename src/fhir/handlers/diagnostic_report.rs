use serde_json::Value;

use super::title;
use crate::fhir::context::ParentContext;
use crate::fhir::date::first_date;
use crate::fhir::resource::{as_list, codeable_display, coding_codes, references, ResourceType};
use crate::fhir::walker::Traversal;
use crate::models::TrackedResourceReference;

/// Category code marking a radiology report
pub const RADIOLOGY_CATEGORY: &str = "RAD";

/// DiagnosticReport: queue its attachments, dispatch its results with the
/// report as parent, then track the report.
pub(super) fn handle_diagnostic_report(
    walk: &mut Traversal<'_>,
    index: usize,
    parent: Option<&ParentContext>,
) {
    if !walk.begin(index) {
        return;
    }

    let report = walk.resource(index);
    let radiology = is_radiology(report);
    let display = report.get("code").and_then(codeable_display);
    let date = first_date(
        report,
        &["/issued", "/effectiveDateTime", "/effectivePeriod/start"],
    );
    let presented_forms = as_list(report.get("presentedForm")).len();
    let media_links: Vec<usize> = as_list(report.get("media"))
        .into_iter()
        .filter_map(|m| m.pointer("/link/reference").and_then(Value::as_str))
        .filter_map(|r| walk.context.resolve(r))
        .collect();
    let results: Vec<usize> = references(report.get("result"))
        .iter()
        .filter_map(|r| walk.context.resolve(r))
        .filter(|r| *r != index)
        .collect();

    let presented_listed = matches!(report.get("presentedForm"), Some(Value::Array(_)));

    for i in 0..presented_forms {
        let pointer = if presented_listed {
            format!("/presentedForm/{i}")
        } else {
            "/presentedForm".to_string()
        };
        walk.queue_attachment(index, pointer, radiology);
    }

    for media in media_links {
        // Two reports may link the same Media; extract it once.
        if walk.begin(media) && walk.resource(media).get("content").is_some() {
            walk.queue_attachment(media, "/content".to_string(), radiology);
        }
    }

    let context = ParentContext {
        resource_type: ResourceType::DiagnosticReport,
        id: walk.tracked_id(index),
        type_display: display.clone(),
        date,
    };
    for result in results {
        walk.dispatch(result, Some(&context));
    }

    if parent.is_some_and(ParentContext::absorbs_children) {
        return;
    }
    walk.track(TrackedResourceReference {
        resource_type: ResourceType::DiagnosticReport,
        resource_id: context.id,
        timestamp: date,
        title: title(ResourceType::DiagnosticReport, display),
    });
}

/// A report is radiology when any category coding has code `RAD`
pub fn is_radiology(report: &Value) -> bool {
    as_list(report.get("category"))
        .into_iter()
        .any(|category| coding_codes(category).any(|code| code == RADIOLOGY_CATEGORY))
}
