use serde_json::Value;

use crate::fhir::context::ParentContext;
use crate::fhir::date::first_date;
use crate::fhir::resource::{codeable_display, references, str_at, ResourceType};
use crate::fhir::walker::Traversal;
use crate::models::TrackedResourceReference;

/// Composition: fan out to every section entry, then track the document
/// itself.
pub(super) fn handle_composition(
    walk: &mut Traversal<'_>,
    index: usize,
    parent: Option<&ParentContext>,
) {
    // Marked before recursing so a section pointing back at the
    // composition terminates.
    if !walk.begin(index) {
        return;
    }

    let composition = walk.resource(index);
    let type_display = composition.get("type").and_then(codeable_display);
    let declared_title = str_at(composition, "/title").map(str::to_string);
    let date = first_date(composition, &["/date"]);
    let children: Vec<usize> = section_references(composition)
        .iter()
        .filter_map(|r| walk.context.resolve(r))
        .filter(|child| *child != index)
        .collect();

    let context = ParentContext {
        resource_type: ResourceType::Composition,
        id: walk.tracked_id(index),
        type_display: type_display.clone(),
        date,
    };

    for child in children {
        walk.dispatch(child, Some(&context));
    }

    if parent.is_some_and(ParentContext::absorbs_children) {
        return;
    }

    let title = match (declared_title, type_display) {
        (Some(t), Some(d)) if t != d => format!("{t} ({d})"),
        (Some(t), _) => t,
        (None, Some(d)) => d,
        (None, None) => ResourceType::Composition.label().to_string(),
    };
    walk.track(TrackedResourceReference {
        resource_type: ResourceType::Composition,
        resource_id: context.id,
        timestamp: date,
        title,
    });
}

/// Entry references of all sections, nested sections included, in document
/// order
fn section_references(composition: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack: Vec<&Value> = composition
        .get("section")
        .and_then(Value::as_array)
        .map(|s| s.iter().rev().collect())
        .unwrap_or_default();

    while let Some(section) = stack.pop() {
        out.extend(references(section.get("entry")));
        if let Some(nested) = section.get("section").and_then(Value::as_array) {
            stack.extend(nested.iter().rev());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhir::handlers::dispatch_table;
    use serde_json::json;

    fn composition_bundle() -> (Vec<Value>, Vec<Option<String>>) {
        let resources = vec![
            json!({
                "resourceType": "Composition",
                "id": "doc1",
                "title": "Consultation Report",
                "type": {"coding": [{"code": "371530004", "display": "Clinical consultation report"}]},
                "date": "2022-04-01T09:00:00Z",
                "section": [
                    {"entry": [{"reference": "urn:uuid:cond"}]},
                    {"section": [{"entry": [{"reference": "DiagnosticReport/dr1"}]}]}
                ]
            }),
            json!({"resourceType": "Condition", "id": "cond1", "code": {"text": "Migraine"}}),
            json!({"resourceType": "DiagnosticReport", "id": "dr1", "code": {"text": "CBC"}}),
            json!({"resourceType": "Patient", "id": "p1"}),
        ];
        let urls = vec![
            Some("urn:uuid:doc".to_string()),
            Some("urn:uuid:cond".to_string()),
            Some("urn:uuid:dr".to_string()),
            None,
        ];
        (resources, urls)
    }

    #[test]
    fn test_section_references_include_nested() {
        let (resources, _) = composition_bundle();
        assert_eq!(
            section_references(&resources[0]),
            vec!["urn:uuid:cond", "DiagnosticReport/dr1"]
        );
    }

    #[test]
    fn test_fan_out_tracks_children_once() {
        let table = dispatch_table();
        let (resources, urls) = composition_bundle();
        let mut walk = Traversal::new(resources, urls, None, &table);
        walk.run();

        let tracked = walk.context.tracker.tracked();
        let kinds: Vec<_> = tracked.iter().map(|r| r.resource_type).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceType::Condition,
                ResourceType::DiagnosticReport,
                ResourceType::Composition
            ]
        );
        assert_eq!(
            tracked[2].title,
            "Consultation Report (Clinical consultation report)"
        );
        assert!(walk.context.tracker.is_processed("Condition/cond1"));
        assert!(walk.context.tracker.is_processed("DiagnosticReport/dr1"));
    }

    #[test]
    fn test_self_reference_terminates() {
        let table = dispatch_table();
        let resources = vec![json!({
            "resourceType": "Composition",
            "id": "loop",
            "section": [{"entry": [{"reference": "Composition/loop"}]}]
        })];
        let mut walk = Traversal::new(resources, vec![None], None, &table);
        walk.run();
        assert_eq!(walk.context.tracker.tracked().len(), 1);
        assert_eq!(walk.context.tracker.tracked()[0].title, "Composition");
    }
}
