//! Leaf handlers for clinical statements
//!
//! A leaf is marked processed on first sight, so a resource listed in a
//! Composition section and again at the top level is tracked once. Results
//! reached through a DiagnosticReport are not tracked; the report is.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::title;
use crate::fhir::context::ParentContext;
use crate::fhir::date::first_date;
use crate::fhir::resource::{codeable_display, str_at, ResourceType};
use crate::fhir::walker::Traversal;
use crate::models::TrackedResourceReference;

struct Leaf {
    kind: ResourceType,
    describe: fn(&Traversal<'_>, &Value) -> Option<String>,
    date_paths: &'static [&'static str],
    /// Fall back to the parent's and then the bundle's date
    contextual_date: bool,
}

const CONDITION: Leaf = Leaf {
    kind: ResourceType::Condition,
    describe: code_display,
    date_paths: &["/recordedDate", "/onsetDateTime", "/onsetPeriod/start"],
    contextual_date: false,
};

const OBSERVATION: Leaf = Leaf {
    kind: ResourceType::Observation,
    describe: code_display,
    date_paths: &["/issued", "/effectiveDateTime", "/effectivePeriod/start"],
    contextual_date: false,
};

const MEDICATION_REQUEST: Leaf = Leaf {
    kind: ResourceType::MedicationRequest,
    describe: medication_display,
    date_paths: &["/authoredOn"],
    contextual_date: true,
};

const IMMUNIZATION: Leaf = Leaf {
    kind: ResourceType::Immunization,
    describe: vaccine_display,
    date_paths: &["/occurrenceDateTime", "/recorded"],
    contextual_date: false,
};

const IMMUNIZATION_RECOMMENDATION: Leaf = Leaf {
    kind: ResourceType::ImmunizationRecommendation,
    describe: recommendation_display,
    date_paths: &["/date"],
    contextual_date: false,
};

pub(super) fn handle_condition(walk: &mut Traversal<'_>, index: usize, parent: Option<&ParentContext>) {
    process(walk, index, parent, &CONDITION);
}

pub(super) fn handle_observation(walk: &mut Traversal<'_>, index: usize, parent: Option<&ParentContext>) {
    process(walk, index, parent, &OBSERVATION);
}

pub(super) fn handle_medication_request(
    walk: &mut Traversal<'_>,
    index: usize,
    parent: Option<&ParentContext>,
) {
    process(walk, index, parent, &MEDICATION_REQUEST);
}

pub(super) fn handle_immunization(walk: &mut Traversal<'_>, index: usize, parent: Option<&ParentContext>) {
    process(walk, index, parent, &IMMUNIZATION);
}

pub(super) fn handle_immunization_recommendation(
    walk: &mut Traversal<'_>,
    index: usize,
    parent: Option<&ParentContext>,
) {
    process(walk, index, parent, &IMMUNIZATION_RECOMMENDATION);
}

fn process(walk: &mut Traversal<'_>, index: usize, parent: Option<&ParentContext>, leaf: &Leaf) {
    if !walk.begin(index) || parent.is_some_and(ParentContext::absorbs_children) {
        return;
    }

    let resource = walk.resource(index);
    let display = (leaf.describe)(walk, resource);
    let timestamp = leaf_date(resource, leaf, parent, walk.context.bundle_date());
    let reference = TrackedResourceReference {
        resource_type: leaf.kind,
        resource_id: walk.tracked_id(index),
        timestamp,
        title: title(leaf.kind, display),
    };
    walk.track(reference);
}

fn leaf_date(
    resource: &Value,
    leaf: &Leaf,
    parent: Option<&ParentContext>,
    bundle_date: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let own = first_date(resource, leaf.date_paths);
    if own.is_some() || !leaf.contextual_date {
        return own;
    }
    parent.and_then(|p| p.date).or(bundle_date)
}

fn code_display(_: &Traversal<'_>, resource: &Value) -> Option<String> {
    resource.get("code").and_then(codeable_display)
}

fn vaccine_display(_: &Traversal<'_>, resource: &Value) -> Option<String> {
    resource.get("vaccineCode").and_then(codeable_display)
}

fn recommendation_display(_: &Traversal<'_>, resource: &Value) -> Option<String> {
    let recommendations = resource.get("recommendation").and_then(Value::as_array)?;
    recommendations.iter().find_map(|r| {
        r.get("vaccineCode")
            .and_then(|codes| match codes {
                Value::Array(items) => items.iter().find_map(codeable_display),
                single => codeable_display(single),
            })
            .or_else(|| r.get("targetDisease").and_then(codeable_display))
    })
}

/// Inline medication concept, else the referenced Medication's code, else
/// the reference display
fn medication_display(walk: &Traversal<'_>, resource: &Value) -> Option<String> {
    if let Some(display) = resource.get("medicationCodeableConcept").and_then(codeable_display) {
        return Some(display);
    }

    let referenced = str_at(resource, "/medicationReference/reference")
        .and_then(|r| walk.context.resolve(r))
        .and_then(|i| walk.resource(i).get("code"))
        .and_then(codeable_display);

    referenced.or_else(|| str_at(resource, "/medicationReference/display").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use crate::fhir::handlers::dispatch_table;
    use crate::fhir::walker::Traversal;
    use crate::fhir::ResourceType;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn walk(resources: Vec<Value>, bundle_date: Option<chrono::DateTime<Utc>>) -> Vec<crate::models::TrackedResourceReference> {
        let table = dispatch_table();
        let urls = vec![None; resources.len()];
        let mut traversal = Traversal::new(resources, urls, bundle_date, &table);
        traversal.run();
        traversal.context.tracker.tracked().to_vec()
    }

    #[test]
    fn test_condition_title_and_date_precedence() {
        let tracked = walk(
            vec![json!({
                "resourceType": "Condition",
                "id": "c1",
                "code": {"text": "Hypertension"},
                "onsetDateTime": "2019-06-01",
                "onsetPeriod": {"start": "2018-01-01"}
            })],
            None,
        );

        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].resource_type, ResourceType::Condition);
        assert_eq!(tracked[0].resource_id, "c1");
        assert_eq!(tracked[0].title, "Condition: Hypertension");
        assert_eq!(
            tracked[0].timestamp,
            Some(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_observation_without_date() {
        let tracked = walk(
            vec![json!({"resourceType": "Observation", "id": "o1", "code": {"coding": [{"display": "Pulse"}]}})],
            None,
        );
        assert_eq!(tracked[0].title, "Observation: Pulse");
        assert_eq!(tracked[0].timestamp, None);
    }

    #[test]
    fn test_medication_request_falls_back_to_bundle_date() {
        let bundle_date = Utc.with_ymd_and_hms(2021, 2, 3, 4, 5, 6).unwrap();
        let tracked = walk(
            vec![
                json!({
                    "resourceType": "MedicationRequest",
                    "id": "m1",
                    "medicationReference": {"reference": "Medication/med1"}
                }),
                json!({"resourceType": "Medication", "id": "med1", "code": {"text": "Paracetamol 500mg"}}),
            ],
            Some(bundle_date),
        );

        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].title, "Medication: Paracetamol 500mg");
        assert_eq!(tracked[0].timestamp, Some(bundle_date));
    }

    #[test]
    fn test_immunization_records() {
        let tracked = walk(
            vec![
                json!({
                    "resourceType": "Immunization",
                    "id": "i1",
                    "vaccineCode": {"text": "BCG"},
                    "recorded": "2020-01-01"
                }),
                json!({
                    "resourceType": "ImmunizationRecommendation",
                    "id": "r1",
                    "date": "2020-02-01",
                    "recommendation": [{"vaccineCode": [{"text": "OPV"}]}]
                }),
            ],
            None,
        );

        assert_eq!(tracked[0].title, "Immunization: BCG");
        assert_eq!(
            tracked[0].timestamp,
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(tracked[1].title, "Immunization Recommendation: OPV");
    }

    #[test]
    fn test_duplicate_resource_tracked_once() {
        let condition = json!({"resourceType": "Condition", "id": "dup", "code": {"text": "Asthma"}});
        let tracked = walk(vec![condition.clone(), condition], None);
        assert_eq!(tracked.len(), 1);
    }
}
