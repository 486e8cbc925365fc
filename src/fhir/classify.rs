//! Document type and origin classification of a walked bundle

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::resource::{coding_codes, references, resource_type_name, str_at, ResourceType};
use super::walker::Traversal;
use crate::models::DocumentType;

/// SNOMED CT codes of the supported clinical document kinds
const DOCUMENT_CODES: [(&str, DocumentType); 7] = [
    ("440545006", DocumentType::Prescription),
    ("721981007", DocumentType::DiagnosticReport),
    ("371530004", DocumentType::OPConsultation),
    ("373942005", DocumentType::DischargeSummary),
    ("41000179103", DocumentType::ImmunizationRecord),
    ("419891008", DocumentType::HealthDocumentRecord),
    ("11429006", DocumentType::WellnessRecord),
];

/// Classify by the first Composition's type coding, else by the most
/// frequent tracked resource type.
pub fn document_type(walk: &Traversal<'_>) -> DocumentType {
    let declared = compositions(walk.resources())
        .filter_map(|c| c.get("type"))
        .flat_map(coding_codes)
        .find_map(|code| {
            DOCUMENT_CODES
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(_, kind)| *kind)
        });
    if let Some(kind) = declared {
        return kind;
    }

    let mut counts: HashMap<ResourceType, usize> = HashMap::new();
    for reference in walk.context.tracker.tracked() {
        *counts.entry(reference.resource_type).or_default() += 1;
    }
    // Ties resolve in declaration order for a stable result
    ResourceType::ALL
        .iter()
        .filter_map(|t| counts.get(t).map(|n| (*t, *n)))
        .fold(None::<(ResourceType, usize)>, |best, (t, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((t, n)),
        })
        .map(|(t, _)| from_resource_type(t))
        .unwrap_or_default()
}

fn from_resource_type(kind: ResourceType) -> DocumentType {
    match kind {
        ResourceType::MedicationRequest => DocumentType::Prescription,
        ResourceType::DiagnosticReport | ResourceType::Observation => DocumentType::DiagnosticReport,
        ResourceType::Immunization | ResourceType::ImmunizationRecommendation => {
            DocumentType::ImmunizationRecord
        }
        ResourceType::DocumentReference | ResourceType::Binary => DocumentType::HealthDocumentRecord,
        ResourceType::Condition | ResourceType::Composition => DocumentType::Unknown,
    }
}

/// Names of the organizations the records come from.
///
/// Organizations referenced as custodian or author of a Composition win;
/// without those every Organization in the bundle counts.
pub fn origins(walk: &Traversal<'_>) -> Vec<String> {
    let referenced: Vec<usize> = compositions(walk.resources())
        .flat_map(|c| {
            let mut refs = references(c.get("custodian"));
            refs.extend(references(c.get("author")));
            refs
        })
        .filter_map(|r| walk.context.resolve(&r))
        .collect();

    let candidates: Vec<&Value> = if referenced.iter().any(|i| is_organization(walk.resource(*i))) {
        referenced.iter().map(|i| walk.resource(*i)).collect()
    } else {
        walk.resources().iter().collect()
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|r| is_organization(r))
        .filter_map(|r| str_at(r, "/name"))
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

fn compositions(resources: &[Value]) -> impl Iterator<Item = &Value> {
    resources
        .iter()
        .filter(|r| resource_type_name(r) == Some("Composition"))
}

fn is_organization(resource: &Value) -> bool {
    resource_type_name(resource) == Some("Organization")
}
