//! Resource handlers registered in the walker's dispatch table

mod clinical;
mod composition;
mod diagnostic_report;
mod document;

use super::resource::ResourceType;
use super::walker::{DispatchTable, Handler};

/// Build the fixed type to handler table
pub fn dispatch_table() -> DispatchTable {
    let entries: [(ResourceType, Handler); 9] = [
        (ResourceType::Composition, composition::handle_composition),
        (ResourceType::Condition, clinical::handle_condition),
        (ResourceType::Observation, clinical::handle_observation),
        (ResourceType::MedicationRequest, clinical::handle_medication_request),
        (ResourceType::Immunization, clinical::handle_immunization),
        (
            ResourceType::ImmunizationRecommendation,
            clinical::handle_immunization_recommendation,
        ),
        (
            ResourceType::DiagnosticReport,
            diagnostic_report::handle_diagnostic_report,
        ),
        (ResourceType::DocumentReference, document::handle_document_reference),
        (ResourceType::Binary, document::handle_binary),
    ];
    entries.into_iter().collect()
}

/// `"<label>: <display>"`, or the bare label without a display
pub(crate) fn title(kind: ResourceType, display: Option<String>) -> String {
    match display {
        Some(display) => format!("{}: {}", kind.label(), display),
        None => kind.label().to_string(),
    }
}
