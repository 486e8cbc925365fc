//! FHIR resource types and JSON accessors
//!
//! Resources are kept as `serde_json::Value` so that attachment references
//! can be rewritten in place and unknown content survives untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resource types with a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Composition,
    Condition,
    Observation,
    MedicationRequest,
    Immunization,
    ImmunizationRecommendation,
    DiagnosticReport,
    DocumentReference,
    Binary,
}

impl ResourceType {
    /// All handled types
    pub const ALL: [ResourceType; 9] = [
        Self::Composition,
        Self::Condition,
        Self::Observation,
        Self::MedicationRequest,
        Self::Immunization,
        Self::ImmunizationRecommendation,
        Self::DiagnosticReport,
        Self::DocumentReference,
        Self::Binary,
    ];

    /// Parse a FHIR `resourceType` value; `None` for types without a handler
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composition => "Composition",
            Self::Condition => "Condition",
            Self::Observation => "Observation",
            Self::MedicationRequest => "MedicationRequest",
            Self::Immunization => "Immunization",
            Self::ImmunizationRecommendation => "ImmunizationRecommendation",
            Self::DiagnosticReport => "DiagnosticReport",
            Self::DocumentReference => "DocumentReference",
            Self::Binary => "Binary",
        }
    }

    /// Human readable label used in timeline titles
    pub fn label(&self) -> &'static str {
        match self {
            Self::Composition => "Composition",
            Self::Condition => "Condition",
            Self::Observation => "Observation",
            Self::MedicationRequest => "Medication",
            Self::Immunization => "Immunization",
            Self::ImmunizationRecommendation => "Immunization Recommendation",
            Self::DiagnosticReport => "Diagnostic Report",
            Self::DocumentReference => "Document",
            Self::Binary => "Binary",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `resourceType` of a resource
pub fn resource_type_name(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Logical id of a resource
pub fn resource_id(resource: &Value) -> Option<&str> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// String at a JSON pointer
pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Display text of a CodeableConcept: `text`, then the first coding display,
/// then the first coding code.
pub fn codeable_display(concept: &Value) -> Option<String> {
    if let Some(text) = str_at(concept, "/text") {
        return Some(text.to_string());
    }

    let codings = concept.get("coding").and_then(Value::as_array)?;
    codings
        .iter()
        .find_map(|c| str_at(c, "/display"))
        .or_else(|| codings.iter().find_map(|c| str_at(c, "/code")))
        .map(str::to_string)
}

/// All coding codes of a CodeableConcept
pub fn coding_codes(concept: &Value) -> impl Iterator<Item = &str> {
    concept
        .get("coding")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("code").and_then(Value::as_str))
}

/// Treat a field that may be a single object or an array as a slice of values
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// `reference` strings of a list of Reference elements
pub fn references(value: Option<&Value>) -> Vec<String> {
    as_list(value)
        .into_iter()
        .filter_map(|r| r.get("reference").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_type_lookup() {
        assert_eq!(
            ResourceType::from_name("DiagnosticReport"),
            Some(ResourceType::DiagnosticReport)
        );
        assert_eq!(ResourceType::from_name("Patient"), None);
        assert_eq!(ResourceType::MedicationRequest.label(), "Medication");
    }

    #[test]
    fn test_codeable_display_precedence() {
        assert_eq!(
            codeable_display(&json!({"text": "Fever", "coding": [{"display": "Pyrexia"}]})),
            Some("Fever".to_string())
        );
        assert_eq!(
            codeable_display(&json!({"coding": [{"code": "386661006"}, {"display": "Pyrexia"}]})),
            Some("Pyrexia".to_string())
        );
        assert_eq!(
            codeable_display(&json!({"coding": [{"code": "386661006"}]})),
            Some("386661006".to_string())
        );
        assert_eq!(codeable_display(&json!({})), None);
    }

    #[test]
    fn test_as_list_accepts_single_object() {
        let single = json!({"coding": [{"code": "RAD"}]});
        assert_eq!(as_list(Some(&single)).len(), 1);
        assert_eq!(as_list(Some(&json!([single.clone(), single]))).len(), 2);
        assert!(as_list(None).is_empty());
    }
}
