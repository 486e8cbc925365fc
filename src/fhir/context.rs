//! Per-bundle traversal state

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::resource::{resource_id, resource_type_name, ResourceType};
use crate::models::TrackedResourceReference;

/// Deduplicated, append-only index of clinically relevant resources
#[derive(Debug, Default)]
pub struct ResourceTracker {
    processed: HashSet<String>,
    tracked: Vec<TrackedResourceReference>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    /// Mark a resource identity as processed. Returns false if it already was.
    pub fn mark_processed(&mut self, key: impl Into<String>) -> bool {
        self.processed.insert(key.into())
    }

    pub fn track(&mut self, reference: TrackedResourceReference) {
        self.tracked.push(reference);
    }

    pub fn tracked(&self) -> &[TrackedResourceReference] {
        &self.tracked
    }

    /// Latest timestamp among tracked resources, else `fallback`
    pub fn latest_resource_date(
        &self,
        fallback: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        self.tracked
            .iter()
            .filter_map(|r| r.timestamp)
            .max()
            .or(fallback)
    }

    /// Tracked resources ordered by timestamp, undated ones last
    pub fn into_sorted(mut self) -> Vec<TrackedResourceReference> {
        self.tracked
            .sort_by_key(|r| (r.timestamp.is_none(), r.timestamp));
        self.tracked
    }
}

/// Context handed to a child handler by the resource that referenced it
#[derive(Debug, Clone)]
pub struct ParentContext {
    pub resource_type: ResourceType,
    pub id: String,
    /// Display text of the parent's coded type, if any
    pub type_display: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl ParentContext {
    /// Whether children reached through this parent are represented by it
    /// rather than tracked on their own. A report stands for its results; a
    /// composition's sections are tracked individually with its context.
    pub fn absorbs_children(&self) -> bool {
        self.resource_type == ResourceType::DiagnosticReport
    }
}

/// State owned by a single bundle traversal
#[derive(Debug)]
pub struct BundleContext {
    pub tracker: ResourceTracker,
    bundle_date: Option<DateTime<Utc>>,
    /// fullUrl and `Type/id` forms mapped to entry index
    references: HashMap<String, usize>,
}

impl BundleContext {
    /// Build the context for a bundle's resources. `full_urls[i]` is the
    /// `fullUrl` of entry `i`, if present.
    pub fn new(
        resources: &[Value],
        full_urls: &[Option<String>],
        bundle_date: Option<DateTime<Utc>>,
    ) -> Self {
        let mut references = HashMap::new();
        for (index, resource) in resources.iter().enumerate() {
            if let Some(Some(url)) = full_urls.get(index) {
                references.entry(url.clone()).or_insert(index);
            }
            if let (Some(kind), Some(id)) = (resource_type_name(resource), resource_id(resource)) {
                references.entry(format!("{kind}/{id}")).or_insert(index);
            }
        }

        Self {
            tracker: ResourceTracker::new(),
            bundle_date,
            references,
        }
    }

    pub fn bundle_date(&self) -> Option<DateTime<Utc>> {
        self.bundle_date
    }

    /// Resolve a reference string to an entry index.
    ///
    /// Exact fullUrl matches win; otherwise the trailing `Type/id` of the
    /// reference is looked up, ignoring any `_history` suffix.
    pub fn resolve(&self, reference: &str) -> Option<usize> {
        if let Some(index) = self.references.get(reference) {
            return Some(*index);
        }

        let trimmed = match reference.find("/_history/") {
            Some(pos) => &reference[..pos],
            None => reference,
        };
        let mut segments = trimmed.rsplit('/');
        let id = segments.next()?;
        let kind = segments.next()?;
        self.references.get(&format!("{kind}/{id}")).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn reference(id: &str, day: Option<u32>) -> TrackedResourceReference {
        TrackedResourceReference {
            resource_type: ResourceType::Condition,
            resource_id: id.to_string(),
            timestamp: day.map(|d| Utc.with_ymd_and_hms(2022, 3, d, 0, 0, 0).unwrap()),
            title: "Condition".to_string(),
        }
    }

    #[test]
    fn test_tracker_dedup_and_latest() {
        let mut tracker = ResourceTracker::new();
        assert!(tracker.mark_processed("Condition/1"));
        assert!(!tracker.mark_processed("Condition/1"));
        assert!(tracker.is_processed("Condition/1"));

        let fallback = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(tracker.latest_resource_date(Some(fallback)), Some(fallback));

        tracker.track(reference("a", Some(4)));
        tracker.track(reference("b", None));
        tracker.track(reference("c", Some(9)));
        assert_eq!(
            tracker.latest_resource_date(Some(fallback)),
            Some(Utc.with_ymd_and_hms(2022, 3, 9, 0, 0, 0).unwrap())
        );

        let ids: Vec<_> = tracker
            .into_sorted()
            .into_iter()
            .map(|r| r.resource_id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_reference_resolution() {
        let resources = vec![
            json!({"resourceType": "Condition", "id": "c1"}),
            json!({"resourceType": "Observation"}),
        ];
        let urls = vec![
            Some("urn:uuid:aaa".to_string()),
            Some("urn:uuid:bbb".to_string()),
        ];
        let context = BundleContext::new(&resources, &urls, None);

        assert_eq!(context.resolve("urn:uuid:bbb"), Some(1));
        assert_eq!(context.resolve("Condition/c1"), Some(0));
        assert_eq!(context.resolve("https://hip.example/fhir/Condition/c1"), Some(0));
        assert_eq!(context.resolve("Condition/c1/_history/2"), Some(0));
        assert_eq!(context.resolve("Condition/missing"), None);
        assert_eq!(context.resolve("nothing"), None);
    }
}
