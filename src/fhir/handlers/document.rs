//! Attachment carriers

use crate::fhir::context::ParentContext;
use crate::fhir::resource::{as_list, ResourceType};
use crate::fhir::walker::Traversal;
use crate::models::TrackedResourceReference;

pub(super) fn handle_document_reference(
    walk: &mut Traversal<'_>,
    index: usize,
    _parent: Option<&ParentContext>,
) {
    if !walk.begin(index) {
        return;
    }

    let contents = as_list(walk.resource(index).get("content"))
        .into_iter()
        .map(|c| c.get("attachment").is_some())
        .collect::<Vec<_>>();
    let listed = matches!(walk.resource(index).get("content"), Some(serde_json::Value::Array(_)));

    for (i, has_attachment) in contents.into_iter().enumerate() {
        if !has_attachment {
            continue;
        }
        let pointer = if listed {
            format!("/content/{i}/attachment")
        } else {
            "/content/attachment".to_string()
        };
        walk.queue_attachment(index, pointer, false);
    }
}

/// Binary: the resource itself is the attachment (`contentType` + `data`)
pub(super) fn handle_binary(walk: &mut Traversal<'_>, index: usize, parent: Option<&ParentContext>) {
    if !walk.begin(index) {
        return;
    }

    walk.queue_attachment(index, String::new(), false);

    if parent.is_none() {
        let reference = TrackedResourceReference {
            resource_type: ResourceType::Binary,
            resource_id: walk.tracked_id(index),
            timestamp: None,
            title: ResourceType::Binary.label().to_string(),
        };
        walk.track(reference);
    }
}
