//! Bundle traversal and resource dispatch
//!
//! The walk itself is synchronous: handlers inspect resources, record
//! tracked references and queue [`AttachmentJob`]s. Queued jobs are run
//! afterwards against the attachment extractor, which may touch disk, the
//! network and the DICOM server.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::classify;
use super::context::{BundleContext, ParentContext};
use super::date::first_date;
use super::handlers;
use super::resource::{resource_id, resource_type_name, ResourceType};
use crate::attachments::{AttachmentExtractor, AttachmentScope};
use crate::models::{DocumentType, TrackedResourceReference};
use crate::types::{DataFlowError, Result};

/// A resource handler.
///
/// Receives the traversal, the entry index of the resource and the context
/// of the resource that referenced it, if any.
pub type Handler = fn(&mut Traversal<'_>, usize, Option<&ParentContext>);

/// Type to handler lookup, built once per walker
pub type DispatchTable = HashMap<ResourceType, Handler>;

/// Attachment found during the walk, processed after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentJob {
    pub resource_index: usize,
    /// JSON pointer to the Attachment element inside the resource
    pub pointer: String,
    /// Whether the owning report is a radiology report
    pub radiology: bool,
}

/// State of one bundle walk
pub struct Traversal<'t> {
    resources: Vec<Value>,
    full_urls: Vec<Option<String>>,
    pub context: BundleContext,
    jobs: Vec<AttachmentJob>,
    table: &'t DispatchTable,
}

impl<'t> Traversal<'t> {
    pub fn new(
        resources: Vec<Value>,
        full_urls: Vec<Option<String>>,
        bundle_date: Option<DateTime<Utc>>,
        table: &'t DispatchTable,
    ) -> Self {
        let context = BundleContext::new(&resources, &full_urls, bundle_date);
        Self {
            resources,
            full_urls,
            context,
            jobs: Vec::new(),
            table,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, index: usize) -> &Value {
        &self.resources[index]
    }

    pub fn resources(&self) -> &[Value] {
        &self.resources
    }

    /// Run the handler registered for the resource at `index`.
    ///
    /// Resources of unregistered types are skipped.
    pub fn dispatch(&mut self, index: usize, parent: Option<&ParentContext>) {
        let kind = match self
            .resources
            .get(index)
            .and_then(resource_type_name)
            .and_then(ResourceType::from_name)
        {
            Some(kind) => kind,
            None => return,
        };

        let table = self.table;
        match table.get(&kind) {
            Some(handler) => handler(self, index, parent),
            None => debug!(resource_type = %kind, "No handler registered"),
        }
    }

    /// Dedup identity: `Type/id`, else the entry's fullUrl, else its position
    pub fn identity(&self, index: usize) -> String {
        let resource = &self.resources[index];
        let kind = resource_type_name(resource).unwrap_or("Resource");
        if let Some(id) = resource_id(resource) {
            return format!("{kind}/{id}");
        }
        match self.full_urls.get(index) {
            Some(Some(url)) => url.clone(),
            _ => format!("{kind}#{index}"),
        }
    }

    /// Id recorded on tracked references
    pub fn tracked_id(&self, index: usize) -> String {
        if let Some(id) = resource_id(&self.resources[index]) {
            return id.to_string();
        }
        match self.full_urls.get(index) {
            Some(Some(url)) => url.clone(),
            _ => index.to_string(),
        }
    }

    /// Check-and-mark dedup. Returns false when the resource was already
    /// processed in this bundle.
    pub fn begin(&mut self, index: usize) -> bool {
        let key = self.identity(index);
        self.context.tracker.mark_processed(key)
    }

    pub fn queue_attachment(&mut self, index: usize, pointer: String, radiology: bool) {
        self.jobs.push(AttachmentJob {
            resource_index: index,
            pointer,
            radiology,
        });
    }

    pub fn jobs(&self) -> &[AttachmentJob] {
        &self.jobs
    }

    pub fn track(&mut self, reference: TrackedResourceReference) {
        self.context.tracker.track(reference);
    }

    /// Walk every top-level entry
    pub fn run(&mut self) {
        for index in 0..self.len() {
            self.dispatch(index, None);
        }
    }
}

/// Result of walking one decrypted bundle
#[derive(Debug)]
pub struct WalkResult {
    /// Bundle JSON with attachment references rewritten
    pub content: String,
    pub tracked: Vec<TrackedResourceReference>,
    pub latest_resource_date: Option<DateTime<Utc>>,
    pub document_type: DocumentType,
    pub origins: Vec<String>,
    /// Non-fatal errors, one per failed attachment
    pub errors: Vec<String>,
    /// First attachment failure that a later attempt may get past
    pub transient_failure: Option<DataFlowError>,
}

/// Walks FHIR bundles with a fixed dispatch table
pub struct BundleWalker {
    table: DispatchTable,
    extractor: Arc<AttachmentExtractor>,
}

impl BundleWalker {
    pub fn new(extractor: Arc<AttachmentExtractor>) -> Self {
        Self {
            table: handlers::dispatch_table(),
            extractor,
        }
    }

    pub fn handles(&self, kind: ResourceType) -> bool {
        self.table.contains_key(&kind)
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Parse, walk and extract attachments for one bundle
    pub async fn walk(&self, text: &str, scope: &AttachmentScope) -> Result<WalkResult> {
        let mut bundle = parse_bundle(text)?;
        let bundle_date = first_date(&bundle, &["/timestamp", "/meta/lastUpdated"]);
        let (resources, full_urls) = split_entries(&mut bundle);

        let mut traversal = Traversal::new(resources, full_urls, bundle_date, &self.table);
        traversal.run();

        let document_type = classify::document_type(&traversal);
        let origins = classify::origins(&traversal);

        let Traversal {
            mut resources,
            context,
            jobs,
            ..
        } = traversal;

        let mut errors = Vec::new();
        let mut transient_failure = None;
        for job in jobs {
            let label = match resources.get(job.resource_index) {
                Some(resource) => describe(resource),
                None => continue,
            };
            let attachment = match resources[job.resource_index].pointer_mut(&job.pointer) {
                Some(attachment) if attachment.is_object() => attachment,
                _ => continue,
            };

            if let Err(e) = self
                .extractor
                .extract(attachment, scope, job.radiology)
                .await
            {
                warn!(resource = %label, error = %e, "Attachment extraction failed");
                errors.push(format!("{label}: {e}"));
                if e.is_transient() && transient_failure.is_none() {
                    transient_failure = Some(e);
                }
            }
        }

        restore_entries(&mut bundle, resources);

        let latest_resource_date = context.tracker.latest_resource_date(bundle_date);
        let tracked = context.tracker.into_sorted();
        let content = serde_json::to_string(&bundle)
            .map_err(|e| DataFlowError::Internal(format!("Failed to serialize bundle: {e}")))?;

        Ok(WalkResult {
            content,
            tracked,
            latest_resource_date,
            document_type,
            origins,
            errors,
            transient_failure,
        })
    }
}

/// Parse text as a FHIR JSON Bundle
pub fn parse_bundle(text: &str) -> Result<Value> {
    let bundle: Value = serde_json::from_str(text)
        .map_err(|e| DataFlowError::Parse(format!("Invalid JSON: {e}")))?;

    match resource_type_name(&bundle) {
        Some("Bundle") => Ok(bundle),
        Some(other) => Err(DataFlowError::Parse(format!(
            "Expected a Bundle, found {other}"
        ))),
        None => Err(DataFlowError::Parse("Missing resourceType".into())),
    }
}

/// Move resources out of the bundle entries, keeping their positions
pub fn split_entries(bundle: &mut Value) -> (Vec<Value>, Vec<Option<String>>) {
    let entries = match bundle.get_mut("entry").and_then(Value::as_array_mut) {
        Some(entries) => entries,
        None => return (Vec::new(), Vec::new()),
    };

    entries
        .iter_mut()
        .map(|entry| {
            let full_url = entry
                .get("fullUrl")
                .and_then(Value::as_str)
                .map(str::to_string);
            let resource = entry
                .get_mut("resource")
                .map(std::mem::take)
                .unwrap_or(Value::Null);
            (resource, full_url)
        })
        .unzip()
}

fn restore_entries(bundle: &mut Value, resources: Vec<Value>) {
    let Some(entries) = bundle.get_mut("entry").and_then(Value::as_array_mut) else {
        return;
    };

    for (entry, resource) in entries.iter_mut().zip(resources) {
        if resource.is_null() {
            continue;
        }
        if let Some(slot) = entry.get_mut("resource") {
            *slot = resource;
        }
    }
}

fn describe(resource: &Value) -> String {
    let kind = resource_type_name(resource).unwrap_or("Resource");
    match resource_id(resource) {
        Some(id) => format!("{kind}/{id}"),
        None => kind.to_string(),
    }
}
