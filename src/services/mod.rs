//! Application services behind the HTTP routes and the queue workers

pub mod dataflow;
pub mod ingestor;
pub mod pipeline;
pub mod request;

pub use dataflow::{Attempt, DataFlowProcessor, CLAIM_LEASE, UNASSIGNED_CONSENT};
pub use ingestor::{EntryResolver, NotificationIngestor, ResolvedEntry};
pub use pipeline::{build_processor, connect_store};
pub use request::DataFlowRequestService;
