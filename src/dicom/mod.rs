//! DICOM handoff for radiology attachments

pub mod client;
pub mod router;

pub use client::{
    DicomClient, DicomCredentials, DicomWebClient, InstanceDescriptor, MainDicomTags, StudyDescriptor,
};
pub use router::DicomRouter;
