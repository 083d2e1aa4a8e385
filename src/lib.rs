//! Move local media files to object storage with byte-level progress.
//!
//! Two strategies sit behind [`UploadCoordinator`]:
//!
//! - **managed** ([`UploadCoordinator::upload`]): a [`TransferFacility`]
//!   performs the transfer (single or multipart) and its notifications are
//!   adapted to the listener contract.
//! - **pre-signed** ([`UploadCoordinator::upload_pre_signed`]): an
//!   application server signs a URL and the file is streamed to it with one
//!   PUT through a [`CountingStream`].
//!
//! Both report through an [`UploadListener`]: zero or more progress
//! percentages followed by exactly one completion or error.

pub mod config;
pub mod uploader;

pub use config::Config;
pub use uploader::{
    CountingStream, TransferFacility, TransferOutcome, UploadCoordinator, UploadError,
    UploadHandle, UploadListener,
};
