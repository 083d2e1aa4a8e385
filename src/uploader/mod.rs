pub mod client;
pub mod coordinator;
pub mod counting;
pub mod direct;
pub mod error;
pub mod event;
pub mod facility;
pub mod helpers;
pub mod managed;
pub mod presign;

pub use coordinator::{UploadCoordinator, UploadHandle};
pub use counting::CountingStream;
pub use direct::DirectUploadStrategy;
pub use error::{Result, UploadError};
pub use event::{EventEmitter, ProgressState, TransferOutcome, UploadListener};
pub use facility::{
    MULTIPART_THRESHOLD, S3TransferFacility, TransferFacility, TransferNotification,
    TransferObserver, TransferState,
};
pub use managed::{ManagedUploadStrategy, UploadTarget};
pub use presign::{PreSignClient, PreSignedCredentials};
