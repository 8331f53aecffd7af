pub mod archive;
pub mod browser;
pub mod enumeration;
pub mod hierarchy;
pub mod metadata;
pub mod orchestrator;
pub mod size;

use crate::store::StorageError;
use metadata::MetadataError;
use thiserror::Error;

pub use browser::BrowserService;

/// Failure of an operation that touches both the object store and the
/// metadata database.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}
