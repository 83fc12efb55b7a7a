//! DocumentLibrary port - where finished batches are filed.
//!
//! Folders are library-relative paths such as `Behandlet` or `Fejlet/udbetaling`.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::LibraryError;

#[async_trait]
pub trait DocumentLibrary: Send + Sync {
    /// Upload `local` as `{folder}/{name}`, replacing an existing file.
    async fn upload_file(&self, folder: &str, name: &str, local: &Path)
    -> Result<(), LibraryError>;

    /// Create `folder` (and parents); existing folders are fine.
    async fn create_folder(&self, folder: &str) -> Result<(), LibraryError>;

    async fn delete_file(&self, folder: &str, name: &str) -> Result<(), LibraryError>;
}
