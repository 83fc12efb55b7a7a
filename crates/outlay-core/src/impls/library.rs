//! Document library adapters.
//!
//! - **LocalDocumentLibrary**: mirrors the library into a local directory
//!   (network share, dry runs, tests)
//! - **SharePointLibrary**: SharePoint REST API with a bearer token

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::LibraryError;
use crate::ports::DocumentLibrary;

pub struct LocalDocumentLibrary {
    root: PathBuf,
}

impl LocalDocumentLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder: &str) -> PathBuf {
        folder
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LibraryError + '_ {
    move |source| LibraryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl DocumentLibrary for LocalDocumentLibrary {
    async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        local: &Path,
    ) -> Result<(), LibraryError> {
        let dir = self.folder_path(folder);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let target = dir.join(name);
        tokio::fs::copy(local, &target).await.map_err(io_err(local))?;
        debug!(from = %local.display(), to = %target.display(), "file filed");
        Ok(())
    }

    async fn create_folder(&self, folder: &str) -> Result<(), LibraryError> {
        let dir = self.folder_path(folder);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))
    }

    async fn delete_file(&self, folder: &str, name: &str) -> Result<(), LibraryError> {
        let target = self.folder_path(folder).join(name);
        tokio::fs::remove_file(&target).await.map_err(io_err(&target))
    }
}

/// SharePoint document library reached through `_api/web`.
///
/// `site_url` is the absolute site URL (`https://tenant.sharepoint.com/teams/site`)
/// and `library_path` the server-relative root of the library
/// (`/teams/site/Delte dokumenter/General`). Folders passed to the port are
/// relative to that root.
pub struct SharePointLibrary {
    client: reqwest::Client,
    site_url: String,
    library_path: String,
    token: String,
}

impl SharePointLibrary {
    pub fn new(
        site_url: impl Into<String>,
        library_path: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            site_url: site_url.into().trim_end_matches('/').to_string(),
            library_path: library_path.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn server_relative(&self, folder: &str) -> String {
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            self.library_path.clone()
        } else {
            format!("{}/{}", self.library_path, folder)
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        body: Vec<u8>,
        method_override: Option<&str>,
    ) -> Result<(), LibraryError> {
        let url = format!("{}/_api/web/{}", self.site_url, endpoint);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json;odata=verbose")
            .body(body);
        if let Some(method) = method_override {
            request = request.header("X-HTTP-Method", method).header("IF-MATCH", "*");
        }
        let response = request
            .send()
            .await
            .map_err(|e| LibraryError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(LibraryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Single quotes are doubled inside OData string literals.
fn odata_literal(s: &str) -> String {
    s.replace('\'', "''")
}

#[async_trait]
impl DocumentLibrary for SharePointLibrary {
    async fn upload_file(
        &self,
        folder: &str,
        name: &str,
        local: &Path,
    ) -> Result<(), LibraryError> {
        let content = tokio::fs::read(local).await.map_err(io_err(local))?;
        let endpoint = format!(
            "GetFolderByServerRelativeUrl('{}')/Files/add(url='{}',overwrite=true)",
            odata_literal(&self.server_relative(folder)),
            odata_literal(name),
        );
        self.post(&endpoint, content, None).await
    }

    async fn create_folder(&self, folder: &str) -> Result<(), LibraryError> {
        let endpoint = format!(
            "folders/add('{}')",
            odata_literal(&self.server_relative(folder))
        );
        self.post(&endpoint, Vec::new(), None).await
    }

    async fn delete_file(&self, folder: &str, name: &str) -> Result<(), LibraryError> {
        let endpoint = format!(
            "GetFileByServerRelativeUrl('{}/{}')",
            odata_literal(&self.server_relative(folder)),
            odata_literal(name),
        );
        self.post(&endpoint, Vec::new(), Some("DELETE")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_library_uploads_into_nested_folders() {
        let work = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let local = work.path().join("udbetaling.xlsx");
        std::fs::write(&local, b"ledger").unwrap();
        let library = LocalDocumentLibrary::new(root.path());

        library
            .upload_file("Fejlet/udbetaling", "udbetaling.xlsx", &local)
            .await
            .unwrap();

        let filed = root.path().join("Fejlet").join("udbetaling").join("udbetaling.xlsx");
        assert_eq!(std::fs::read(filed).unwrap(), b"ledger");
    }

    #[tokio::test]
    async fn local_library_deletes_and_reports_missing_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("udbetaling.xlsx"), b"ledger").unwrap();
        let library = LocalDocumentLibrary::new(root.path());

        library.delete_file("", "udbetaling.xlsx").await.unwrap();
        assert!(!root.path().join("udbetaling.xlsx").exists());

        let err = library.delete_file("", "udbetaling.xlsx").await.unwrap_err();
        assert!(matches!(err, LibraryError::Io { .. }));
    }

    #[test]
    fn sharepoint_paths_are_server_relative() {
        let library = SharePointLibrary::new(
            "https://tenant.sharepoint.com/teams/rpa/",
            "/teams/rpa/Delte dokumenter/General/Til udbetaling/",
            "token",
        );

        assert_eq!(
            library.server_relative("/Fejlet/"),
            "/teams/rpa/Delte dokumenter/General/Til udbetaling/Fejlet"
        );
        assert_eq!(
            library.server_relative(""),
            "/teams/rpa/Delte dokumenter/General/Til udbetaling"
        );
        assert_eq!(odata_literal("Kim's.xlsx"), "Kim''s.xlsx");
    }
}
