//! BatchArchiver - 処理済み ledger の格納
//!
//! バッチ = 同じ ledger ファイルに記録するキュー要素の集まり。
//! run の後、触れた ledger を processed フォルダへアップロードする。
//! バッチに `Failed` の要素が 1 つでもあれば failed フォルダ
//! (`{path}/{ledger stem}/` も一緒に) へ。最後に intake 側のコピーを削除する。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{ArchiveError, LibraryError, TaskStatus};
use crate::impls::xlsx_ledger::locate;
use crate::ports::{DocumentLibrary, WorkQueue};

/// Library folders, relative to the library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFolders {
    pub intake: String,
    pub processed: String,
    pub failed: String,
}

impl Default for ArchiveFolders {
    fn default() -> Self {
        Self {
            intake: String::new(),
            processed: "Behandlet".to_string(),
            failed: "Fejlet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedLedger {
    pub file_name: String,
    pub destination: Destination,
    /// Files uploaded from the local attachment folder.
    pub attachments: usize,
}

pub struct BatchArchiver {
    queue: Arc<dyn WorkQueue>,
    library: Arc<dyn DocumentLibrary>,
    work_dir: PathBuf,
    folders: ArchiveFolders,
}

impl BatchArchiver {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        library: Arc<dyn DocumentLibrary>,
        work_dir: impl Into<PathBuf>,
        folders: ArchiveFolders,
    ) -> Self {
        Self {
            queue,
            library,
            work_dir: work_dir.into(),
            folders,
        }
    }

    /// Archive each ledger (as named in the queue elements' `filename`).
    pub async fn archive<'a>(
        &self,
        ledgers: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<ArchivedLedger>, ArchiveError> {
        let failed = self.queue.list(Some(TaskStatus::Failed)).await?;
        let mut archived = Vec::new();
        for ledger in ledgers {
            let batch_failed = failed.iter().any(|task| task.filename() == Some(ledger));
            archived.push(self.archive_one(ledger, batch_failed).await?);
        }
        Ok(archived)
    }

    async fn archive_one(
        &self,
        ledger: &str,
        batch_failed: bool,
    ) -> Result<ArchivedLedger, ArchiveError> {
        let path = locate(&self.work_dir, ledger)?;
        let file_name = file_name(&path);

        let (destination, attachments) = if batch_failed {
            info!(ledger = %file_name, folder = %self.folders.failed, "batch has failures");
            self.library
                .upload_file(&self.folders.failed, &file_name, &path)
                .await?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.clone());
            let uploaded = self.upload_attachments(&stem).await?;
            (Destination::Failed, uploaded)
        } else {
            info!(ledger = %file_name, folder = %self.folders.processed, "batch processed");
            self.library
                .upload_file(&self.folders.processed, &file_name, &path)
                .await?;
            (Destination::Processed, 0)
        };

        if let Err(e) = self
            .library
            .delete_file(&self.folders.intake, &file_name)
            .await
        {
            warn!(ledger = %file_name, error = %e, "could not delete intake copy");
        }

        Ok(ArchivedLedger {
            file_name,
            destination,
            attachments,
        })
    }

    /// Mirror `{work_dir}/{stem}/` into `{failed}/{stem}`; a missing local
    /// folder uploads nothing.
    async fn upload_attachments(&self, stem: &str) -> Result<usize, ArchiveError> {
        let remote = format!("{}/{}", self.folders.failed.trim_end_matches('/'), stem);
        self.library.create_folder(&remote).await?;

        let local = self.work_dir.join(stem);
        let mut entries = match tokio::fs::read_dir(&local).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(io_error(&local, source)),
        };

        let mut uploaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&local, source))?
        {
            let is_file = entry.file_type().await.is_ok_and(|kind| kind.is_file());
            if !is_file {
                continue;
            }
            let entry_path = entry.path();
            self.library
                .upload_file(&remote, &file_name(&entry_path), &entry_path)
                .await?;
            uploaded += 1;
        }
        Ok(uploaded)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn io_error(path: &Path, source: std::io::Error) -> ArchiveError {
    LibraryError::Io {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LedgerError;
    use crate::domain::task::sample_data;
    use crate::impls::{InMemoryWorkQueue, LocalDocumentLibrary};

    struct Setup {
        queue: Arc<InMemoryWorkQueue>,
        work: tempfile::TempDir,
        library_root: tempfile::TempDir,
    }

    impl Setup {
        fn new() -> Self {
            let work = tempfile::tempdir().unwrap();
            let library_root = tempfile::tempdir().unwrap();
            std::fs::write(work.path().join("udbetaling.xlsx"), b"ledger").unwrap();
            std::fs::write(library_root.path().join("udbetaling.xlsx"), b"intake").unwrap();
            Self {
                queue: Arc::new(InMemoryWorkQueue::new("outlay")),
                work,
                library_root,
            }
        }

        fn archiver(&self) -> BatchArchiver {
            BatchArchiver::new(
                self.queue.clone(),
                Arc::new(LocalDocumentLibrary::new(self.library_root.path())),
                self.work.path(),
                ArchiveFolders::default(),
            )
        }

        async fn finish(&self, uuid: &str, status: TaskStatus) {
            self.queue.enqueue(sample_data(uuid), None).await.unwrap();
            let task = self.queue.next().await.unwrap().unwrap();
            self.queue.set_status(task.id, status, None).await.unwrap();
        }

        fn library(&self, relative: &str) -> PathBuf {
            self.library_root.path().join(relative)
        }
    }

    #[tokio::test]
    async fn clean_batch_goes_to_processed() {
        let setup = Setup::new();
        setup.finish("a", TaskStatus::Done).await;

        let archived = setup.archiver().archive(["udbetaling.xlsx"]).await.unwrap();

        assert_eq!(
            archived,
            vec![ArchivedLedger {
                file_name: "udbetaling.xlsx".into(),
                destination: Destination::Processed,
                attachments: 0,
            }]
        );
        assert_eq!(std::fs::read(setup.library("Behandlet/udbetaling.xlsx")).unwrap(), b"ledger");
        assert!(!setup.library("udbetaling.xlsx").exists());
        assert!(!setup.library("Fejlet").exists());
    }

    #[tokio::test]
    async fn failed_batch_takes_its_attachment_folder_along() {
        let setup = Setup::new();
        setup.finish("a", TaskStatus::Done).await;
        setup.finish("b", TaskStatus::Failed).await;
        let attachments = setup.work.path().join("udbetaling");
        std::fs::create_dir(&attachments).unwrap();
        std::fs::write(attachments.join("receipt_b.pdf"), b"%PDF").unwrap();
        std::fs::create_dir(attachments.join("nested")).unwrap();

        let archived = setup.archiver().archive(["udbetaling.xlsx"]).await.unwrap();

        assert_eq!(archived[0].destination, Destination::Failed);
        assert_eq!(archived[0].attachments, 1);
        assert!(setup.library("Fejlet/udbetaling.xlsx").exists());
        assert!(setup.library("Fejlet/udbetaling/receipt_b.pdf").exists());
        assert!(!setup.library("Fejlet/udbetaling/nested").exists());
        assert!(!setup.library("Behandlet").exists());
    }

    #[tokio::test]
    async fn failed_batch_without_local_folder_creates_an_empty_one() {
        let setup = Setup::new();
        setup.finish("b", TaskStatus::Failed).await;

        let archived = setup.archiver().archive(["udbetaling.xlsx"]).await.unwrap();

        assert_eq!(archived[0].attachments, 0);
        assert!(setup.library("Fejlet/udbetaling").is_dir());
    }

    #[tokio::test]
    async fn missing_intake_copy_is_tolerated() {
        let setup = Setup::new();
        std::fs::remove_file(setup.library("udbetaling.xlsx")).unwrap();

        let archived = setup.archiver().archive(["udbetaling.xlsx"]).await.unwrap();

        assert_eq!(archived[0].destination, Destination::Processed);
    }

    #[tokio::test]
    async fn missing_local_ledger_is_an_error() {
        let setup = Setup::new();

        let err = setup.archiver().archive(["andet.xlsx"]).await.unwrap_err();

        assert!(matches!(err, ArchiveError::Ledger(LedgerError::NotFound { .. })));
    }
}
