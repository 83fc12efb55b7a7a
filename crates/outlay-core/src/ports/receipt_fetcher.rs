//! ReceiptFetcher port - リクエストの領収書 (添付ファイル) を取得

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::{FetchError, OutlayRequest};

#[async_trait]
pub trait ReceiptFetcher: Send + Sync {
    /// Download the attachment into `dir` and return the local path
    /// (`{dir}/receipt_{uuid}.pdf`).
    ///
    /// Network and filesystem failures are reported distinctly from missing
    /// data (no attachment URL), which retrying cannot fix.
    async fn fetch(&self, request: &OutlayRequest, dir: &Path) -> Result<PathBuf, FetchError>;
}
