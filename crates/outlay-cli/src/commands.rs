//! Subcommand implementations: wiring config into the core adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::info;

use outlay_core::app::{BatchArchiver, QueueCounts, TaskProcessor, WorkerLoop};
use outlay_core::config::{self, LibraryBackend, LibrarySection, RobotConfig};
use outlay_core::domain::{TaskId, TaskStatus};
use outlay_core::impls::{
    ChromeSessions, CprCipher, LocalDocumentLibrary, OpusTicketSubmitter, Os2FormsFetcher,
    SharePointLibrary, SqliteWorkQueue, XlsxLedger,
};
use outlay_core::ports::{DocumentLibrary, SystemClock, UlidGenerator, WorkQueue};

pub fn work_dir(path: Option<PathBuf>, process_arguments: Option<&str>) -> Result<PathBuf> {
    let dir = match (path, process_arguments) {
        (Some(path), _) => path,
        (None, Some(raw)) => config::work_dir_from_process_arguments(raw)?,
        (None, None) => bail!("either --path or --process-arguments is required"),
    };
    if !dir.is_dir() {
        bail!("working directory {} does not exist", dir.display());
    }
    Ok(dir)
}

fn load(config_path: &Path) -> Result<RobotConfig> {
    RobotConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))
}

fn open_queue(config: &RobotConfig) -> Result<Arc<dyn WorkQueue>> {
    let queue = SqliteWorkQueue::open(&config.queue.database, config.robot.queue_name.clone())
        .with_context(|| format!("opening queue database {}", config.queue.database.display()))?;
    Ok(Arc::new(queue))
}

fn open_library(section: &LibrarySection) -> Result<Arc<dyn DocumentLibrary>> {
    let library: Arc<dyn DocumentLibrary> = match &section.backend {
        LibraryBackend::Local { root } => Arc::new(LocalDocumentLibrary::new(root)),
        LibraryBackend::Sharepoint {
            site_url,
            library_path,
            token_env,
        } => Arc::new(SharePointLibrary::new(
            site_url.clone(),
            library_path.clone(),
            config::secret(token_env)?,
        )),
    };
    Ok(library)
}

pub async fn run(config_path: &Path, work_dir: &Path, no_archive: bool) -> Result<()> {
    let config = load(config_path)?;
    let queue = open_queue(&config)?;

    let fetcher = Os2FormsFetcher::new(config::secret(&config.os2forms.api_key_env)?);
    let cipher = CprCipher::new(&config::secret(&config.browser.encryption_key_env)?)?;
    let submitter = OpusTicketSubmitter::new(config.opus_settings(), cipher);
    let sessions = ChromeSessions::new(config.chrome_settings());

    let processor = TaskProcessor::new(
        queue.clone(),
        Arc::new(fetcher),
        Arc::new(submitter),
        Arc::new(XlsxLedger::new(work_dir)),
        work_dir,
    );
    let worker = WorkerLoop::new(
        queue.clone(),
        Arc::new(sessions),
        processor,
        Arc::new(UlidGenerator::new(SystemClock)),
        config.loop_settings(),
    );

    let report = worker.run().await?;
    println!(
        "{}: {} element(s) in {} cycle(s), {} process error(s)",
        report.run_id, report.task_count, report.cycles, report.error_count
    );

    match (&config.library, no_archive) {
        (Some(section), false) if !report.ledgers.is_empty() => {
            let archiver = BatchArchiver::new(
                queue.clone(),
                open_library(section)?,
                work_dir,
                section.folders(),
            );
            for filed in archiver
                .archive(report.ledgers.iter().map(String::as_str))
                .await
                .context("filing ledgers")?
            {
                println!(
                    "{} -> {:?} ({} attachment(s))",
                    filed.file_name, filed.destination, filed.attachments
                );
            }
        }
        (None, false) => info!("no document library configured; ledgers stay local"),
        _ => {}
    }

    let counts = QueueCounts::collect(queue.as_ref()).await?;
    println!("{counts} outstanding={}", counts.outstanding());
    Ok(())
}

/// One object is one request; an array is many.
fn payloads(content: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(content).context("payload is not JSON")?;
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => bail!("expected a JSON object or array, got {other}"),
    };
    if let Some(bad) = items.iter().find(|item| !item.is_object()) {
        bail!("every request must be a JSON object, got {bad}");
    }
    Ok(items)
}

pub async fn enqueue(config_path: &Path, file: &Path) -> Result<()> {
    let config = load(config_path)?;
    let queue = open_queue(&config)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    for data in payloads(&content)? {
        let reference = data.get("uuid").and_then(Value::as_str).map(str::to_string);
        let id = queue.enqueue(data, reference).await?;
        println!("{id}");
    }
    Ok(())
}

pub async fn requeue(
    config_path: &Path,
    ids: &[String],
    all_failed: bool,
    stale: bool,
) -> Result<()> {
    let config = load(config_path)?;
    let queue = open_queue(&config)?;

    let mut targets: Vec<TaskId> = ids
        .iter()
        .map(|raw| raw.parse().with_context(|| format!("invalid id '{raw}'")))
        .collect::<Result<_>>()?;
    let selected = [(all_failed, TaskStatus::Failed), (stale, TaskStatus::InProgress)];
    for (_, status) in selected.into_iter().filter(|(wanted, _)| *wanted) {
        targets.extend(queue.list(Some(status)).await?.into_iter().map(|task| task.id));
    }

    for id in targets {
        queue.requeue(id).await?;
        println!("requeued {id}");
    }
    Ok(())
}

pub async fn status(config_path: &Path, failed: bool) -> Result<()> {
    let config = load(config_path)?;
    let queue = open_queue(&config)?;

    let counts = QueueCounts::collect(queue.as_ref()).await?;
    println!("{}: {counts}", queue.name());
    if counts.get(TaskStatus::InProgress) > 0 {
        println!(
            "IN_PROGRESS elements not held by a running worker were left by a killed run; \
             `outlay requeue --stale` puts them back"
        );
    }
    if failed {
        for task in queue.list(Some(TaskStatus::Failed)).await? {
            println!(
                "{}\t{}\t{}",
                task.id,
                task.uuid().unwrap_or("-"),
                task.message.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
