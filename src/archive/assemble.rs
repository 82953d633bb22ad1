//! Wave-batched blob fetching into a streaming ZIP writer.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, DeflateOption, ZipEntryBuilder};
use futures::future::join_all;
use tokio::io::{AsyncWrite, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::forge::ForgeBackend;

/// Buffer between the ZIP writer task and the response body.
const PIPE_CAPACITY: usize = 64 * 1024;

/// zlib level 1, the fastest.
const DEFLATE_LEVEL: i32 = 1;

/// Everything needed to assemble one archive.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Paths to fetch, already filtered, in the order they are written.
    pub files: Vec<String>,
    /// Fetches in flight per wave.
    pub batch_size: usize,
}

/// Outcome counters of a finished assembly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyReport {
    pub added: usize,
    pub failed: usize,
    /// Uncompressed bytes written into the archive.
    pub bytes: u64,
}

/// Fetch every file of `job` and write the ZIP to `writer`.
///
/// Files are fetched `batch_size` at a time; a wave must fully settle before
/// the next one starts.  Entries are appended in job order.  A failed fetch
/// is logged and the file is left out.  Only errors writing to `writer` abort
/// the archive.
pub async fn write_archive<W>(
    forge: &dyn ForgeBackend,
    job: &ArchiveJob,
    writer: W,
) -> Result<AssemblyReport>
where
    W: AsyncWrite + Unpin,
{
    let mut zip = ZipFileWriter::with_tokio(writer);
    let mut report = AssemblyReport::default();

    for (wave, batch) in job.files.chunks(job.batch_size.max(1)).enumerate() {
        let fetched = join_all(batch.iter().map(|path| async move {
            let result = forge
                .fetch_raw(&job.owner, &job.repo, &job.branch, path)
                .await;
            (path, result)
        }))
        .await;

        for (path, result) in fetched {
            match result {
                Ok(content) => {
                    let entry = ZipEntryBuilder::new(path.clone().into(), Compression::Deflate)
                        .deflate_option(DeflateOption::Other(DEFLATE_LEVEL));
                    zip.write_entry_whole(entry, &content)
                        .await
                        .with_context(|| format!("failed to write zip entry {path}"))?;
                    report.added += 1;
                    report.bytes += content.len() as u64;
                }
                Err(e) => {
                    warn!(%path, error = %format!("{e:#}"), "failed to download file, omitting it");
                    report.failed += 1;
                }
            }
        }

        debug!(wave, files = batch.len(), added = report.added, "wave complete");
    }

    zip.close().await.context("failed to finalise zip archive")?;
    Ok(report)
}

/// Start assembling `job` in a background task.
///
/// Returns the read half of the pipe the archive is written into, plus the
/// task handle.  The reader reaches EOF once the archive is complete or the
/// task has failed; on failure the archive is truncated.
pub fn stream_archive(
    forge: Arc<dyn ForgeBackend>,
    job: ArchiveJob,
) -> (DuplexStream, JoinHandle<Result<AssemblyReport>>) {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let handle = tokio::spawn(async move { write_archive(forge.as_ref(), &job, writer).await });
    (reader, handle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
