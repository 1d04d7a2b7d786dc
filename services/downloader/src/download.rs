//! Streaming of response bodies to local files.

use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use metrics::counter;
use reqwest::Response;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use lizard_common::{LizardError, LizardResult};

const PROGRESS_LOG_INTERVAL: u64 = 16 * 1024 * 1024;

/// Sibling path the body is written to before it is moved into place.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

/// Stream `response` to `target`, returning the number of bytes written.
#[instrument(skip(response), fields(url = %response.url(), path = %target.display()))]
pub async fn stream_to_file(response: Response, target: &Path) -> LizardResult<u64> {
    let expected = response.content_length();
    write_stream(response.bytes_stream(), expected, target).await
}

/// Write a chunked body to `target`.
///
/// The body lands in a `.partial` file first so that `target` only ever
/// holds a complete download. A body whose length differs from `expected`
/// is discarded.
pub async fn write_stream<S, E>(stream: S, expected: Option<u64>, target: &Path) -> LizardResult<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let temp_path = partial_path(target);
    let started = Instant::now();

    let mut file = File::create(&temp_path).await?;
    futures::pin_mut!(stream);
    let mut downloaded = 0u64;
    let mut since_log = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                fs::remove_file(&temp_path).await.ok();
                return Err(LizardError::Transport(format!("Error reading response chunk: {}", e)));
            }
        };
        file.write_all(&chunk).await?;

        downloaded += chunk.len() as u64;
        since_log += chunk.len() as u64;
        if since_log >= PROGRESS_LOG_INTERVAL {
            since_log = 0;
            debug!(downloaded = downloaded, total = ?expected, "Download progress");
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(expected) = expected {
        if expected != downloaded {
            fs::remove_file(&temp_path).await.ok();
            return Err(LizardError::Transport(format!(
                "Download size mismatch: expected {} bytes, got {}",
                expected, downloaded
            )));
        }
    }

    fs::rename(&temp_path, target).await?;

    counter!("lizard_files_downloaded_total").increment(1);
    counter!("lizard_downloaded_bytes_total").increment(downloaded);
    info!(
        bytes = downloaded,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Download completed"
    );
    Ok(downloaded)
}
