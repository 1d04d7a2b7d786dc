//! Checks run before a download is started.

use std::path::Path;

use tokio::fs;
use tracing::debug;

use lizard_common::LizardResult;

/// Verify that files can be created in `dir` by writing and removing a
/// probe file.
pub async fn ensure_writable(dir: &Path) -> LizardResult<()> {
    let probe = dir.join(format!("{}.txt", uuid::Uuid::new_v4()));
    fs::write(&probe, b"").await?;
    fs::remove_file(&probe).await?;
    debug!(dir = %dir.display(), "Download location is writable");
    Ok(())
}
