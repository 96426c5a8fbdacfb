//! Model checkpoint provisioning.
//!
//! Checkpoints live in the torch hub cache
//! (`~/.cache/torch/hub/checkpoints`) so they are shared with other tools
//! that use the same weights. A missing checkpoint is downloaded once;
//! the download streams into a `.part` sibling that is renamed into place
//! only after the body has been fully written.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use landseg_pipeline::ModelType;

/// Where the HQ checkpoints are published.
pub const CHECKPOINT_BASE_URL: &str = "https://huggingface.co/lkeab/hq-sam/resolve/main";

/// Whether a missing checkpoint may be fetched from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadPolicy {
    #[default]
    Download,
    /// Fail instead of downloading.
    Offline,
}

/// Errors from checkpoint provisioning.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The checkpoint is absent and downloading is disabled.
    #[error("checkpoint {} not found and downloads are disabled", .0.display())]
    Missing(PathBuf),

    /// The HTTP request failed or returned an error status.
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Creating the cache directory or writing the file failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Download URL of the checkpoint for `model`.
#[must_use]
pub fn checkpoint_url(model: ModelType) -> String {
    format!("{CHECKPOINT_BASE_URL}/{}", model.checkpoint_file_name())
}

/// The torch hub checkpoint directory.
///
/// Falls back to a relative `.cache/torch/hub/checkpoints` when the home
/// directory cannot be determined.
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".cache")
        .join("torch")
        .join("hub")
        .join("checkpoints")
}

/// Default local path of the checkpoint for `model`.
#[must_use]
pub fn default_checkpoint_path(model: ModelType) -> PathBuf {
    cache_dir().join(model.checkpoint_file_name())
}

/// A checkpoint counts as present when it is a non-empty regular file.
#[must_use]
pub fn is_present(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// Return `path`, downloading it from `url` first if it is not present.
///
/// # Errors
///
/// Returns [`CheckpointError::Missing`] under [`DownloadPolicy::Offline`],
/// [`CheckpointError::Download`] for network or HTTP failures, and
/// [`CheckpointError::Io`] if the file cannot be written.
pub fn ensure_checkpoint(
    path: &Path,
    url: &str,
    policy: DownloadPolicy,
) -> Result<PathBuf, CheckpointError> {
    if is_present(path) {
        log::debug!("using cached checkpoint {}", path.display());
        return Ok(path.to_path_buf());
    }
    if policy == DownloadPolicy::Offline {
        return Err(CheckpointError::Missing(path.to_path_buf()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    log::info!("downloading checkpoint {url} to {}", path.display());
    let bytes = download(url, path)?;
    log::info!("checkpoint downloaded ({bytes} bytes)");
    Ok(path.to_path_buf())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn download(url: &str, dest: &Path) -> Result<u64, CheckpointError> {
    let http = |source| CheckpointError::Download {
        url: url.to_string(),
        source,
    };
    // Checkpoints are gigabytes; the default request timeout is too short.
    let client = reqwest::blocking::Client::builder()
        .timeout(None)
        .build()
        .map_err(http)?;
    let mut response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(http)?;

    let part = part_path(dest);
    let io = |source| CheckpointError::Io {
        path: part.clone(),
        source,
    };
    let mut file = BufWriter::new(File::create(&part).map_err(io)?);
    let bytes = response.copy_to(&mut file).map_err(http)?;
    file.flush().map_err(io)?;
    drop(file);

    fs::rename(&part, dest).map_err(|source| CheckpointError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(bytes)
}
