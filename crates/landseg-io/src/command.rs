//! Mask generation through an external model process.
//!
//! The segmentation model runs in its native runtime as a child process.
//! Exchange happens through a scratch directory:
//!
//! 1. The input image is written there as PNG.
//! 2. A JSON request is sent on the child's stdin:
//!
//!    ```json
//!    {"image": "...", "checkpoint": "...", "model_type": "vit_h",
//!     "device": "cpu", "output_mode": "binary_mask",
//!     "output_dir": "...", "params": {"points_per_side": 24, ...}}
//!    ```
//!
//! 3. The child writes one single-channel PNG per mask into `output_dir`
//!    and answers on stdout:
//!
//!    ```json
//!    {"masks": [{"path": "0.png", "predicted_iou": 0.97, "stability_score": 0.98}]}
//!    ```
//!
//!    Relative paths are resolved against `output_dir`.
//!
//! `tools/landseg-sam` in the repository implements this protocol on top
//! of the `segment_anything_hq` Python package; install it on `PATH` or
//! next to the `landseg` binary.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use landseg_pipeline::{
    BinaryMask, Device, GeneratorError, MaskGenerator, MaskGeneratorParams, ModelType, RgbImage,
};
use serde::{Deserialize, Serialize};

/// Program invoked when none is configured.
pub const DEFAULT_PROGRAM: &str = "landseg-sam";

#[derive(Serialize)]
struct Request<'a> {
    image: &'a Path,
    checkpoint: &'a Path,
    model_type: &'static str,
    device: String,
    output_mode: &'static str,
    output_dir: &'a Path,
    params: &'a MaskGeneratorParams,
}

#[derive(Deserialize)]
struct Response {
    masks: Vec<ResponseMask>,
}

#[derive(Deserialize)]
struct ResponseMask {
    path: PathBuf,
    #[serde(default)]
    predicted_iou: f64,
    #[serde(default)]
    stability_score: f64,
}

/// Locate `program` before anything expensive runs.
///
/// A path with a directory part must name an existing file. A bare name
/// is searched on `PATH`, then in the directory of the running
/// executable.
///
/// # Errors
///
/// Returns [`GeneratorError::ProgramNotFound`] if no candidate exists.
pub fn resolve_program(program: &Path) -> Result<PathBuf, GeneratorError> {
    let not_found = || GeneratorError::ProgramNotFound(program.to_path_buf());
    if program.components().count() > 1 || program.is_absolute() {
        return program
            .is_file()
            .then(|| program.to_path_buf())
            .ok_or_else(not_found);
    }
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    std::env::var_os("PATH")
        .iter()
        .flat_map(|paths| std::env::split_paths(paths).collect::<Vec<_>>())
        .chain(beside_exe)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

/// A [`MaskGenerator`] backed by a child process.
#[derive(Debug, Clone)]
pub struct CommandMaskGenerator {
    program: PathBuf,
    args: Vec<OsString>,
    checkpoint: PathBuf,
    model_type: ModelType,
    device: Device,
}

impl CommandMaskGenerator {
    /// Generator running `program` with the given weights on `device`.
    #[must_use]
    pub fn new(
        program: impl Into<PathBuf>,
        checkpoint: impl Into<PathBuf>,
        model_type: ModelType,
        device: Device,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            checkpoint: checkpoint.into(),
            model_type,
            device,
        }
    }

    /// Append an argument passed to the program before the request.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn run(&self, payload: &[u8]) -> Result<Vec<u8>, GeneratorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                GeneratorError::Backend(format!("failed to start {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(payload) {
                // The child may answer without reading the request.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(GeneratorError::Backend(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(output.stdout)
    }
}

impl MaskGenerator for CommandMaskGenerator {
    fn generate(
        &self,
        image: &RgbImage,
        params: &MaskGeneratorParams,
    ) -> Result<Vec<BinaryMask>, GeneratorError> {
        let scratch = tempfile::tempdir()?;
        let image_path = scratch.path().join("input.png");
        image.save(&image_path)?;

        let request = Request {
            image: &image_path,
            checkpoint: &self.checkpoint,
            model_type: self.model_type.as_str(),
            device: self.device.to_string(),
            output_mode: "binary_mask",
            output_dir: scratch.path(),
            params,
        };
        let payload =
            serde_json::to_vec(&request).map_err(|e| GeneratorError::Protocol(e.to_string()))?;

        log::info!(
            "running {} ({}, {})",
            self.program.display(),
            self.model_type.as_str(),
            self.device
        );
        let stdout = self.run(&payload)?;
        let response: Response =
            serde_json::from_slice(&stdout).map_err(|e| GeneratorError::Protocol(e.to_string()))?;

        response
            .masks
            .into_iter()
            .map(|m| {
                let path = scratch.path().join(&m.path);
                Ok(BinaryMask {
                    mask: image::open(&path)?.into_luma8(),
                    predicted_iou: m.predicted_iou,
                    stability_score: m.stability_score,
                })
            })
            .collect()
    }
}
