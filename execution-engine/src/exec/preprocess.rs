//! File Preprocessor
//!
//! Resolves every upload action's payload (inline content or
//! server-fetched-by-path) into concrete temp files inside the sandbox,
//! producing the path-remapping table the compiler consumes. A fetch
//! failure is fatal for the whole step: a missing upload would make the
//! generated script unrunnable.

use crate::error::{ExecResult, ExecutionError};
use crate::exec::backend::BackendApi;
use crate::exec::codegen::FilePathMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use testcase_common::{Action, ActionType, FileUpload};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of upload preprocessing for one run
#[derive(Debug, Default)]
pub struct PreprocessOutput {
    /// Upload key -> materialized local path for the compiler
    pub file_paths: FilePathMap,
    /// Every file written, for the run's cleanup stage
    pub temp_files: Vec<PathBuf>,
}

/// Materialize all upload payloads under `sandbox_dir/uploads/`.
///
/// Returns empty structures without touching the filesystem when there are
/// no upload actions. On any failure, files already written are removed so
/// an aborted run leaves no orphans.
pub async fn preprocess(
    actions: &[Action],
    sandbox_dir: &Path,
    backend: &dyn BackendApi,
) -> ExecResult<PreprocessOutput> {
    let uploads: Vec<&FileUpload> = actions
        .iter()
        .filter(|a| a.action_type == ActionType::Upload)
        .filter_map(|a| a.file_upload())
        .collect();

    if uploads.is_empty() {
        return Ok(PreprocessOutput::default());
    }

    let uploads_dir = sandbox_dir.join("uploads");
    fs::create_dir_all(&uploads_dir).await?;

    let mut output = PreprocessOutput::default();
    for upload in uploads {
        match materialize(upload, &uploads_dir, backend).await {
            Ok(path) => {
                debug!("materialized upload {} at {}", upload.upload_key(), path.display());
                output
                    .file_paths
                    .insert(upload.upload_key().to_string(), path.display().to_string());
                output.temp_files.push(path);
            }
            Err(e) => {
                for file in &output.temp_files {
                    let _ = fs::remove_file(file).await;
                }
                let _ = fs::remove_dir(&uploads_dir).await;
                return Err(e);
            }
        }
    }

    info!("preprocessed {} upload file(s)", output.temp_files.len());
    Ok(output)
}

async fn materialize(
    upload: &FileUpload,
    uploads_dir: &Path,
    backend: &dyn BackendApi,
) -> ExecResult<PathBuf> {
    let encoded = match &upload.content {
        Some(inline) => inline.clone(),
        None => {
            let server_path = upload.file_path.as_deref().ok_or_else(|| {
                ExecutionError::Preprocess(format!(
                    "upload {} has neither inline content nor a server path",
                    upload.file_name
                ))
            })?;
            backend.fetch_file_content(server_path).await?
        }
    };

    let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
        ExecutionError::Preprocess(format!(
            "upload {} content is not valid base64: {}",
            upload.file_name, e
        ))
    })?;

    // unique name per run; strip separators so a recorded filename cannot
    // escape the uploads directory
    let safe_name = upload.file_name.replace(['/', '\\'], "_");
    let target = uploads_dir.join(format!("{}_{}", Uuid::new_v4(), safe_name));
    fs::write(&target, &bytes).await?;
    Ok(target)
}
