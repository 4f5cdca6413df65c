//! Evidence Reconciler
//!
//! Maps collected run artifacts and a terminal status onto the remote
//! evidence record. Artifact discovery and loading are best-effort: a
//! passed run with an unrecoverable video is still reported Passed.

use crate::error::ExecResult;
use crate::exec::backend::{BackendApi, EvidenceUpdate, FilePart};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testcase_common::EvidenceStatus;
use tokio::fs;
use tracing::{debug, info, warn};

/// Log content used when both captured streams were empty
pub const GENERIC_FAILURE_LOG: &str = "Test execution produced no output.";

const VIDEO_EXTENSIONS: &[&str] = &["webm", "mp4"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Artifact files found in one run's output directory
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub video: Option<PathBuf>,
    pub images: Vec<PathBuf>,
    pub database_exports: Vec<PathBuf>,
    pub api_exports: Vec<PathBuf>,
}

impl RunArtifacts {
    /// Search a run's output directory. Any search failure yields empty
    /// lists; missing artifacts never affect the run's status.
    pub async fn collect(output_dir: &Path) -> Self {
        let video = files_with_extensions(output_dir, VIDEO_EXTENSIONS)
            .await
            .into_iter()
            .next();
        let images = files_with_extensions(&output_dir.join("images"), IMAGE_EXTENSIONS).await;
        let database_exports = all_files(&output_dir.join("database")).await;
        let api_exports = all_files(&output_dir.join("api")).await;

        debug!(
            "artifacts: video={}, images={}, db exports={}, api exports={}",
            video.is_some(),
            images.len(),
            database_exports.len(),
            api_exports.len(),
        );

        Self {
            video,
            images,
            database_exports,
            api_exports,
        }
    }
}

async fn all_files(dir: &Path) -> Vec<PathBuf> {
    list_files(dir, None).await
}

async fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    list_files(dir, Some(extensions)).await
}

async fn list_files(dir: &Path, extensions: Option<&[&str]>) -> Vec<PathBuf> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = match extensions {
            Some(extensions) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false),
            None => true,
        };
        if matches {
            files.push(path);
        }
    }
    files.sort();
    files
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("log") | Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Load one artifact as a multipart file part; failures are logged and
/// skipped so the update continues with what loaded
async fn load_part(path: &Path) -> Option<FilePart> {
    match fs::read(path).await {
        Ok(bytes) => Some(FilePart {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string()),
            content_type: content_type_for(path).to_string(),
            bytes,
        }),
        Err(e) => {
            warn!("artifact {} could not be loaded: {}", path.display(), e);
            None
        }
    }
}

async fn load_parts(paths: &[PathBuf]) -> Vec<FilePart> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(part) = load_part(path).await {
            parts.push(part);
        }
    }
    parts
}

/// Pushes status transitions and artifacts to the remote evidence record
pub struct EvidenceReconciler {
    backend: Arc<dyn BackendApi>,
}

impl EvidenceReconciler {
    pub fn new(backend: Arc<dyn BackendApi>) -> Self {
        Self { backend }
    }

    /// Bare status transition with no artifacts
    pub async fn update_status(&self, evidence_id: &str, status: EvidenceStatus) -> ExecResult<()> {
        info!("evidence {} -> {}", evidence_id, status);
        self.backend
            .update_evidence(EvidenceUpdate {
                evidence_id: evidence_id.to_string(),
                status,
                ..Default::default()
            })
            .await
    }

    /// Terminal update carrying the synthesized log and every artifact that
    /// loaded, as one multipart call
    pub async fn update_with_results(
        &self,
        evidence_id: &str,
        status: EvidenceStatus,
        logs: &str,
        artifacts: &RunArtifacts,
    ) -> ExecResult<()> {
        let log_text = if logs.trim().is_empty() {
            GENERIC_FAILURE_LOG
        } else {
            logs
        };

        let video_file = match &artifacts.video {
            Some(path) => load_part(path).await,
            None => None,
        };

        let update = EvidenceUpdate {
            evidence_id: evidence_id.to_string(),
            status,
            log_file: Some(FilePart {
                file_name: "execution.log".to_string(),
                content_type: "text/plain".to_string(),
                bytes: log_text.as_bytes().to_vec(),
            }),
            video_file,
            image_files: load_parts(&artifacts.images).await,
            database_files: load_parts(&artifacts.database_exports).await,
            api_files: load_parts(&artifacts.api_exports).await,
        };

        info!(
            "evidence {} -> {} ({} image(s), video: {})",
            evidence_id,
            status,
            update.image_files.len(),
            update.video_file.is_some(),
        );
        self.backend.update_evidence(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecResult;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        updates: Mutex<Vec<EvidenceUpdate>>,
    }

    #[async_trait]
    impl BackendApi for RecordingBackend {
        async fn fetch_actions(&self, _testcase_id: &str) -> ExecResult<serde_json::Value> {
            unimplemented!("not used by the reconciler")
        }

        async fn fetch_file_content(&self, _server_path: &str) -> ExecResult<String> {
            unimplemented!("not used by the reconciler")
        }

        async fn update_evidence(&self, update: EvidenceUpdate) -> ExecResult<()> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_artifact_collection_on_missing_dir_is_empty() {
        let artifacts = RunArtifacts::collect(Path::new("/nonexistent/run-output")).await;
        assert!(artifacts.video.is_none());
        assert!(artifacts.images.is_empty());
        assert!(artifacts.database_exports.is_empty());
        assert!(artifacts.api_exports.is_empty());
    }

    #[tokio::test]
    async fn test_artifact_collection_finds_typed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run.webm"), b"video").unwrap();
        std::fs::write(dir.path().join("runner.pid"), b"123").unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/step_001.png"), b"img").unwrap();
        std::fs::write(dir.path().join("images/notes.txt"), b"not an image").unwrap();
        std::fs::create_dir(dir.path().join("database")).unwrap();
        std::fs::write(dir.path().join("database/orders.csv"), b"1,2").unwrap();

        let artifacts = RunArtifacts::collect(dir.path()).await;

        assert_eq!(
            artifacts.video.as_ref().and_then(|p| p.file_name()),
            Some(std::ffi::OsStr::new("run.webm"))
        );
        assert_eq!(artifacts.images.len(), 1);
        assert_eq!(artifacts.database_exports.len(), 1);
        assert!(artifacts.api_exports.is_empty());
    }

    #[tokio::test]
    async fn test_empty_logs_fall_back_to_generic_sentence() {
        let backend = Arc::new(RecordingBackend::default());
        let reconciler = EvidenceReconciler::new(backend.clone());

        reconciler
            .update_with_results("ev-1", EvidenceStatus::Failed, "  ", &RunArtifacts::default())
            .await
            .unwrap();

        let updates = backend.updates.lock().unwrap();
        let log = updates[0].log_file.as_ref().unwrap();
        assert_eq!(log.bytes, GENERIC_FAILURE_LOG.as_bytes());
        assert_eq!(log.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_missing_artifact_files_do_not_abort_update() {
        let backend = Arc::new(RecordingBackend::default());
        let reconciler = EvidenceReconciler::new(backend.clone());

        let artifacts = RunArtifacts {
            video: Some(PathBuf::from("/gone/run.webm")),
            images: vec![PathBuf::from("/gone/step.png")],
            ..Default::default()
        };

        reconciler
            .update_with_results("ev-2", EvidenceStatus::Passed, "ok", &artifacts)
            .await
            .unwrap();

        let updates = backend.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, EvidenceStatus::Passed);
        // both artifacts failed to load and were skipped, not fatal
        assert!(updates[0].video_file.is_none());
        assert!(updates[0].image_files.is_empty());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.webm")), "video/webm");
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.csv")), "text/csv");
        assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
    }
}
