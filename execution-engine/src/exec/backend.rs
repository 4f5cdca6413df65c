//! Backend and Key-Store Ports
//!
//! Narrow capability interfaces for everything the execution core needs
//! from the outside world, injected into the coordinator rather than
//! reached through ambient globals. [`HttpBackend`] is the live adapter
//! against the REST backend.

use crate::error::{ExecResult, ExecutionError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use testcase_common::EvidenceStatus;
use tracing::debug;

/// One binary artifact attached to an evidence update
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One multipart evidence update: a status transition plus whatever
/// artifacts loaded
#[derive(Debug, Clone, Default)]
pub struct EvidenceUpdate {
    pub evidence_id: String,
    pub status: EvidenceStatus,
    pub log_file: Option<FilePart>,
    pub video_file: Option<FilePart>,
    pub image_files: Vec<FilePart>,
    pub database_files: Vec<FilePart>,
    pub api_files: Vec<FilePart>,
}

/// Capability port for the REST backend
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Fetch a testcase's actions and basic-auth record as the raw payload;
    /// encrypted fields are still encrypted at this point
    async fn fetch_actions(&self, testcase_id: &str) -> ExecResult<serde_json::Value>;

    /// Fetch an uploaded file's content by server path, base64-encoded
    async fn fetch_file_content(&self, server_path: &str) -> ExecResult<String>;

    /// Push a status transition and artifacts to an evidence record
    async fn update_evidence(&self, update: EvidenceUpdate) -> ExecResult<()>;
}

/// Capability port for project encryption key lookup
pub trait KeyStore: Send + Sync {
    /// Base64-encoded 32-byte project key, when one is configured
    fn project_key(&self, project_id: &str) -> Option<String>;
}

/// Key store backed by a fixed map; used by hosts that load keys at startup
/// and throughout the test suites
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyStore {
    keys: HashMap<String, String>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, project_id: impl Into<String>, key_b64: impl Into<String>) -> Self {
        self.keys.insert(project_id.into(), key_b64.into());
        self
    }
}

impl KeyStore for InMemoryKeyStore {
    fn project_key(&self, project_id: &str) -> Option<String> {
        self.keys.get(project_id).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct FileContentResponse {
    file_content: String,
}

/// Live REST adapter
pub struct HttpBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn part(file: FilePart) -> ExecResult<reqwest::multipart::Part> {
        reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|e| ExecutionError::Evidence(format!("invalid content type: {}", e)))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn fetch_actions(&self, testcase_id: &str) -> ExecResult<serde_json::Value> {
        let url = format!("{}/testcases/{}/actions", self.base_url, testcase_id);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ExecutionError::Backend(format!("action fetch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ExecutionError::Backend(format!("action fetch rejected: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ExecutionError::Backend(format!("malformed action payload: {}", e)))
    }

    async fn fetch_file_content(&self, server_path: &str) -> ExecResult<String> {
        let url = format!("{}/files/content", self.base_url);
        debug!("POST {} for {}", url, server_path);

        let response = self
            .authorize(self.client.post(&url))
            .json(&serde_json::json!({ "file_path": server_path }))
            .send()
            .await
            .map_err(|e| ExecutionError::Backend(format!("file fetch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ExecutionError::Backend(format!("file fetch rejected: {}", e)))?;

        let payload: FileContentResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Backend(format!("malformed file payload: {}", e)))?;
        Ok(payload.file_content)
    }

    async fn update_evidence(&self, update: EvidenceUpdate) -> ExecResult<()> {
        let url = format!("{}/evidences/{}", self.base_url, update.evidence_id);
        debug!("PUT {} ({})", url, update.status);

        let mut form = reqwest::multipart::Form::new()
            .text("evidence_id", update.evidence_id.clone())
            .text("status", update.status.as_str());

        if let Some(log) = update.log_file {
            form = form.part("log_file", Self::part(log)?);
        }
        if let Some(video) = update.video_file {
            form = form.part("video_file", Self::part(video)?);
        }
        for image in update.image_files {
            form = form.part("image_files", Self::part(image)?);
        }
        for export in update.database_files {
            form = form.part("database_files", Self::part(export)?);
        }
        for export in update.api_files {
            form = form.part("api_files", Self::part(export)?);
        }

        self.authorize(self.client.put(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ExecutionError::Evidence(format!("evidence update failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ExecutionError::Evidence(format!("evidence update rejected: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_key_store() {
        let store = InMemoryKeyStore::new().with_key("project-1", "a2V5");
        assert_eq!(store.project_key("project-1").as_deref(), Some("a2V5"));
        assert!(store.project_key("other").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("https://api.example.com/");
        assert_eq!(backend.base_url, "https://api.example.com");
    }

    #[test]
    fn test_default_update_is_draft() {
        let update = EvidenceUpdate::default();
        assert_eq!(update.status, EvidenceStatus::Draft);
        assert!(update.log_file.is_none());
        assert!(update.image_files.is_empty());
    }
}
