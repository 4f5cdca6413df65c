//! Sandboxed Run Coordinator
//!
//! Orchestrates one end-to-end execution: fetch + decrypt actions,
//! preprocess upload files, compile a script, run it through the isolated
//! browser runner, reconcile evidence, and clean the sandbox up again.
//!
//! Both public entry points always return a result object; failures are
//! converted into a Failed result whose `logs` field carries the message.
//! The cleanup stage runs on every exit route, so a crashed run never
//! leaks its script file, output directory, or temp upload files.

use crate::error::ExecResult;
use crate::exec::backend::{BackendApi, KeyStore};
use crate::exec::codegen::{compile, API_DIR_TOKEN, DATABASE_DIR_TOKEN, IMAGES_DIR_TOKEN};
use crate::exec::crypto::{decrypt_fields, encrypted_paths, FieldCipher};
use crate::exec::evidence::{EvidenceReconciler, RunArtifacts};
use crate::exec::preprocess::preprocess;
use crate::exec::runner::{BrowserKind, RunnerInvocation, ScriptRunner};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use testcase_common::{ActionBundle, EvidenceStatus, TestExecutionResult};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hard timeout for one browser run
pub const RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Root directory for scripts, uploads, and run output directories
    pub sandbox_root: PathBuf,
    pub run_timeout: Duration,
}

impl ExecutorConfig {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            run_timeout: RUN_TIMEOUT,
        }
    }
}

/// Request for a full testcase run
#[derive(Debug, Clone)]
pub struct TestcaseRunRequest {
    pub testcase_id: String,
    pub evidence_id: Option<String>,
    pub browser: BrowserKind,
    /// Push status transitions and artifacts to the evidence record
    pub save_evidence: bool,
    /// Project whose encryption key decrypts the fetched payload
    pub project_id: Option<String>,
}

impl TestcaseRunRequest {
    pub fn new(testcase_id: impl Into<String>) -> Self {
        Self {
            testcase_id: testcase_id.into(),
            evidence_id: None,
            browser: BrowserKind::default(),
            save_evidence: false,
            project_id: None,
        }
    }

    /// Enable evidence reconciliation against this record
    pub fn save_to(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_id = Some(evidence_id.into());
        self.save_evidence = true;
        self
    }

    pub fn with_browser(mut self, browser: BrowserKind) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// Request for running already-compiled script code
#[derive(Debug, Clone)]
pub struct CodeRunRequest {
    pub code: String,
    pub browser: BrowserKind,
    pub evidence_id: Option<String>,
    pub save_evidence: bool,
    /// Upload temp files owned by this run, deleted during cleanup
    pub temp_files: Vec<PathBuf>,
}

impl CodeRunRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            browser: BrowserKind::default(),
            evidence_id: None,
            save_evidence: false,
            temp_files: Vec::new(),
        }
    }

    pub fn save_to(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_id = Some(evidence_id.into());
        self.save_evidence = true;
        self
    }
}

/// Filesystem locations owned by exactly one run
struct RunWorkspace {
    run_id: Uuid,
    script_path: PathBuf,
    output_dir: PathBuf,
    images_dir: PathBuf,
    database_dir: PathBuf,
    api_dir: PathBuf,
}

impl RunWorkspace {
    /// Pure path computation; nothing is created until the pipeline runs
    fn allocate(sandbox_root: &Path) -> Self {
        let run_id = Uuid::new_v4();
        let output_dir = sandbox_root.join(format!("run_{}", run_id));
        Self {
            run_id,
            script_path: sandbox_root.join(format!("script_{}.js", run_id)),
            images_dir: output_dir.join("images"),
            database_dir: output_dir.join("database"),
            api_dir: output_dir.join("api"),
            output_dir,
        }
    }

    /// Delete everything this run created. Deletion failures are swallowed,
    /// never escalated, and never block returning the result.
    async fn cleanup(&self, temp_files: &[PathBuf]) {
        if let Err(e) = fs::remove_file(&self.script_path).await {
            debug!("script cleanup skipped: {}", e);
        }
        if let Err(e) = fs::remove_dir_all(&self.output_dir).await {
            debug!("output dir cleanup skipped: {}", e);
        }
        for file in temp_files {
            if let Err(e) = fs::remove_file(file).await {
                warn!("temp file {} not removed: {}", file.display(), e);
            }
        }
        // drop the shared uploads dir once it has emptied out
        if let Some(uploads_dir) = temp_files.first().and_then(|f| f.parent()) {
            let _ = fs::remove_dir(uploads_dir).await;
        }
    }
}

/// The Test Execution Core's run coordinator.
///
/// All host capabilities arrive through injected ports; the coordinator
/// itself owns no ambient state beyond its sandbox configuration.
pub struct TestExecutor {
    backend: Arc<dyn BackendApi>,
    keys: Arc<dyn KeyStore>,
    runner: Arc<dyn ScriptRunner>,
    reconciler: EvidenceReconciler,
    config: ExecutorConfig,
}

impl TestExecutor {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        keys: Arc<dyn KeyStore>,
        runner: Arc<dyn ScriptRunner>,
        config: ExecutorConfig,
    ) -> Self {
        let reconciler = EvidenceReconciler::new(backend.clone());
        Self {
            backend,
            keys,
            runner,
            reconciler,
            config,
        }
    }

    /// Fetch, decrypt, preprocess, compile, and run one testcase.
    ///
    /// Fetch and preprocessing failures abort before any browser work; a
    /// compile result of None short-circuits to a successful Draft no-op.
    pub async fn execute_testcase(&self, request: TestcaseRunRequest) -> TestExecutionResult {
        let started = Instant::now();
        info!("executing testcase {}", request.testcase_id);

        match self.prepare(&request).await {
            Ok(Some(code_request)) => self.execute_code(code_request).await,
            Ok(None) => {
                info!("testcase {} has no actions to execute", request.testcase_id);
                TestExecutionResult::draft_no_op(elapsed_ms(started))
            }
            Err(e) => {
                warn!("testcase {} aborted: {}", request.testcase_id, e);
                self.mark_failed_best_effort(request.save_evidence, request.evidence_id.as_deref())
                    .await;
                TestExecutionResult::failure(e.to_string(), elapsed_ms(started))
            }
        }
    }

    /// Everything before the sandboxed run: fetch, decrypt, preprocess,
    /// compile. Returns None when there is nothing to run.
    async fn prepare(&self, request: &TestcaseRunRequest) -> ExecResult<Option<CodeRunRequest>> {
        let mut payload = self.backend.fetch_actions(&request.testcase_id).await?;

        // sensitive fields are decrypted in memory only, right before the
        // payload reaches code generation
        if let Some(key_b64) = request
            .project_id
            .as_deref()
            .and_then(|p| self.keys.project_key(p))
        {
            let cipher = FieldCipher::from_base64_key(&key_b64)?;
            let paths = encrypted_paths(&payload);
            let outcome = decrypt_fields(&payload, &cipher, &paths);
            if outcome.degraded() {
                warn!(
                    "{} field(s) kept their stored value during decryption",
                    outcome.warnings.len()
                );
            }
            payload = outcome.value;
        }

        let bundle: ActionBundle = serde_json::from_value(payload)?;

        let preprocessed =
            preprocess(&bundle.actions, &self.config.sandbox_root, self.backend.as_ref()).await?;

        match compile(
            bundle.basic_auth.as_ref(),
            &bundle.actions,
            &preprocessed.file_paths,
        ) {
            Some(code) => Ok(Some(CodeRunRequest {
                code,
                browser: request.browser,
                evidence_id: request.evidence_id.clone(),
                save_evidence: request.save_evidence,
                temp_files: preprocessed.temp_files,
            })),
            None => Ok(None),
        }
    }

    /// Run compiled script code in the sandbox.
    ///
    /// The pipeline stages run in order; the cleanup stage runs
    /// unconditionally afterwards, on success, failure, and error alike.
    pub async fn execute_code(&self, request: CodeRunRequest) -> TestExecutionResult {
        let started = Instant::now();
        let run = RunWorkspace::allocate(&self.config.sandbox_root);
        info!("run {} starting (browser: {})", run.run_id, request.browser);

        let outcome = self.run_pipeline(&request, &run, started).await;
        run.cleanup(&request.temp_files).await;

        match outcome {
            Ok(result) => {
                info!(
                    "run {} finished: {} in {}ms",
                    run.run_id, result.status, result.execution_time
                );
                result
            }
            Err(e) => {
                warn!("run {} failed: {}", run.run_id, e);
                self.mark_failed_best_effort(request.save_evidence, request.evidence_id.as_deref())
                    .await;
                TestExecutionResult::failure(e.to_string(), elapsed_ms(started))
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &CodeRunRequest,
        run: &RunWorkspace,
        started: Instant,
    ) -> ExecResult<TestExecutionResult> {
        // stage 1: announce the run
        if let Some(evidence_id) = save_target(request) {
            self.reconciler
                .update_status(evidence_id, EvidenceStatus::Running)
                .await?;
        }

        // stage 2: resolve the compiler's output placeholders to this
        // run's concrete directories
        let script = resolve_output_tokens(&request.code, run);

        // stage 3: materialize the sandbox
        fs::create_dir_all(&run.images_dir).await?;
        fs::create_dir_all(&run.database_dir).await?;
        fs::create_dir_all(&run.api_dir).await?;
        fs::write(&run.script_path, script).await?;

        // stage 4: the isolated browser run
        let output = self
            .runner
            .run(&RunnerInvocation {
                script_path: run.script_path.clone(),
                output_dir: run.output_dir.clone(),
                browser: request.browser,
                timeout: self.config.run_timeout,
            })
            .await?;

        let status = if output.success() {
            EvidenceStatus::Passed
        } else {
            EvidenceStatus::Failed
        };
        let logs = output.combined_log();

        // stage 5: collect artifacts; missing ones never change the status
        let artifacts = RunArtifacts::collect(&run.output_dir).await;

        // stage 6: reconcile evidence
        if let Some(evidence_id) = save_target(request) {
            self.reconciler
                .update_with_results(evidence_id, status, &logs, &artifacts)
                .await?;
        }

        Ok(TestExecutionResult {
            success: status == EvidenceStatus::Passed,
            status,
            logs,
            video_url: artifacts.video.map(|p| p.display().to_string()),
            images_urls: display_all(artifacts.images),
            database_files_urls: display_all(artifacts.database_exports),
            api_files_urls: display_all(artifacts.api_exports),
            execution_time: elapsed_ms(started),
            executed_at: Utc::now(),
        })
    }

    /// Best-effort terminal Failed mark; secondary errors are swallowed
    async fn mark_failed_best_effort(&self, save_evidence: bool, evidence_id: Option<&str>) {
        if !save_evidence {
            return;
        }
        let Some(evidence_id) = evidence_id else {
            return;
        };
        if let Err(e) = self
            .reconciler
            .update_status(evidence_id, EvidenceStatus::Failed)
            .await
        {
            warn!("could not mark evidence {} failed: {}", evidence_id, e);
        }
    }
}

fn save_target(request: &CodeRunRequest) -> Option<&str> {
    if request.save_evidence {
        request.evidence_id.as_deref()
    } else {
        None
    }
}

fn resolve_output_tokens(code: &str, run: &RunWorkspace) -> String {
    code.replace(IMAGES_DIR_TOKEN, &run.images_dir.display().to_string())
        .replace(DATABASE_DIR_TOKEN, &run.database_dir.display().to_string())
        .replace(API_DIR_TOKEN, &run.api_dir.display().to_string())
}

fn display_all(paths: Vec<PathBuf>) -> Vec<String> {
    paths.into_iter().map(|p| p.display().to_string()).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
