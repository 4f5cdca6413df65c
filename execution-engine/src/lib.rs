//! Execution Engine - Test Execution Core
//!
//! This crate compiles recorded test actions into executable automation
//! scripts and runs them against a real browser engine in an isolated
//! sandbox. Responsibilities:
//!
//! - **Duplicate detection** for recorded UI elements before persistence
//! - **Encrypted field handling** so credentials decrypt only in memory
//! - **Script compilation** from the decrypted action list
//! - **Sandboxed execution** with artifact collection and guaranteed cleanup
//! - **Evidence reconciliation** of run status and artifacts to the backend
//!
//! ## Core Concepts
//!
//! - **Action**: one recorded step (click, input, navigate, upload, SQL, ...)
//! - **Evidence**: the remote record tracking one run's status and artifacts
//! - **Sandbox**: per-run working directory, fully cleaned up afterwards
//!
//! ## Example
//!
//! ```rust,ignore
//! use execution_engine::{ExecutorConfig, TestExecutor, TestcaseRunRequest};
//!
//! let executor = TestExecutor::new(backend, keys, runner, ExecutorConfig::new("/tmp/sandbox"));
//!
//! // Run a stored testcase and reconcile the evidence record
//! let result = executor
//!     .execute_testcase(TestcaseRunRequest::new("tc-42").save_to("ev-7"))
//!     .await;
//! ```

pub mod error;
pub mod exec;

// Re-exports
pub use error::{ExecResult, ExecutionError};
pub use exec::backend::{BackendApi, EvidenceUpdate, FilePart, HttpBackend, InMemoryKeyStore, KeyStore};
pub use exec::codegen::{compile, FilePathMap, API_DIR_TOKEN, DATABASE_DIR_TOKEN, IMAGES_DIR_TOKEN};
pub use exec::coordinator::{
    CodeRunRequest, ExecutorConfig, TestExecutor, TestcaseRunRequest, RUN_TIMEOUT,
};
pub use exec::crypto::{
    decrypt_fields, encrypt_fields, encrypted_paths, DecryptedFields, FieldCipher, FieldWarning,
};
pub use exec::duplicates::{
    assign_group_id, find_duplicate_element_groups, DuplicateElementGroup, DuplicateResolution,
    GroupMember, ResolutionState,
};
pub use exec::evidence::{EvidenceReconciler, RunArtifacts, GENERIC_FAILURE_LOG};
pub use exec::preprocess::{preprocess, PreprocessOutput};
pub use exec::runner::{BrowserKind, ProcessRunner, RunnerInvocation, RunnerOutput, ScriptRunner};
pub use exec::selector::build_selector;
pub use exec::similarity::{score, AttributeMap, DEFAULT_SIMILARITY_THRESHOLD};
pub use testcase_common::{Action, ActionBundle, ActionType, EvidenceStatus, TestExecutionResult};
