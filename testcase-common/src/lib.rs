//! Common Data Model for the Test Execution Core
//!
//! This crate defines the shared types used across the execution pipeline:
//! - Recorder/UI - Produces actions and element descriptors
//! - Execution Engine - Compiles and runs them
//! - Backend callers - Consume execution results and evidence transitions

pub mod action;
pub mod evidence;

pub use action::{
    Action, ActionBundle, ActionData, ActionType, ApiRequest, BasicAuthentication, BrowserStorage,
    DataGeneration, DatabaseConnection, Element, FileUpload, InputValue, SqlStatement,
    StorageCookie,
};
pub use evidence::{EvidenceStatus, TestExecutionResult};
