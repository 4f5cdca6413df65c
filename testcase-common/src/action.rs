//! Action Data Models
//!
//! Core data structures for recorded test steps. An [`Action`] is one
//! recorded user interaction (click, input, navigation, SQL run, file
//! upload, ...) carrying zero or more payload entries and zero or more
//! targeted element descriptors.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of recorded test step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Click an element
    Click,
    /// Type a value into an element
    Input,
    /// Navigate to a URL
    Navigate,
    /// Upload a file through a file input
    Upload,
    /// Execute a SQL statement against an embedded connection
    DatabaseExecution,
    /// Perform an HTTP request through the runner's API connector
    ApiCall,
    /// Wait for a fixed duration
    Wait,
    /// Assert on an element's text, capturing a screenshot
    Assert,
    /// Apply a recorded cookie/localStorage/sessionStorage snapshot
    BrowserStorage,
}

/// One recorded test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Kind of step
    pub action_type: ActionType,
    /// Human-readable description shown in the UI and in generated code
    #[serde(default)]
    pub description: String,
    /// Ordered payload entries; at most one variant each
    #[serde(default)]
    pub action_datas: Vec<ActionData>,
    /// UI element descriptors this step targets
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Templated variants of the payload data ({{variable}} substitution)
    #[serde(default)]
    pub action_data_generation: Vec<DataGeneration>,
}

impl Action {
    /// Create a new action with no payload or elements
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            action_datas: Vec::new(),
            elements: Vec::new(),
            action_data_generation: Vec::new(),
        }
    }

    /// Attach a payload entry
    pub fn with_data(mut self, data: ActionData) -> Self {
        self.action_datas.push(data);
        self
    }

    /// Attach an element descriptor
    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// First recorded input value, if any
    pub fn input_value(&self) -> Option<&SecretString> {
        self.action_datas.iter().find_map(|d| match d {
            ActionData::Value { value } => Some(&value.value),
            _ => None,
        })
    }

    /// First embedded SQL statement, if any
    pub fn statement(&self) -> Option<&SqlStatement> {
        self.action_datas.iter().find_map(|d| match d {
            ActionData::Statement { statement } => Some(statement),
            _ => None,
        })
    }

    /// First file-upload payload, if any
    pub fn file_upload(&self) -> Option<&FileUpload> {
        self.action_datas.iter().find_map(|d| match d {
            ActionData::FileUpload { file_upload } => Some(file_upload),
            _ => None,
        })
    }

    /// First browser-storage snapshot, if any
    pub fn browser_storage(&self) -> Option<&BrowserStorage> {
        self.action_datas.iter().find_map(|d| match d {
            ActionData::BrowserStorage { browser_storage } => Some(browser_storage),
            _ => None,
        })
    }

    /// First API request payload, if any
    pub fn api_request(&self) -> Option<&ApiRequest> {
        self.action_datas.iter().find_map(|d| match d {
            ActionData::ApiRequest { api_call } => Some(api_call),
            _ => None,
        })
    }

    /// Primary targeted element, if any
    pub fn primary_element(&self) -> Option<&Element> {
        self.elements.first()
    }
}

/// One payload entry attached to an action.
///
/// Exactly one variant is populated per entry; an action may carry several
/// entries representing one logical step's multiple facets (e.g. a storage
/// snapshot plus page-context info).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionData {
    /// A plain recorded value (the only payload whose inner field may
    /// arrive encrypted)
    Value { value: InputValue },
    /// An embedded database connection plus SQL text
    Statement { statement: SqlStatement },
    /// A file to upload, inline or referenced by server path
    FileUpload { file_upload: FileUpload },
    /// A cookie/localStorage/sessionStorage snapshot
    BrowserStorage { browser_storage: BrowserStorage },
    /// An HTTP request to perform through the runner's API connector
    ApiRequest { api_call: ApiRequest },
}

/// Wrapper around a recorded value; `value` may arrive encrypted and is
/// decrypted in memory before code generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputValue {
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub value: SecretString,
}

impl InputValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::new(value.into().into()),
        }
    }
}

/// SQL statement with its embedded connection descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlStatement {
    pub connection: DatabaseConnection,
    /// SQL text to execute
    pub query: String,
}

/// Database connection descriptor embedded in a statement payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConnection {
    /// Driver name understood by the runner ("postgres", "mysql", ...)
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// May arrive encrypted
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub password: SecretString,
    /// SSH tunnel settings, present only for tunneled connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_username: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_secret",
        deserialize_with = "deserialize_opt_secret"
    )]
    pub ssh_password: Option<SecretString>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_secret",
        deserialize_with = "deserialize_opt_secret"
    )]
    pub ssh_private_key: Option<SecretString>,
}

/// File-upload payload: inline content or a server path to fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    /// Stable upload identifier assigned by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    /// Original filename
    pub file_name: String,
    /// Inline content, base64-encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Server-side path to fetch the content from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

impl FileUpload {
    /// Stable key used to join preprocessing output with code generation:
    /// upload id, else server path, else filename.
    pub fn upload_key(&self) -> &str {
        self.upload_id
            .as_deref()
            .or(self.file_path.as_deref())
            .unwrap_or(&self.file_name)
    }
}

/// Cookie/localStorage/sessionStorage snapshot captured at record time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserStorage {
    #[serde(default)]
    pub cookies: Vec<StorageCookie>,
    #[serde(default)]
    pub local_storage: HashMap<String, String>,
    #[serde(default)]
    pub session_storage: HashMap<String, String>,
    /// Page the snapshot was captured on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

/// Individual cookie data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// HTTP request payload for api_call steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Templated payload variant: `{{variable}}` tokens in the action's input
/// value are replaced with `value` before compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGeneration {
    pub variable: String,
    pub value: String,
}

/// Descriptor of a targeted DOM node at record time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Stable grouping key, assigned lazily when duplicates are merged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<Uuid>,
    /// Flat map of recorded attributes (tagName, id, name, xpath,
    /// innerText, class, geometry, page URL, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Element {
    /// Create an element descriptor from an attribute map
    pub fn new(element_data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            element_id: None,
            element_data: Some(element_data),
        }
    }

    /// Look up a raw attribute value
    pub fn attr(&self, key: &str) -> Option<&serde_json::Value> {
        self.element_data.as_ref()?.get(key)
    }

    /// Look up a string attribute, filtering out empty values
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key)?.as_str().filter(|s| !s.is_empty())
    }
}

/// Per-testcase HTTP basic-auth credentials; fetched alongside actions,
/// decrypted once, consumed by the compiler, never persisted back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthentication {
    pub username: String,
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub password: SecretString,
    pub testcase_id: String,
}

/// Payload returned by the backend action-fetch endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBundle {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthentication>,
}

// Helper functions for SecretString serialization
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::new(s.into()))
}

fn serialize_opt_secret<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_opt_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| SecretString::new(s.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_accessors() {
        let action = Action::new(ActionType::Input, "Type the username")
            .with_data(ActionData::Value {
                value: InputValue::new("alice"),
            })
            .with_element(Element::new(
                json!({"tagName": "INPUT", "id": "username"})
                    .as_object()
                    .unwrap()
                    .clone(),
            ));

        assert_eq!(
            action.input_value().map(|v| v.expose_secret()),
            Some("alice")
        );
        assert!(action.statement().is_none());
        assert_eq!(
            action.primary_element().and_then(|e| e.attr_str("id")),
            Some("username")
        );
    }

    #[test]
    fn test_upload_key_precedence() {
        let mut upload = FileUpload {
            upload_id: Some("u-42".to_string()),
            file_name: "data.csv".to_string(),
            content: None,
            file_path: Some("/files/data.csv".to_string()),
        };
        assert_eq!(upload.upload_key(), "u-42");

        upload.upload_id = None;
        assert_eq!(upload.upload_key(), "/files/data.csv");

        upload.file_path = None;
        assert_eq!(upload.upload_key(), "data.csv");
    }

    #[test]
    fn test_action_data_deserialization() {
        let raw = json!({
            "action_type": "database_execution",
            "description": "Seed the orders table",
            "action_datas": [{
                "statement": {
                    "connection": {
                        "driver": "postgres",
                        "host": "db.internal",
                        "port": 5432,
                        "database": "shop",
                        "username": "ci",
                        "password": "s3cret"
                    },
                    "query": "INSERT INTO orders VALUES (1)"
                }
            }]
        });

        let action: Action = serde_json::from_value(raw).unwrap();
        assert_eq!(action.action_type, ActionType::DatabaseExecution);
        let statement = action.statement().expect("statement payload");
        assert_eq!(statement.connection.port, 5432);
        assert!(statement.connection.ssh_private_key.is_none());
    }

    #[test]
    fn test_element_attr_filters_empty_strings() {
        let element = Element::new(
            json!({"id": "", "name": "email"})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(element.attr_str("id"), None);
        assert_eq!(element.attr_str("name"), Some("email"));
    }

    #[test]
    fn test_bundle_roundtrip() {
        let bundle = ActionBundle {
            actions: vec![Action::new(ActionType::Click, "Press submit")],
            basic_auth: Some(BasicAuthentication {
                username: "admin".to_string(),
                password: SecretString::new("hunter2".to_string().into()),
                testcase_id: "tc-1".to_string(),
            }),
        };

        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: ActionBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(parsed.basic_auth.unwrap().username, "admin");
    }
}
