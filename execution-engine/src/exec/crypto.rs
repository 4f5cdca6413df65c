//! Encrypted Field Handling
//!
//! Field-level cipher adapter plus the dotted-path resolver that decrypts
//! (or encrypts) selected leaves of a fetched payload. Sensitive values are
//! decrypted only in memory, immediately before code generation.
//!
//! Decryption failure for an individual field is non-fatal: older records
//! were stored unencrypted and must still load, so the original value is
//! kept and the degradation is reported as a [`FieldWarning`].

use crate::error::{ExecResult, ExecutionError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde_json::Value;
use tracing::warn;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// AES-256-GCM field cipher with `base64(nonce ‖ ciphertext ‖ tag)` framing
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &[u8]) -> ExecResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(ExecutionError::Key(format!(
                "key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| ExecutionError::Key(format!("invalid key: {:?}", e)))?;
        Ok(Self { cipher })
    }

    /// Build a cipher from the base64-encoded project key
    pub fn from_base64_key(key_b64: &str) -> ExecResult<Self> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| ExecutionError::Key(format!("key is not valid base64: {}", e)))?;
        Self::new(&key)
    }

    pub fn encrypt(&self, plaintext: &str) -> ExecResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ExecutionError::Cipher(format!("encrypt failed: {:?}", e)))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.append(&mut ciphertext);
        Ok(BASE64.encode(framed))
    }

    pub fn decrypt(&self, payload_b64: &str) -> ExecResult<String> {
        let framed = BASE64
            .decode(payload_b64.trim())
            .map_err(|e| ExecutionError::Cipher(format!("payload is not valid base64: {}", e)))?;
        if framed.len() < NONCE_SIZE {
            return Err(ExecutionError::Cipher("payload is too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| ExecutionError::Cipher(format!("decrypt failed: {:?}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| ExecutionError::Cipher(format!("plaintext is not UTF-8: {}", e)))
    }
}

/// A field that could not be decrypted and was left untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWarning {
    pub path: String,
    pub reason: String,
}

/// Result of a best-effort decryption pass
#[derive(Debug, Clone)]
pub struct DecryptedFields {
    pub value: Value,
    pub warnings: Vec<FieldWarning>,
}

impl DecryptedFields {
    /// Whether any field was left undecrypted
    pub fn degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Decrypt the leaves at `paths` inside a deep copy of `payload`.
///
/// Decrypted plaintext is re-parsed as JSON when possible, falling back to
/// the raw string. A leaf that is absent or not a string is skipped; a leaf
/// that fails to decrypt is kept as-is and reported in the warnings.
pub fn decrypt_fields(payload: &Value, cipher: &FieldCipher, paths: &[String]) -> DecryptedFields {
    let mut value = payload.clone();
    let mut warnings = Vec::new();

    for path in paths {
        let Some(leaf) = navigate_mut(&mut value, path) else {
            continue;
        };
        let Some(ciphertext) = leaf.as_str() else {
            continue;
        };

        match cipher.decrypt(ciphertext) {
            Ok(plaintext) => {
                *leaf = serde_json::from_str(&plaintext).unwrap_or(Value::String(plaintext));
            }
            Err(e) => {
                warn!("field {} left undecrypted: {}", path, e);
                warnings.push(FieldWarning {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    DecryptedFields { value, warnings }
}

/// Encrypt the leaves at `paths` inside a deep copy of `payload`.
///
/// Non-string leaves are canonicalized to their JSON text before
/// encryption; null or absent leaves are skipped. Missing intermediate
/// objects are created.
pub fn encrypt_fields(payload: &Value, cipher: &FieldCipher, paths: &[String]) -> ExecResult<Value> {
    let mut value = payload.clone();

    for path in paths {
        let Some(leaf) = navigate_or_create(&mut value, path) else {
            continue;
        };
        let plaintext = match leaf {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            ref other => other.to_string(),
        };
        *leaf = Value::String(cipher.encrypt(&plaintext)?);
    }

    Ok(value)
}

/// Derive the set of encrypted field paths present in a fetched action
/// payload. Inspects which optional sub-fields are actually populated
/// rather than assuming a fixed shape.
pub fn encrypted_paths(payload: &Value) -> Vec<String> {
    let mut paths = Vec::new();

    if let Some(actions) = payload.get("actions").and_then(Value::as_array) {
        for (action_index, action) in actions.iter().enumerate() {
            let Some(datas) = action.get("action_datas").and_then(Value::as_array) else {
                continue;
            };
            for (data_index, data) in datas.iter().enumerate() {
                let base = format!("actions.{}.action_datas.{}", action_index, data_index);

                if data
                    .get("value")
                    .and_then(|v| v.get("value"))
                    .is_some_and(|v| !v.is_null())
                {
                    paths.push(format!("{}.value.value", base));
                }

                if let Some(connection) = data.get("statement").and_then(|s| s.get("connection")) {
                    let conn_base = format!("{}.statement.connection", base);
                    for field in ["password", "ssh_password", "ssh_private_key"] {
                        if connection.get(field).is_some_and(|v| !v.is_null()) {
                            paths.push(format!("{}.{}", conn_base, field));
                        }
                    }
                }
            }
        }
    }

    if let Some(auth) = payload.get("basic_auth").filter(|v| !v.is_null()) {
        for field in ["username", "password"] {
            if auth.get(field).is_some_and(|v| !v.is_null()) {
                paths.push(format!("basic_auth.{}", field));
            }
        }
    }

    paths
}

/// Walk a dotted path through objects and arrays; numeric segments index
/// arrays. Returns None when any segment is missing.
fn navigate_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get_mut(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`navigate_mut`] but creates missing intermediate objects. Array
/// indices are never created; a missing index stops the walk.
fn navigate_or_create<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new())),
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_cipher() -> FieldCipher {
        FieldCipher::new(&[0xAB; 32]).unwrap()
    }

    #[test]
    fn test_cipher_roundtrip() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt("hello world").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), "hello world");
    }

    #[test]
    fn test_cipher_rejects_wrong_key_size() {
        assert!(FieldCipher::new(&[0u8; 31]).is_err());
        assert!(FieldCipher::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_cipher_rejects_tampered_payload() {
        let cipher = test_cipher();
        let ciphertext = cipher.encrypt("sensitive").unwrap();
        let mut framed = BASE64.decode(&ciphertext).unwrap();
        framed[NONCE_SIZE + 1] ^= 0xFF;
        assert!(cipher.decrypt(&BASE64.encode(framed)).is_err());
    }

    #[test]
    fn test_cipher_rejects_other_key() {
        let ciphertext = FieldCipher::new(&[0x11; 32]).unwrap().encrypt("x").unwrap();
        assert!(FieldCipher::new(&[0x22; 32])
            .unwrap()
            .decrypt(&ciphertext)
            .is_err());
    }

    #[test]
    fn test_decrypt_fields_resolves_dotted_paths() {
        let cipher = test_cipher();
        let secret = cipher.encrypt("s3cret").unwrap();
        let payload = json!({
            "actions": [{
                "action_datas": [{"value": {"value": secret}}]
            }]
        });

        let outcome = decrypt_fields(
            &payload,
            &cipher,
            &["actions.0.action_datas.0.value.value".to_string()],
        );

        assert!(!outcome.degraded());
        assert_eq!(
            outcome.value["actions"][0]["action_datas"][0]["value"]["value"],
            json!("s3cret")
        );
        // input is untouched
        assert_eq!(
            payload["actions"][0]["action_datas"][0]["value"]["value"],
            json!(secret)
        );
    }

    #[test]
    fn test_decrypt_reparses_structured_plaintext() {
        let cipher = test_cipher();
        let secret = cipher.encrypt(r#"{"nested": true}"#).unwrap();
        let payload = json!({"field": secret});

        let outcome = decrypt_fields(&payload, &cipher, &["field".to_string()]);
        assert_eq!(outcome.value["field"], json!({"nested": true}));
    }

    #[test]
    fn test_decrypt_plaintext_field_is_left_untouched() {
        let cipher = test_cipher();
        let payload = json!({"basic_auth": {"password": "never-encrypted"}});

        let outcome = decrypt_fields(&payload, &cipher, &["basic_auth.password".to_string()]);

        assert_eq!(outcome.value, payload);
        assert!(outcome.degraded());
        assert_eq!(outcome.warnings[0].path, "basic_auth.password");
    }

    #[test]
    fn test_decrypt_skips_absent_paths() {
        let cipher = test_cipher();
        let payload = json!({"actions": []});
        let outcome = decrypt_fields(&payload, &cipher, &["actions.3.value".to_string()]);
        assert_eq!(outcome.value, payload);
        assert!(!outcome.degraded());
    }

    #[test]
    fn test_encrypt_fields_roundtrip() {
        let cipher = test_cipher();
        let payload = json!({"connection": {"password": "pg-pass", "port": 5432}});
        let paths = vec![
            "connection.password".to_string(),
            "connection.port".to_string(),
        ];

        let encrypted = encrypt_fields(&payload, &cipher, &paths).unwrap();
        assert_ne!(encrypted["connection"]["password"], json!("pg-pass"));

        let decrypted = decrypt_fields(&encrypted, &cipher, &paths);
        assert_eq!(decrypted.value["connection"]["password"], json!("pg-pass"));
        // non-string leaf was canonicalized before encryption and re-parsed
        assert_eq!(decrypted.value["connection"]["port"], json!(5432));
    }

    #[test]
    fn test_encrypt_skips_null_leaves() {
        let cipher = test_cipher();
        let payload = json!({"field": null});
        let encrypted = encrypt_fields(&payload, &cipher, &["field".to_string()]).unwrap();
        assert_eq!(encrypted["field"], json!(null));
    }

    #[test]
    fn test_encrypted_paths_follow_populated_shape() {
        let payload = json!({
            "actions": [
                {
                    "action_datas": [
                        {"value": {"value": "enc"}},
                        {"statement": {"connection": {
                            "password": "enc",
                            "ssh_private_key": "enc"
                        }}}
                    ]
                },
                {"action_datas": [{"statement": {"connection": {"password": "enc"}}}]}
            ],
            "basic_auth": {"username": "enc", "password": "enc"}
        });

        let paths = encrypted_paths(&payload);
        assert_eq!(
            paths,
            vec![
                "actions.0.action_datas.0.value.value",
                "actions.0.action_datas.1.statement.connection.password",
                "actions.0.action_datas.1.statement.connection.ssh_private_key",
                "actions.1.action_datas.0.statement.connection.password",
                "basic_auth.username",
                "basic_auth.password",
            ]
        );
    }

    #[test]
    fn test_encrypted_paths_skip_unpopulated_ssh_fields() {
        let payload = json!({
            "actions": [{"action_datas": [{"statement": {"connection": {
                "password": "enc",
                "ssh_password": null
            }}}]}]
        });
        let paths = encrypted_paths(&payload);
        assert_eq!(
            paths,
            vec!["actions.0.action_datas.0.statement.connection.password"]
        );
    }

    #[test]
    fn test_base64_key_loading() {
        let key_b64 = BASE64.encode([0xCD; 32]);
        let cipher = FieldCipher::from_base64_key(&key_b64).unwrap();
        let roundtrip = cipher.decrypt(&cipher.encrypt("ok").unwrap()).unwrap();
        assert_eq!(roundtrip, "ok");

        assert!(FieldCipher::from_base64_key("not-base64!!!").is_err());
        assert!(FieldCipher::from_base64_key(&BASE64.encode([0u8; 16])).is_err());
    }
}
