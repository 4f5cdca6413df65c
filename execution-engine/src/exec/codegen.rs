//! Action Script Compiler
//!
//! Transforms a decrypted action list, optional basic-auth credentials, and
//! the upload path-remapping table into one executable automation script.
//! Compilation is pure: no filesystem or network access, and output-directory
//! placeholders are left for the run coordinator to resolve.

use crate::exec::selector::build_selector;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use testcase_common::{Action, ActionType, BasicAuthentication};
use tracing::warn;

/// Placeholder for the per-run screenshots directory
pub const IMAGES_DIR_TOKEN: &str = "{{IMAGES_DIR}}";
/// Placeholder for the per-run database-export directory
pub const DATABASE_DIR_TOKEN: &str = "{{DATABASE_DIR}}";
/// Placeholder for the per-run api-export directory
pub const API_DIR_TOKEN: &str = "{{API_DIR}}";

/// Upload key -> materialized local path, produced by the file preprocessor
pub type FilePathMap = HashMap<String, String>;

/// Compile actions into an automation script.
///
/// Returns None when there are no actions: an empty run is a valid no-op
/// outcome, not a failure. Statement blocks are emitted in action order.
pub fn compile(
    basic_auth: Option<&BasicAuthentication>,
    actions: &[Action],
    file_paths: &FilePathMap,
) -> Option<String> {
    if actions.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str("// Generated automation script\n");
    out.push_str("module.exports = async ({ page, context, db, api }) => {\n");

    // credentials are embedded once, ahead of all action statements
    if let Some(auth) = basic_auth {
        out.push_str(&format!(
            "  await context.setHTTPCredentials({{ username: '{}', password: '{}' }});\n",
            js_str(&auth.username),
            js_str(auth.password.expose_secret()),
        ));
    }

    for (index, action) in actions.iter().enumerate() {
        emit_action(&mut out, index + 1, action, file_paths);
    }

    out.push_str("};\n");
    Some(out)
}

fn emit_action(out: &mut String, step: usize, action: &Action, file_paths: &FilePathMap) {
    out.push_str(&format!(
        "\n  // step {}: {}\n",
        step,
        comment_text(&action.description)
    ));

    match action.action_type {
        ActionType::Click => {
            let Some(selector) = target_selector(action, step) else {
                out.push_str("  // skipped: no target element\n");
                return;
            };
            out.push_str(&format!("  await page.click('{}');\n", js_str(&selector)));
        }

        ActionType::Input => {
            let Some(selector) = target_selector(action, step) else {
                out.push_str("  // skipped: no target element\n");
                return;
            };
            let value = resolved_input(action);
            out.push_str(&format!(
                "  await page.fill('{}', '{}');\n",
                js_str(&selector),
                js_str(&value),
            ));
        }

        ActionType::Navigate => {
            let url = resolved_input(action);
            if url.is_empty() {
                warn!("step {} has no navigation target", step);
                out.push_str("  // skipped: no navigation target\n");
                return;
            }
            out.push_str(&format!("  await page.goto('{}');\n", js_str(&url)));
        }

        ActionType::Upload => {
            let Some(upload) = action.file_upload() else {
                warn!("step {} has no file_upload payload", step);
                out.push_str("  // skipped: no upload payload\n");
                return;
            };
            // uploads resolve strictly through the preprocessing map; the
            // compiler never fetches files itself
            let Some(local_path) = file_paths.get(upload.upload_key()) else {
                debug_assert!(false, "upload key missing from file path map");
                warn!(
                    "step {}: upload key {} missing from file path map",
                    step,
                    upload.upload_key()
                );
                out.push_str("  // skipped: upload file was not materialized\n");
                return;
            };
            let selector = action
                .primary_element()
                .and_then(build_selector)
                .unwrap_or_else(|| "input[type='file']".to_string());
            out.push_str(&format!(
                "  await page.setInputFiles('{}', '{}');\n",
                js_str(&selector),
                js_str(local_path),
            ));
        }

        ActionType::DatabaseExecution => {
            let Some(statement) = action.statement() else {
                warn!("step {} has no statement payload", step);
                out.push_str("  // skipped: no statement payload\n");
                return;
            };
            let conn = &statement.connection;
            out.push_str(&format!(
                "  await db.execute({{ driver: '{}', host: '{}', port: {}, database: '{}', username: '{}', password: '{}' }}, '{}', {{ exportDir: '{}' }});\n",
                js_str(&conn.driver),
                js_str(&conn.host),
                conn.port,
                js_str(&conn.database),
                js_str(&conn.username),
                js_str(conn.password.expose_secret()),
                js_str(&statement.query),
                DATABASE_DIR_TOKEN,
            ));
        }

        ActionType::ApiCall => {
            let Some(request) = action.api_request() else {
                warn!("step {} has no api_call payload", step);
                out.push_str("  // skipped: no api_call payload\n");
                return;
            };
            // headers/body are JSON, which is valid JS literal syntax
            let headers = serde_json::to_string(&request.headers).unwrap_or_else(|_| "{}".into());
            let body = request
                .body
                .as_ref()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "null".into());
            out.push_str(&format!(
                "  await api.call({{ method: '{}', url: '{}', headers: {}, body: {} }}, {{ exportDir: '{}' }});\n",
                js_str(&request.method),
                js_str(&request.url),
                headers,
                body,
                API_DIR_TOKEN,
            ));
        }

        ActionType::Wait => {
            let millis = resolved_input(action).parse::<u64>().unwrap_or(1000);
            out.push_str(&format!("  await page.waitForTimeout({});\n", millis));
        }

        ActionType::Assert => {
            out.push_str(&format!(
                "  await page.screenshot({{ path: '{}/step_{:03}.png', fullPage: true }});\n",
                IMAGES_DIR_TOKEN, step,
            ));
            let expected = resolved_input(action);
            if let (Some(selector), false) = (
                action.primary_element().and_then(build_selector),
                expected.is_empty(),
            ) {
                out.push_str(&format!(
                    "  if ((await page.textContent('{}'))?.trim() !== '{}') throw new Error('assertion failed at step {}');\n",
                    js_str(&selector),
                    js_str(expected.trim()),
                    step,
                ));
            }
        }

        ActionType::BrowserStorage => {
            let Some(storage) = action.browser_storage() else {
                warn!("step {} has no browser_storage payload", step);
                out.push_str("  // skipped: no browser_storage payload\n");
                return;
            };
            if !storage.cookies.is_empty() {
                let cookies: Vec<String> = storage
                    .cookies
                    .iter()
                    .map(|c| {
                        format!(
                            "{{ name: '{}', value: '{}', domain: '{}', path: '{}' }}",
                            js_str(&c.name),
                            js_str(&c.value),
                            js_str(c.domain.as_deref().unwrap_or("localhost")),
                            js_str(c.path.as_deref().unwrap_or("/")),
                        )
                    })
                    .collect();
                out.push_str(&format!(
                    "  await context.addCookies([{}]);\n",
                    cookies.join(", ")
                ));
            }
            emit_storage_writes(out, "localStorage", &storage.local_storage);
            emit_storage_writes(out, "sessionStorage", &storage.session_storage);
        }
    }
}

fn emit_storage_writes(out: &mut String, store: &str, entries: &HashMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    // deterministic emission order for identical inputs
    let mut pairs: Vec<(&String, &String)> = entries.iter().collect();
    pairs.sort();
    let writes: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}.setItem('{}', '{}');", store, js_str(k), js_str(v)))
        .collect();
    out.push_str(&format!(
        "  await page.evaluate(() => {{ {} }});\n",
        writes.join(" ")
    ));
}

/// Selector for the action's primary element, with a skip comment when the
/// action targets nothing usable
fn target_selector(action: &Action, step: usize) -> Option<String> {
    let selector = action.primary_element().and_then(build_selector);
    if selector.is_none() {
        warn!("step {} has no resolvable target element", step);
    }
    selector
}

/// The action's input value with `{{variable}}` generation entries applied
fn resolved_input(action: &Action) -> String {
    let mut value = action
        .input_value()
        .map(|v| v.expose_secret().to_string())
        .unwrap_or_default();
    for generation in &action.action_data_generation {
        value = value.replace(&format!("{{{{{}}}}}", generation.variable), &generation.value);
    }
    value
}

/// Escape a value for embedding in a single-quoted JS string literal
fn js_str(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// Keep descriptions from breaking out of a line comment
fn comment_text(description: &str) -> String {
    let text = description.replace(['\n', '\r'], " ");
    if text.is_empty() {
        "(no description)".to_string()
    } else {
        text
    }
}
