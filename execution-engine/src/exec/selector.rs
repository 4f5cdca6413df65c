//! Selector Derivation
//!
//! Builds the strongest available selector string from a recorded element's
//! flat attribute map, filtering out framework-generated identifiers that
//! would not survive a re-render.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use testcase_common::Element;
use tracing::debug;

lazy_static! {
    static ref DYNAMIC_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"^[a-f0-9]{8,}$").unwrap(),           // Hex hashes
        Regex::new(r"^\d{10,}$").unwrap(),                 // Long numbers
        Regex::new(r"^[a-z]{1,3}\d{4,}$").unwrap(),       // Short prefix + numbers
        Regex::new(r"__\w+__").unwrap(),                   // Double underscore wrappers
        Regex::new(r"^css-[a-z0-9]+$").unwrap(),          // CSS-in-JS
        Regex::new(r"^sc-[a-zA-Z]+$").unwrap(),           // Styled-components
        Regex::new(r"^emotion-\d+$").unwrap(),            // Emotion CSS
        Regex::new(r"^v-[a-f0-9]+$").unwrap(),            // Vue scoped
        Regex::new(r"^_[A-Z][a-zA-Z]+_[a-z0-9]+$").unwrap(), // React CSS modules
    ];

    /// Utility classes that identify layout, not elements
    static ref CLASS_BLACKLIST: HashSet<&'static str> = [
        "flex", "hidden", "block", "inline", "grid", "container", "row",
        "col", "btn", "form-control", "active", "selected", "disabled",
        "open", "rounded", "shadow",
    ].into_iter().collect();

    static ref CLASS_PREFIX_BLACKLIST: Vec<&'static str> = vec![
        "p-", "m-", "px-", "py-", "mx-", "my-", "w-", "h-",
        "text-", "font-", "bg-", "border-", "col-", "d-",
        "hover:", "focus:", "sm:", "md:", "lg:", "xl:",
    ];
}

/// Check if an identifier looks like a generated/dynamic value
pub fn looks_dynamic(value: &str) -> bool {
    DYNAMIC_PATTERNS.iter().any(|p| p.is_match(value))
}

fn is_stable_class(class: &str) -> bool {
    !class.is_empty()
        && !looks_dynamic(class)
        && !CLASS_BLACKLIST.contains(class)
        && !CLASS_PREFIX_BLACKLIST.iter().any(|p| class.starts_with(p))
}

/// Escape a value for embedding inside a quoted attribute selector
fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Derive the strongest selector for an element.
///
/// Priority: stable id > name attribute > recorded xpath > tag with stable
/// classes > bare tag. Returns None when the element carries no attribute
/// map at all.
pub fn build_selector(element: &Element) -> Option<String> {
    element.element_data.as_ref()?;

    if let Some(id) = element.attr_str("id") {
        if !looks_dynamic(id) {
            return Some(format!("#{}", id));
        }
    }

    if let Some(name) = element.attr_str("name") {
        return Some(format!("[name='{}']", escape_attr(name)));
    }

    if let Some(xpath) = element.attr_str("xpath") {
        return Some(format!("xpath={}", xpath));
    }

    let tag = element
        .attr_str("tagName")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "*".to_string());

    if let Some(classes) = element.attr_str("class") {
        let stable: Vec<&str> = classes
            .split_whitespace()
            .filter(|c| is_stable_class(c))
            .take(2)
            .collect();
        if !stable.is_empty() {
            let selector = format!("{}{}", tag, stable.iter().map(|c| format!(".{}", c)).collect::<String>());
            debug!("selector from classes: {}", selector);
            return Some(selector);
        }
    }

    Some(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(value: serde_json::Value) -> Element {
        Element::new(value.as_object().unwrap().clone())
    }

    #[test]
    fn test_dynamic_detection() {
        assert!(looks_dynamic("abc123456789"));
        assert!(looks_dynamic("css-1a2b3c4d"));
        assert!(looks_dynamic("sc-aBcDeFg"));

        assert!(!looks_dynamic("login-button"));
        assert!(!looks_dynamic("submit"));
        assert!(!looks_dynamic("user-email"));
    }

    #[test]
    fn test_stable_id_wins() {
        let el = element(json!({"tagName": "BUTTON", "id": "submit-btn", "name": "go"}));
        assert_eq!(build_selector(&el).unwrap(), "#submit-btn");
    }

    #[test]
    fn test_dynamic_id_falls_through_to_name() {
        let el = element(json!({"tagName": "INPUT", "id": "css-1a2b3c4d", "name": "email"}));
        assert_eq!(build_selector(&el).unwrap(), "[name='email']");
    }

    #[test]
    fn test_xpath_fallback() {
        let el = element(json!({"tagName": "DIV", "xpath": "//div[2]/span"}));
        assert_eq!(build_selector(&el).unwrap(), "xpath=//div[2]/span");
    }

    #[test]
    fn test_tag_with_stable_classes() {
        let el = element(json!({"tagName": "BUTTON", "class": "flex login-submit p-4"}));
        assert_eq!(build_selector(&el).unwrap(), "button.login-submit");
    }

    #[test]
    fn test_bare_tag_as_last_resort() {
        let el = element(json!({"tagName": "TEXTAREA", "class": "p-2 m-1"}));
        assert_eq!(build_selector(&el).unwrap(), "textarea");
    }

    #[test]
    fn test_no_attribute_map() {
        let el = Element {
            element_id: None,
            element_data: None,
        };
        assert!(build_selector(&el).is_none());
    }

    #[test]
    fn test_attribute_value_escaping() {
        let el = element(json!({"tagName": "INPUT", "name": "user's[field]"}));
        assert_eq!(build_selector(&el).unwrap(), "[name='user\\'s[field]']");
    }
}
