//! Element Similarity Scorer
//!
//! Computes a weighted similarity score between two recorded element
//! attribute maps. The score drives duplicate-element grouping before
//! actions are persisted.

use lazy_static::lazy_static;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Minimum weighted-match score for two elements to be considered the same
/// logical element
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Weight applied to attribute keys absent from the importance table
const RESIDUAL_WEIGHT: f64 = 0.5;

/// Absolute tolerance for position-like attributes (CSS pixels)
const POSITION_TOLERANCE: f64 = 10.0;

/// Relative tolerance for size-like attributes, against the larger magnitude
const SIZE_TOLERANCE_RATIO: f64 = 0.10;

/// Flat recorded attribute map of one element
pub type AttributeMap = Map<String, Value>;

lazy_static! {
    /// Importance weight per attribute key. Identity-bearing attributes
    /// dominate; geometry contributes, but cannot carry a match alone.
    static ref ATTRIBUTE_WEIGHTS: HashMap<&'static str, f64> = {
        let mut weights = HashMap::new();
        weights.insert("id", 10.0);
        weights.insert("name", 8.0);
        weights.insert("xpath", 7.0);
        weights.insert("innerText", 6.0);
        weights.insert("textContent", 6.0);
        weights.insert("tagName", 5.0);
        weights.insert("type", 4.0);
        weights.insert("href", 4.0);
        weights.insert("src", 4.0);
        weights.insert("placeholder", 3.0);
        weights.insert("class", 3.0);
        weights.insert("url", 3.0);
        weights.insert("value", 2.0);
        weights.insert("parentTagName", 2.0);
        weights.insert("parentId", 2.0);
        weights.insert("x", 1.0);
        weights.insert("y", 1.0);
        weights.insert("width", 1.0);
        weights.insert("height", 1.0);
        weights
    };

    static ref POSITION_KEYS: HashSet<&'static str> =
        ["x", "y", "scrollX", "scrollY", "offsetX", "offsetY"].into_iter().collect();

    static ref SIZE_KEYS: HashSet<&'static str> =
        ["width", "height"].into_iter().collect();
}

fn weight_of(key: &str) -> f64 {
    ATTRIBUTE_WEIGHTS.get(key).copied().unwrap_or(RESIDUAL_WEIGHT)
}

/// Score the similarity of two attribute maps.
///
/// Returns a value in `[0, 1]`; `0.0` when either side is absent. Symmetric:
/// `score(a, b) == score(b, a)`.
pub fn score(a: Option<&AttributeMap>, b: Option<&AttributeMap>) -> f64 {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        _ => return 0.0,
    };

    let keys: BTreeSet<&str> = a.keys().chain(b.keys()).map(String::as_str).collect();

    let mut matched = 0.0;
    let mut total = 0.0;
    for key in keys {
        let weight = weight_of(key);
        total += weight;

        // JSON null counts as absent
        let left = a.get(key).filter(|v| !v.is_null());
        let right = b.get(key).filter(|v| !v.is_null());
        match (left, right) {
            (Some(left), Some(right)) => {
                if values_equal(key, left, right) {
                    matched += weight;
                }
            }
            // both absent: treated as agreeing
            (None, None) => matched += weight,
            // one-sided: counts toward the denominator only
            _ => {}
        }
    }

    if total == 0.0 {
        0.0
    } else {
        matched / total
    }
}

/// Key-aware value comparison: positions within an absolute tolerance,
/// sizes within a relative tolerance, everything else per the primitive rule
fn values_equal(key: &str, a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        if POSITION_KEYS.contains(key) {
            return (x - y).abs() <= POSITION_TOLERANCE;
        }
        if SIZE_KEYS.contains(key) {
            let larger = x.abs().max(y.abs());
            return (x - y).abs() <= larger * SIZE_TOLERANCE_RATIO;
        }
        return x == y;
    }
    primitive_equal(a, b)
}

/// Primitive equality: trimmed case-insensitive strings, strict numbers,
/// order-independent arrays, keyset-equal objects
fn primitive_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
        (Value::Number(_), Value::Number(_)) => a.as_f64() == b.as_f64(),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs: Vec<&Value> = x.iter().collect();
            let mut ys: Vec<&Value> = y.iter().collect();
            xs.sort_by_key(|v| v.to_string());
            ys.sort_by_key(|v| v.to_string());
            xs.iter().zip(ys.iter()).all(|(l, r)| primitive_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.len() != y.len() || !x.keys().all(|k| y.contains_key(k)) {
                return false;
            }
            x.iter().all(|(k, l)| primitive_equal(l, &y[k]))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> AttributeMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_absent_side_scores_zero() {
        let map = attrs(json!({"tagName": "BUTTON"}));
        assert_eq!(score(None, Some(&map)), 0.0);
        assert_eq!(score(Some(&map), None), 0.0);
        assert_eq!(score(None, None), 0.0);
    }

    #[test]
    fn test_identical_maps_score_one() {
        let map = attrs(json!({
            "tagName": "INPUT",
            "id": "email",
            "name": "email",
            "x": 120,
            "y": 340
        }));
        assert_eq!(score(Some(&map), Some(&map)), 1.0);
    }

    #[test]
    fn test_position_tolerance() {
        let a = attrs(json!({"tagName": "INPUT", "x": 100}));
        let near = attrs(json!({"tagName": "INPUT", "x": 108}));
        let far = attrs(json!({"tagName": "INPUT", "x": 125}));

        assert_eq!(score(Some(&a), Some(&near)), 1.0);
        assert!(score(Some(&a), Some(&far)) < 1.0);
    }

    #[test]
    fn test_size_relative_tolerance() {
        let a = attrs(json!({"width": 200}));
        let within = attrs(json!({"width": 185}));
        let outside = attrs(json!({"width": 150}));

        assert_eq!(score(Some(&a), Some(&within)), 1.0);
        assert!(score(Some(&a), Some(&outside)) < 1.0);
    }

    #[test]
    fn test_strings_compare_trimmed_case_insensitive() {
        let a = attrs(json!({"innerText": "  Submit "}));
        let b = attrs(json!({"innerText": "SUBMIT"}));
        assert_eq!(score(Some(&a), Some(&b)), 1.0);
    }

    #[test]
    fn test_one_sided_key_reduces_score() {
        let a = attrs(json!({"tagName": "A", "href": "/home"}));
        let b = attrs(json!({"tagName": "A"}));
        let s = score(Some(&a), Some(&b));
        // tagName agrees (5.0) but href (4.0) is one-sided
        assert!((s - 5.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_arrays_compare_order_independent() {
        let a = attrs(json!({"classList": ["btn", "primary"]}));
        let b = attrs(json!({"classList": ["primary", "btn"]}));
        let c = attrs(json!({"classList": ["primary"]}));

        assert_eq!(score(Some(&a), Some(&b)), 1.0);
        assert!(score(Some(&a), Some(&c)) < 1.0);
    }

    #[test]
    fn test_nested_objects_require_identical_keysets() {
        let a = attrs(json!({"rect": {"top": 4, "left": 8}}));
        let b = attrs(json!({"rect": {"left": 8, "top": 4}}));
        let c = attrs(json!({"rect": {"top": 4}}));

        assert_eq!(score(Some(&a), Some(&b)), 1.0);
        assert!(score(Some(&a), Some(&c)) < 1.0);
    }

    #[test]
    fn test_null_values_count_as_absent() {
        let a = attrs(json!({"tagName": "DIV", "id": null}));
        let b = attrs(json!({"tagName": "DIV"}));
        // id is null on one side and missing on the other: both absent
        assert_eq!(score(Some(&a), Some(&b)), 1.0);
    }

    fn arb_attr_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            "[a-zA-Z0-9 ]{0,12}".prop_map(serde_json::Value::from),
            (0..2000i64).prop_map(serde_json::Value::from),
            any::<bool>().prop_map(serde_json::Value::from),
        ]
    }

    fn arb_attr_map() -> impl Strategy<Value = AttributeMap> {
        proptest::collection::hash_map(
            prop_oneof![
                Just("tagName".to_string()),
                Just("id".to_string()),
                Just("name".to_string()),
                Just("x".to_string()),
                Just("width".to_string()),
                "[a-z]{1,8}".prop_map(String::from),
            ],
            arb_attr_value(),
            0..8,
        )
        .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_score_is_symmetric(a in arb_attr_map(), b in arb_attr_map()) {
            let forward = score(Some(&a), Some(&b));
            let backward = score(Some(&b), Some(&a));
            prop_assert!((forward - backward).abs() < 1e-12);
        }

        #[test]
        fn prop_score_is_bounded(a in arb_attr_map(), b in arb_attr_map()) {
            let s = score(Some(&a), Some(&b));
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_self_similarity_is_one(a in arb_attr_map()) {
            prop_assume!(!a.is_empty());
            prop_assert_eq!(score(Some(&a), Some(&a)), 1.0);
        }
    }
}
