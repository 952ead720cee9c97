//! Term extraction for the in-process search store
//!
//! - Lowercase
//! - Split on non-alphanumeric characters
//! - Drop tokens shorter than 2 characters
//!
//! Document bodies contribute every string and number they contain,
//! however deeply nested. Object keys are not indexed.

use serde_json::Value;
use std::collections::BTreeSet;

/// Tokenize text into searchable terms
///
/// # Example
///
/// ```
/// use tandem_search::tokenizer::tokenize;
///
/// assert_eq!(tokenize("Desk Lamp, 40W"), vec!["desk", "lamp", "40w"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(String::from)
        .collect()
}

/// Distinct terms of a JSON document body
pub fn document_terms(body: &Value) -> BTreeSet<String> {
    let mut terms = BTreeSet::new();
    collect_terms(body, &mut terms);
    terms
}

fn collect_terms(value: &Value, terms: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => terms.extend(tokenize(s)),
        Value::Number(n) => terms.extend(tokenize(&n.to_string())),
        Value::Array(items) => {
            for item in items {
                collect_terms(item, terms);
            }
        }
        Value::Object(fields) => {
            for field in fields.values() {
                collect_terms(field, terms);
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}
