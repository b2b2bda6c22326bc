//! Syntax/safety validation for generated analytics queries.
//!
//! The model's raw completion is cleaned first (fences, leading prose), then
//! checked: an analytics query must start with FROM and must be read-only.

use crate::capability::strip_code_fences;
use crate::models::{GeneratedQuery, QueryComplexity};

const FORBIDDEN_KEYWORDS: &[&str] = &["DELETE", "DROP", "INSERT", "UPDATE", "TRUNCATE", "ALTER"];

/// Clean a raw completion into a query candidate: strip fences and keep the
/// text from the first FROM keyword onward.
pub fn clean_query(raw: &str) -> String {
    let cleaned = strip_code_fences(raw);
    // Byte-preserving uppercase so the index maps back onto `cleaned`.
    let upper = cleaned.to_ascii_uppercase();
    match upper.find("FROM") {
        Some(idx) => cleaned[idx..].trim().to_string(),
        None => cleaned.trim().to_string(),
    }
}

/// Validate a cleaned query. Returns the typed query or a human-readable
/// reason; callers map the reason to a `ValidationFailure`.
pub fn validate_query(text: &str) -> Result<GeneratedQuery, String> {
    if text.is_empty() {
        return Err("generated query is empty".to_string());
    }

    let upper = text.to_ascii_uppercase();
    if !upper.starts_with("FROM") {
        return Err(format!("query does not start with FROM: {:.80}", text));
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if upper
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .any(|word| word == *keyword)
        {
            return Err(format!("query contains forbidden keyword {keyword}"));
        }
    }

    Ok(GeneratedQuery {
        text: text.to_string(),
        syntax_valid: true,
        complexity: complexity_tier(&upper),
    })
}

fn complexity_tier(upper: &str) -> QueryComplexity {
    let mut score = 0;
    for construct in ["GROUP BY", "HAVING", "ORDER BY", "JOIN"] {
        if upper.contains(construct) {
            score += 1;
        }
    }
    match score {
        0 => QueryComplexity::Low,
        1 | 2 => QueryComplexity::Medium,
        _ => QueryComplexity::High,
    }
}
