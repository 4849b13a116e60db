use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::view::json::{
    array_at, as_f64_lenient, at, bool_at, f64_at, round1, string_at, string_list, to_percent,
    u64_at,
};

mod entities;
mod metrics;
mod sections;

pub use entities::*;
pub use metrics::*;
pub use sections::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub sections: Vec<Section>,
    pub metrics: Metrics,
    pub personas: Vec<Persona>,
    pub anomalies: AnomalyRecord,
    pub outcome_model: Option<OutcomeModel>,
    pub analytics: EnhancedAnalytics,
}

pub fn extract(narrative: &str, analytics: &Value, importance_floor: f64) -> Extraction {
    let sections = split_sections(narrative, importance_floor);
    let metrics = extract_metrics(narrative);
    let personas = extract_personas(analytics, &sections);
    let anomalies = extract_anomalies(analytics, &sections, &metrics);
    let outcome_model = extract_outcome_model(analytics, narrative, &metrics);
    let analytics = read_enhanced_analytics(analytics);

    Extraction {
        sections,
        metrics,
        personas,
        anomalies,
        outcome_model,
        analytics,
    }
}

// A pattern that fails to compile is logged and never matches.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            warn!(pattern, error = %err, "dropping extraction pattern that failed to compile");
            None
        }
    }
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push('-');
        }
    }

    while out.contains("--") {
        out = out.replace("--", "-");
    }

    out.trim_matches('-').to_string()
}

fn list_item_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    for marker in ["- ", "* ", "• ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim()).filter(|rest| !rest.is_empty());
        }
    }

    let digits = trimmed
        .chars()
        .take_while(|character| character.is_ascii_digit())
        .count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim()).filter(|rest| !rest.is_empty());
        }
    }

    None
}

fn strip_emphasis(input: &str) -> String {
    input
        .replace("**", "")
        .replace("__", "")
        .replace('`', "")
        .trim()
        .to_string()
}
