use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::GuidanceArgs;
use crate::view::registry::{MatchKind, Severity, lookup};

#[derive(Debug, Serialize)]
struct GuidanceLookup<'a> {
    code: &'a str,
    key: &'static str,
    match_kind: MatchKind,
    severity: Severity,
    title: &'static str,
    why_it_matters: &'static str,
    how_to_fix: &'static str,
}

pub fn run(args: GuidanceArgs) -> Result<()> {
    let lookups = resolve_codes(&args.codes);
    let fallbacks = lookups
        .iter()
        .filter(|entry| entry.match_kind == MatchKind::Fallback)
        .count();

    info!(codes = lookups.len(), fallbacks, "resolved guidance codes");

    let text = serde_json::to_string_pretty(&lookups).context("failed to render guidance")?;
    println!("{text}");
    Ok(())
}

fn resolve_codes(codes: &[String]) -> Vec<GuidanceLookup<'_>> {
    codes
        .iter()
        .map(|code| {
            let resolution = lookup(code);
            GuidanceLookup {
                code,
                key: resolution.entry.key,
                match_kind: resolution.match_kind,
                severity: resolution.entry.severity,
                title: resolution.entry.title,
                why_it_matters: resolution.entry.explanation,
                how_to_fix: resolution.entry.fix,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_gets_an_entry_in_input_order() {
        let codes = vec![
            "variance: low".to_string(),
            "blocked_agents: regression".to_string(),
            "something nobody has seen".to_string(),
        ];

        let lookups = resolve_codes(&codes);
        let kinds = lookups
            .iter()
            .map(|entry| entry.match_kind)
            .collect::<Vec<MatchKind>>();

        assert_eq!(
            kinds,
            vec![MatchKind::Exact, MatchKind::Exact, MatchKind::Fallback]
        );
        assert_eq!(lookups[2].code, "something nobody has seen");
        assert!(!lookups[2].how_to_fix.is_empty());
    }
}
