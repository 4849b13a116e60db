use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Diagnostics, RunManifest};
use crate::view::evidence::Insight;
use crate::view::extract::Metrics;
use crate::view::governance::{GovernanceDecision, ManifestStatus};
use crate::view::trust::TrustThresholds;

// Most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Partial,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Diagnostics,
    Validation,
    Manifest,
    Governance,
    Evidence,
    Extraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuidanceEntry {
    pub key: &'static str,
    #[serde(skip)]
    pub keywords: &'static [&'static str],
    pub severity: Severity,
    pub title: &'static str,
    pub explanation: &'static str,
    pub fix: &'static str,
}

const GUIDANCE_TABLE: &[GuidanceEntry] = &[
    GuidanceEntry {
        key: "target_variable: issue",
        keywords: &["target variable", "target column", "no target"],
        severity: Severity::Critical,
        title: "Target variable problem",
        explanation: "Outcome modelling and driver rankings depend on a usable target; without one every downstream claim about drivers is unsupported.",
        fix: "Confirm the target column exists, is populated, and has the expected type, then rerun the analysis.",
    },
    GuidanceEntry {
        key: "target_variable: missing",
        keywords: &[],
        severity: Severity::Critical,
        title: "Target variable missing",
        explanation: "No outcome column was identified, so regression and driver analysis could not run.",
        fix: "Specify the target column explicitly in the task contract.",
    },
    GuidanceEntry {
        key: "safe_mode: enforced",
        keywords: &["safe mode", "safe_mode"],
        severity: Severity::Critical,
        title: "Safe mode enforced",
        explanation: "The run was restricted by policy; recommendations are withheld and results should be treated as low trust.",
        fix: "Resolve the conditions listed in diagnostics that triggered safe mode and rerun.",
    },
    GuidanceEntry {
        key: "fallback_report: detected",
        keywords: &["system notice", "analysis failed", "fallback"],
        severity: Severity::Critical,
        title: "Analysis did not complete",
        explanation: "The narrative is a diagnostics fallback, not an analysis; none of its statements are findings.",
        fix: "Check the pipeline logs for the failing stage and rerun once it is fixed.",
    },
    GuidanceEntry {
        key: "validation: failed",
        keywords: &["validation failed", "failed validation", "failed_fields"],
        severity: Severity::Critical,
        title: "Validation failed",
        explanation: "One or more fields failed backend validation, so numbers derived from them may be wrong.",
        fix: "Inspect the failed fields, correct the source data or schema, and rerun validation.",
    },
    GuidanceEntry {
        key: "manifest: absent",
        keywords: &["manifest missing", "no manifest"],
        severity: Severity::Critical,
        title: "Run manifest missing",
        explanation: "Without a manifest no render policy can be trusted, so all derived content is hidden.",
        fix: "Make sure the pipeline publishes a run manifest with a render policy.",
    },
    GuidanceEntry {
        key: "manifest: incompatible",
        keywords: &["incompatible manifest", "unsupported manifest"],
        severity: Severity::Critical,
        title: "Run manifest incompatible",
        explanation: "The manifest version or shape is not supported, so its render policy cannot be trusted.",
        fix: "Upgrade the pipeline or this viewer so both agree on the manifest version.",
    },
    GuidanceEntry {
        key: "analysis: suppressed",
        keywords: &["suppressed", "analysis not allowed"],
        severity: Severity::Critical,
        title: "Analysis suppressed",
        explanation: "The backend marked this run as not allowed to show analysis results.",
        fix: "Review the governance decision recorded in the run manifest.",
    },
    GuidanceEntry {
        key: "limitations_mode: active",
        keywords: &["limitations mode", "limitations"],
        severity: Severity::Warning,
        title: "Limitations mode active",
        explanation: "The run completed with known limitations; insights are withheld and trust is capped.",
        fix: "Address the listed limitations or accept the reduced scope explicitly.",
    },
    GuidanceEntry {
        key: "blocked_agents: regression",
        keywords: &[],
        severity: Severity::Warning,
        title: "Regression analysis blocked",
        explanation: "The regression agent did not run, so outcome drivers are unavailable.",
        fix: "Provide a numeric target with enough variance and rerun.",
    },
    GuidanceEntry {
        key: "blocked_agents: clustering",
        keywords: &[],
        severity: Severity::Warning,
        title: "Clustering blocked",
        explanation: "Segmentation did not run, so personas are unavailable.",
        fix: "Provide enough rows and numeric features for clustering.",
    },
    GuidanceEntry {
        key: "blocked_agents: agent",
        keywords: &["blocked"],
        severity: Severity::Warning,
        title: "Analysis agent blocked",
        explanation: "At least one analysis agent was blocked, so part of the report is missing.",
        fix: "Check the diagnostics for the blocking condition of each agent.",
    },
    GuidanceEntry {
        key: "variance: low",
        keywords: &["low variance", "near-constant", "constant column"],
        severity: Severity::Warning,
        title: "Low variance",
        explanation: "Columns with little variation carry little signal and can destabilise models.",
        fix: "Drop near-constant columns or collect more varied data.",
    },
    GuidanceEntry {
        key: "sample_size: small",
        keywords: &["small sample", "too few rows", "insufficient rows", "fewer than 100 rows"],
        severity: Severity::Warning,
        title: "Small sample",
        explanation: "With few rows, estimates are noisy and patterns may not generalise.",
        fix: "Collect more data before acting on these results.",
    },
    GuidanceEntry {
        key: "features: insufficient",
        keywords: &["too few features", "insufficient features", "fewer than 5 features"],
        severity: Severity::Warning,
        title: "Too few features",
        explanation: "A narrow feature set limits what the analysis can explain.",
        fix: "Add relevant columns to the dataset.",
    },
    GuidanceEntry {
        key: "missing_values: high",
        keywords: &["missing values", "missing data"],
        severity: Severity::Warning,
        title: "Missing values",
        explanation: "Gaps in the data bias estimates and shrink the usable sample.",
        fix: "Impute or backfill missing values, or exclude sparse columns.",
    },
    GuidanceEntry {
        key: "data_quality: low",
        keywords: &["low quality", "poor quality", "low data quality", "poor data quality"],
        severity: Severity::Warning,
        title: "Low data quality",
        explanation: "Quality checks flagged problems that reduce confidence in every figure.",
        fix: "Review the quality metrics and clean the flagged columns.",
    },
    GuidanceEntry {
        key: "confidence: low",
        keywords: &["low confidence", "limited confidence"],
        severity: Severity::Warning,
        title: "Low confidence",
        explanation: "The backend reported low confidence in its conclusions.",
        fix: "Treat conclusions as directional and validate them independently.",
    },
    GuidanceEntry {
        key: "drift: detected",
        keywords: &["drift"],
        severity: Severity::Warning,
        title: "Data drift detected",
        explanation: "The data no longer matches what earlier runs saw, so comparisons may mislead.",
        fix: "Compare the current schema and distributions with the previous run.",
    },
    GuidanceEntry {
        key: "evidence: unresolved",
        keywords: &["unresolved evidence", "unknown evidence"],
        severity: Severity::Info,
        title: "Unresolved evidence reference",
        explanation: "Some insights point at evidence the backend did not include, so they are shown without support.",
        fix: "Check that the evidence payload is complete for this run.",
    },
    GuidanceEntry {
        key: "outliers: present",
        keywords: &["outlier", "anomal"],
        severity: Severity::Info,
        title: "Outliers present",
        explanation: "Extreme values can dominate averages and model fits.",
        fix: "Review the flagged records before relying on aggregate figures.",
    },
    GuidanceEntry {
        key: "correlation: multicollinearity",
        keywords: &["multicollinear", "collinear"],
        severity: Severity::Info,
        title: "Correlated predictors",
        explanation: "Strongly correlated inputs make individual driver weights unstable.",
        fix: "Combine or drop redundant predictors.",
    },
];

const FALLBACK_ENTRY: GuidanceEntry = GuidanceEntry {
    key: "unknown",
    keywords: &[],
    severity: Severity::Info,
    title: "Unrecognized signal",
    explanation: "The backend reported a condition this viewer has no specific guidance for.",
    fix: "Review the raw diagnostics for details.",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub entry: &'static GuidanceEntry,
    pub match_kind: MatchKind,
}

pub fn normalize_key(code: &str) -> String {
    let lowered = code
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_ascii_lowercase();

    match lowered.split_once(':') {
        Some((category, detail)) => {
            format!("{}: {}", canonical_category(category), detail.trim())
        }
        None => lowered,
    }
}

fn canonical_category(category: &str) -> String {
    category.trim().replace([' ', '-'], "_")
}

// Details that stand for any value of their category.
const GENERIC_DETAILS: &[&str] = &["issue", "agent"];

const DETAIL_ALIASES: &[(&str, &[&str])] = &[
    ("low", &["poor", "weak", "limited", "insufficient"]),
    ("high", &["elevated", "excessive"]),
    ("small", &["low", "limited", "insufficient"]),
    ("insufficient", &["few", "low", "limited"]),
    ("missing", &["absent", "none"]),
    ("absent", &["missing", "none"]),
    ("failed", &["failure", "fail", "error"]),
    ("enforced", &["active", "enabled", "on"]),
    ("active", &["enabled", "on"]),
    ("detected", &["present", "found"]),
    ("present", &["detected", "found"]),
    ("unresolved", &["unknown", "dangling"]),
    ("incompatible", &["unsupported", "invalid"]),
];

const NEGATIONS: &[&str] = &["no", "not", "non", "never", "without"];

pub fn lookup(code: &str) -> Resolution {
    let normalized = normalize_key(code);

    if let Some(entry) = GUIDANCE_TABLE.iter().find(|entry| entry.key == normalized) {
        return Resolution {
            entry,
            match_kind: MatchKind::Exact,
        };
    }

    let split = normalized.split_once(':').map(|(category, detail)| (category, detail.trim()));
    if let Some((category, detail)) = split {
        if let Some(entry) = category_match(category, detail) {
            return Resolution {
                entry,
                match_kind: MatchKind::Partial,
            };
        }
    }

    let searchable = normalized.replace('_', " ");
    let keyword_hit = GUIDANCE_TABLE
        .iter()
        .filter(|entry| split.is_none_or(|(category, _)| entry_category(entry) != category))
        .find(|entry| {
            entry
                .keywords
                .iter()
                .any(|keyword| normalized.contains(keyword) || searchable.contains(keyword))
        });
    if let Some(entry) = keyword_hit {
        return Resolution {
            entry,
            match_kind: MatchKind::Partial,
        };
    }

    Resolution {
        entry: &FALLBACK_ENTRY,
        match_kind: MatchKind::Fallback,
    }
}

fn entry_category(entry: &GuidanceEntry) -> &'static str {
    entry.key.split_once(':').map_or(entry.key, |(category, _)| category)
}

fn entry_detail(entry: &GuidanceEntry) -> &'static str {
    entry.key.split_once(':').map_or("", |(_, detail)| detail.trim())
}

fn category_match(category: &str, detail: &str) -> Option<&'static GuidanceEntry> {
    let words = detail
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<&str>>();
    if words.iter().any(|word| NEGATIONS.contains(word)) {
        return None;
    }

    let same_category = move || {
        GUIDANCE_TABLE
            .iter()
            .filter(move |entry| entry_category(entry) == category)
    };

    same_category()
        .find(|entry| detail_agrees(entry_detail(entry), &words))
        .or_else(|| same_category().find(|entry| GENERIC_DETAILS.contains(&entry_detail(entry))))
}

fn detail_agrees(entry_detail: &str, words: &[&str]) -> bool {
    let aliases = DETAIL_ALIASES
        .iter()
        .find(|(detail, _)| *detail == entry_detail)
        .map_or(&[][..], |(_, aliases)| *aliases);

    words
        .iter()
        .any(|word| *word == entry_detail || aliases.contains(word))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub key: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub why_it_matters: String,
    pub how_to_fix: String,
    pub source: IssueSource,
    pub match_kind: MatchKind,
}

pub fn issue_for(code: &str, message: Option<&str>, source: IssueSource) -> Issue {
    let resolution = lookup(code);
    let entry = resolution.entry;
    let title = match resolution.match_kind {
        MatchKind::Fallback => format!("{}: {}", entry.title, code.trim()),
        MatchKind::Exact | MatchKind::Partial => entry.title.to_string(),
    };

    Issue {
        key: match resolution.match_kind {
            MatchKind::Fallback => normalize_key(code),
            MatchKind::Exact | MatchKind::Partial => entry.key.to_string(),
        },
        severity: entry.severity,
        title,
        message: message
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .unwrap_or(code.trim())
            .to_string(),
        why_it_matters: entry.explanation.to_string(),
        how_to_fix: entry.fix.to_string(),
        source,
        match_kind: resolution.match_kind,
    }
}

pub fn finalize_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut positions = HashMap::<String, usize>::new();
    let mut out = Vec::<Issue>::with_capacity(issues.len());

    for issue in issues {
        let title_key = normalize_key(&issue.title);
        match positions.get(&title_key) {
            Some(&position) => {
                if issue.severity < out[position].severity {
                    out[position] = issue;
                }
            }
            None => {
                positions.insert(title_key, out.len());
                out.push(issue);
            }
        }
    }

    out.sort_by_key(|issue| issue.severity);
    out
}

pub struct SignalInputs<'a> {
    pub diagnostics: &'a Diagnostics,
    pub manifest: &'a RunManifest,
    pub governance: &'a GovernanceDecision,
    pub insights: &'a [Insight],
    pub metrics: &'a Metrics,
    pub thresholds: &'a TrustThresholds,
}

pub fn collect_issues(inputs: &SignalInputs<'_>) -> Vec<Issue> {
    let mut issues = Vec::new();

    if !inputs.diagnostics.failed_fields.is_empty() {
        issues.push(issue_for(
            "validation: failed",
            Some(&format!(
                "failed fields: {}",
                inputs.diagnostics.failed_fields.join(", ")
            )),
            IssueSource::Validation,
        ));
    } else if inputs.diagnostics.validation_failed() {
        issues.push(issue_for("validation: failed", None, IssueSource::Validation));
    }
    for note in &inputs.diagnostics.validation_notes {
        issues.push(issue_for(note, None, IssueSource::Validation));
    }

    for warning in &inputs.manifest.warnings {
        issues.push(issue_for(
            &warning.code,
            warning.message.as_deref(),
            IssueSource::Manifest,
        ));
    }

    match inputs.governance.manifest {
        ManifestStatus::Compatible => {}
        ManifestStatus::Absent => {
            issues.push(issue_for("manifest: absent", None, IssueSource::Governance));
        }
        ManifestStatus::MissingRenderPolicy => issues.push(issue_for(
            "manifest: incompatible",
            Some("run manifest has no render_policy"),
            IssueSource::Governance,
        )),
        ManifestStatus::UnsupportedVersion { version } => issues.push(issue_for(
            "manifest: incompatible",
            Some(&format!("manifest version {version} is not supported")),
            IssueSource::Governance,
        )),
    }
    if inputs.governance.analysis_suppressed {
        issues.push(issue_for("analysis: suppressed", None, IssueSource::Governance));
    }
    if inputs.governance.fallback_detected {
        issues.push(issue_for(
            "fallback_report: detected",
            None,
            IssueSource::Governance,
        ));
    }

    let unresolved = inputs
        .insights
        .iter()
        .filter(|insight| insight.has_unresolved_evidence())
        .filter_map(|insight| insight.evidence_id.as_deref())
        .collect::<Vec<&str>>();
    if !unresolved.is_empty() {
        issues.push(issue_for(
            "evidence: unresolved",
            Some(&format!("unresolved evidence ids: {}", unresolved.join(", "))),
            IssueSource::Evidence,
        ));
    }

    if let Some(rows) = inputs
        .metrics
        .row_count()
        .filter(|rows| *rows < inputs.thresholds.min_row_count)
    {
        issues.push(issue_for(
            "sample_size: small",
            Some(&format!(
                "{rows} rows, fewer than {}",
                inputs.thresholds.min_row_count
            )),
            IssueSource::Extraction,
        ));
    }
    if let Some(columns) = inputs
        .metrics
        .column_count()
        .filter(|columns| *columns < inputs.thresholds.min_feature_count)
    {
        issues.push(issue_for(
            "features: insufficient",
            Some(&format!(
                "{columns} features, fewer than {}",
                inputs.thresholds.min_feature_count
            )),
            IssueSource::Extraction,
        ));
    }

    finalize_issues(issues)
}

pub fn collect_guidance(inputs: &SignalInputs<'_>) -> Vec<Issue> {
    let diagnostics = inputs.diagnostics;
    let mut guidance = Vec::new();

    for reason in diagnostics
        .reasons
        .iter()
        .chain(diagnostics.confidence_reasons.iter())
    {
        guidance.push(issue_for(reason, None, IssueSource::Diagnostics));
    }
    for agent in &diagnostics.blocked_agents {
        guidance.push(issue_for(
            &format!("blocked_agents: {agent}"),
            Some(&format!("{agent} agent was blocked")),
            IssueSource::Diagnostics,
        ));
    }
    if inputs.governance.limitations_mode {
        guidance.push(issue_for(
            "limitations_mode: active",
            None,
            IssueSource::Governance,
        ));
    }
    if inputs.governance.identity_safe_mode {
        guidance.push(issue_for("safe_mode: enforced", None, IssueSource::Governance));
    }

    finalize_issues(guidance)
}
