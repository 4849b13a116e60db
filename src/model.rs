use serde::Serialize;
use serde_json::Value;

use crate::view::json::{
    array_at, as_f64_lenient, at, bool_at, f64_at, first_at, str_at, string_at, string_list,
    string_list_at, to_percent, u64_at,
};

// Everything except the narrative stays an untyped tree; the readers below
// default whatever is missing or malformed.
#[derive(Debug, Clone, Default)]
pub struct RawArtifacts {
    pub narrative: String,
    pub analytics: Value,
    pub diagnostics: Value,
    pub manifest: Option<Value>,
    pub governed_report: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub reasons: Vec<String>,
    pub validation_notes: Vec<String>,
    pub failed_fields: Vec<String>,
    pub validation_status: Option<String>,
    pub data_confidence: Option<f64>,
    pub confidence_reasons: Vec<String>,
    pub mode: Option<String>,
    pub identity_safe_mode: bool,
    pub blocked_agents: Vec<String>,
}

impl Diagnostics {
    pub fn read(value: &Value) -> Self {
        let identity_safe_mode = bool_at(value, &["identity", "safe_mode"]).unwrap_or(false)
            || str_at(value, &["identity", "mode"])
                .map(|mode| mode.eq_ignore_ascii_case("safe"))
                .unwrap_or(false);

        let mut blocked_agents = string_list_at(value, &["identity", "blocked_agents"]);
        blocked_agents.extend(string_list_at(value, &["blocked_agents"]));
        blocked_agents.sort();
        blocked_agents.dedup();

        Self {
            reasons: string_list_at(value, &["reasons"]),
            validation_notes: string_list_at(value, &["validation", "notes"]),
            failed_fields: string_list_at(value, &["validation", "failed_fields"]),
            validation_status: string_at(value, &["validation", "status"]),
            data_confidence: first_at(
                value,
                &[&["confidence", "data_confidence"], &["data_confidence"]],
            )
            .and_then(as_f64_lenient)
            .map(to_percent),
            confidence_reasons: string_list_at(value, &["confidence", "reasons"]),
            mode: string_at(value, &["mode"]),
            identity_safe_mode,
            blocked_agents,
        }
    }

    pub fn validation_failed(&self) -> bool {
        !self.failed_fields.is_empty()
            || self
                .validation_status
                .as_deref()
                .map(|status| {
                    matches!(
                        status.to_ascii_lowercase().as_str(),
                        "failed" | "fail" | "error"
                    )
                })
                .unwrap_or(false)
    }

    pub fn limitations_mode(&self) -> bool {
        is_limitations_mode(self.mode.as_deref())
    }

    pub fn reasons_text(&self) -> String {
        self.reasons
            .iter()
            .chain(self.confidence_reasons.iter())
            .map(|reason| reason.to_ascii_lowercase())
            .collect::<Vec<String>>()
            .join("\n")
    }
}

pub fn is_limitations_mode(mode: Option<&str>) -> bool {
    mode.map(|value| value.trim().eq_ignore_ascii_case("limitations"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestWarning {
    pub code: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustSnapshot {
    pub score: Option<f64>,
    pub band: Option<String>,
    pub ruleset_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunManifest {
    pub present: bool,
    pub manifest_version: Option<u64>,
    pub render_policy: Option<Value>,
    pub view_policies: Option<Value>,
    pub analysis_allowed: Option<bool>,
    pub analysis_suppressed: Option<bool>,
    pub warnings: Vec<ManifestWarning>,
    pub trust: Option<TrustSnapshot>,
}

impl RunManifest {
    pub fn read(value: Option<&Value>) -> Self {
        let Some(value) = value.filter(|value| value.is_object()) else {
            return Self::default();
        };

        let warnings = array_at(value, &["warnings"])
            .iter()
            .filter_map(|warning| match warning {
                Value::String(code) if !code.trim().is_empty() => Some(ManifestWarning {
                    code: code.trim().to_string(),
                    message: None,
                }),
                Value::Object(_) => string_at(warning, &["warning_code"])
                    .or_else(|| string_at(warning, &["code"]))
                    .map(|code| ManifestWarning {
                        code,
                        message: string_at(warning, &["message"]),
                    }),
                _ => None,
            })
            .collect();

        let trust = at(value, &["trust"])
            .filter(|trust| trust.is_object())
            .map(|trust| TrustSnapshot {
                score: f64_at(trust, &["score"]),
                band: string_at(trust, &["band"]),
                ruleset_version: string_at(trust, &["ruleset_version"])
                    .or_else(|| string_at(trust, &["version"])),
            });

        Self {
            present: true,
            manifest_version: u64_at(value, &["manifest_version"])
                .or_else(|| u64_at(value, &["schema_version"])),
            render_policy: at(value, &["render_policy"])
                .filter(|policy| policy.is_object())
                .cloned(),
            view_policies: at(value, &["view_policies"])
                .filter(|policy| policy.is_object())
                .cloned(),
            analysis_allowed: bool_at(value, &["analysis_allowed"]),
            analysis_suppressed: bool_at(value, &["analysis_suppressed"]),
            warnings,
            trust,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GovernedReport {
    pub primary_question: Option<String>,
    pub success_criteria: Vec<String>,
    pub evidence: Option<Value>,
    pub insights: Vec<Value>,
    pub scope_constraints: Vec<Value>,
    pub mode: Option<String>,
    pub confidence: Option<f64>,
}

impl GovernedReport {
    pub fn read(value: Option<&Value>, analytics: &Value) -> Self {
        let empty = Value::Null;
        let value = value.unwrap_or(&empty);

        let evidence = at(value, &["evidence"])
            .or_else(|| at(analytics, &["evidence"]))
            .cloned();
        let insights = at(value, &["insights"])
            .or_else(|| at(analytics, &["insights"]))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Self {
            primary_question: string_at(value, &["task_contract", "primary_question"])
                .or_else(|| string_at(value, &["primary_question"])),
            success_criteria: string_list(
                first_at(
                    value,
                    &[&["task_contract", "success_criteria"], &["success_criteria"]],
                ),
            ),
            evidence,
            insights,
            scope_constraints: array_at(value, &["scope_constraints"]).to_vec(),
            mode: string_at(value, &["mode"]),
            confidence: first_at(value, &[&["confidence", "score"], &["confidence"]])
                .and_then(as_f64_lenient)
                .map(to_percent),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Diagnostics, GovernedReport, RunManifest};

    #[test]
    fn diagnostics_read_defaults_every_missing_field() {
        let diagnostics = Diagnostics::read(&json!("not an object"));
        assert!(diagnostics.reasons.is_empty());
        assert!(!diagnostics.validation_failed());
        assert!(!diagnostics.identity_safe_mode);
        assert!(diagnostics.data_confidence.is_none());
    }

    #[test]
    fn diagnostics_read_normalizes_confidence_and_identity() {
        let diagnostics = Diagnostics::read(&json!({
            "reasons": ["variance: low"],
            "validation": {"failed_fields": ["target"]},
            "confidence": {"data_confidence": 0.62, "reasons": ["missing values"]},
            "identity": {"mode": "SAFE", "blocked_agents": ["regression"]}
        }));
        assert_eq!(diagnostics.data_confidence, Some(62.0));
        assert!(diagnostics.identity_safe_mode);
        assert!(diagnostics.validation_failed());
        assert_eq!(diagnostics.blocked_agents, vec!["regression"]);
        assert!(diagnostics.reasons_text().contains("missing values"));
    }

    #[test]
    fn manifest_read_accepts_string_and_object_warnings() {
        let manifest = RunManifest::read(Some(&json!({
            "render_policy": {"allow_report": true},
            "warnings": ["low_sample", {"warning_code": "drift", "message": "schema drift"}, 4],
            "trust": {"score": 71, "ruleset_version": "trust-rules/1"}
        })));
        assert!(manifest.present);
        assert_eq!(manifest.warnings.len(), 2);
        assert_eq!(manifest.warnings[1].message.as_deref(), Some("schema drift"));
        assert_eq!(
            manifest.trust.and_then(|trust| trust.ruleset_version),
            Some("trust-rules/1".to_string())
        );
    }

    #[test]
    fn manifest_read_marks_non_objects_absent() {
        assert!(!RunManifest::read(Some(&json!([1, 2]))).present);
        assert!(!RunManifest::read(None).present);
    }

    #[test]
    fn governed_report_falls_back_to_analytics_evidence() {
        let analytics = json!({"evidence": {"ev1": {"claim": "X"}}, "insights": [{"id": "i1"}]});
        let report = GovernedReport::read(
            Some(&json!({"task_contract": {"primary_question": "Why churn?"}})),
            &analytics,
        );
        assert_eq!(report.primary_question.as_deref(), Some("Why churn?"));
        assert!(report.evidence.is_some());
        assert_eq!(report.insights.len(), 1);
    }
}
