use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Diagnostics, RunManifest, is_limitations_mode};
use crate::view::json::{at, bool_at};

pub const SUPPORTED_MANIFEST_VERSIONS: &[u64] = &[1, 2];

const FALLBACK_MARKERS: &[&str] = &[
    "system notice",
    "analysis failed",
    "analysis could not be completed",
    "fallback report",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceState {
    Normal,
    Limitations,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyGate {
    Report,
    Personas,
    Anomalies,
    Regression,
    Correlation,
    Distribution,
    QualityMetrics,
    BusinessIntelligence,
    FeatureImportance,
}

impl PolicyGate {
    pub const ALL: [PolicyGate; 9] = [
        PolicyGate::Report,
        PolicyGate::Personas,
        PolicyGate::Anomalies,
        PolicyGate::Regression,
        PolicyGate::Correlation,
        PolicyGate::Distribution,
        PolicyGate::QualityMetrics,
        PolicyGate::BusinessIntelligence,
        PolicyGate::FeatureImportance,
    ];

    pub fn flag_key(self) -> &'static str {
        match self {
            Self::Report => "allow_report",
            Self::Personas => "allow_personas",
            Self::Anomalies => "allow_anomalies",
            Self::Regression => "allow_regression",
            Self::Correlation => "allow_correlation",
            Self::Distribution => "allow_distribution",
            Self::QualityMetrics => "allow_quality_metrics",
            Self::BusinessIntelligence => "allow_business_intelligence",
            Self::FeatureImportance => "allow_feature_importance",
        }
    }

    pub fn view_key(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Personas => "personas",
            Self::Anomalies => "anomalies",
            Self::Regression => "regression",
            Self::Correlation => "correlation",
            Self::Distribution => "distribution",
            Self::QualityMetrics => "quality_metrics",
            Self::BusinessIntelligence => "business_intelligence",
            Self::FeatureImportance => "feature_importance",
        }
    }
}

// Default is fully closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderPolicy {
    pub allow_report: bool,
    pub allow_personas: bool,
    pub allow_anomalies: bool,
    pub allow_regression: bool,
    pub allow_correlation: bool,
    pub allow_distribution: bool,
    pub allow_quality_metrics: bool,
    pub allow_business_intelligence: bool,
    pub allow_feature_importance: bool,
}

impl RenderPolicy {
    pub fn closed() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn open() -> Self {
        let mut policy = Self::closed();
        for gate in PolicyGate::ALL {
            policy.set(gate, true);
        }
        policy
    }

    pub fn from_flags(flags: &Value) -> Self {
        let mut policy = Self::closed();
        for gate in PolicyGate::ALL {
            policy.set(gate, bool_at(flags, &[gate.flag_key()]).unwrap_or(false));
        }
        policy
    }

    pub fn allows(&self, gate: PolicyGate) -> bool {
        match gate {
            PolicyGate::Report => self.allow_report,
            PolicyGate::Personas => self.allow_personas,
            PolicyGate::Anomalies => self.allow_anomalies,
            PolicyGate::Regression => self.allow_regression,
            PolicyGate::Correlation => self.allow_correlation,
            PolicyGate::Distribution => self.allow_distribution,
            PolicyGate::QualityMetrics => self.allow_quality_metrics,
            PolicyGate::BusinessIntelligence => self.allow_business_intelligence,
            PolicyGate::FeatureImportance => self.allow_feature_importance,
        }
    }

    pub fn set(&mut self, gate: PolicyGate, allowed: bool) {
        let slot = match gate {
            PolicyGate::Report => &mut self.allow_report,
            PolicyGate::Personas => &mut self.allow_personas,
            PolicyGate::Anomalies => &mut self.allow_anomalies,
            PolicyGate::Regression => &mut self.allow_regression,
            PolicyGate::Correlation => &mut self.allow_correlation,
            PolicyGate::Distribution => &mut self.allow_distribution,
            PolicyGate::QualityMetrics => &mut self.allow_quality_metrics,
            PolicyGate::BusinessIntelligence => &mut self.allow_business_intelligence,
            PolicyGate::FeatureImportance => &mut self.allow_feature_importance,
        };
        *slot = allowed;
    }

    pub fn closed_gates(&self) -> Vec<PolicyGate> {
        PolicyGate::ALL
            .into_iter()
            .filter(|gate| !self.allows(*gate))
            .collect()
    }

    fn restrict_with(&mut self, view_policies: &Value) {
        for gate in PolicyGate::ALL {
            let Some(entry) = at(view_policies, &[gate.view_key()]) else {
                continue;
            };
            let visible = match entry {
                Value::Bool(flag) => Some(*flag),
                other => bool_at(other, &["visible"]).or_else(|| bool_at(other, &["enabled"])),
            };
            if visible == Some(false) {
                self.set(gate, false);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Compatible,
    Absent,
    MissingRenderPolicy,
    UnsupportedVersion { version: u64 },
}

pub fn check_manifest(manifest: &RunManifest) -> ManifestStatus {
    if !manifest.present {
        return ManifestStatus::Absent;
    }
    if let Some(version) = manifest
        .manifest_version
        .filter(|version| !SUPPORTED_MANIFEST_VERSIONS.contains(version))
    {
        return ManifestStatus::UnsupportedVersion { version };
    }
    if manifest.render_policy.is_none() {
        return ManifestStatus::MissingRenderPolicy;
    }
    ManifestStatus::Compatible
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernanceDecision {
    pub state: GovernanceState,
    pub manifest: ManifestStatus,
    pub policy: RenderPolicy,
    pub limitations_mode: bool,
    pub fallback_detected: bool,
    pub identity_safe_mode: bool,
    pub analysis_suppressed: bool,
    pub safe_mode: bool,
    pub hide_actions: bool,
    pub should_emit_insights: bool,
}

pub struct GovernanceInputs<'a> {
    pub narrative: &'a str,
    pub diagnostics: &'a Diagnostics,
    pub manifest: &'a RunManifest,
    pub report_mode: Option<&'a str>,
}

pub fn evaluate_governance(inputs: &GovernanceInputs<'_>) -> GovernanceDecision {
    let limitations_mode =
        inputs.diagnostics.limitations_mode() || is_limitations_mode(inputs.report_mode);
    let fallback_detected = detect_fallback_report(inputs.narrative);
    let identity_safe_mode = inputs.diagnostics.identity_safe_mode;
    let analysis_suppressed = inputs.manifest.analysis_suppressed == Some(true)
        || inputs.manifest.analysis_allowed == Some(false);

    let manifest = check_manifest(inputs.manifest);
    let policy = match (manifest, inputs.manifest.render_policy.as_ref()) {
        (ManifestStatus::Compatible, Some(flags)) if !analysis_suppressed => {
            let mut policy = RenderPolicy::from_flags(flags);
            if let Some(view_policies) = inputs.manifest.view_policies.as_ref() {
                policy.restrict_with(view_policies);
            }
            policy
        }
        _ => RenderPolicy::closed(),
    };

    if manifest != ManifestStatus::Compatible {
        warn!(?manifest, "run manifest not usable, every render gate closed");
    } else if analysis_suppressed {
        warn!("analysis suppressed by run manifest, every render gate closed");
    }

    let state = if fallback_detected || analysis_suppressed {
        GovernanceState::Failed
    } else if limitations_mode || identity_safe_mode {
        GovernanceState::Limitations
    } else {
        GovernanceState::Normal
    };

    let safe_mode = limitations_mode || identity_safe_mode || fallback_detected;
    let should_emit_insights = !fallback_detected && !limitations_mode && !identity_safe_mode;

    debug!(
        ?state,
        safe_mode,
        should_emit_insights,
        closed_gates = policy.closed_gates().len(),
        "governance evaluated"
    );

    GovernanceDecision {
        state,
        manifest,
        policy,
        limitations_mode,
        fallback_detected,
        identity_safe_mode,
        analysis_suppressed,
        safe_mode,
        hide_actions: safe_mode,
        should_emit_insights,
    }
}

pub fn detect_fallback_report(narrative: &str) -> bool {
    let lowered = narrative.to_ascii_lowercase();
    if FALLBACK_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return true;
    }

    lowered
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .any(|header| {
            header.contains("diagnostic")
                && (header.contains("fallback") || header.contains("only"))
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn manifest(value: serde_json::Value) -> RunManifest {
        RunManifest::read(Some(&value))
    }

    fn evaluate(
        narrative: &str,
        diagnostics: &Diagnostics,
        manifest: &RunManifest,
    ) -> GovernanceDecision {
        evaluate_governance(&GovernanceInputs {
            narrative,
            diagnostics,
            manifest,
            report_mode: None,
        })
    }

    #[test]
    fn absent_manifest_fails_closed() {
        let decision = evaluate("## Overview", &Diagnostics::default(), &RunManifest::default());
        assert_eq!(decision.manifest, ManifestStatus::Absent);
        assert_eq!(decision.policy, RenderPolicy::closed());
        assert_eq!(decision.state, GovernanceState::Normal);
    }

    #[test]
    fn incompatible_manifest_ignores_literal_flags() {
        let unsupported = manifest(json!({
            "manifest_version": 99,
            "render_policy": {"allow_report": true, "allow_personas": true}
        }));
        let decision = evaluate("", &Diagnostics::default(), &unsupported);
        assert_eq!(decision.manifest, ManifestStatus::UnsupportedVersion { version: 99 });
        assert!(!decision.policy.allow_report);
        assert!(!decision.policy.allow_personas);

        let no_policy = manifest(json!({"warnings": []}));
        let decision = evaluate("", &Diagnostics::default(), &no_policy);
        assert_eq!(decision.manifest, ManifestStatus::MissingRenderPolicy);
        assert!(!decision.policy.allow_report);
    }

    #[test]
    fn compatible_manifest_reads_flags_and_view_policies() {
        let run_manifest = manifest(json!({
            "manifest_version": 1,
            "render_policy": {
                "allow_report": true,
                "allow_personas": "true",
                "allow_anomalies": true,
                "allow_regression": false
            },
            "view_policies": {"anomalies": {"visible": false}, "regression": true}
        }));

        let decision = evaluate("## Overview", &Diagnostics::default(), &run_manifest);
        assert!(decision.policy.allow_report);
        assert!(decision.policy.allow_personas);
        assert!(!decision.policy.allow_anomalies);
        assert!(!decision.policy.allow_regression);
        assert!(!decision.policy.allow_correlation);
        assert!(decision.should_emit_insights);
        assert!(!decision.safe_mode);
    }

    #[test]
    fn suppressed_analysis_fails_and_closes_report() {
        let run_manifest = manifest(json!({
            "render_policy": {"allow_report": true},
            "analysis_allowed": false
        }));
        let decision = evaluate("", &Diagnostics::default(), &run_manifest);
        assert_eq!(decision.state, GovernanceState::Failed);
        assert!(!decision.policy.allow_report);
    }

    #[test]
    fn fallback_narrative_enables_safe_mode() {
        let run_manifest = manifest(json!({"render_policy": {"allow_report": true}}));
        let decision = evaluate(
            "# Diagnostics Only Report\nSYSTEM NOTICE: upstream agent crashed",
            &Diagnostics::default(),
            &run_manifest,
        );

        assert!(decision.fallback_detected);
        assert_eq!(decision.state, GovernanceState::Failed);
        assert!(decision.safe_mode);
        assert!(decision.hide_actions);
        assert!(!decision.should_emit_insights);
        assert!(decision.policy.allow_report);
    }

    #[test]
    fn limitations_and_identity_safe_mode_suppress_insights() {
        let run_manifest = manifest(json!({"render_policy": {"allow_report": true}}));

        let limited = Diagnostics {
            mode: Some("Limitations".to_string()),
            ..Diagnostics::default()
        };
        let decision = evaluate("## Overview", &limited, &run_manifest);
        assert_eq!(decision.state, GovernanceState::Limitations);
        assert!(decision.safe_mode);
        assert!(!decision.should_emit_insights);

        let identity = Diagnostics {
            identity_safe_mode: true,
            ..Diagnostics::default()
        };
        let decision = evaluate("## Overview", &identity, &run_manifest);
        assert!(decision.hide_actions);
        assert!(!decision.should_emit_insights);
        assert!(!decision.fallback_detected);
    }

    #[test]
    fn fallback_detection_ignores_ordinary_reports() {
        assert!(!detect_fallback_report("## Diagnostics\nAll checks passed"));
        assert!(detect_fallback_report("The analysis failed at step 3"));
        assert!(detect_fallback_report("## Diagnostic summary (fallback)"));
    }
}
