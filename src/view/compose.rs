use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::model::{Diagnostics, GovernedReport, RawArtifacts, RunManifest};
use crate::view::ComposeConfig;
use crate::view::evidence::{
    EvidenceIndex, Insight, hero_insight, normalize_evidence, resolve_insights,
};
use crate::view::extract::{
    AnalyticsFamily, AnalyticsSection, AnomalyRecord, EnhancedAnalytics, Metrics, OutcomeModel,
    Persona, Section, extract,
};
use crate::view::gating::gate_entities;
use crate::view::governance::{
    GovernanceDecision, GovernanceInputs, RenderPolicy, evaluate_governance,
};
use crate::view::memo::fingerprint;
use crate::view::json::string_at;
use crate::view::narrative::{Narrative, NarrativeInputs, assemble_narrative};
use crate::view::registry::{Issue, SignalInputs, collect_guidance, collect_issues};
use crate::view::trust::{
    BackendTrust, TRUST_RULESET_VERSION, TrustScore, TrustSignals, assumption_risk, score_section,
    score_trust, signal_stability,
};

pub const VIEW_MODEL_VERSION: &str = "view-model/1";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeConstraint {
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    fingerprint: String,
    view_model_version: &'static str,
    trust_ruleset_version: &'static str,
    governance: GovernanceDecision,
    sections: Vec<Section>,
    metrics: Metrics,
    personas: Vec<Persona>,
    anomalies: AnomalyRecord,
    outcome_model: Option<OutcomeModel>,
    analytics: EnhancedAnalytics,
    evidence: EvidenceIndex,
    insights: Vec<Insight>,
    narrative: Narrative,
    governing_trust: TrustScore,
    backend_trust: Option<BackendTrust>,
    issues: Vec<Issue>,
    guidance: Vec<Issue>,
    scope_constraints: Vec<ScopeConstraint>,
}

impl ViewModel {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn view_model_version(&self) -> &'static str {
        self.view_model_version
    }

    pub fn trust_ruleset_version(&self) -> &'static str {
        self.trust_ruleset_version
    }

    pub fn governance(&self) -> &GovernanceDecision {
        &self.governance
    }

    pub fn policy(&self) -> &RenderPolicy {
        &self.governance.policy
    }

    pub fn safe_mode(&self) -> bool {
        self.governance.safe_mode
    }

    pub fn limitations_mode(&self) -> bool {
        self.governance.limitations_mode
    }

    pub fn hide_actions(&self) -> bool {
        self.governance.hide_actions
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn anomalies(&self) -> &AnomalyRecord {
        &self.anomalies
    }

    pub fn outcome_model(&self) -> Option<&OutcomeModel> {
        self.outcome_model.as_ref()
    }

    pub fn analytics(&self, family: AnalyticsFamily) -> Option<&AnalyticsSection> {
        self.analytics.get(family)
    }

    pub fn evidence(&self) -> &EvidenceIndex {
        &self.evidence
    }

    pub fn insights(&self) -> &[Insight] {
        &self.insights
    }

    pub fn narrative(&self) -> &Narrative {
        &self.narrative
    }

    pub fn trust(&self) -> &TrustScore {
        &self.governing_trust
    }

    pub fn backend_trust(&self) -> Option<&BackendTrust> {
        self.backend_trust.as_ref()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn guidance(&self) -> &[Issue] {
        &self.guidance
    }

    pub fn scope_constraints(&self) -> &[ScopeConstraint] {
        &self.scope_constraints
    }
}

// Never fails; malformed or missing inputs degrade single fields.
pub fn compose_view_model(raw: &RawArtifacts, config: &ComposeConfig) -> ViewModel {
    let thresholds = config.thresholds();
    let diagnostics = Diagnostics::read(&raw.diagnostics);
    let manifest = RunManifest::read(raw.manifest.as_ref());
    let report = GovernedReport::read(raw.governed_report.as_ref(), &raw.analytics);

    let extraction = extract(&raw.narrative, &raw.analytics, config.importance_floor);
    let governance = evaluate_governance(&GovernanceInputs {
        narrative: &raw.narrative,
        diagnostics: &diagnostics,
        manifest: &manifest,
        report_mode: report.mode.as_deref(),
    });
    let gated = gate_entities(&extraction, &governance.policy);

    let evidence = normalize_evidence(report.evidence.as_ref());
    let resolved = resolve_insights(&report.insights, &evidence);
    let expose_insights = governance.should_emit_insights && governance.policy.allow_report;

    // Built from gated metrics only, so a closed report gate cannot leak numbers
    // through the trust signals.
    let base_signals = TrustSignals {
        data_quality: gated.metrics.data_quality_score(),
        validation_failed: diagnostics.validation_failed(),
        sample_size: gated.metrics.row_count(),
        feature_count: gated.metrics.column_count(),
        signal_stability: signal_stability(
            gated
                .metrics
                .confidence_level()
                .or(diagnostics.data_confidence)
                .or(report.confidence),
        ),
        feature_dominance: gated.analytics.top_feature_share(),
        assumption_risk: assumption_risk(&diagnostics.reasons_text(), governance.limitations_mode),
        safe_mode: governance.safe_mode,
    };

    let scored = gated
        .sections
        .iter()
        .map(|section| {
            (
                section.clone(),
                score_section(section, &base_signals, &thresholds),
            )
        })
        .collect::<Vec<_>>();

    let visible_insights = if expose_insights {
        resolved.clone()
    } else {
        Vec::new()
    };
    let narrative = assemble_narrative(NarrativeInputs {
        scored,
        hero: hero_insight(&visible_insights),
        primary_question: report.primary_question.as_deref(),
        success_criteria: &report.success_criteria,
        primary_limit: config.primary_limit,
    });
    let governing_trust = narrative
        .lead()
        .map(|module| module.trust.clone())
        .unwrap_or_else(|| score_trust(&base_signals, &thresholds));

    let signal_inputs = SignalInputs {
        diagnostics: &diagnostics,
        manifest: &manifest,
        governance: &governance,
        insights: &visible_insights,
        metrics: &gated.metrics,
        thresholds: &thresholds,
    };
    let issues = collect_issues(&signal_inputs);
    let guidance = collect_guidance(&signal_inputs);

    debug!(
        state = ?governance.state,
        sections = gated.sections.len(),
        primary = narrative.primary.len(),
        trust = governing_trust.score,
        issues = issues.len(),
        guidance = guidance.len(),
        "view model composed"
    );

    ViewModel {
        fingerprint: fingerprint(raw, config),
        view_model_version: VIEW_MODEL_VERSION,
        trust_ruleset_version: TRUST_RULESET_VERSION,
        sections: gated.sections,
        metrics: gated.metrics,
        personas: gated.personas,
        anomalies: gated.anomalies,
        outcome_model: gated.outcome_model,
        analytics: gated.analytics,
        evidence: if expose_insights {
            evidence
        } else {
            EvidenceIndex::default()
        },
        insights: visible_insights,
        narrative,
        governing_trust,
        backend_trust: manifest.trust.as_ref().map(BackendTrust::from_snapshot),
        issues,
        guidance,
        scope_constraints: read_scope_constraints(&report.scope_constraints),
        governance,
    }
}

fn read_scope_constraints(raw: &[Value]) -> Vec<ScopeConstraint> {
    raw.iter()
        .filter_map(|value| match value {
            Value::String(text) => Some(text.trim())
                .filter(|text| !text.is_empty())
                .map(|text| ScopeConstraint {
                    kind: "scope".to_string(),
                    description: text.to_string(),
                }),
            Value::Object(_) => {
                let description = ["description", "text", "message", "constraint"]
                    .iter()
                    .find_map(|key| string_at(value, &[*key]))?;
                let kind = ["kind", "type", "constraint_type"]
                    .iter()
                    .find_map(|key| string_at(value, &[*key]))
                    .unwrap_or_else(|| "scope".to_string());
                Some(ScopeConstraint { kind, description })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::view::governance::{GovernanceState, PolicyGate};
    use crate::view::registry::Severity;

    const NARRATIVE: &str = "# Executive Summary\nChurn is concentrated in new accounts.\n\n## Data Quality\nData quality: 0.92\nConfidence level: 88%\nRows: 5,000\nColumns: 12\n\n## Segments\n- **Bargain Hunters** (40%): price driven\n\n## Risks\n- churn risk high\n";

    fn open_manifest() -> serde_json::Value {
        json!({
            "manifest_version": 2,
            "render_policy": {
                "allow_report": true,
                "allow_personas": true,
                "allow_anomalies": true,
                "allow_regression": true,
                "allow_correlation": true,
                "allow_distribution": true,
                "allow_quality_metrics": true,
                "allow_business_intelligence": true,
                "allow_feature_importance": true
            },
            "trust": {"score": 81, "band": "high", "ruleset_version": "trust-rules/2"}
        })
    }

    fn artifacts() -> RawArtifacts {
        RawArtifacts {
            narrative: NARRATIVE.to_string(),
            analytics: json!({
                "personas": [{"name": "A"}, {"name": "B"}, {"name": "C"}],
                "anomalies": {"count": 2, "drivers": ["region"]},
                "feature_importance": {"available": true, "features": {"tenure": 3.0, "plan": 1.0}}
            }),
            diagnostics: json!({"reasons": [], "confidence": {"data_confidence": 0.9}}),
            manifest: Some(open_manifest()),
            governed_report: Some(json!({
                "task_contract": {"primary_question": "Why are customers leaving?"},
                "evidence": {"ev1": {"claim": "X", "evidence": {"confidence": 0.85}}},
                "insights": [{"id": "i1", "claim": "New accounts churn most", "evidence_ref": "ev1", "confidence": 0.9}],
                "scope_constraints": ["EU customers only", {"type": "time", "description": "2024 only"}]
            })),
        }
    }

    #[test]
    fn healthy_run_exposes_governed_content() {
        let model = compose_view_model(&artifacts(), &ComposeConfig::default());

        assert_eq!(model.governance().state, GovernanceState::Normal);
        assert!(!model.safe_mode());
        assert_eq!(model.sections().len(), 4);
        assert_eq!(model.metrics().data_quality_score(), Some(92.0));
        assert_eq!(model.personas().len(), 3);
        assert_eq!(model.anomalies().count, 2);
        assert!(model.analytics(AnalyticsFamily::FeatureImportance).is_some());

        assert_eq!(model.insights().len(), 1);
        let evidence = model.insights()[0].evidence.as_ref().expect("ev1 resolves");
        assert_eq!(evidence.confidence, Some(85.0));

        assert!(!model.narrative().primary.is_empty());
        let thought = model
            .narrative()
            .governing_thought
            .as_ref()
            .expect("governing thought");
        assert!(thought.statement.contains("New accounts churn most"));
        assert_eq!(model.trust(), &model.narrative().primary[0].trust);

        assert_eq!(model.scope_constraints().len(), 2);
        assert_eq!(model.scope_constraints()[1].kind, "time");
        assert!(model.backend_trust().is_some_and(|trust| trust.comparable));
        assert_eq!(model.view_model_version(), VIEW_MODEL_VERSION);
        assert_eq!(model.fingerprint().len(), 64);
    }

    #[test]
    fn absent_manifest_fails_closed_but_still_composes() {
        let mut raw = artifacts();
        raw.manifest = None;

        let model = compose_view_model(&raw, &ComposeConfig::default());

        assert!(model.sections().is_empty());
        assert!(model.metrics().is_empty());
        assert!(model.personas().is_empty());
        assert!(model.anomalies().is_null());
        assert!(model.insights().is_empty());
        assert!(model.evidence().is_empty());
        assert!(model.narrative().is_empty());
        assert!(model.trust().signals.data_quality.is_none());
        assert!((0.0..=100.0).contains(&model.trust().score));
        assert!(
            model
                .issues()
                .iter()
                .any(|issue| issue.key == "manifest: absent" && issue.severity == Severity::Critical)
        );
    }

    #[test]
    fn each_closed_gate_empties_only_its_entity() {
        for gate in PolicyGate::ALL {
            let mut raw = artifacts();
            let mut manifest = open_manifest();
            manifest["render_policy"][gate.flag_key()] = json!(false);
            raw.manifest = Some(manifest);

            let model = compose_view_model(&raw, &ComposeConfig::default());
            assert!(!model.policy().allows(gate), "{gate:?} should be closed");
            match gate {
                PolicyGate::Report => assert!(model.sections().is_empty()),
                PolicyGate::Personas => assert!(model.personas().is_empty()),
                PolicyGate::Anomalies => assert!(model.anomalies().is_null()),
                PolicyGate::Regression => assert!(model.outcome_model().is_none()),
                PolicyGate::FeatureImportance => assert!(
                    model
                        .analytics(AnalyticsFamily::FeatureImportance)
                        .is_none()
                ),
                _ => {}
            }
            if gate != PolicyGate::Personas {
                assert_eq!(model.personas().len(), 3);
            }
        }
    }

    #[test]
    fn safe_mode_reason_lowers_assumption_signal_and_raises_guidance() {
        let mut raw = artifacts();
        raw.diagnostics = json!({"reasons": ["safe mode enforced"]});

        let model = compose_view_model(&raw, &ComposeConfig::default());

        assert_eq!(model.trust().signals.assumption_risk, 0.45);
        assert!(
            model
                .guidance()
                .iter()
                .any(|note| note.severity == Severity::Critical)
        );
    }

    #[test]
    fn limitations_mode_withholds_insights_and_hides_actions() {
        let mut raw = artifacts();
        raw.diagnostics = json!({"mode": "limitations"});

        let model = compose_view_model(&raw, &ComposeConfig::default());

        assert_eq!(model.governance().state, GovernanceState::Limitations);
        assert!(model.safe_mode());
        assert!(model.hide_actions());
        assert!(model.limitations_mode());
        assert!(model.insights().is_empty());
        assert!(model.trust().score <= 55.0);
    }

    #[test]
    fn unresolved_evidence_issue_only_covers_exposed_insights() {
        let with_ghost = |manifest: Option<Value>| {
            let mut raw = artifacts();
            raw.manifest = manifest;
            raw.governed_report = Some(json!({
                "evidence": {"ev1": {"claim": "X"}},
                "insights": [
                    {"id": "i1", "claim": "New accounts churn most", "evidence_ref": "ev1"},
                    {"id": "i2", "claim": "Withheld claim", "evidence_ref": "ghost"}
                ]
            }));
            compose_view_model(&raw, &ComposeConfig::default())
        };
        let unresolved = |model: &ViewModel| {
            model
                .issues()
                .iter()
                .find(|issue| issue.key == "evidence: unresolved")
                .map(|issue| issue.message.clone())
        };

        let open = with_ghost(Some(open_manifest()));
        assert_eq!(
            unresolved(&open).as_deref(),
            Some("unresolved evidence ids: ghost")
        );

        assert!(unresolved(&with_ghost(None)).is_none());

        let mut report_closed = open_manifest();
        report_closed["render_policy"]["allow_report"] = json!(false);
        let closed = with_ghost(Some(report_closed));
        assert!(closed.insights().is_empty());
        assert!(unresolved(&closed).is_none());
    }

    #[test]
    fn validation_failure_caps_governing_trust() {
        let mut raw = artifacts();
        raw.diagnostics = json!({"validation": {"failed_fields": ["revenue"]}});

        let model = compose_view_model(&raw, &ComposeConfig::default());

        assert!(model.trust().score <= 40.0);
        assert!(!model.trust().certification.certified);
        assert!(model.issues().iter().any(|issue| issue.key == "validation: failed"));
    }

    #[test]
    fn composition_is_deterministic() {
        let config = ComposeConfig::default();
        let first = compose_view_model(&artifacts(), &config);
        let second = compose_view_model(&artifacts(), &config);
        assert_eq!(first, second);
    }

    #[test]
    fn arbitrary_garbage_still_produces_a_model() {
        let raw = RawArtifacts {
            narrative: "no headers at all".to_string(),
            analytics: json!(42),
            diagnostics: json!(["not", "an", "object"]),
            manifest: Some(json!("manifest")),
            governed_report: Some(json!(null)),
        };

        let model = compose_view_model(&raw, &ComposeConfig::default());
        assert!(model.sections().is_empty());
        assert!(model.narrative().governing_thought.is_none());
        assert!(!model.issues().is_empty());
    }
}
