use serde::Serialize;
use tracing::debug;

use crate::view::extract::{
    AnalyticsFamily, AnomalyRecord, EnhancedAnalytics, Extraction, Metrics, OutcomeModel, Persona,
    Section,
};
use crate::view::governance::{PolicyGate, RenderPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GatedEntities {
    pub sections: Vec<Section>,
    pub metrics: Metrics,
    pub personas: Vec<Persona>,
    pub anomalies: AnomalyRecord,
    pub outcome_model: Option<OutcomeModel>,
    pub analytics: EnhancedAnalytics,
}

pub fn gate_for_family(family: AnalyticsFamily) -> PolicyGate {
    match family {
        AnalyticsFamily::Correlation => PolicyGate::Correlation,
        AnalyticsFamily::Distribution => PolicyGate::Distribution,
        AnalyticsFamily::QualityMetrics => PolicyGate::QualityMetrics,
        AnalyticsFamily::BusinessIntelligence => PolicyGate::BusinessIntelligence,
        AnalyticsFamily::FeatureImportance => PolicyGate::FeatureImportance,
    }
}

pub fn gate_entities(extraction: &Extraction, policy: &RenderPolicy) -> GatedEntities {
    let (sections, metrics) = if policy.allow_report {
        (extraction.sections.clone(), extraction.metrics.clone())
    } else {
        (Vec::new(), Metrics::default())
    };

    let personas = if policy.allow_personas {
        extraction.personas.clone()
    } else {
        Vec::new()
    };

    let anomalies = if policy.allow_anomalies {
        extraction.anomalies.clone()
    } else {
        AnomalyRecord::null()
    };

    let outcome_model = if policy.allow_regression {
        extraction.outcome_model.clone()
    } else {
        None
    };

    let mut analytics = extraction.analytics.clone();
    analytics.retain(|family| policy.allows(gate_for_family(family)));

    debug!(
        sections = sections.len(),
        personas = personas.len(),
        anomalies = anomalies.count,
        outcome_model = outcome_model.is_some(),
        analytics_families = analytics.families().count(),
        "render policy applied"
    );

    GatedEntities {
        sections,
        metrics,
        personas,
        anomalies,
        outcome_model,
        analytics,
    }
}
