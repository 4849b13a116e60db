use std::cmp::Ordering;

use serde::Serialize;

use crate::model::TrustSnapshot;
use crate::view::extract::Section;
use crate::view::json::round1;

// Stamped on every score; scores under different rulesets never compare.
pub const TRUST_RULESET_VERSION: &str = "trust-rules/2";

pub const HIGH_BAND_MIN: f64 = 75.0;
pub const MEDIUM_BAND_MIN: f64 = 50.0;

pub const ASSUMPTION_RISK_FLAGGED: f64 = 0.45;
pub const ASSUMPTION_RISK_CLEAR: f64 = 0.8;
const ASSUMPTION_KEYWORDS: &[&str] = &["blocked", "safe mode", "safe_mode", "missing"];

const NEUTRAL_SIGNAL: f64 = 0.5;
const SECTION_DOMINANCE_BOOST: f64 = 0.1;
const SECTION_EVIDENCE_TERMS: &[&str] = &["evidence", "data", "sample"];

const WEIGHT_QUALITY: f64 = 0.30;
const WEIGHT_STABILITY: f64 = 0.25;
const WEIGHT_ASSUMPTION: f64 = 0.20;
const WEIGHT_SAMPLE: f64 = 0.15;
const WEIGHT_DOMINANCE: f64 = 0.10;

const CAP_VALIDATION_FAILED: f64 = 40.0;
const CAP_LOW_QUALITY: f64 = 50.0;
const CAP_SAFE_MODE: f64 = 55.0;
const CAP_SMALL_SAMPLE: f64 = 60.0;
const CAP_NARROW_FEATURES: f64 = 70.0;
const LOW_QUALITY_BELOW: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustThresholds {
    pub min_row_count: u64,
    pub min_feature_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustSignals {
    pub data_quality: Option<f64>,
    pub validation_failed: bool,
    pub sample_size: Option<u64>,
    pub feature_count: Option<u64>,
    pub signal_stability: f64,
    pub feature_dominance: Option<f64>,
    pub assumption_risk: f64,
    pub safe_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustBand {
    Low,
    Medium,
    High,
}

impl TrustBand {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_BAND_MIN {
            Self::High
        } else if score >= MEDIUM_BAND_MIN {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Certification {
    pub certified: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustCap {
    pub code: String,
    pub limit: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustScore {
    pub score: f64,
    pub band: TrustBand,
    pub certification: Certification,
    pub applied_caps: Vec<TrustCap>,
    pub signals: TrustSignals,
    pub ruleset_version: String,
}

impl TrustScore {
    pub fn compare(&self, other: &TrustScore) -> Option<Ordering> {
        if self.ruleset_version != other.ruleset_version {
            return None;
        }
        self.score.partial_cmp(&other.score)
    }
}

pub fn assumption_risk(reasons_text: &str, limitations_mode: bool) -> f64 {
    let lowered = reasons_text.to_ascii_lowercase();
    let flagged = limitations_mode
        || ASSUMPTION_KEYWORDS
            .iter()
            .any(|keyword| lowered.contains(keyword));

    if flagged {
        ASSUMPTION_RISK_FLAGGED
    } else {
        ASSUMPTION_RISK_CLEAR
    }
}

pub fn signal_stability(confidence_percent: Option<f64>) -> f64 {
    confidence_percent
        .map(|value| (value / 100.0).clamp(0.0, 1.0))
        .unwrap_or(NEUTRAL_SIGNAL)
}

pub fn score_trust(signals: &TrustSignals, thresholds: &TrustThresholds) -> TrustScore {
    let quality = signals
        .data_quality
        .map(|value| (value / 100.0).clamp(0.0, 1.0))
        .unwrap_or(NEUTRAL_SIGNAL);
    let sample = sample_factor(signals.sample_size, thresholds.min_row_count);
    let dominance = signals
        .feature_dominance
        .map(|value| value.clamp(0.0, 1.0))
        .unwrap_or(NEUTRAL_SIGNAL);

    let raw = 100.0
        * (WEIGHT_QUALITY * quality
            + WEIGHT_STABILITY * signals.signal_stability.clamp(0.0, 1.0)
            + WEIGHT_ASSUMPTION * signals.assumption_risk.clamp(0.0, 1.0)
            + WEIGHT_SAMPLE * sample
            + WEIGHT_DOMINANCE * dominance);

    let applied_caps = collect_caps(signals, thresholds);
    let capped = applied_caps
        .iter()
        .map(|cap| cap.limit)
        .fold(raw, f64::min);
    let score = round1(capped.clamp(0.0, 100.0));
    let band = TrustBand::from_score(score);

    TrustScore {
        score,
        band,
        certification: certify(score, band, &applied_caps, signals),
        applied_caps,
        signals: signals.clone(),
        ruleset_version: TRUST_RULESET_VERSION.to_string(),
    }
}

pub fn score_section(
    section: &Section,
    base: &TrustSignals,
    thresholds: &TrustThresholds,
) -> TrustScore {
    let content = format!("{}\n{}", section.title, section.content).to_ascii_lowercase();
    let mentions_evidence = SECTION_EVIDENCE_TERMS
        .iter()
        .any(|term| content.contains(term));

    if !mentions_evidence {
        return score_trust(base, thresholds);
    }

    let boosted = TrustSignals {
        feature_dominance: Some(
            (base.feature_dominance.unwrap_or(NEUTRAL_SIGNAL) + SECTION_DOMINANCE_BOOST).min(1.0),
        ),
        ..base.clone()
    };
    score_trust(&boosted, thresholds)
}

fn sample_factor(sample_size: Option<u64>, min_row_count: u64) -> f64 {
    match sample_size {
        None => NEUTRAL_SIGNAL,
        Some(rows) if rows < min_row_count => 0.3,
        Some(rows) if rows < min_row_count.saturating_mul(10) => 0.7,
        Some(_) => 1.0,
    }
}

fn collect_caps(signals: &TrustSignals, thresholds: &TrustThresholds) -> Vec<TrustCap> {
    let mut caps = Vec::new();

    if signals.validation_failed {
        caps.push(TrustCap {
            code: "validation_failed".to_string(),
            limit: CAP_VALIDATION_FAILED,
            reason: "backend validation reported failed fields".to_string(),
        });
    }
    if let Some(quality) = signals.data_quality.filter(|value| *value < LOW_QUALITY_BELOW) {
        caps.push(TrustCap {
            code: "low_data_quality".to_string(),
            limit: CAP_LOW_QUALITY,
            reason: format!("data quality {quality} is below {LOW_QUALITY_BELOW}"),
        });
    }
    if signals.safe_mode {
        caps.push(TrustCap {
            code: "safe_mode".to_string(),
            limit: CAP_SAFE_MODE,
            reason: "run is in safe or limitations mode".to_string(),
        });
    }
    if let Some(rows) = signals
        .sample_size
        .filter(|rows| *rows < thresholds.min_row_count)
    {
        caps.push(TrustCap {
            code: "small_sample".to_string(),
            limit: CAP_SMALL_SAMPLE,
            reason: format!("{rows} rows is fewer than {}", thresholds.min_row_count),
        });
    }
    if let Some(features) = signals
        .feature_count
        .filter(|features| *features < thresholds.min_feature_count)
    {
        caps.push(TrustCap {
            code: "narrow_feature_set".to_string(),
            limit: CAP_NARROW_FEATURES,
            reason: format!(
                "{features} features is fewer than {}",
                thresholds.min_feature_count
            ),
        });
    }

    caps
}

fn certify(
    score: f64,
    band: TrustBand,
    caps: &[TrustCap],
    signals: &TrustSignals,
) -> Certification {
    let mut reasons = Vec::new();

    if band != TrustBand::High {
        reasons.push(format!(
            "score {score} is below the certification threshold {HIGH_BAND_MIN}"
        ));
    }
    for cap in caps {
        reasons.push(format!("capped at {} ({})", cap.limit, cap.code));
    }
    if signals.validation_failed && caps.iter().all(|cap| cap.code != "validation_failed") {
        reasons.push("validation failed".to_string());
    }

    if reasons.is_empty() {
        return Certification {
            certified: true,
            reasons: vec![format!(
                "score {score} meets the high band under {TRUST_RULESET_VERSION}"
            )],
        };
    }

    Certification {
        certified: false,
        reasons,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendTrust {
    pub score: Option<f64>,
    pub band: Option<String>,
    pub ruleset_version: Option<String>,
    pub comparable: bool,
}

impl BackendTrust {
    pub fn from_snapshot(snapshot: &TrustSnapshot) -> Self {
        Self {
            score: snapshot.score.map(|score| round1(score.clamp(0.0, 100.0))),
            band: snapshot.band.clone(),
            ruleset_version: snapshot.ruleset_version.clone(),
            comparable: snapshot.ruleset_version.as_deref() == Some(TRUST_RULESET_VERSION),
        }
    }
}
