use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::view::json::{as_f64_lenient, at, f64_at, string_at, string_list, to_percent};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub title: String,
    pub method: Option<String>,
    pub columns: Vec<String>,
    pub confidence: Option<f64>,
    pub scope: Option<String>,
    pub source_code: Option<String>,
    pub data_source: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub id: String,
    pub claim: Option<String>,
    pub agent: Option<String>,
    pub severity: Option<String>,
    pub metric_name: Option<String>,
    pub columns: Vec<String>,
    pub confidence: Option<f64>,
    pub evidence_id: Option<String>,
    pub evidence: Option<EvidenceRecord>,
}

impl Insight {
    pub fn has_unresolved_evidence(&self) -> bool {
        self.evidence_id.is_some() && self.evidence.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvidenceIndex {
    records: BTreeMap<String, EvidenceRecord>,
    // Last write wins per scope.
    by_scope: BTreeMap<String, String>,
}

impl EvidenceIndex {
    pub fn get(&self, id: &str) -> Option<&EvidenceRecord> {
        self.records.get(id)
    }

    pub fn for_scope(&self, scope: &str) -> Option<&EvidenceRecord> {
        self.by_scope
            .get(&scope_key(scope))
            .and_then(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: EvidenceRecord) {
        if let Some(previous) = self.records.get(&record.id) {
            if let Some(scope) = previous.scope.as_deref().map(scope_key) {
                if self.by_scope.get(&scope) == Some(&record.id) {
                    self.by_scope.remove(&scope);
                }
            }
        }
        if let Some(scope) = record.scope.as_deref() {
            self.by_scope.insert(scope_key(scope), record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }
}

fn scope_key(scope: &str) -> String {
    scope.trim().to_ascii_lowercase()
}

pub fn normalize_confidence(value: f64) -> f64 {
    to_percent(value)
}

pub fn normalize_evidence(payload: Option<&Value>) -> EvidenceIndex {
    let mut index = EvidenceIndex::default();

    match payload {
        Some(Value::Object(map)) => {
            for (id, record) in map {
                let id = id.trim();
                if !id.is_empty() {
                    index.insert(build_record(id, record));
                }
            }
        }
        Some(Value::Array(items)) => {
            for record in items {
                let id = string_at(record, &["id"])
                    .or_else(|| string_at(record, &["evidence_id"]))
                    .or_else(|| {
                        at(record, &["id"])
                            .and_then(Value::as_u64)
                            .map(|id| id.to_string())
                    });
                if let Some(id) = id {
                    index.insert(build_record(&id, record));
                }
            }
        }
        _ => {}
    }

    index
}

fn field<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    at(record, &[key]).or_else(|| at(record, &["evidence", key]))
}

fn field_text(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        field(record, key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(ToString::to_string)
    })
}

fn build_record(id: &str, record: &Value) -> EvidenceRecord {
    let title = record
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
        .or_else(|| field_text(record, &["claim", "title"]))
        .or_else(|| field_text(record, &["metric", "metric_name"]))
        .unwrap_or_else(|| format!("Evidence {id}"));

    let mut columns = string_list(field(record, "columns"));
    if columns.is_empty() {
        columns = string_list(field(record, "column"));
    }

    EvidenceRecord {
        id: id.to_string(),
        title,
        method: field_text(record, &["method"]),
        columns,
        confidence: field(record, "confidence")
            .and_then(as_f64_lenient)
            .map(normalize_confidence),
        scope: field_text(record, &["scope"]),
        source_code: field_text(record, &["source_code", "code"]),
        data_source: field_text(record, &["data_source", "source"]),
        raw: record.clone(),
    }
}

pub fn resolve_insights(raw: &[Value], index: &EvidenceIndex) -> Vec<Insight> {
    raw.iter()
        .enumerate()
        .map(|(position, value)| {
            let evidence_id = ["evidence_ref", "evidence_id"].iter().find_map(|key| {
                match at(value, &[*key])? {
                    Value::String(id) => Some(id.trim().to_string()).filter(|id| !id.is_empty()),
                    Value::Number(id) => Some(id.to_string()),
                    _ => None,
                }
            });
            let evidence = evidence_id
                .as_deref()
                .and_then(|id| index.get(id))
                .cloned();

            if let (Some(id), None) = (evidence_id.as_deref(), evidence.as_ref()) {
                debug!(evidence_id = id, "insight references unknown evidence");
            }

            Insight {
                id: string_at(value, &["id"])
                    .or_else(|| string_at(value, &["insight_id"]))
                    .unwrap_or_else(|| format!("insight-{}", position + 1)),
                claim: ["claim", "insight", "text", "summary"]
                    .iter()
                    .find_map(|key| string_at(value, &[*key])),
                agent: string_at(value, &["agent"]),
                severity: string_at(value, &["severity"])
                    .map(|severity| severity.to_ascii_lowercase()),
                metric_name: string_at(value, &["metric_name"])
                    .or_else(|| string_at(value, &["metric"])),
                columns: string_list(at(value, &["columns"])),
                confidence: f64_at(value, &["confidence"]).map(normalize_confidence),
                evidence_id,
                evidence,
            }
        })
        .collect()
}

pub fn hero_insight(insights: &[Insight]) -> Option<&Insight> {
    insights
        .iter()
        .filter(|insight| insight.claim.is_some())
        .fold(None, |best: Option<&Insight>, insight| match best {
            Some(current)
                if current.confidence.unwrap_or(0.0) >= insight.confidence.unwrap_or(0.0) =>
            {
                Some(current)
            }
            _ => Some(insight),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{hero_insight, normalize_confidence, normalize_evidence, resolve_insights};

    #[test]
    fn normalize_confidence_scales_only_fractions() {
        assert_eq!(normalize_confidence(0.85), 85.0);
        assert_eq!(normalize_confidence(0.8567), 85.7);
        assert_eq!(normalize_confidence(1.0), 100.0);
        assert_eq!(normalize_confidence(0.0), 0.0);
        assert_eq!(normalize_confidence(72.0), 72.0);
        assert_eq!(normalize_confidence(1.5), 1.5);
    }

    #[test]
    fn insight_resolves_nested_evidence_confidence() {
        let index = normalize_evidence(Some(&json!({
            "ev1": {"claim": "X", "evidence": {"confidence": 0.85}}
        })));
        let insights = resolve_insights(&[json!({"evidence_ref": "ev1"})], &index);

        let evidence = insights[0]
            .evidence
            .as_ref()
            .expect("ev1 should resolve");
        assert_eq!(evidence.confidence, Some(85.0));
        assert_eq!(evidence.title, "X");
        assert_eq!(insights[0].id, "insight-1");
    }

    #[test]
    fn unresolved_reference_leaves_evidence_empty() {
        let index = normalize_evidence(Some(&json!({"ev1": {"claim": "X"}})));
        let insights = resolve_insights(
            &[json!({"id": "i9", "evidence_id": "missing", "confidence": 0.4})],
            &index,
        );

        assert_eq!(insights[0].evidence_id.as_deref(), Some("missing"));
        assert!(insights[0].evidence.is_none());
        assert!(insights[0].has_unresolved_evidence());
        assert_eq!(insights[0].confidence, Some(40.0));
    }

    #[test]
    fn records_coerce_columns_and_derive_titles() {
        let index = normalize_evidence(Some(&json!({
            "a": {"metric": "churn_rate", "columns": "tenure", "method": "t-test"},
            "b": {"columns": ["x", "y"]},
            "c": "plain text claim"
        })));

        let a = index.get("a").expect("a present");
        assert_eq!(a.title, "churn_rate");
        assert_eq!(a.columns, vec!["tenure"]);
        assert_eq!(a.method.as_deref(), Some("t-test"));
        assert_eq!(index.get("b").map(|b| b.title.as_str()), Some("Evidence b"));
        assert_eq!(index.get("c").map(|c| c.title.as_str()), Some("plain text claim"));
    }

    #[test]
    fn scope_lookup_is_last_write_wins() {
        let index = normalize_evidence(Some(&json!([
            {"id": "first", "scope": "clustering"},
            {"evidence_id": "second", "scope": "Clustering"},
            {"claim": "no id is skipped", "scope": "clustering"}
        ])));

        assert_eq!(index.len(), 2);
        assert_eq!(index.for_scope("clustering").map(|r| r.id.as_str()), Some("second"));
        assert!(index.for_scope("regression").is_none());
    }

    #[test]
    fn replaced_record_drops_its_old_scope_entry() {
        let index = normalize_evidence(Some(&json!([
            {"id": "a", "scope": "clustering"},
            {"id": "a", "scope": "regression"}
        ])));

        assert_eq!(index.len(), 1);
        assert!(index.for_scope("clustering").is_none());
        let record = index.for_scope("regression").expect("regression scope");
        assert_eq!(record.id, "a");
        assert_eq!(record.scope.as_deref(), Some("regression"));
    }

    #[test]
    fn replaced_record_keeps_scope_claimed_by_another_id() {
        let index = normalize_evidence(Some(&json!([
            {"id": "a", "scope": "clustering"},
            {"id": "b", "scope": "clustering"},
            {"id": "a", "scope": "regression"}
        ])));

        assert_eq!(index.for_scope("clustering").map(|r| r.id.as_str()), Some("b"));
        assert_eq!(index.for_scope("regression").map(|r| r.id.as_str()), Some("a"));
    }

    #[test]
    fn malformed_payload_yields_empty_index() {
        assert!(normalize_evidence(Some(&json!("nope"))).is_empty());
        assert!(normalize_evidence(None).is_empty());
    }

    #[test]
    fn hero_insight_prefers_confident_claims() {
        let insights = resolve_insights(
            &[
                json!({"id": "a", "claim": "low", "confidence": 0.3}),
                json!({"id": "b", "confidence": 0.99}),
                json!({"id": "c", "claim": "high", "confidence": 0.9}),
                json!({"id": "d", "claim": "tie", "confidence": 90}),
            ],
            &Default::default(),
        );

        assert_eq!(hero_insight(&insights).map(|insight| insight.id.as_str()), Some("c"));
        assert!(hero_insight(&[]).is_none());
    }
}
