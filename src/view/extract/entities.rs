use super::*;

static SHARE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern(r"(\d+(?:\.\d+)?)\s*%"));
static PERSONA_TITLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern(r"(?i)\b(personas?|segments?|clusters?)\b"));
static ANOMALY_TITLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern(r"(?i)\b(anomal(y|ies)|outliers?)\b"));
static TARGET_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile_pattern(r"(?im)\btarget(?:\s+variable)?\s*[:=]\s*`?([A-Za-z_][\w-]*(?:[ \t][\w-]+){0,3})`?")
});

fn title_matches(pattern: &LazyLock<Option<Regex>>, title: &str) -> bool {
    pattern
        .as_ref()
        .map(|regex| regex.is_match(title))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub name: String,
    pub share: Option<f64>,
    pub description: Option<String>,
    pub traits: Vec<String>,
}

pub fn extract_personas(analytics: &Value, sections: &[Section]) -> Vec<Persona> {
    let from_payload = [
        &["personas"][..],
        &["clustering", "personas"][..],
        &["segments"][..],
    ]
    .iter()
    .map(|path| array_at(analytics, path))
    .find(|items| !items.is_empty())
    .map(|items| items.iter().filter_map(persona_from_value).collect::<Vec<Persona>>())
    .unwrap_or_default();

    if !from_payload.is_empty() {
        return from_payload;
    }

    sections
        .iter()
        .filter(|section| title_matches(&PERSONA_TITLE, &section.title))
        .flat_map(|section| section.content.lines())
        .filter_map(list_item_text)
        .filter_map(persona_from_list_item)
        .collect()
}

fn persona_from_value(value: &Value) -> Option<Persona> {
    if let Some(name) = value.as_str() {
        return Some(Persona {
            name: name.trim().to_string(),
            share: None,
            description: None,
            traits: Vec::new(),
        })
        .filter(|persona| !persona.name.is_empty());
    }

    let name = ["name", "label", "persona_name", "segment"]
        .iter()
        .find_map(|key| string_at(value, &[*key]))?;
    let share = ["size_pct", "share", "percentage", "size"]
        .iter()
        .find_map(|key| f64_at(value, &[*key]))
        .map(to_percent);
    let mut traits = string_list(at(value, &["traits"]));
    if traits.is_empty() {
        traits = string_list(at(value, &["characteristics"]));
    }

    Some(Persona {
        name,
        share,
        description: string_at(value, &["description"]).or_else(|| string_at(value, &["summary"])),
        traits,
    })
}

fn persona_from_list_item(item: &str) -> Option<Persona> {
    let (head, tail) = match item.split_once(':') {
        Some((head, tail)) => (head, Some(tail)),
        None => (item, None),
    };

    let share = SHARE_PATTERN
        .as_ref()
        .and_then(|regex| regex.captures(item))
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok());

    let name = strip_emphasis(head.split('(').next().unwrap_or(head));
    if name.is_empty() {
        return None;
    }

    Some(Persona {
        name,
        share,
        description: tail
            .map(strip_emphasis)
            .filter(|description| !description.is_empty()),
        traits: Vec::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub count: u32,
    pub drivers: Vec<String>,
}

impl AnomalyRecord {
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.count == 0 && self.drivers.is_empty()
    }
}

pub fn extract_anomalies(
    analytics: &Value,
    sections: &[Section],
    metrics: &Metrics,
) -> AnomalyRecord {
    let payload = at(analytics, &["anomalies"]).or_else(|| at(analytics, &["anomaly_detection"]));

    let payload_count = payload.and_then(|payload| match payload {
        Value::Array(items) => Some(items.len() as u64),
        other => u64_at(other, &["count"]).or_else(|| u64_at(other, &["anomaly_count"])),
    });
    let count = payload_count
        .or_else(|| u64_at(analytics, &["anomaly_count"]))
        .or_else(|| {
            metrics
                .get(MetricName::AnomalyCount)
                .map(|value| value as u64)
        })
        .unwrap_or(0);

    let mut drivers = payload
        .map(|payload| {
            ["drivers", "top_drivers", "features"]
                .iter()
                .map(|key| named_items(array_at(payload, &[*key])))
                .find(|names| !names.is_empty())
                .unwrap_or_default()
        })
        .unwrap_or_default();

    if drivers.is_empty() {
        drivers = sections
            .iter()
            .filter(|section| title_matches(&ANOMALY_TITLE, &section.title))
            .flat_map(|section| section.content.lines())
            .filter_map(list_item_text)
            .map(strip_emphasis)
            .filter(|driver| !driver.is_empty())
            .collect();
    }

    AnomalyRecord {
        count: u32::try_from(count).unwrap_or(u32::MAX),
        drivers,
    }
}

fn named_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.trim().to_string()),
            other => ["name", "feature", "column", "driver"]
                .iter()
                .find_map(|key| string_at(other, &[*key])),
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeDriver {
    pub name: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeModel {
    pub target: Option<String>,
    pub model_type: Option<String>,
    pub r_squared: Option<f64>,
    pub drivers: Vec<OutcomeDriver>,
}

pub fn extract_outcome_model(
    analytics: &Value,
    narrative: &str,
    metrics: &Metrics,
) -> Option<OutcomeModel> {
    let payload = at(analytics, &["outcome_model"])
        .or_else(|| at(analytics, &["regression"]))
        .filter(|payload| payload.is_object())
        .filter(|payload| bool_at(payload, &["available"]).unwrap_or(true));

    if let Some(payload) = payload {
        return Some(OutcomeModel {
            target: string_at(payload, &["target"])
                .or_else(|| string_at(payload, &["target_variable"])),
            model_type: string_at(payload, &["model_type"])
                .or_else(|| string_at(payload, &["method"])),
            r_squared: f64_at(payload, &["r_squared"]).or_else(|| f64_at(payload, &["r2"])),
            drivers: outcome_drivers(payload),
        });
    }

    let target = TARGET_PATTERN
        .as_ref()
        .and_then(|regex| regex.captures(narrative))
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty());
    let r_squared = metrics.get(MetricName::ModelRSquared);

    if target.is_none() && r_squared.is_none() {
        return None;
    }

    Some(OutcomeModel {
        target,
        model_type: None,
        r_squared,
        drivers: Vec::new(),
    })
}

fn outcome_drivers(payload: &Value) -> Vec<OutcomeDriver> {
    let source = at(payload, &["drivers"]).or_else(|| at(payload, &["coefficients"]));
    let mut drivers = match source {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(OutcomeDriver {
                    name: name.trim().to_string(),
                    weight: None,
                }),
                other => ["feature", "name", "variable"]
                    .iter()
                    .find_map(|key| string_at(other, &[*key]))
                    .map(|name| OutcomeDriver {
                        name,
                        weight: ["coefficient", "importance", "weight"]
                            .iter()
                            .find_map(|key| f64_at(other, &[*key])),
                    }),
            })
            .collect::<Vec<OutcomeDriver>>(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, weight)| OutcomeDriver {
                name: name.clone(),
                weight: as_f64_lenient(weight),
            })
            .collect(),
        _ => Vec::new(),
    };

    drivers.retain(|driver| !driver.name.is_empty());
    drivers
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsFamily {
    Correlation,
    Distribution,
    QualityMetrics,
    BusinessIntelligence,
    FeatureImportance,
}

impl AnalyticsFamily {
    pub const ALL: [AnalyticsFamily; 5] = [
        AnalyticsFamily::Correlation,
        AnalyticsFamily::Distribution,
        AnalyticsFamily::QualityMetrics,
        AnalyticsFamily::BusinessIntelligence,
        AnalyticsFamily::FeatureImportance,
    ];

    fn payload_keys(self) -> &'static [&'static str] {
        match self {
            Self::Correlation => &["correlation", "correlations"],
            Self::Distribution => &["distribution", "distributions"],
            Self::QualityMetrics => &["quality_metrics", "quality"],
            Self::BusinessIntelligence => &["business_intelligence", "bi"],
            Self::FeatureImportance => &["feature_importance"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSection {
    pub available: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EnhancedAnalytics {
    families: BTreeMap<AnalyticsFamily, AnalyticsSection>,
}

impl EnhancedAnalytics {
    pub fn get(&self, family: AnalyticsFamily) -> Option<&AnalyticsSection> {
        self.families.get(&family)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(AnalyticsFamily) -> bool) {
        self.families.retain(|family, _| keep(*family));
    }

    pub fn families(&self) -> impl Iterator<Item = AnalyticsFamily> + '_ {
        self.families.keys().copied()
    }

    pub fn top_feature_share(&self) -> Option<f64> {
        let section = self.get(AnalyticsFamily::FeatureImportance)?;
        if !section.available {
            return None;
        }

        let weights = feature_weights(&section.payload);
        let total = weights.iter().sum::<f64>();
        if total <= 0.0 {
            return None;
        }

        let top = weights.iter().copied().fold(0.0_f64, f64::max);
        Some(top / total)
    }
}

fn feature_weights(payload: &Value) -> Vec<f64> {
    let source = at(payload, &["features"]).or_else(|| at(payload, &["importances"]));
    match source {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| f64_at(item, &["importance"]).or_else(|| f64_at(item, &["score"])))
            .map(f64::abs)
            .collect(),
        Some(Value::Object(map)) => map.values().filter_map(as_f64_lenient).map(f64::abs).collect(),
        _ => Vec::new(),
    }
}

pub fn read_enhanced_analytics(analytics: &Value) -> EnhancedAnalytics {
    let mut families = BTreeMap::new();
    let empty = Value::Null;
    let roots = [
        analytics,
        at(analytics, &["enhanced_analytics"]).unwrap_or(&empty),
    ];

    for family in AnalyticsFamily::ALL {
        let payload = roots.iter().find_map(|root| {
            family
                .payload_keys()
                .iter()
                .find_map(|key| at(root, &[*key]))
                .filter(|payload| payload.is_object())
        });

        if let Some(payload) = payload {
            families.insert(
                family,
                AnalyticsSection {
                    available: bool_at(payload, &["available"]).unwrap_or(false),
                    payload: payload.clone(),
                },
            );
        }
    }

    EnhancedAnalytics { families }
}
