use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ConfidenceLevel,
    DataQualityScore,
    AnomalyCount,
    Completeness,
    RowCount,
    ColumnCount,
    MissingPercentage,
    ModelRSquared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricScale {
    Percent,
    Count,
    Ratio,
}

struct MetricRule {
    name: MetricName,
    scale: MetricScale,
    patterns: &'static [&'static str],
}

const METRIC_RULES: &[MetricRule] = &[
    MetricRule {
        name: MetricName::ConfidenceLevel,
        scale: MetricScale::Percent,
        patterns: &[
            r"(?i)\bconfidence(?:\s+level)?\s*[:=]\s*(\d+(?:\.\d+)?)",
            r"(?i)(\d+(?:\.\d+)?)\s*%\s+confiden(?:ce|t)\b",
            r"(?i)\bconfidence\s+(?:of|is|at)\s+(\d+(?:\.\d+)?)",
        ],
    },
    MetricRule {
        name: MetricName::DataQualityScore,
        scale: MetricScale::Percent,
        patterns: &[
            r"(?i)\bdata[\s_-]*quality(?:\s+score)?\s*[:=]\s*(\d+(?:\.\d+)?)",
            r"(?i)\bquality\s+score\s*(?:of|is|[:=])\s*(\d+(?:\.\d+)?)",
            r"(?i)(\d+(?:\.\d+)?)\s*%?\s+data\s+quality\b",
        ],
    },
    MetricRule {
        name: MetricName::AnomalyCount,
        scale: MetricScale::Count,
        patterns: &[
            r"(?i)\banomal(?:y|ies)(?:\s+count)?\s*[:=]\s*(\d+)",
            r"(?i)\b(\d+)\s+anomal(?:y|ies)\b",
            r"(?i)\b(\d+)\s+outliers?\b",
        ],
    },
    MetricRule {
        name: MetricName::Completeness,
        scale: MetricScale::Percent,
        patterns: &[
            r"(?i)\bcompleteness\s*[:=]\s*(\d+(?:\.\d+)?)",
            r"(?i)(\d+(?:\.\d+)?)\s*%\s+complete\b",
        ],
    },
    MetricRule {
        name: MetricName::RowCount,
        scale: MetricScale::Count,
        patterns: &[
            r"(?i)\b(?:rows|sample\s+size|n)\s*[:=]\s*(\d[\d,]*)",
            r"(?i)\b(\d[\d,]*)\s+(?:rows|records|observations|samples)\b",
        ],
    },
    MetricRule {
        name: MetricName::ColumnCount,
        scale: MetricScale::Count,
        patterns: &[
            r"(?i)\b(?:columns|features)\s*[:=]\s*(\d+)",
            r"(?i)\b(\d+)\s+(?:columns|features|variables)\b",
        ],
    },
    MetricRule {
        name: MetricName::MissingPercentage,
        scale: MetricScale::Percent,
        patterns: &[
            r"(?i)\bmissing(?:\s+values?)?\s*[:=]\s*(\d+(?:\.\d+)?)",
            r"(?i)(\d+(?:\.\d+)?)\s*%\s+(?:of\s+values\s+)?missing\b",
        ],
    },
    MetricRule {
        name: MetricName::ModelRSquared,
        scale: MetricScale::Ratio,
        patterns: &[
            r"(?i)\br(?:²|\^2|-squared|\s+squared)\s*(?:of|is|[:=])?\s*(0?\.\d+|1(?:\.0+)?|0)\b",
            r"(?i)\bexplains\s+(\d+(?:\.\d+)?)\s*%\s+of\s+(?:the\s+)?variance",
        ],
    },
];

struct CompiledRule {
    name: MetricName,
    scale: MetricScale,
    patterns: Vec<Regex>,
}

static COMPILED_RULES: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| {
    METRIC_RULES
        .iter()
        .map(|rule| CompiledRule {
            name: rule.name,
            scale: rule.scale,
            patterns: rule
                .patterns
                .iter()
                .filter_map(|pattern| compile_pattern(pattern))
                .collect(),
        })
        .collect()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metrics {
    values: BTreeMap<MetricName, f64>,
}

impl Metrics {
    pub fn get(&self, name: MetricName) -> Option<f64> {
        self.values.get(&name).copied()
    }

    pub fn insert(&mut self, name: MetricName, value: f64) {
        self.values.insert(name, value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn confidence_level(&self) -> Option<f64> {
        self.get(MetricName::ConfidenceLevel)
    }

    pub fn data_quality_score(&self) -> Option<f64> {
        self.get(MetricName::DataQualityScore)
    }

    pub fn row_count(&self) -> Option<u64> {
        self.get(MetricName::RowCount).map(|value| value as u64)
    }

    pub fn column_count(&self) -> Option<u64> {
        self.get(MetricName::ColumnCount).map(|value| value as u64)
    }
}

pub fn extract_metrics(text: &str) -> Metrics {
    let mut metrics = Metrics::default();
    for rule in COMPILED_RULES.iter() {
        if let Some(value) = first_match(rule, text) {
            metrics.insert(rule.name, value);
        }
    }
    metrics
}

fn first_match(rule: &CompiledRule, text: &str) -> Option<f64> {
    rule.patterns.iter().find_map(|pattern| {
        let raw = pattern.captures(text)?.get(1)?.as_str().replace(',', "");
        let value = raw.parse::<f64>().ok().filter(|value| value.is_finite())?;
        Some(scale_metric(pattern.as_str(), rule.scale, value))
    })
}

fn scale_metric(pattern: &str, scale: MetricScale, value: f64) -> f64 {
    match scale {
        MetricScale::Percent => to_percent(value),
        MetricScale::Count => value.round(),
        // Percent-phrased fallbacks ("explains 74% of variance") land on 0..1.
        MetricScale::Ratio if pattern.contains('%') && value > 1.0 => round1(value) / 100.0,
        MetricScale::Ratio => value,
    }
}
