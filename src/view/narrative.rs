use std::cmp::Ordering;

use serde::Serialize;

use crate::view::evidence::Insight;
use crate::view::extract::Section;
use crate::view::trust::TrustScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Primary,
    Appendix,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeModule {
    pub section: Section,
    pub trust: TrustScore,
    pub placement: Placement,
    pub rank: usize,
    pub rank_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoverningThought {
    pub statement: String,
    pub source_section_ids: Vec<String>,
    pub primary_question: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Narrative {
    pub primary: Vec<NarrativeModule>,
    pub appendix: Vec<NarrativeModule>,
    pub governing_thought: Option<GoverningThought>,
}

impl Narrative {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.appendix.is_empty()
    }

    pub fn lead(&self) -> Option<&NarrativeModule> {
        self.primary.first()
    }
}

pub struct NarrativeInputs<'a> {
    pub scored: Vec<(Section, TrustScore)>,
    pub hero: Option<&'a Insight>,
    pub primary_question: Option<&'a str>,
    pub success_criteria: &'a [String],
    pub primary_limit: usize,
}

pub fn rank_score(section: &Section, trust: &TrustScore) -> f64 {
    (section.importance_score / 100.0) * (trust.score / 100.0)
}

// The primary set keeps one module whenever a section exists, even with a zero limit.
pub fn assemble_narrative(inputs: NarrativeInputs<'_>) -> Narrative {
    let NarrativeInputs {
        scored,
        hero,
        primary_question,
        success_criteria,
        primary_limit,
    } = inputs;

    let mut order = scored
        .iter()
        .enumerate()
        .map(|(position, (section, trust))| (position, rank_score(section, trust)))
        .collect::<Vec<(usize, f64)>>();
    // Stable, so equal scores keep document order.
    order.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));

    let primary_count = primary_limit.max(1).min(scored.len());
    let mut ranks = vec![(0usize, 0.0f64); scored.len()];
    for (rank, (position, score)) in order.iter().enumerate() {
        ranks[*position] = (rank + 1, *score);
    }

    let mut primary = Vec::with_capacity(primary_count);
    let mut appendix = Vec::with_capacity(scored.len() - primary_count);
    for (position, (section, trust)) in scored.into_iter().enumerate() {
        let (rank, rank_score) = ranks[position];
        let placement = if rank <= primary_count {
            Placement::Primary
        } else {
            Placement::Appendix
        };
        let module = NarrativeModule {
            section,
            trust,
            placement,
            rank,
            rank_score,
        };
        match placement {
            Placement::Primary => primary.push(module),
            Placement::Appendix => appendix.push(module),
        }
    }
    primary.sort_by_key(|module| module.rank);

    let governing_thought =
        synthesize_governing_thought(&primary, hero, primary_question, success_criteria);

    Narrative {
        primary,
        appendix,
        governing_thought,
    }
}

pub fn synthesize_governing_thought(
    primary: &[NarrativeModule],
    hero: Option<&Insight>,
    primary_question: Option<&str>,
    success_criteria: &[String],
) -> Option<GoverningThought> {
    let primary_question = primary_question
        .map(str::trim)
        .filter(|question| !question.is_empty());

    let lead = hero
        .and_then(|insight| insight.claim.as_deref())
        .map(str::trim)
        .filter(|claim| !claim.is_empty())
        .map(ToString::to_string)
        .or_else(|| primary.first().map(|module| lead_sentence(&module.section)));

    let mut parts = Vec::new();
    if let Some(question) = primary_question {
        parts.push(format!("On \"{question}\":"));
    }
    match lead {
        Some(lead) => parts.push(ensure_terminal(&lead)),
        None if primary_question.is_none() => return None,
        None => parts.push("no findings were produced.".to_string()),
    }

    let criteria = success_criteria
        .iter()
        .map(|criterion| criterion.trim())
        .filter(|criterion| !criterion.is_empty())
        .collect::<Vec<&str>>();
    if !criteria.is_empty() {
        parts.push(format!("Success criteria: {}.", criteria.join("; ")));
    }

    Some(GoverningThought {
        statement: parts.join(" "),
        source_section_ids: primary.iter().map(|module| module.section.id.clone()).collect(),
        primary_question: primary_question.map(ToString::to_string),
    })
}

fn lead_sentence(section: &Section) -> String {
    let first_line = section
        .content
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '+', '•'])
                .trim()
        })
        .find(|line| !line.is_empty() && !line.starts_with("```"));

    let Some(line) = first_line else {
        return section.title.clone();
    };

    let sentence = line
        .char_indices()
        .find(|(index, ch)| {
            matches!(ch, '.' | '!' | '?')
                && line[index + ch.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(index, ch)| &line[..index + ch.len_utf8()])
        .unwrap_or(line);

    sentence.replace("**", "").replace('`', "")
}

fn ensure_terminal(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.ends_with(['.', '!', '?']) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::trust::{TrustSignals, TrustThresholds, score_trust};

    const THRESHOLDS: TrustThresholds = TrustThresholds {
        min_row_count: 100,
        min_feature_count: 5,
    };

    fn section(index: usize, title: &str, content: &str, importance: f64) -> Section {
        Section {
            id: format!("section-{index}"),
            title: title.to_string(),
            level: 2,
            content: content.to_string(),
            importance_score: importance,
        }
    }

    fn trust(quality: f64) -> TrustScore {
        score_trust(
            &TrustSignals {
                data_quality: Some(quality),
                validation_failed: false,
                sample_size: Some(1_000),
                feature_count: Some(10),
                signal_stability: 0.8,
                feature_dominance: None,
                assumption_risk: 0.8,
                safe_mode: false,
            },
            &THRESHOLDS,
        )
    }

    fn inputs(scored: Vec<(Section, TrustScore)>, limit: usize) -> NarrativeInputs<'static> {
        NarrativeInputs {
            scored,
            hero: None,
            primary_question: None,
            success_criteria: &[],
            primary_limit: limit,
        }
    }

    #[test]
    fn primary_set_holds_top_ranked_and_appendix_keeps_document_order() {
        let scored = vec![
            (section(1, "Background", "Context.", 40.0), trust(90.0)),
            (section(2, "Executive Summary", "Churn is rising.", 95.0), trust(90.0)),
            (section(3, "Details", "More.", 30.0), trust(90.0)),
            (section(4, "Drivers", "Tenure matters.", 70.0), trust(90.0)),
        ];

        let narrative = assemble_narrative(inputs(scored, 2));
        let primary = narrative
            .primary
            .iter()
            .map(|module| module.section.id.as_str())
            .collect::<Vec<&str>>();
        let appendix = narrative
            .appendix
            .iter()
            .map(|module| module.section.id.as_str())
            .collect::<Vec<&str>>();

        assert_eq!(primary, vec!["section-2", "section-4"]);
        assert_eq!(appendix, vec!["section-1", "section-3"]);
        assert!(narrative.appendix.iter().all(|m| m.placement == Placement::Appendix));
        assert_eq!(narrative.primary[0].rank, 1);
    }

    #[test]
    fn trust_reorders_equally_important_sections() {
        let scored = vec![
            (section(1, "A", "first.", 60.0), trust(20.0)),
            (section(2, "B", "second.", 60.0), trust(95.0)),
        ];
        let narrative = assemble_narrative(inputs(scored, 1));
        assert_eq!(narrative.primary[0].section.id, "section-2");
    }

    #[test]
    fn primary_set_is_never_empty_when_sections_exist() {
        for limit in [0, 1, 5] {
            for count in 1..=4 {
                let scored = (1..=count)
                    .map(|index| (section(index, "T", "", 10.0), trust(0.0)))
                    .collect::<Vec<(Section, TrustScore)>>();
                let narrative = assemble_narrative(inputs(scored, limit));
                assert!(!narrative.primary.is_empty(), "limit {limit}, count {count}");
                assert_eq!(narrative.primary.len() + narrative.appendix.len(), count);
                assert!(narrative.governing_thought.is_some());
            }
        }
    }

    #[test]
    fn empty_input_yields_empty_narrative() {
        let narrative = assemble_narrative(inputs(Vec::new(), 3));
        assert!(narrative.is_empty());
        assert!(narrative.governing_thought.is_none());
    }

    #[test]
    fn governing_thought_combines_question_hero_and_criteria() {
        let hero = Insight {
            id: "i1".to_string(),
            claim: Some("Tenure drives churn".to_string()),
            agent: None,
            severity: None,
            metric_name: None,
            columns: Vec::new(),
            confidence: Some(90.0),
            evidence_id: None,
            evidence: None,
        };
        let criteria = vec!["identify top driver".to_string(), " ".to_string()];
        let narrative = assemble_narrative(NarrativeInputs {
            scored: vec![(section(1, "Summary", "Churn rose 4%. Then fell.", 95.0), trust(90.0))],
            hero: Some(&hero),
            primary_question: Some(" Why do customers leave? "),
            success_criteria: &criteria,
            primary_limit: 3,
        });

        let thought = narrative.governing_thought.expect("thought present");
        assert_eq!(
            thought.statement,
            "On \"Why do customers leave?\": Tenure drives churn. Success criteria: identify top driver."
        );
        assert_eq!(thought.source_section_ids, vec!["section-1"]);
        assert_eq!(thought.primary_question.as_deref(), Some("Why do customers leave?"));
    }

    #[test]
    fn governing_thought_falls_back_to_first_sentence_then_title() {
        let narrative = assemble_narrative(inputs(
            vec![(section(1, "Overview", "- **Revenue** grew 3.5% in Q2. Costs flat.", 80.0), trust(90.0))],
            3,
        ));
        assert_eq!(
            narrative.governing_thought.map(|thought| thought.statement),
            Some("Revenue grew 3.5% in Q2.".to_string())
        );

        let untitled = assemble_narrative(inputs(vec![(section(1, "Risks", "", 80.0), trust(90.0))], 3));
        assert_eq!(
            untitled.governing_thought.map(|thought| thought.statement),
            Some("Risks.".to_string())
        );
    }

    #[test]
    fn question_without_sections_still_frames_a_statement() {
        let thought =
            synthesize_governing_thought(&[], None, Some("Is churn rising?"), &[]).expect("thought");
        assert_eq!(thought.statement, "On \"Is churn rising?\": no findings were produced.");
        assert!(thought.source_section_ids.is_empty());
    }
}
