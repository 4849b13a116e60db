use super::*;

pub const DEFAULT_IMPORTANCE_FLOOR: f64 = 10.0;
pub const EXECUTIVE_IMPORTANCE: f64 = 95.0;
const POSITION_IMPORTANCE_BASE: f64 = 80.0;
const POSITION_IMPORTANCE_DECAY: f64 = 8.0;

static EXPLICIT_IMPORTANCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern(r"(?im)^\s*(?:[-*]\s*)?importance\s*[:=]\s*(\d+(?:\.\d+)?)"));
static EXECUTIVE_TITLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile_pattern(r"(?i)\b(executive|summary)\b"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    pub level: u8,
    pub content: String,
    pub importance_score: f64,
}

struct SectionDraft<'a> {
    title: &'a str,
    level: u8,
    lines: Vec<&'a str>,
}

pub fn split_sections(text: &str, importance_floor: f64) -> Vec<Section> {
    let mut drafts = Vec::<SectionDraft>::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        } else if let Some((level, title)) = parse_header(line).filter(|_| !in_fence) {
            drafts.push(SectionDraft {
                title,
                level,
                lines: Vec::new(),
            });
            continue;
        }

        if let Some(current) = drafts.last_mut() {
            current.lines.push(line);
        }
    }

    drafts
        .into_iter()
        .enumerate()
        .map(|(position, draft)| {
            let content = draft.lines.join("\n").trim().to_string();
            let title = strip_emphasis(draft.title);
            let importance_score =
                score_importance(&title, &content, position, importance_floor);
            Section {
                id: format!("section-{}-{}", position + 1, slugify(&title)),
                title,
                level: draft.level,
                content,
                importance_score,
            }
        })
        .collect()
}

fn parse_header(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed
        .chars()
        .take_while(|character| *character == '#')
        .count();
    if hashes == 0 || hashes > 6 {
        return None;
    }

    let rest = &trimmed[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }

    Some((hashes as u8, title))
}

// An `importance: N` directive must open its own line; prose such as
// "feature importance: 0.45" is not one.
pub fn score_importance(title: &str, content: &str, position: usize, floor: f64) -> f64 {
    let floor = if floor.is_finite() {
        floor.clamp(0.0, 100.0)
    } else {
        DEFAULT_IMPORTANCE_FLOOR
    };

    if let Some(explicit) = explicit_importance(title).or_else(|| explicit_importance(content)) {
        return round1(explicit.clamp(floor, 100.0));
    }

    let executive = EXECUTIVE_TITLE
        .as_ref()
        .map(|regex| regex.is_match(title))
        .unwrap_or(false);
    if executive {
        return EXECUTIVE_IMPORTANCE;
    }

    let decayed = POSITION_IMPORTANCE_BASE - POSITION_IMPORTANCE_DECAY * position as f64;
    round1(decayed.max(floor))
}

fn explicit_importance(text: &str) -> Option<f64> {
    EXPLICIT_IMPORTANCE
        .as_ref()?
        .captures(text)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
}
