use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::cli::{ComposeArgs, OutputFormat};
use crate::commands::store::ViewCache;
use crate::model::RawArtifacts;
use crate::util::{read_json_optional, read_text, write_json_pretty};
use crate::view::{ComposeConfig, ViewModelMemo, fingerprint};

const NARRATIVE_FILES: &[&str] = &["narrative.md", "narrative.txt"];
const ANALYTICS_FILE: &str = "analytics.json";
const DIAGNOSTICS_FILE: &str = "diagnostics.json";
const MANIFEST_FILE: &str = "manifest.json";
const GOVERNED_REPORT_FILE: &str = "governed_report.json";

pub fn run(args: ComposeArgs) -> Result<()> {
    let config = compose_config(&args)?;
    let cache = args
        .cache_db
        .as_deref()
        .map(ViewCache::open)
        .transpose()?;
    let mut memo = ViewModelMemo::new(args.run_dirs.len());
    let mut cache_hits = 0_usize;

    info!(
        runs = args.run_dirs.len(),
        format = args.format.as_str(),
        cache_db = %args.cache_db.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
        "compose requested"
    );

    for run_dir in &args.run_dirs {
        let raw = load_run_artifacts(run_dir)?;
        let key = fingerprint(&raw, &config);

        let cached = match cache.as_ref() {
            Some(cache) => cache.load(&key)?,
            None => None,
        };
        let payload = match cached {
            Some(hit) => {
                cache_hits += 1;
                info!(run_dir = %run_dir.display(), fingerprint = %key, created_at = %hit.created_at, "served cached view model");
                hit.payload
            }
            None => {
                let model = memo.get_or_compose(&raw, &config);
                match cache.as_ref() {
                    Some(cache) => cache.store(&model)?.payload,
                    None => serde_json::to_value(&*model)
                        .context("failed to serialize view model")?,
                }
            }
        };

        let output = match args.format {
            OutputFormat::Full => payload,
            OutputFormat::Summary => summarize(&payload),
        };
        emit(run_dir, &output, args.output_dir.as_deref())?;
    }

    let stats = memo.stats();
    info!(
        runs = args.run_dirs.len(),
        cache_hits,
        memo_hits = stats.hits,
        composed = stats.misses,
        "compose finished"
    );

    Ok(())
}

fn compose_config(args: &ComposeArgs) -> Result<ComposeConfig> {
    if !(0.0..=100.0).contains(&args.importance_floor) {
        bail!(
            "--importance-floor must be within 0..=100, got {}",
            args.importance_floor
        );
    }
    if args.primary_limit == 0 {
        warn!("--primary-limit 0 still keeps one primary module");
    }

    Ok(ComposeConfig {
        primary_limit: args.primary_limit,
        min_row_count: args.min_rows,
        min_feature_count: args.min_features,
        importance_floor: args.importance_floor,
    })
}

pub fn load_run_artifacts(run_dir: &Path) -> Result<RawArtifacts> {
    if !run_dir.is_dir() {
        bail!("run directory not found: {}", run_dir.display());
    }

    let Some(narrative_path) = NARRATIVE_FILES
        .iter()
        .map(|name| run_dir.join(name))
        .find(|path| path.is_file())
    else {
        bail!(
            "no narrative file ({}) in {}",
            NARRATIVE_FILES.join(" or "),
            run_dir.display()
        );
    };

    let narrative = read_text(&narrative_path)?;
    let analytics = read_json_optional(&run_dir.join(ANALYTICS_FILE))?;
    let diagnostics = read_json_optional(&run_dir.join(DIAGNOSTICS_FILE))?;
    let manifest = read_json_optional(&run_dir.join(MANIFEST_FILE))?;
    let governed_report = read_json_optional(&run_dir.join(GOVERNED_REPORT_FILE))?;

    for (name, present) in [
        (ANALYTICS_FILE, analytics.is_some()),
        (DIAGNOSTICS_FILE, diagnostics.is_some()),
        (MANIFEST_FILE, manifest.is_some()),
    ] {
        if !present {
            warn!(run_dir = %run_dir.display(), artifact = name, "artifact missing");
        }
    }

    Ok(RawArtifacts {
        narrative,
        analytics: analytics.unwrap_or_else(|| json!({})),
        diagnostics: diagnostics.unwrap_or_else(|| json!({})),
        manifest,
        governed_report,
    })
}

fn summarize(payload: &Value) -> Value {
    let count = |pointer: &str| {
        payload
            .pointer(pointer)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    };

    json!({
        "fingerprint": payload.pointer("/fingerprint"),
        "state": payload.pointer("/governance/state"),
        "safe_mode": payload.pointer("/governance/safe_mode"),
        "trust_score": payload.pointer("/governing_trust/score"),
        "trust_band": payload.pointer("/governing_trust/band"),
        "certified": payload.pointer("/governing_trust/certification/certified"),
        "governing_thought": payload.pointer("/narrative/governing_thought/statement"),
        "primary_sections": count("/narrative/primary"),
        "appendix_sections": count("/narrative/appendix"),
        "issues": count("/issues"),
        "guidance": count("/guidance"),
    })
}

fn emit(run_dir: &Path, output: &Value, output_dir: Option<&Path>) -> Result<()> {
    let Some(output_dir) = output_dir else {
        let text = serde_json::to_string_pretty(output).context("failed to render view model")?;
        println!("{text}");
        return Ok(());
    };

    let path = output_path(output_dir, run_dir);
    write_json_pretty(&path, output)?;
    info!(path = %path.display(), "wrote view model");
    Ok(())
}

fn output_path(output_dir: &Path, run_dir: &Path) -> PathBuf {
    let name = run_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "run".to_string());
    output_dir.join(format!("{name}.view.json"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::Utc;

    use super::*;

    fn scratch_run(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "reportgov-compose-{name}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&dir).expect("scratch run dir");
        dir
    }

    #[test]
    fn run_dir_without_json_artifacts_still_loads() {
        let dir = scratch_run("minimal");
        fs::write(dir.join("narrative.md"), "## Overview\nbody").expect("write narrative");

        let raw = load_run_artifacts(&dir).expect("narrative alone is enough");
        assert_eq!(raw.narrative, "## Overview\nbody");
        assert_eq!(raw.analytics, json!({}));
        assert!(raw.manifest.is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_narrative_is_a_hard_failure() {
        let dir = scratch_run("empty");
        let error = load_run_artifacts(&dir).expect_err("narrative is required");
        assert!(error.to_string().contains("no narrative file"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn summary_counts_governed_collections() {
        let summary = summarize(&json!({
            "fingerprint": "abc",
            "governance": {"state": "normal", "safe_mode": false},
            "governing_trust": {"score": 81.5, "band": "high", "certification": {"certified": true}},
            "narrative": {"primary": [{}, {}], "appendix": [{}], "governing_thought": {"statement": "S."}},
            "issues": [],
            "guidance": [{}]
        }));

        assert_eq!(summary["state"], json!("normal"));
        assert_eq!(summary["primary_sections"], json!(2));
        assert_eq!(summary["appendix_sections"], json!(1));
        assert_eq!(summary["guidance"], json!(1));
        assert_eq!(summary["governing_thought"], json!("S."));
    }

    #[test]
    fn output_path_is_named_after_run_dir() {
        assert_eq!(
            output_path(Path::new("/out"), Path::new("/runs/2024-06-01")),
            PathBuf::from("/out/2024-06-01.view.json")
        );
        assert_eq!(
            output_path(Path::new("/out"), Path::new("/")),
            PathBuf::from("/out/run.view.json")
        );
    }
}
