use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::store::{CACHE_SCHEMA_VERSION, ViewCache};
use crate::view::{TRUST_RULESET_VERSION, VIEW_MODEL_VERSION};

pub fn run(args: StatusArgs) -> Result<()> {
    info!(
        cache_db = %args.cache_db.display(),
        trust_ruleset_version = TRUST_RULESET_VERSION,
        view_model_version = VIEW_MODEL_VERSION,
        "status requested"
    );

    if !args.cache_db.exists() {
        warn!(path = %args.cache_db.display(), "view cache missing");
        return Ok(());
    }

    let cache = ViewCache::open(&args.cache_db)?;
    let counts = cache.counts()?;
    let schema_version = cache.metadata("cache_schema_version")?.unwrap_or_default();
    let updated_at = cache.metadata("cache_updated_at")?.unwrap_or_default();

    if schema_version != CACHE_SCHEMA_VERSION {
        warn!(
            found = %schema_version,
            expected = CACHE_SCHEMA_VERSION,
            "view cache schema version mismatch"
        );
    }

    info!(
        path = %args.cache_db.display(),
        schema_version = %schema_version,
        updated_at = %updated_at,
        view_models = counts.total,
        current = counts.current_ruleset,
        stale = counts.stale,
        "view cache status"
    );

    Ok(())
}
