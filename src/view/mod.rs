pub mod compose;
pub mod evidence;
pub mod extract;
pub mod gating;
pub mod governance;
pub mod json;
pub mod memo;
pub mod narrative;
pub mod registry;
pub mod trust;

pub use compose::{VIEW_MODEL_VERSION, ViewModel, compose_view_model};
pub use memo::{ViewModelMemo, fingerprint};
pub use trust::TRUST_RULESET_VERSION;

use crate::view::extract::DEFAULT_IMPORTANCE_FLOOR;
use crate::view::trust::TrustThresholds;

pub const DEFAULT_PRIMARY_LIMIT: usize = 3;
pub const DEFAULT_MIN_ROW_COUNT: u64 = 100;
pub const DEFAULT_MIN_FEATURE_COUNT: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeConfig {
    pub primary_limit: usize,
    pub min_row_count: u64,
    pub min_feature_count: u64,
    pub importance_floor: f64,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            primary_limit: DEFAULT_PRIMARY_LIMIT,
            min_row_count: DEFAULT_MIN_ROW_COUNT,
            min_feature_count: DEFAULT_MIN_FEATURE_COUNT,
            importance_floor: DEFAULT_IMPORTANCE_FLOOR,
        }
    }
}

impl ComposeConfig {
    pub fn thresholds(&self) -> TrustThresholds {
        TrustThresholds {
            min_row_count: self.min_row_count,
            min_feature_count: self.min_feature_count,
        }
    }
}
