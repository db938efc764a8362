use serde::{Deserialize, Serialize};
use snapdiff_store::TraverseFlags;

use crate::error::{DiffError, DiffResult};

/// Tunables for a [`DiffEngine`](crate::DiffEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Ask the walker to prefetch indirect blocks ahead of the visit.
    pub prefetch_metadata: bool,
    /// Maximum number of clone-origin hops followed while resolving lineage.
    pub max_lineage_depth: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            prefetch_metadata: true,
            max_lineage_depth: 1024,
        }
    }
}

impl DiffConfig {
    /// Parse a TOML document. Missing keys take their default.
    pub fn from_toml_str(s: &str) -> DiffResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DiffError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DiffResult<()> {
        if self.max_lineage_depth == 0 {
            return Err(DiffError::Config(
                "max_lineage_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Flags for the meta-dnode walk: always pre-order.
    pub fn traverse_flags(&self) -> TraverseFlags {
        TraverseFlags::PRE_ORDER.with_prefetch(self.prefetch_metadata)
    }
}
