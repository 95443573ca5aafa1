//! Base resource type defaults
//!
//! A process-wide table of default source keys per base resource type
//! (e.g. `registry-image`, `s3`), loaded at startup and reloadable at runtime.
//!
//! Uses ArcSwap so that a reload replaces the whole table in one pointer
//! swap. Resolution always works against a single loaded snapshot.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::source::Source;

/// A consistent view of the defaults table
pub type DefaultsSnapshot = HashMap<String, Source>;

#[derive(Debug, Error)]
pub enum DefaultsError {
    #[error("failed to read defaults file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse defaults file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Shared handle to the defaults table
#[derive(Debug, Clone, Default)]
pub struct BaseResourceTypeDefaults {
    table: Arc<ArcSwap<DefaultsSnapshot>>,
}

impl BaseResourceTypeDefaults {
    pub fn new(table: DefaultsSnapshot) -> Self {
        Self {
            table: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// Reads a YAML map of `<base type>: { <key>: <value> }`.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, DefaultsError> {
        Ok(Self::new(read_yaml_file(path.as_ref())?))
    }

    /// Current snapshot of the table.
    pub fn load(&self) -> Arc<DefaultsSnapshot> {
        self.table.load_full()
    }

    /// Atomically replaces the whole table.
    pub fn replace(&self, table: DefaultsSnapshot) {
        let count = table.len();
        self.table.store(Arc::new(table));
        tracing::info!(base_types = count, "Base resource type defaults replaced");
    }

    /// Re-reads `path` and swaps it in. The current table is kept on failure.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<usize, DefaultsError> {
        let table = read_yaml_file(path.as_ref())?;
        let count = table.len();
        self.replace(table);
        Ok(count)
    }

    /// Default source for a base type, if any.
    pub fn find(&self, base_type: &str) -> Option<Source> {
        self.table.load().get(base_type).cloned()
    }
}

fn read_yaml_file(path: &Path) -> Result<DefaultsSnapshot, DefaultsError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| DefaultsError::Read {
        path: display.clone(),
        source,
    })?;
    let table: Option<DefaultsSnapshot> =
        serde_yaml::from_str(&raw).map_err(|source| DefaultsError::Parse {
            path: display,
            source,
        })?;
    Ok(table.unwrap_or_default())
}
