//! Engine configuration loaded from TOML.
//!
//! ```toml
//! [matrix]
//! pending_threshold = 65536
//! sparsity = "auto"        # auto | sparse_only | full | bitmap | sparse | hypersparse
//!
//! [execution]
//! batch_size = 16
//! timeout_ms = 500
//!
//! [graph]
//! node_block = 1024
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphOptions;
use crate::matrix::{Format, MatrixOptions, Sparsity};
use crate::query::ExecOptions;

/// Environment variable overriding the default config location.
pub const CONFIG_ENV: &str = "MATRIXGRAPH_CONFIG";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read engine config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The contents are not valid TOML for this schema.
    #[error("failed to parse engine config {origin}: {source}")]
    Parse {
        /// File path, or `<string>` for inline sources.
        origin: String,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid engine config value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Matrix tuning.
    pub matrix: MatrixOptions,
    /// Execution options.
    pub execution: ExecOptions,
    /// Graph growth block.
    pub node_block: Option<u64>,
}

impl EngineConfig {
    /// `$MATRIXGRAPH_CONFIG`, else `<config dir>/matrixgraph/engine.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|base| base.join("matrixgraph").join("engine.toml"))
    }

    /// Loads `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        raw.resolve()
    }

    /// Loads `explicit`, or the default path when it exists, or defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "<string>".to_string(),
            source,
        })?;
        raw.resolve()
    }

    /// Graph options derived from this configuration.
    pub fn graph_options(&self) -> GraphOptions {
        let options = GraphOptions::default().matrix(self.matrix.clone());
        match self.node_block {
            Some(block) => options.node_block(block),
            None => options,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    matrix: MatrixSection,
    #[serde(default)]
    execution: ExecutionSection,
    #[serde(default)]
    graph: GraphSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct MatrixSection {
    pending_threshold: Option<usize>,
    hyper_switch: Option<f64>,
    bitmap_switch: Option<f64>,
    max_dense_cells: Option<u64>,
    sparsity: Option<String>,
    parallel_min_vectors: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ExecutionSection {
    batch_size: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct GraphSection {
    node_block: Option<u64>,
}

impl RawConfig {
    fn resolve(self) -> Result<EngineConfig, ConfigError> {
        let mut matrix = MatrixOptions::default();
        let m = self.matrix;
        if let Some(threshold) = m.pending_threshold {
            if threshold == 0 {
                return Err(ConfigError::Invalid {
                    key: "matrix.pending_threshold",
                    reason: "must be positive",
                });
            }
            matrix = matrix.pending_threshold(threshold);
        }
        if let Some(ratio) = m.hyper_switch {
            matrix = matrix.hyper_switch(unit_ratio("matrix.hyper_switch", ratio)?);
        }
        if let Some(ratio) = m.bitmap_switch {
            matrix = matrix.bitmap_switch(unit_ratio("matrix.bitmap_switch", ratio)?);
        }
        if let Some(cells) = m.max_dense_cells {
            matrix = matrix.max_dense_cells(cells);
        }
        if let Some(name) = m.sparsity.as_deref() {
            matrix = matrix.sparsity(parse_sparsity(name)?);
        }
        if let Some(vectors) = m.parallel_min_vectors {
            matrix = matrix.parallel_min_vectors(vectors);
        }

        let mut execution = ExecOptions::default();
        if let Some(size) = self.execution.batch_size {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    key: "execution.batch_size",
                    reason: "must be positive",
                });
            }
            execution = execution.batch_size(size);
        }
        if let Some(ms) = self.execution.timeout_ms {
            execution = execution.timeout(Some(Duration::from_millis(ms)));
        }

        if self.graph.node_block == Some(0) {
            return Err(ConfigError::Invalid {
                key: "graph.node_block",
                reason: "must be positive",
            });
        }

        Ok(EngineConfig {
            matrix,
            execution,
            node_block: self.graph.node_block,
        })
    }
}

fn unit_ratio(key: &'static str, value: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: "must lie in [0, 1]",
        })
    }
}

fn parse_sparsity(name: &str) -> Result<Sparsity, ConfigError> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "auto" => Sparsity::Auto,
        "sparse_only" => Sparsity::SparseOnly,
        "full" => Sparsity::Fixed(Format::Full),
        "bitmap" => Sparsity::Fixed(Format::Bitmap),
        "sparse" => Sparsity::Fixed(Format::Sparse),
        "hypersparse" => Sparsity::Fixed(Format::Hypersparse),
        _ => {
            return Err(ConfigError::Invalid {
                key: "matrix.sparsity",
                reason: "expected auto, sparse_only, full, bitmap, sparse or hypersparse",
            })
        }
    })
}
