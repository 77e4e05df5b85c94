//! Configuration loading and typed config structures for the Stratum field
//! store.
//!
//! The canonical configuration lives in `stratum-config.yaml` at the project
//! root. The structs below mirror its sections; every field has a serde
//! default, so a partial (or empty) file is valid and a missing file means
//! "all defaults".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use stratum_field::{Direction, FieldError, GridGeometry, GridOptions, GridSettings};
use stratum_types::FieldMap;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The values parsed but describe an unusable grid.
    #[error("invalid grid configuration: {source}")]
    Grid {
        /// The underlying validation error.
        #[from]
        source: FieldError,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StratumConfig {
    /// Logical grid shape and initial fields.
    #[serde(default)]
    pub grid: GridConfig,

    /// Dense canvas size and partition.
    #[serde(default)]
    pub dense: DenseConfig,

    /// Flush timing and retry bounds.
    #[serde(default)]
    pub flush: FlushConfig,

    /// Resident layer bound.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Zero template environment source.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Persistence backend connection.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Startup seeding.
    #[serde(default)]
    pub seed: SeedConfig,
}

impl StratumConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `DRAGONFLY_URL` overrides `infrastructure.dragonfly_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return defaults (still subject
    /// to environment overrides).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }

    /// Dense-canvas and persistence settings.
    pub fn grid_settings(&self) -> GridSettings {
        GridSettings {
            dense_width: self.dense.width,
            dense_height: self.dense.height,
            quadrant_count: self.dense.quadrant_count,
            flush_debounce: Duration::from_millis(self.flush.debounce_ms),
            max_write_attempts: self.flush.max_attempts,
            retry_backoff: Duration::from_millis(self.flush.retry_backoff_ms),
            max_resident_layers: self.cache.max_resident_layers,
        }
    }

    /// Validated logical geometry.
    pub fn geometry(&self) -> Result<GridGeometry, ConfigError> {
        Ok(GridGeometry::new(
            self.grid.cells,
            self.grid.spacing,
            self.grid.origin,
        )?)
    }

    /// Everything needed to open the configured grid, under a fresh id.
    pub fn grid_options(&self) -> Result<GridOptions, ConfigError> {
        let [dx, dy] = self.grid.direction;
        let mut options = GridOptions::new(self.geometry()?, self.grid.fields.clone());
        options.direction = Direction::new(dx, dy);
        options.settings = self.grid_settings();
        Ok(options)
    }
}

/// Logical grid configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GridConfig {
    /// Cell counts `[x, y, z]`.
    #[serde(default = "default_cells")]
    pub cells: [u32; 3],

    /// Cell edge length in world units.
    #[serde(default = "default_spacing")]
    pub spacing: f64,

    /// World position of the corner of cell `(0, 0, 0)`.
    #[serde(default)]
    pub origin: [f64; 3],

    /// Propagation direction `[x, y]`.
    #[serde(default = "default_direction")]
    pub direction: [f64; 2],

    /// Field names, in channel order.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cells: default_cells(),
            spacing: default_spacing(),
            origin: [0.0; 3],
            direction: default_direction(),
            fields: default_fields(),
        }
    }
}

/// Dense canvas configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DenseConfig {
    /// Canvas width in pixels.
    #[serde(default = "default_dense_size")]
    pub width: u32,

    /// Canvas height in pixels.
    #[serde(default = "default_dense_size")]
    pub height: u32,

    /// Persistence quadrants per layer. A stored zero template overrides
    /// it.
    #[serde(default = "default_quadrant_count")]
    pub quadrant_count: u32,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            width: default_dense_size(),
            height: default_dense_size(),
            quadrant_count: default_quadrant_count(),
        }
    }
}

/// Flush configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlushConfig {
    /// Debounce delay in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Write-and-verify attempts per key.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Resident layer cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on resident layers. Absent keeps every layer.
    #[serde(default)]
    pub max_resident_layers: Option<usize>,
}

/// Environment source for zero templates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvironmentConfig {
    /// Jitter seed.
    #[serde(default = "default_environment_seed")]
    pub seed: u64,

    /// Ambient value per field name.
    #[serde(default)]
    pub ambient: BTreeMap<String, f32>,

    /// Relative jitter applied per quadrant. Zero disables the seeded
    /// source.
    #[serde(default)]
    pub jitter: f32,
}

impl EnvironmentConfig {
    /// Ambient values as a field map.
    pub fn ambient_map(&self) -> FieldMap {
        self.ambient.clone()
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            seed: default_environment_seed(),
            ambient: BTreeMap::new(),
            jitter: 0.0,
        }
    }
}

/// Persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// Dragonfly (Redis-compatible) URL. Empty runs memory-only.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,

    /// Namespace prepended to every stored key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection attempt timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl InfrastructureConfig {
    /// Override the backend URL with `DRAGONFLY_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DRAGONFLY_URL") {
            self.dragonfly_url = val;
        }
    }

    /// Whether no backend is configured.
    pub fn is_memory_only(&self) -> bool {
        self.dragonfly_url.trim().is_empty()
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            dragonfly_url: default_dragonfly_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Startup seeding configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SeedConfig {
    /// JSON file holding a list of sparse cells to import.
    #[serde(default)]
    pub sparse_path: Option<PathBuf>,

    /// Materialize every layer at startup.
    #[serde(default)]
    pub materialize_all: bool,
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_cells() -> [u32; 3] {
    [64, 64, 1]
}

const fn default_spacing() -> f64 {
    1.0
}

const fn default_direction() -> [f64; 2] {
    [1.0, 0.0]
}

fn default_fields() -> Vec<String> {
    vec!["O2".to_owned(), "CO2".to_owned(), "H2O".to_owned()]
}

const fn default_dense_size() -> u32 {
    stratum_field::settings::DEFAULT_DENSE_SIZE
}

const fn default_quadrant_count() -> u32 {
    stratum_field::settings::DEFAULT_QUADRANT_COUNT
}

const fn default_debounce_ms() -> u64 {
    200
}

const fn default_max_attempts() -> u32 {
    stratum_field::settings::DEFAULT_MAX_WRITE_ATTEMPTS
}

const fn default_retry_backoff_ms() -> u64 {
    25
}

const fn default_environment_seed() -> u64 {
    42
}

fn default_dragonfly_url() -> String {
    "redis://localhost:6379".to_owned()
}

fn default_key_prefix() -> String {
    "stratum".to_owned()
}

const fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StratumConfig::default();
        assert_eq!(config.grid.cells, [64, 64, 1]);
        assert_eq!(config.grid.fields.len(), 3);
        assert_eq!(config.dense.width, 1024);
        assert_eq!(config.dense.quadrant_count, 16);
        assert_eq!(config.flush.debounce_ms, 200);
        assert_eq!(config.cache.max_resident_layers, None);
        assert_eq!(config.logging.level, "info");
        assert!(config.geometry().is_ok());
    }

    #[test]
    fn settings_follow_config() {
        let mut config = StratumConfig::default();
        config.flush.debounce_ms = 50;
        config.flush.retry_backoff_ms = 5;
        config.cache.max_resident_layers = Some(4);
        let settings = config.grid_settings();
        assert_eq!(settings.flush_debounce, Duration::from_millis(50));
        assert_eq!(settings.retry_backoff, Duration::from_millis(5));
        assert_eq!(settings.max_resident_layers, Some(4));
        assert_eq!(settings.quadrant_count, 16);
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = "grid:\n  cells: [4, 4, 2]\n  fields: [O2]\n";
        let config = StratumConfig::parse(yaml).unwrap();

        assert_eq!(config.grid.cells, [4, 4, 2]);
        assert_eq!(config.grid.fields, vec!["O2".to_owned()]);
        // Everything else uses defaults
        assert_eq!(config.grid.spacing, 1.0);
        assert_eq!(config.dense.height, 1024);
        assert_eq!(config.flush.max_attempts, 3);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
grid:
  cells: [8, 6, 3]
  spacing: 0.5
  origin: [1.0, 2.0, 0.0]
  direction: [0.0, 1.0]
  fields: [O2, N2]
dense:
  width: 256
  height: 128
  quadrant_count: 8
flush:
  debounce_ms: 10
  max_attempts: 5
  retry_backoff_ms: 1
cache:
  max_resident_layers: 2
environment:
  seed: 7
  jitter: 0.1
  ambient:
    O2: 21.0
    N2: 78.0
logging:
  level: debug
seed:
  sparse_path: seed/cells.json
  materialize_all: true
";
        let config = StratumConfig::parse(yaml).unwrap();
        assert_eq!(config.grid.spacing, 0.5);
        assert_eq!(config.grid.direction, [0.0, 1.0]);
        assert_eq!(config.dense.quadrant_count, 8);
        assert_eq!(config.cache.max_resident_layers, Some(2));
        assert_eq!(config.environment.ambient.get("N2"), Some(&78.0));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.seed.sparse_path, Some(PathBuf::from("seed/cells.json")));
        assert!(config.seed.materialize_all);

        let options = config.grid_options().unwrap();
        assert_eq!(options.geometry.cells(), [8, 6, 3]);
        assert_eq!(options.direction, Direction::new(0.0, 1.0));
        assert_eq!(options.settings.dense_width, 256);
        assert_eq!(options.settings.max_write_attempts, 5);
    }

    #[test]
    fn parse_empty_yaml() {
        let config = StratumConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn invalid_geometry_is_reported() {
        let config = StratumConfig::parse("grid:\n  cells: [0, 4, 1]\n").unwrap();
        assert!(matches!(config.geometry(), Err(ConfigError::Grid { .. })));
    }

    #[test]
    fn empty_url_means_memory_only() {
        let infra = InfrastructureConfig {
            dragonfly_url: "  ".to_owned(),
            ..InfrastructureConfig::default()
        };
        assert!(infra.is_memory_only());
        assert!(!InfrastructureConfig::default().is_memory_only());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("stratum-config.yaml");
        if path.exists() {
            let config = StratumConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
