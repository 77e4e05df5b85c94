//! Startup wiring: persistence gateway, environment source, grid.
//!
//! The gateway is best effort. An empty URL, an unparseable one, a refused
//! connection, or a connection that does not come up within the configured
//! timeout all leave the grid running memory-only, with a warning.

use std::sync::Arc;
use std::time::Duration;

use stratum_db::{DragonflyGateway, PersistenceGateway};
use stratum_field::{AmbientSource, EnvironmentSource, FieldError, FieldGrid, SeededEnvironment};

use crate::config::{ConfigError, EnvironmentConfig, InfrastructureConfig, StratumConfig};

/// Errors raised while bringing a grid up.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The configuration describes an unusable grid.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Opening the grid failed.
    #[error("grid error: {source}")]
    Field {
        /// The underlying field error.
        #[from]
        source: FieldError,
    },
}

/// Connect the configured backend, or `None` to run memory-only.
pub async fn connect_gateway(infra: &InfrastructureConfig) -> Option<Arc<dyn PersistenceGateway>> {
    if infra.is_memory_only() {
        tracing::info!("no persistence backend configured, running memory-only");
        return None;
    }
    let url = infra.dragonfly_url.trim();
    let timeout = Duration::from_millis(infra.connect_timeout_ms);
    tracing::info!(url, timeout_ms = infra.connect_timeout_ms, "connecting to Dragonfly");
    match tokio::time::timeout(timeout, DragonflyGateway::connect(url, &infra.key_prefix)).await {
        Ok(Ok(gateway)) => Some(Arc::new(gateway)),
        Ok(Err(e)) => {
            tracing::warn!(url, error = %e, "Dragonfly unavailable, running memory-only");
            None
        }
        Err(_) => {
            tracing::warn!(url, timeout_ms = infra.connect_timeout_ms, "Dragonfly connect timed out, running memory-only");
            None
        }
    }
}

/// Environment source for zero templates: seeded jitter when configured,
/// flat ambient values otherwise.
pub fn environment_source(env: &EnvironmentConfig) -> Arc<dyn EnvironmentSource> {
    if env.jitter > 0.0 {
        Arc::new(SeededEnvironment::new(env.ambient_map(), env.seed, env.jitter))
    } else {
        Arc::new(AmbientSource::new(env.ambient_map()))
    }
}

/// Open the configured grid over `gateway`.
pub async fn open_grid_with(
    config: &StratumConfig,
    gateway: Option<Arc<dyn PersistenceGateway>>,
) -> Result<FieldGrid, BootstrapError> {
    let options = config.grid_options()?;
    let source = environment_source(&config.environment);
    Ok(FieldGrid::open(options, gateway, source).await?)
}

/// Connect the configured backend (falling back to memory-only) and open
/// the configured grid over it.
pub async fn open_grid(config: &StratumConfig) -> Result<FieldGrid, BootstrapError> {
    let gateway = connect_gateway(&config.infrastructure).await;
    open_grid_with(config, gateway).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use stratum_db::MemoryGateway;
    use stratum_field::QuadrantLayout;

    use super::*;

    fn small_config() -> StratumConfig {
        let mut config = StratumConfig::default();
        config.grid.cells = [4, 4, 1];
        config.dense.width = 64;
        config.dense.height = 64;
        config.infrastructure.dragonfly_url = String::new();
        config
    }

    #[tokio::test]
    async fn empty_url_runs_memory_only() {
        let config = small_config();
        assert!(connect_gateway(&config.infrastructure).await.is_none());

        let grid = open_grid(&config).await.unwrap();
        assert_eq!(grid.backend(), "none");
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back() {
        let infra = InfrastructureConfig {
            dragonfly_url: "redis://127.0.0.1:1".to_owned(),
            key_prefix: "test".to_owned(),
            connect_timeout_ms: 300,
        };
        assert!(connect_gateway(&infra).await.is_none());
    }

    #[tokio::test]
    async fn opens_over_supplied_gateway() {
        let config = small_config();
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(MemoryGateway::new());
        let grid = open_grid_with(&config, Some(gateway)).await.unwrap();
        assert_eq!(grid.backend(), "memory");
        assert_eq!(grid.layout().await, QuadrantLayout::new(64, 64, 16).unwrap());
        assert_eq!(grid.schema().await.fields(), ["O2", "CO2", "H2O"]);
    }

    #[test]
    fn jitter_selects_seeded_source() {
        let layout = QuadrantLayout::new(64, 64, 4).unwrap();
        let fields = vec!["O2".to_owned()];
        let mut env = EnvironmentConfig {
            ambient: BTreeMap::from([("O2".to_owned(), 10.0)]),
            ..EnvironmentConfig::default()
        };

        let flat = environment_source(&env);
        assert_eq!(flat.sample(&fields, 0, &layout), flat.sample(&fields, 3, &layout));

        env.jitter = 0.5;
        let seeded = environment_source(&env);
        let sampled = seeded.sample(&fields, 1, &layout);
        let value = sampled.get("O2").copied().unwrap();
        assert!((5.0..=15.0).contains(&value));
        assert_eq!(sampled, seeded.sample(&fields, 1, &layout));
    }
}
