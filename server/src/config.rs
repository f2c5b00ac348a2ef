use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use geoexplorer_data::{DataManagerConfig, StatisticsConfig, DEFAULT_HEATMAP_GRID_SIZE, DEFAULT_HISTOGRAM_BINS};
use geoexplorer_shared::{explorer_error, ExplorerResult};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "GEOEXPLORER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: HttpConfig,
    pub storage: StorageConfig,
    pub statistics: StatisticsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSettings {
    pub histogram_bins: usize,
    pub heatmap_grid_size: u32,
    pub default_columns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            storage: StorageConfig {
                database_path: PathBuf::from("geoexplorer.db"),
            },
            statistics: StatisticsSettings {
                histogram_bins: DEFAULT_HISTOGRAM_BINS,
                heatmap_grid_size: DEFAULT_HEATMAP_GRID_SIZE,
                default_columns: vec!["x".to_string(), "y".to_string(), "z".to_string()],
            },
        }
    }
}

impl Config {
    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("statistics.default_columns")
    }

    /// Defaults, overlaid by the file at `path`, overlaid by the environment.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path))
            .add_source(Self::environment())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid by the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(Self::environment())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ExplorerResult<()> {
        if self.statistics.histogram_bins == 0 {
            return Err(explorer_error!(InvalidConfig {
                message: "histogram_bins must be at least 1",
                field: Some("statistics.histogram_bins".to_string())
            }));
        }
        if self.statistics.heatmap_grid_size == 0 {
            return Err(explorer_error!(InvalidConfig {
                message: "heatmap_grid_size must be at least 1",
                field: Some("statistics.heatmap_grid_size".to_string())
            }));
        }
        if self.storage.database_path.as_os_str().is_empty() {
            return Err(explorer_error!(InvalidConfig {
                message: "database_path must not be empty",
                field: Some("storage.database_path".to_string())
            }));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.server.host, self.server.port).parse()?)
    }

    pub fn manager_config(&self) -> DataManagerConfig {
        DataManagerConfig {
            statistics: StatisticsConfig {
                histogram_bins: self.statistics.histogram_bins,
                heatmap_grid_size: self.statistics.heatmap_grid_size,
            },
            default_columns: self.statistics.default_columns.clone(),
        }
    }
}
