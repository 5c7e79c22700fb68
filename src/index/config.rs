use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Static configuration loaded once at index construction. These values shape
/// grid geometry and cache behavior for every region; changing them after
/// construction would desynchronize readers that already hold buffer views,
/// so there is no hot reload.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct IndexConfig {
    // Grid geometry
    /// Edge length of one grid cell in world units. Chosen so a typical agent
    /// query radius spans roughly 3x3 cells.
    pub cell_size: f32,
    /// World-space width of a region. Regions are centered at the origin.
    pub map_width: f32,
    /// World-space height of a region.
    pub map_height: f32,

    // Query limits
    /// Radii above this are clamped before cell walking.
    pub max_query_radius: f32,

    // Cache TTLs (seconds)
    pub terrain_ttl_secs: f32,
    pub visibility_ttl_secs: f32,
    pub path_ttl_secs: f32,

    // Cache capacities
    pub visibility_cache_capacity: usize,
    pub path_cache_capacity: usize,

    // Cache key quantization (world units per coarse cell)
    pub visibility_precision: f32,
    pub path_precision: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cell_size: 25.0,
            map_width: 4096.0,
            map_height: 4096.0,
            max_query_radius: 250.0,
            terrain_ttl_secs: 300.0,
            visibility_ttl_secs: 3.0,
            path_ttl_secs: 10.0,
            visibility_cache_capacity: 4096,
            path_cache_capacity: 512,
            visibility_precision: 2.5,
            path_precision: 4.0,
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid index configuration: {0}")]
    Invalid(&'static str),
}

impl IndexConfig {
    /// Load configuration from a RON file, falling back to defaults if the
    /// file is missing or malformed. The fallback is deliberate: a worker
    /// host with a broken config file should come up degraded, not crash.
    pub fn load_from_path(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match ron::from_str::<IndexConfig>(&contents) {
                Ok(config) => {
                    info!("Loaded index config from {}", path);
                    config
                }
                Err(e) => {
                    error!("Failed to parse index config: {}", e);
                    error!("Using default IndexConfig");
                    IndexConfig::default()
                }
            },
            Err(e) => {
                error!("Failed to read {}: {}", path, e);
                error!("Using default IndexConfig");
                IndexConfig::default()
            }
        }
    }

    /// Check value ranges before the index is built around them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size > 0.0) {
            return Err(ConfigError::Invalid("cell_size must be positive"));
        }
        if !(self.map_width > 0.0) || !(self.map_height > 0.0) {
            return Err(ConfigError::Invalid("map dimensions must be positive"));
        }
        if self.max_query_radius < self.cell_size {
            return Err(ConfigError::Invalid(
                "max_query_radius must be at least one cell",
            ));
        }
        if !(self.terrain_ttl_secs > 0.0)
            || !(self.visibility_ttl_secs > 0.0)
            || !(self.path_ttl_secs > 0.0)
        {
            return Err(ConfigError::Invalid("cache TTLs must be positive"));
        }
        if self.visibility_cache_capacity == 0 || self.path_cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache capacities must be nonzero"));
        }
        if !(self.visibility_precision > 0.0) || !(self.path_precision > 0.0) {
            return Err(ConfigError::Invalid("key precisions must be positive"));
        }
        Ok(())
    }
}
