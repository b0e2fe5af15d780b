//! Configuration loading from TOML files
//!
//! Config file is selected via `--config <path>` (default: config/dev.toml).
//! Every section is optional; missing values fall back to defaults.

use crate::domain::error::GeofenceResult;
use crate::domain::geofence::GeofenceConfig;
use crate::domain::polygon::Polygon;
use crate::domain::types::LatLng;
use crate::services::dispatcher::DispatchPolicy;
use crate::services::state_machine::TransitionPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Identifier stamped on egress payloads
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "geofence".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Consecutive agreeing fixes before ENTER / EXIT commits
    #[serde(default = "default_debounce_fixes")]
    pub debounce_fixes: u32,
    /// Minimum time between opposite ENTER / EXIT transitions
    #[serde(default)]
    pub status_change_delay_ms: u64,
    #[serde(default = "default_dwell_ms")]
    pub default_dwell_ms: u64,
    #[serde(default)]
    pub default_responsiveness_m: f64,
    /// Fixes less accurate than this are skipped (0 disables)
    #[serde(default)]
    pub max_accuracy_m: f64,
    #[serde(default)]
    pub allow_mock_locations: bool,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_sink_retry_attempts")]
    pub sink_retry_attempts: u32,
    #[serde(default = "default_fix_queue_capacity")]
    pub fix_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_fixes: default_debounce_fixes(),
            status_change_delay_ms: 0,
            default_dwell_ms: default_dwell_ms(),
            default_responsiveness_m: 0.0,
            max_accuracy_m: 0.0,
            allow_mock_locations: false,
            dedup_window_ms: default_dedup_window_ms(),
            sink_retry_attempts: default_sink_retry_attempts(),
            fix_queue_capacity: default_fix_queue_capacity(),
        }
    }
}

fn default_debounce_fixes() -> u32 {
    1
}

fn default_dwell_ms() -> u64 {
    60_000
}

fn default_dedup_window_ms() -> u64 {
    300_000
}

fn default_sink_retry_attempts() -> u32 {
    2
}

fn default_fix_queue_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// File path for event egress (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { enabled: default_egress_enabled(), file: default_egress_file() }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_egress_file() -> String {
    "geofence_events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

/// One `[[geofences]]` entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeofenceSpec {
    pub id: String,
    /// `[[lat, lng], ...]`, implicitly closed
    pub vertices: Vec<[f64; 2]>,
    #[serde(default)]
    pub responsiveness_m: Option<f64>,
    #[serde(default)]
    pub dwell_ms: Option<u64>,
    #[serde(default = "default_geofence_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

fn default_geofence_enabled() -> bool {
    true
}

impl GeofenceSpec {
    /// Build a validated config, filling unset values from the engine defaults
    pub fn to_config(&self, engine: &EngineConfig) -> GeofenceResult<GeofenceConfig> {
        let vertices = self.vertices.iter().map(|&[lat, lng]| LatLng::new(lat, lng)).collect();
        let polygon = Polygon::new(vertices)?;

        let mut config = GeofenceConfig::new(self.id.as_str(), polygon)
            .with_responsiveness_m(self.responsiveness_m.unwrap_or(engine.default_responsiveness_m))
            .with_dwell(Duration::from_millis(self.dwell_ms.unwrap_or(engine.default_dwell_ms)))
            .with_enabled(self.enabled);
        if let Some(ref data) = self.data {
            config = config.with_data(data.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub geofences: Vec<GeofenceSpec>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    engine: EngineConfig,
    egress_enabled: bool,
    egress_file: String,
    metrics_interval_secs: u64,
    geofences: Vec<GeofenceSpec>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            engine: toml_config.engine,
            egress_enabled: toml_config.egress.enabled,
            egress_file: toml_config.egress.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            geofences: toml_config.geofences,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path,
                    error = %format!("{:#}", e),
                    "config_load_failed_using_defaults"
                );
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        TransitionPolicy {
            debounce_fixes: self.engine.debounce_fixes.max(1),
            status_change_delay_ms: self.engine.status_change_delay_ms,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            retry_attempts: self.engine.sink_retry_attempts,
            dedup_window_ms: self.engine.dedup_window_ms,
        }
    }

    pub fn max_accuracy_m(&self) -> f64 {
        self.engine.max_accuracy_m
    }

    pub fn allow_mock_locations(&self) -> bool {
        self.engine.allow_mock_locations
    }

    pub fn fix_queue_capacity(&self) -> usize {
        self.engine.fix_queue_capacity.max(1)
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn geofences(&self) -> &[GeofenceSpec] {
        &self.geofences
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to replace engine settings
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Builder method for tests to set geofences
    pub fn with_geofences(mut self, geofences: Vec<GeofenceSpec>) -> Self {
        self.geofences = geofences;
        self
    }
}
