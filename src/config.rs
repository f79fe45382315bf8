use std::path::{Path, PathBuf};

use serde::Deserialize;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub monitor: MonitorConfig,
    pub limits: LimitsConfig,
    pub analysis: AnalysisConfig,
    pub storage: StorageConfig,
    pub dump: DumpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Version label used to key per-version analysis counters and file names.
    pub app_version: String,
    /// Debug builds bypass the per-version rate limits.
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub loop_interval_ms: u64,
    pub initial_delay_ms: u64,
    /// Heap used/max ratio; derived from the max heap size when unset.
    pub heap_threshold: Option<f32>,
    pub fd_threshold: u32,
    pub thread_threshold: u32,
    pub device_memory_threshold: f32,
    pub max_over_threshold_count: u32,
    pub force_dump_java_heap_max_threshold: f32,
    pub force_dump_java_heap_delta_threshold_kb: u64,
    pub heap_growth_rate_threshold_kb_per_sec: u64,
    pub enable_hprof_dump_analysis: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            loop_interval_ms: 15_000,
            initial_delay_ms: 0,
            heap_threshold: None,
            fd_threshold: 1000,
            thread_threshold: 750,
            device_memory_threshold: 0.05,
            max_over_threshold_count: 3,
            force_dump_java_heap_max_threshold: 0.90,
            force_dump_java_heap_delta_threshold_kb: 350_000,
            heap_growth_rate_threshold_kb_per_sec: 350_000 / 15,
            enable_hprof_dump_analysis: true,
        }
    }
}

impl MonitorConfig {
    pub fn heap_threshold_for(&self, heap_max_bytes: u64) -> f32 {
        self.heap_threshold
            .unwrap_or_else(|| default_heap_threshold(heap_max_bytes))
    }
}

/// Smaller heaps get a higher ratio threshold before they count as under pressure.
pub fn default_heap_threshold(heap_max_bytes: u64) -> f32 {
    let max_mb = heap_max_bytes / MIB;
    if max_mb >= 512 - 10 {
        0.8
    } else if max_mb >= 256 - 10 {
        0.85
    } else {
        0.9
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub analysis_max_times_per_version: u32,
    pub analysis_period_days: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            analysis_max_times_per_version: 5,
            analysis_period_days: 15,
        }
    }
}

impl LimitsConfig {
    pub fn analysis_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.analysis_period_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub big_bitmap_pixels: u64,
    pub big_primitive_array_bytes: u64,
    pub big_object_array_bytes: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            big_bitmap_pixels: 768 * 1366 + 1,
            big_primitive_array_bytes: 256 * 1024,
            big_object_array_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root_dir: Option<PathBuf>,
    pub min_free_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            root_dir: None,
            min_free_bytes: 1_258_291,
        }
    }
}

impl StorageConfig {
    pub fn root(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("oomwatch")
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// External dump command; `{pid}` and `{path}` are substituted per argument.
    pub command: Vec<String>,
    /// Managed heap ceiling used when the heap is read from the process RSS.
    pub heap_limit_bytes: Option<u64>,
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("oomwatch").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "invalid config, using defaults");
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}
