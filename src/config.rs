//! Configuration for m4bforge
//!
//! Data root resolution follows env → TOML config file → OS-dependent default.
//! All working directories (source, processing, ready, backup, library,
//! covers) live under the resolved data root.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub port: Option<u16>,
    pub encoder_program: Option<String>,
    pub backup_enabled: Option<bool>,
    pub use_all_cpus: Option<bool>,
    pub per_file_seconds: Option<f64>,
    pub input_extensions: Option<Vec<String>>,
}

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Data root containing all working directories and the database
    pub data_root: PathBuf,
    /// HTTP listen port
    pub port: u16,
    /// External encoder executable (ffmpeg-compatible argv)
    pub encoder_program: String,
    /// Snapshot source folders before transcoding
    pub backup_enabled: bool,
    /// Derive encoder thread count from available parallelism (false = 1 thread)
    pub use_all_cpus: bool,
    /// Per-file wall-clock estimate feeding the progress model
    pub per_file_seconds: f64,
    /// Eligible input file extensions, lowercase, without dot
    pub input_extensions: Vec<String>,
    /// Target audio bitrate
    pub audio_bitrate: String,
    /// Target channel count
    pub audio_channels: u8,
    /// Target sample rate
    pub sample_rate: u32,
}

impl Config {
    /// Build a configuration rooted at an explicit directory, all tunables at
    /// their defaults. Tests build their fixtures through this.
    pub fn with_root(data_root: PathBuf) -> Self {
        Self {
            data_root,
            port: 5740,
            encoder_program: "ffmpeg".to_string(),
            backup_enabled: true,
            use_all_cpus: true,
            per_file_seconds: 12.0,
            input_extensions: vec!["mp3".to_string()],
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
            sample_rate: 44100,
        }
    }

    /// Resolve configuration: environment variables override the TOML file,
    /// which overrides compiled defaults.
    pub fn load() -> Result<Self> {
        let toml_config = load_toml_config().unwrap_or_default();

        let data_root = if let Ok(path) = std::env::var("M4BFORGE_ROOT") {
            PathBuf::from(path)
        } else if let Some(path) = &toml_config.root_folder {
            PathBuf::from(path)
        } else {
            default_data_root()
        };

        let mut config = Self::with_root(data_root);

        if let Some(port) = toml_config.port {
            config.port = port;
        }
        if let Some(program) = toml_config.encoder_program {
            config.encoder_program = program;
        }
        if let Some(enabled) = toml_config.backup_enabled {
            config.backup_enabled = enabled;
        }
        if let Some(all_cpus) = toml_config.use_all_cpus {
            config.use_all_cpus = all_cpus;
        }
        if let Some(seconds) = toml_config.per_file_seconds {
            config.per_file_seconds = seconds;
        }
        if let Some(extensions) = toml_config.input_extensions {
            config.input_extensions = extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect();
        }

        if let Ok(port) = std::env::var("M4BFORGE_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid M4BFORGE_PORT: {}", port)))?;
        }
        if let Ok(program) = std::env::var("M4BFORGE_ENCODER") {
            config.encoder_program = program;
        }
        if let Ok(enabled) = std::env::var("M4BFORGE_BACKUP_ENABLED") {
            config.backup_enabled = enabled.to_lowercase() == "true";
        }
        if let Ok(all_cpus) = std::env::var("M4BFORGE_USE_ALL_CPUS") {
            config.use_all_cpus = all_cpus.to_lowercase() == "true";
        }

        Ok(config)
    }

    /// Folders offered for conversion live here
    pub fn source_dir(&self) -> PathBuf {
        self.data_root.join("source")
    }

    /// In-flight encoder output; nothing here is user-visible
    pub fn processing_dir(&self) -> PathBuf {
        self.data_root.join("processing")
    }

    /// Completed but untagged artifacts
    pub fn ready_dir(&self) -> PathBuf {
        self.data_root.join("ready")
    }

    /// Timestamped snapshots of source folders
    pub fn backup_dir(&self) -> PathBuf {
        self.data_root.join("backup")
    }

    /// Canonical Author/Series/Book library tree
    pub fn library_dir(&self) -> PathBuf {
        self.data_root.join("library")
    }

    /// Downloaded cover images keyed by catalog identifier
    pub fn covers_dir(&self) -> PathBuf {
        self.data_root.join("covers")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_root.join("m4bforge.db")
    }

    /// Create all working directories (idempotent)
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [
            self.source_dir(),
            self.processing_dir(),
            self.ready_dir(),
            self.backup_dir(),
            self.library_dir(),
            self.covers_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Encoder worker-thread hint
    pub fn encoder_threads(&self) -> usize {
        if self.use_all_cpus {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            1
        }
    }

    /// Check whether a file extension makes a file eligible for conversion
    pub fn is_eligible_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                self.input_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }
}

/// Load the optional TOML config file from the platform config directory
fn load_toml_config() -> Option<TomlConfig> {
    let path = dirs::config_dir()?.join("m4bforge").join("config.toml");
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Ignoring malformed config file {}: {}", path.display(), e);
            None
        }
    }
}

/// OS-dependent default data root
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("m4bforge"))
        .unwrap_or_else(|| PathBuf::from("./m4bforge_data"))
}
