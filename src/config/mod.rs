use crate::models::InstanceConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// Prefix for environment variables overriding instance settings
/// (e.g. `PZKEEPER_RCON_PASSWORD`, `PZKEEPER_RESTART_TIMES=0,12`).
pub const ENV_PREFIX: &str = "PZKEEPER";

/// File name of the persisted Steam Workshop metadata cache.
pub const WORKSHOP_CACHE_FILE: &str = "workshop_cache.json";

/// Configuration manager for per-instance YAML configuration files.
///
/// Layout under the configuration directory:
/// - `instances/<name>.yaml`: one file per managed server instance
/// - `workshop_cache.json`: Workshop metadata cache shared by all instances
/// - `logs/`: diagnostic logs and per-instance scheduler event logs
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    instances_dir: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing configuration files (e.g., "~/.config/pzkeeper")
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let instances_dir = config_dir.join("instances");

        if !instances_dir.exists() {
            fs::create_dir_all(&instances_dir).with_context(|| {
                format!("Failed to create instances directory: {}", instances_dir)
            })?;
        }

        Ok(Self {
            config_dir,
            instances_dir,
        })
    }

    /// Default configuration directory: `$XDG_CONFIG_HOME/pzkeeper` or `~/.config/pzkeeper`.
    pub fn default_config_dir() -> Utf8PathBuf {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return Utf8PathBuf::from(xdg).join("pzkeeper");
            }
        }
        match std::env::var("HOME") {
            Ok(home) => Utf8PathBuf::from(home).join(".config").join("pzkeeper"),
            Err(_) => Utf8PathBuf::from(".pzkeeper"),
        }
    }

    /// Load the configuration of an instance.
    ///
    /// Values come from `instances/<name>.yaml`, overridden by `PZKEEPER_*`
    /// environment variables. Fields absent from both take their defaults.
    ///
    /// # Returns
    /// The loaded InstanceConfig, or defaults for the instance if no file exists
    pub fn load_instance_config(&self, instance: &str) -> Result<InstanceConfig> {
        let path = self.instance_path(instance);

        if !path.exists() {
            tracing::debug!(
                "Instance config not found at {}, using defaults for '{}'",
                path,
                instance
            );
        }

        let settings = Config::builder()
            .add_source(File::new(path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("restart_times"),
            )
            .build()
            .with_context(|| format!("Failed to read instance config: {}", path))?;

        let mut config: InstanceConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse instance config: {}", path))?;
        config.fill_instance_defaults(instance);

        tracing::debug!("Loaded instance config '{}' from {}", instance, path);
        Ok(config)
    }

    /// Save the configuration of an instance.
    ///
    /// # Arguments
    /// * `instance` - Instance name
    /// * `config` - The InstanceConfig to save
    pub fn save_instance_config(&self, instance: &str, config: &InstanceConfig) -> Result<()> {
        let path = self.instance_path(instance);
        let yaml_string = serde_yaml_ng::to_string(config)
            .context("Failed to serialize instance config to YAML")?;

        fs::write(&path, yaml_string)
            .with_context(|| format!("Failed to write instance config: {}", path))?;

        tracing::info!("Saved instance config '{}' to {}", instance, path);
        Ok(())
    }

    /// Names of all instances with a configuration file, sorted.
    pub fn list_instances(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.instances_dir).with_context(|| {
            format!("Failed to list instances directory: {}", self.instances_dir)
        })?;

        let mut instances: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_suffix(".yaml").map(str::to_string)
            })
            .collect();
        instances.sort();
        Ok(instances)
    }

    /// Check whether an instance has a configuration file.
    pub fn instance_exists(&self, instance: &str) -> bool {
        self.instance_path(instance).exists()
    }

    /// Path of an instance's configuration file.
    pub fn instance_path(&self, instance: &str) -> Utf8PathBuf {
        self.instances_dir.join(format!("{}.yaml", instance))
    }

    /// Path of the shared Workshop metadata cache.
    pub fn workshop_cache_path(&self) -> Utf8PathBuf {
        self.config_dir.join(WORKSHOP_CACHE_FILE)
    }

    /// Directory for diagnostic and scheduler event logs.
    pub fn log_dir(&self) -> Utf8PathBuf {
        self.config_dir.join("logs")
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
