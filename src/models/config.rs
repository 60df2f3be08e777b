use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Default restart schedule (hours of the day).
pub const DEFAULT_RESTART_TIMES: [u8; 4] = [0, 6, 12, 18];

/// Name of the instance that uses the legacy service and server names.
pub const DEFAULT_INSTANCE: &str = "default";

/// Per-instance configuration from `instances/<name>.yaml`
///
/// Owned and edited by the operator (or by the interactive tooling). The
/// scheduler re-reads it on every loop iteration and treats each read as an
/// immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_install_dir")]
    pub install_dir: Utf8PathBuf,

    #[serde(default = "default_steamcmd_dir")]
    pub steamcmd_dir: Utf8PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: Utf8PathBuf,

    /// systemd unit controlled on restart. Empty means "derive from instance name".
    #[serde(default)]
    pub service_name: String,

    /// Server name used for the ini file and the save directory. Empty means
    /// "derive from instance name".
    #[serde(default)]
    pub server_name: String,

    #[serde(default = "default_restart_times")]
    pub restart_times: Vec<u8>,

    #[serde(default = "default_rcon_host")]
    pub rcon_host: String,

    #[serde(default = "default_rcon_port")]
    pub rcon_port: u16,

    #[serde(default)]
    pub rcon_password: String,

    #[serde(default = "default_true")]
    pub auto_backup: bool,

    #[serde(default = "default_backup_retention")]
    pub backup_retention: u32,

    /// Shell command run by the backup collaborator before the server restarts.
    #[serde(default)]
    pub backup_command: Option<String>,

    #[serde(default)]
    pub enable_mod_update_check: bool,

    /// Prefix `systemctl` invocations with `sudo`.
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

impl InstanceConfig {
    /// Build the default configuration for an instance.
    ///
    /// The `default` instance keeps the historical `pzserver` / `servertest`
    /// names; every other instance derives its names from the instance name.
    pub fn for_instance(instance: &str) -> Self {
        let mut config = Self::default();
        config.fill_instance_defaults(instance);
        config
    }

    /// Populate the service and server names if they were left empty.
    pub fn fill_instance_defaults(&mut self, instance: &str) {
        if self.service_name.trim().is_empty() {
            self.service_name = if instance == DEFAULT_INSTANCE {
                "pzserver".to_string()
            } else {
                format!("pzserver-{}", instance)
            };
        }
        if self.server_name.trim().is_empty() {
            self.server_name = if instance == DEFAULT_INSTANCE {
                "servertest".to_string()
            } else {
                instance.to_string()
            };
        }
    }

    /// Path of the dedicated server ini (`Zomboid/Server/<server>.ini`)
    pub fn server_ini_path(&self) -> Utf8PathBuf {
        self.install_dir
            .join("Zomboid")
            .join("Server")
            .join(format!("{}.ini", self.server_name))
    }

    /// Active multiplayer save directory
    pub fn save_dir(&self) -> Utf8PathBuf {
        self.install_dir
            .join("Zomboid")
            .join("Saves")
            .join("Multiplayer")
            .join(&self.server_name)
    }

    /// Root of the downloaded workshop content for the game
    pub fn workshop_content_dir(&self) -> Utf8PathBuf {
        self.install_dir
            .join("steamapps")
            .join("workshop")
            .join("content")
            .join(crate::models::STEAM_APP_ID)
    }

    /// Steam's workshop manifest recording installed item timestamps
    pub fn workshop_manifest_path(&self) -> Utf8PathBuf {
        self.install_dir
            .join("steamapps")
            .join("workshop")
            .join(format!("appworkshop_{}.acf", crate::models::STEAM_APP_ID))
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            steamcmd_dir: default_steamcmd_dir(),
            backup_dir: default_backup_dir(),
            service_name: String::new(),
            server_name: String::new(),
            restart_times: default_restart_times(),
            rcon_host: default_rcon_host(),
            rcon_port: default_rcon_port(),
            rcon_password: String::new(),
            auto_backup: true,
            backup_retention: default_backup_retention(),
            backup_command: None,
            enable_mod_update_check: false,
            use_sudo: true,
        }
    }
}

fn default_install_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/opt/pzserver")
}

fn default_steamcmd_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/opt/steamcmd")
}

fn default_backup_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("/opt/pzserver-backups")
}

fn default_restart_times() -> Vec<u8> {
    DEFAULT_RESTART_TIMES.to_vec()
}

fn default_rcon_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rcon_port() -> u16 {
    27015
}

fn default_backup_retention() -> u32 {
    5
}

fn default_true() -> bool {
    true
}
