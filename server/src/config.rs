use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Courier real-time messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "courier-server", version, about = "Courier real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "COURIER_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "COURIER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./courier.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURIER_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the SQLite database
    #[arg(long, env = "COURIER_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// HS256 secret shared with the service that issues access tokens
    #[arg(long, env = "COURIER_JWT_SECRET", default_value = "")]
    pub jwt_secret: String,

    /// Seconds a socket may go without answering a ping before it is closed
    #[arg(long, env = "COURIER_PING_TIMEOUT_SECS", default_value = "120")]
    pub ping_timeout_secs: u64,

    /// Allowed CORS origin; empty allows any origin
    #[arg(long, env = "COURIER_CLIENT_ORIGIN", default_value = "")]
    pub client_origin: String,

    /// Attachment storage configuration (loaded from [storage] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

/// Where uploaded images and files are kept and how they are addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding image blobs
    #[serde(default = "default_images_dir")]
    pub images_dir: String,

    /// Public URL base under which images are served
    #[serde(default = "default_images_public_url")]
    pub images_public_url: String,

    /// Directory holding generic file blobs
    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    /// Public URL base under which files are served
    #[serde(default = "default_files_public_url")]
    pub files_public_url: String,

    /// Staging directory for multipart uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Maximum upload size in megabytes (default: 25)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u32,

    /// Picture URL given to groups created without one
    #[serde(default = "default_group_picture")]
    pub default_group_picture: String,

    /// Picture URL restored when a user removes their profile picture
    #[serde(default = "default_user_picture")]
    pub default_user_picture: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            images_public_url: default_images_public_url(),
            files_dir: default_files_dir(),
            files_public_url: default_files_public_url(),
            upload_dir: default_upload_dir(),
            max_upload_size_mb: default_max_upload_size(),
            default_group_picture: default_group_picture(),
            default_user_picture: default_user_picture(),
        }
    }
}

impl StorageConfig {
    /// Storage rooted under `data_dir`, used by tests and fresh installs.
    pub fn under(data_dir: &str) -> Self {
        Self {
            images_dir: format!("{}/media/images", data_dir),
            files_dir: format!("{}/media/files", data_dir),
            upload_dir: format!("{}/uploads", data_dir),
            ..Self::default()
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb as usize * 1024 * 1024
    }
}

fn default_images_dir() -> String {
    "./data/media/images".to_string()
}

fn default_images_public_url() -> String {
    "/media/images".to_string()
}

fn default_files_dir() -> String {
    "./data/media/files".to_string()
}

fn default_files_public_url() -> String {
    "/media/files".to_string()
}

fn default_upload_dir() -> String {
    "./data/uploads".to_string()
}

fn default_max_upload_size() -> u32 {
    25
}

fn default_group_picture() -> String {
    "/media/images/default-group.png".to_string()
}

fn default_user_picture() -> String {
    "/media/images/default-user.png".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./courier.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: String::new(),
            ping_timeout_secs: 120,
            client_origin: String::new(),
            storage: None,
        }
    }
}

impl Config {
    /// The `[storage]` section, or its defaults when absent.
    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();
        Self::figment(&config_path, cli).extract()
    }

    fn figment(config_path: &str, cli: Config) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("COURIER_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Server Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# HS256 secret shared with the token issuer (required)
# jwt_secret = ""

# Seconds without a pong before a socket is closed (default: 120)
# ping_timeout_secs = 120

# Allowed CORS origin for the web client; empty allows any origin
# client_origin = "http://localhost:3000"

# ---- Attachment Storage ----
# [storage]
# images_dir = "./data/media/images"
# images_public_url = "/media/images"
# files_dir = "./data/media/files"
# files_public_url = "/media/files"
# upload_dir = "./data/uploads"
# max_upload_size_mb = 25
# default_group_picture = "/media/images/default-group.png"
# default_user_picture = "/media/images/default-user.png"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ping_timeout_secs, 120);
        assert_eq!(config.storage().max_upload_bytes(), 25 * 1024 * 1024);
        assert_eq!(config.storage().images_public_url, "/media/images");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "ping_timeout_secs = 30\n[storage]\nmax_upload_size_mb = 2\nfiles_public_url = \"/blobs\""
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .extract()
            .unwrap();

        let storage = config.storage();
        assert_eq!(config.ping_timeout_secs, 30);
        assert_eq!(storage.max_upload_size_mb, 2);
        assert_eq!(storage.files_public_url, "/blobs");
        // Untouched keys in the section keep their defaults.
        assert_eq!(storage.images_public_url, "/media/images");
    }

    #[test]
    fn test_storage_under_data_dir() {
        let storage = StorageConfig::under("/tmp/x");
        assert_eq!(storage.images_dir, "/tmp/x/media/images");
        assert_eq!(storage.upload_dir, "/tmp/x/uploads");
    }

    #[test]
    fn test_template_mentions_every_section() {
        let template = generate_config_template();
        assert!(template.contains("[storage]"));
        assert!(template.contains("ping_timeout_secs"));
        assert!(template.contains("jwt_secret"));
    }
}
