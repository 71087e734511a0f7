//! Configuration for sword-server
//!
//! One immutable value, loaded from TOML and shared via `Arc` with the
//! engine, store, URI manager and authenticator.

use crate::namespaces::packaging;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sword-server")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Public base URL all resource URIs are minted under
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Storage directory for collections and containers
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Collections provisioned on first start
    #[serde(default = "default_num_collections")]
    pub num_collections: usize,

    #[serde(default = "default_sword_version")]
    pub sword_version: String,

    /// Require HTTP Basic credentials
    #[serde(default = "default_true")]
    pub authenticate: bool,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Allow deposits on behalf of another user
    #[serde(default = "default_true")]
    pub mediation: bool,

    /// The only on-behalf-of identity this server recognises
    #[serde(default = "default_obo")]
    pub obo: String,

    #[serde(default = "default_accept")]
    pub app_accept: Vec<String>,

    #[serde(default = "default_accept")]
    pub multipart_accept: Vec<String>,

    /// Advertise collections that accept no media at all
    #[serde(default)]
    pub accept_nothing: bool,

    /// Advertise a sub-service document from the root service document
    #[serde(default = "default_true")]
    pub use_sub: bool,

    #[serde(default = "default_accept_packaging")]
    pub accept_packaging: Vec<String>,

    /// Maximum accepted request body, in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Packaging formats the media resource can be disseminated in
    #[serde(default = "default_disseminate_packaging")]
    pub disseminate_packaging: Vec<String>,

    /// Packaging URI that is always rejected with ErrorContent
    #[serde(default = "default_error_content_package")]
    pub error_content_package: String,

    #[serde(default = "default_true")]
    pub allow_update: bool,

    #[serde(default = "default_true")]
    pub allow_delete: bool,

    /// Send the deposit receipt in response bodies
    #[serde(default = "default_true")]
    pub return_deposit_receipt: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_num_collections() -> usize {
    10
}

fn default_sword_version() -> String {
    "2.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_user() -> String {
    "sword".to_string()
}

fn default_password() -> String {
    "sword".to_string()
}

fn default_obo() -> String {
    "obo".to_string()
}

fn default_accept() -> Vec<String> {
    vec!["*/*".to_string()]
}

fn default_accept_packaging() -> Vec<String> {
    vec![
        packaging::SIMPLE_ZIP.to_string(),
        packaging::BINARY.to_string(),
        packaging::METS_DSPACE_SIP.to_string(),
    ]
}

fn default_max_upload_size() -> u64 {
    16_777_216
}

fn default_disseminate_packaging() -> Vec<String> {
    vec![packaging::SIMPLE_ZIP.to_string()]
}

fn default_error_content_package() -> String {
    packaging::ERROR.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            num_collections: default_num_collections(),
            sword_version: default_sword_version(),
            authenticate: true,
            user: default_user(),
            password: default_password(),
            mediation: true,
            obo: default_obo(),
            app_accept: default_accept(),
            multipart_accept: default_accept(),
            accept_nothing: false,
            use_sub: true,
            accept_packaging: default_accept_packaging(),
            max_upload_size: default_max_upload_size(),
            disseminate_packaging: default_disseminate_packaging(),
            error_content_package: default_error_content_package(),
            allow_update: true,
            allow_delete: true,
            return_deposit_receipt: true,
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Directory holding one subdirectory per collection
    pub fn store_dir(&self) -> PathBuf {
        self.storage_dir.join("store")
    }

    /// Config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
