use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection parameters for the credential store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "webserver".to_string(),
            pool_size: 6,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,

    // Event loop
    pub max_events: usize,
    pub poll_timeout: Duration,
    pub initial_buffer_size: usize,

    // Worker pool
    pub min_threads: usize,
    pub max_threads: usize,
    pub resize_interval: Duration,

    // Collaborators
    pub resource_dir: PathBuf,
    pub credentials: CredentialConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let min_threads = 4;
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 1316,
            backlog: 128,
            max_connections: 20_000,

            max_events: 1024,
            poll_timeout: Duration::from_millis(100),
            initial_buffer_size: 1024,

            min_threads,
            max_threads: num_cpus::get().max(min_threads),
            resize_interval: Duration::from_secs(5),

            resource_dir: PathBuf::from("./resources"),
            credentials: CredentialConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the worker pool bounds
    pub fn with_threads(mut self, min_threads: usize, max_threads: usize) -> Self {
        self.min_threads = min_threads;
        self.max_threads = max_threads;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the directory static resources are served from
    pub fn with_resource_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.resource_dir = dir.into();
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialConfig) -> Self {
        self.credentials = credentials;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> ServerResult<()> {
        if self.min_threads == 0 {
            return Err(ServerError::Config("min_threads must be at least 1".to_string()));
        }
        if self.max_threads < self.min_threads {
            return Err(ServerError::Config(format!(
                "max_threads ({}) is below min_threads ({})",
                self.max_threads, self.min_threads
            )));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".to_string()));
        }
        if self.max_events == 0 {
            return Err(ServerError::Config("max_events must be at least 1".to_string()));
        }
        if self.credentials.pool_size == 0 {
            return Err(ServerError::Config("credential pool_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
