//! Configuration manager for the gateway.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Address the LDAP listener binds to.
    pub listen: SocketAddr,
    /// Address of the Prometheus exporter.
    pub metrics: SocketAddr,
    /// Related to the identity API.
    pub api: Api,
    /// Default `tracing` filter, `RUST_LOG` takes precedence.
    pub log_level: String,
    /// gRPC endpoint receiving traces and logs.
    pub otlp_endpoint: Option<String>,
    /// Seconds between two provider refreshes.
    pub refresh_interval: u64,
    /// Seconds between two flow warm-ups.
    pub flow_warmup_interval: u64,
    /// Seconds a closed connection's flags are kept.
    pub flag_eviction_delay: u64,
    #[serde(skip_serializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3389)),
            metrics: SocketAddr::from(([0, 0, 0, 0], 9300)),
            api: Api::default(),
            log_level: "info".into(),
            otlp_endpoint: None,
            refresh_interval: 300,
            flow_warmup_interval: 3600,
            flag_eviction_delay: 30,
            version: VERSION.to_owned(),
            path: PathBuf::new(),
        }
    }
}

/// Identity API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Api {
    /// Base URL, e.g. `https://id.example.io`.
    pub url: String,
    /// Bearer token of the gateway.
    #[serde(skip_serializing)]
    pub token: String,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000".into(),
            token: String::new(),
            insecure: false,
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval.max(1))
    }

    pub fn flow_warmup_interval(&self) -> Duration {
        Duration::from_secs(self.flow_warmup_interval.max(1))
    }

    pub fn flag_eviction_delay(&self) -> Duration {
        Duration::from_secs(self.flag_eviction_delay)
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies `API_TOKEN` from the environment.
    pub fn read(self) -> Result<Self, url::ParseError> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH).to_path_buf();
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &default_path
        };

        let mut config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path.clone();

        if let Ok(token) = std::env::var("API_TOKEN") {
            config.api.token = token;
        }
        config.api.url = self.normalize_url(&config.api.url)?;

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }
}
