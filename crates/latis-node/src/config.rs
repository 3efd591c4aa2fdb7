//! Resolved node configuration
//!
//! The daemon receives configuration as an already-resolved record;
//! argument parsing and file loading live in the front-end, not here.

use crate::llm::{EchoProvider, OllamaConfig, OllamaProvider, Provider};
use latis_proto::AgentCard;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Configuration errors; fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was empty or absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field failed to parse
    #[error("invalid value for {field}: {detail}")]
    InvalidValue {
        /// Which field
        field: &'static str,
        /// Parser error text
        detail: String,
    },

    /// The configured LLM provider is not known
    #[error("unknown LLM provider: {0}")]
    UnknownProvider(String),

    /// No home directory to derive the default PKI path from
    #[error("no home directory available")]
    NoHomeDir,
}

/// Which LLM back-end to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Echo the input back (development and tests)
    Echo,
    /// Ollama via its OpenAI-compatible API
    Ollama,
}

impl ProviderKind {
    /// Parse a provider name
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "echo" => Ok(Self::Echo),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Already-resolved daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the listener binds to
    pub addr: SocketAddr,
    /// Node name; becomes the identity URI's final path segment
    pub name: String,
    /// Directory holding CA and node key material
    pub pki_dir: PathBuf,
    /// LLM back-end selection
    pub provider: ProviderKind,
    /// Ollama settings, used when `provider` is `Ollama`
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Whether agent replies stream
    pub streaming: bool,
    /// Human-readable description for the agent card
    pub description: String,
}

impl NodeConfig {
    /// Configuration with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            addr: SocketAddr::from((std::net::Ipv4Addr::LOCALHOST, 4433)),
            name: name.into(),
            pki_dir: Self::default_pki_dir()?,
            provider: ProviderKind::Echo,
            ollama: OllamaConfig::default(),
            streaming: false,
            description: "Latis node".to_string(),
        })
    }

    /// Resolve configuration from `LATIS_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let name = std::env::var("LATIS_NAME").unwrap_or_else(|_| "node".to_string());
        let mut config = Self::new(name)?;

        if let Ok(addr) = std::env::var("LATIS_ADDR") {
            config.addr = addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    field: "LATIS_ADDR",
                    detail: e.to_string(),
                }
            })?;
        }
        if let Ok(dir) = std::env::var("LATIS_PKI_DIR") {
            config.pki_dir = PathBuf::from(dir);
        }
        if let Ok(provider) = std::env::var("LATIS_PROVIDER") {
            config.provider = ProviderKind::parse(&provider)?;
        }
        if let Ok(url) = std::env::var("LATIS_OLLAMA_URL") {
            config.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("LATIS_OLLAMA_MODEL") {
            config.ollama.model = model;
        }
        if let Ok(streaming) = std::env::var("LATIS_STREAMING") {
            config.streaming = streaming == "1" || streaming.eq_ignore_ascii_case("true");
        }
        if let Ok(description) = std::env::var("LATIS_DESCRIPTION") {
            config.description = description;
        }

        config.validate()?;
        Ok(config)
    }

    /// Default PKI directory (`~/.latis/pki`)
    pub fn default_pki_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".latis").join("pki"))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Check the record for required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        Ok(())
    }

    /// Identity URI for this node
    pub fn identity(&self) -> String {
        latis_pki::node_identity(&self.name)
    }

    /// Path of the node certificate
    pub fn cert_path(&self) -> PathBuf {
        self.pki_dir.join(format!("{}.crt", self.name))
    }

    /// Path of the node private key
    pub fn key_path(&self) -> PathBuf {
        self.pki_dir.join(format!("{}.key", self.name))
    }

    /// Instantiate the configured LLM provider
    pub fn create_provider(&self) -> Arc<dyn Provider> {
        match self.provider {
            ProviderKind::Echo => Arc::new(EchoProvider::new()),
            ProviderKind::Ollama => Arc::new(OllamaProvider::new(self.ollama.clone())),
        }
    }

    /// Capability document advertised on the agent surface
    pub fn agent_card(&self) -> AgentCard {
        AgentCard {
            name: self.name.clone(),
            description: self.description.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            streaming: self.streaming,
        }
    }
}
