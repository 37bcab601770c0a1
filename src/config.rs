use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::channel::{HistoryScope, MESSAGES_PER_PAGE};
use crate::session::SessionSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TLS needs both a certificate and a private key")]
    MissingTlsPair,
    #[error("Failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Page size must be at least 1")]
    InvalidPageSize,
}

/// Server settings, from flags or `RANDOMLY_*` environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "randomly", version, about = "Anonymous one-to-one chat pairing server")]
pub struct Config {
    #[arg(long, env = "RANDOMLY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    #[arg(long, env = "RANDOMLY_PORT", default_value_t = 2052)]
    pub port: u16,

    /// Directory served as static files next to `/ws`.
    #[arg(long, env = "RANDOMLY_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    #[arg(long, env = "RANDOMLY_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "RANDOMLY_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Pause between partner searches that found nobody.
    #[arg(long, env = "RANDOMLY_SEARCH_BACKOFF_MS", default_value_t = 3000)]
    pub search_backoff_ms: u64,

    #[arg(long, env = "RANDOMLY_PAGE_SIZE", default_value_t = MESSAGES_PER_PAGE)]
    pub page_size: usize,

    #[arg(
        long,
        env = "RANDOMLY_HISTORY_SCOPE",
        value_enum,
        default_value_t = HistoryScope::Bidirectional
    )]
    pub history_scope: HistoryScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidPageSize);
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            search_backoff: Duration::from_millis(self.search_backoff_ms),
            page_size: self.page_size,
            history_scope: self.history_scope,
        }
    }

    /// `Ok(None)` means plain HTTP. Both files must be readable for TLS.
    pub fn tls(&self) -> Result<Option<TlsPaths>, ConfigError> {
        match (&self.tls_cert, &self.tls_key) {
            (None, None) => Ok(None),
            (Some(cert), Some(key)) => {
                for path in [cert, key] {
                    File::open(path).map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                }
                Ok(Some(TlsPaths {
                    cert: cert.clone(),
                    key: key.clone(),
                }))
            }
            _ => Err(ConfigError::MissingTlsPair),
        }
    }
}
