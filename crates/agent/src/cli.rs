use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use proxops_common::error::Error;
use tracing::warn;

use crate::server::tls::TlsPaths;

#[derive(Debug, Parser)]
pub struct Cli {
    /// Address the daemon's HTTP API listens on
    #[clap(short = 'a', long, env = "ENDPOINT", default_value = "0.0.0.0:8443")]
    pub endpoint: String,

    /// Pre-shared access key (32 bytes). Empty disables request
    /// authentication.
    #[clap(short = 'k', long, env = "ACCESS_KEY", default_value = "")]
    pub access_key: String,

    /// Directory holding the xray executable and its configs
    #[clap(short = 'x', long, env = "XRAY_DIR")]
    pub xray_dir: PathBuf,
}

impl Cli {
    pub fn xray_exec(&self) -> PathBuf {
        self.xray_dir.join("xray")
    }

    pub fn server_config_path(&self) -> PathBuf {
        self.xray_dir.join("xray_server.json")
    }

    pub fn client_config_path(&self) -> PathBuf {
        self.xray_dir.join("xray_client.json")
    }

    /// The user-populated config the supervisor runs xray with. The input
    /// server config is never modified.
    pub fn run_config_path(&self) -> PathBuf {
        self.xray_dir.join("xray_run.json")
    }

    /// Mutual-TLS material is all-or-nothing: either the full
    /// `(node.crt, node.key, ca.crt)` trio is present or none of it.
    pub fn tls_paths(&self) -> Result<Option<TlsPaths>, Error> {
        let cert = self.xray_dir.join("node.crt");
        let key = self.xray_dir.join("node.key");
        let ca = self.xray_dir.join("ca.crt");

        let present = [&cert, &key, &ca].iter().filter(|p| p.exists()).count();
        match present {
            0 => Ok(None),
            3 => Ok(Some(TlsPaths { cert, key, ca })),
            _ => Err(Error::Config(
                "incomplete TLS material: node.crt, node.key and ca.crt must all be present".into(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for path in [
            self.xray_exec(),
            self.server_config_path(),
            self.client_config_path(),
        ] {
            if !path.exists() {
                return Err(Error::Config(format!("{} not found", path.display())));
            }
        }
        self.endpoint
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        if self.access_key.is_empty() {
            warn!("ACCESS_KEY is empty, request authentication is DISABLED; test mode only");
        } else if self.access_key.len() != 32 {
            return Err(Error::Config(format!(
                "access key must be exactly 32 bytes, got {}",
                self.access_key.len()
            )));
        }
        self.tls_paths()?;
        Ok(())
    }
}
