use std::path::PathBuf;

use clap::Parser;
use proxops_common::error::Error;

#[derive(Debug, Parser)]
pub struct Cli {
    /// Node daemon endpoint, e.g. http://10.0.0.5:8443
    #[clap(short = 'a', long, env = "ENDPOINT")]
    pub endpoint: String,

    /// Pre-shared access key for the node daemon (32 bytes). Empty disables
    /// request signing.
    #[clap(short = 'k', long, env = "ACCESS_KEY", default_value = "")]
    pub access_key: String,

    /// Path to the node state file holding the desired/actual record
    #[clap(short = 's', long, env = "STATE_FILE", default_value = "./node_state.json")]
    pub state_file: PathBuf,

    /// Seconds between periodic reconcile passes
    #[clap(long, env = "RECONCILE_INTERVAL", default_value_t = 60)]
    pub interval: u64,
}

impl Cli {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.access_key.is_empty() && self.access_key.len() != 32 {
            return Err(Error::Config(format!(
                "access key must be exactly 32 bytes, got {}",
                self.access_key.len()
            )));
        }
        if !self.state_file.exists() {
            return Err(Error::Config(format!(
                "state file {} does not exist",
                self.state_file.display()
            )));
        }
        Ok(())
    }
}
