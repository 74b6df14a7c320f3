use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "refsync", version, about = "ESI reference data sync")]
pub struct Cli {
    /// Data directory holding the SQLite store.
    #[arg(long, global = true, env = "REFSYNC_DATA_DIR", default_value = ".refsync")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct EsiArgs {
    #[arg(
        long,
        env = "REFSYNC_ESI_BASE_URL",
        default_value = refsync_integrations::esi::client::DEFAULT_BASE_URL
    )]
    pub esi_base_url: String,

    /// Sent on every ESI request; should identify the operator.
    #[arg(
        long,
        env = "REFSYNC_USER_AGENT",
        default_value = refsync_integrations::esi::client::DEFAULT_USER_AGENT
    )]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "REFSYNC_ESI_TIMEOUT_SECS", default_value_t = 20)]
    pub timeout: u64,
}

impl Default for EsiArgs {
    fn default() -> Self {
        Self {
            esi_base_url: refsync_integrations::esi::client::DEFAULT_BASE_URL.to_string(),
            user_agent: refsync_integrations::esi::client::DEFAULT_USER_AGENT.to_string(),
            timeout: 20,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the sync scheduler until interrupted (default if no subcommand given).
    Run {
        #[command(flatten)]
        esi: EsiArgs,
    },

    /// Bootstrap missing trackers and run every due endpoint once.
    Tick {
        #[command(flatten)]
        esi: EsiArgs,
    },

    /// Print the latest finished and pending tracker per endpoint.
    Status,

    /// Print every stored version of one record.
    History {
        /// Record kind, e.g. `alliance`.
        kind: String,
        /// Natural key, e.g. `99000001`.
        key: String,
    },
}
