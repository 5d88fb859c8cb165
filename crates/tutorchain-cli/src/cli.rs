use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tutorchain_core::Address;

#[derive(Parser, Debug)]
#[command(name = "tutorchain")]
#[command(about = "Peer-tutoring marketplace client for the tutorchain contract")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// JSON-RPC endpoint of the wallet or node
    #[arg(long, global = true, value_name = "URL")]
    pub rpc_url: Option<String>,

    /// Tutoring contract address
    #[arg(long, global = true, value_name = "ADDRESS")]
    pub contract: Option<Address>,

    /// Configuration directory (defaults to ~/.config/tutorchain)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write JSON-RPC wire logs into this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the effective configuration to config.json
    Init,

    /// Connect the wallet and report the account and network
    Connect,

    /// Connect (this may open a wallet permission prompt), then show the
    /// wallet state and what the connect control would display.
    /// A failed connect is reported as part of the state.
    Status,

    /// Connect, then print wallet events until interrupted
    Watch,

    /// Show a tutor's registry entry
    Tutor {
        /// Tutor address
        address: Address,
    },

    /// List sessions and profile stats (defaults to the connected account)
    Sessions {
        /// Student address
        address: Option<Address>,
    },

    /// Book and pay for a session with a tutor
    Book {
        /// Tutor address
        tutor: Address,
        /// Session length in whole hours (1 to 4)
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },

    /// List the connected account as a tutor
    Register {
        /// Display name
        name: String,
        /// Hourly rate in ETH, e.g. 0.05
        rate_eth: String,
    },

    /// Complete a session with a 1 to 5 star rating
    Rate {
        session_id: u64,
        rating: u8,
    },
}

impl Commands {
    /// Whether the command reads or writes the contract.
    pub fn needs_contract(&self) -> bool {
        !matches!(
            self,
            Commands::Init | Commands::Connect | Commands::Status | Commands::Watch
        )
    }
}
