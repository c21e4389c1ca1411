pub mod ops;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "metabuild-worker")]
#[command(about = "Ledger operation worker for project and NFT jobs", long_about = None)]
pub struct Cli {
    /// Path to the TOML config; created with defaults when missing
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Process jobs until the source is exhausted
    Run {
        /// JSON-lines job file, or `-` for stdin
        #[arg(long, default_value = "-")]
        jobs: String,
    },
    /// Check that the status service is live
    Ping,
    /// Print the ledger encoding of a content identifier
    EncodeCid {
        cid: String,
    },
    /// Read a token's URI from its ERC721 contract
    TokenUri {
        #[arg(long)]
        contract: String,
        #[arg(long)]
        token_id: String,
    },
}
