use clap::{Parser, Subcommand};

/// tokenmgr: bearer-token authentication authority
#[derive(Parser)]
#[command(name = "tokenmgr", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the token API server
    Serve {
        /// Port to bind (defaults to TOKENMGR_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Administer tokens directly against the store
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a principal (bootstrap / service accounts)
    Issue {
        #[arg(long)]
        principal: String,
        #[arg(long, default_value = "local")]
        provider: String,
        /// Lifetime in seconds; 0 requests a non-expiring token
        #[arg(long, default_value = "86400")]
        ttl: i64,
        /// session or api-key
        #[arg(long, default_value = "api-key")]
        kind: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List tokens, optionally for one principal
    List {
        #[arg(long)]
        principal: Option<String>,
    },
    /// Disable (log out) a token
    Revoke {
        #[arg(long)]
        id: String,
    },
    /// Delete a token permanently
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Delete tokens expired longer than the configured grace period
    Reap,
}
