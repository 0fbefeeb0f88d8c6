use clap::{Parser, Subcommand};

/// keygate: API keys and the GitHub repository summarizer
#[derive(Parser)]
#[command(name = "keygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to KEYGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep all state in memory instead of PostgreSQL (local runs only)
        #[arg(long)]
        in_memory: bool,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Manage API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a key for the user with this e-mail (the user is created if unknown)
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// dev or prod
        #[arg(long = "type", default_value = "dev")]
        key_type: String,
        #[arg(long)]
        description: Option<String>,
        /// Lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// List a user's keys
    List {
        #[arg(long)]
        email: String,
        /// Filter by dev or prod
        #[arg(long = "type")]
        key_type: Option<String>,
    },
    /// Delete one of a user's keys
    Delete {
        #[arg(long)]
        email: String,
        #[arg(long)]
        id: String,
    },
    /// Reset a rate-limited key's usage counter to zero
    ResetUsage {
        #[arg(long)]
        id: String,
    },
}
