use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "boost-regen")]
#[command(about = "Weekly Golden Boost regeneration service for WhatsSound")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (extension optional)
    #[arg(short, long, global = true, default_value = "config/default")]
    pub config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP trigger for an external scheduler
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run one regeneration cycle now
    Run {
        /// Regenerate accounts even if they were already regenerated this period
        #[arg(long)]
        force: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Run cycles in-process at every configured weekly boundary
    Auto,

    /// Show account and audit statistics
    Stats {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show recent regeneration audit records
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// List accounts with their balances and eligibility
    Accounts {
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Initialize database and show effective configuration
    Init,
}
