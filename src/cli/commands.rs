use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `wecom-mirror` - WeCom callback gateway for image mirroring and file uploads.
#[derive(Parser, Debug)]
#[command(name = "wecom-mirror")]
#[command(version)]
#[command(about = "Encrypted WeCom callback gateway that mirrors container images.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.wecom-mirror/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the callback gateway
    Serve {
        /// Port to listen on (use 0 for random available port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Inspect or clear the image-sync task lock
    Lock {
        #[command(subcommand)]
        lock_command: LockCommands,
    },

    /// Print a signed, encrypted text callback for smoke-testing a deployment
    Simulate {
        /// Sender user id
        #[arg(long)]
        user: String,

        /// Message text
        #[arg(long)]
        content: String,

        /// Callback timestamp (default: now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Callback nonce (default: random)
        #[arg(long)]
        nonce: Option<String>,
    },

    /// Load and validate configuration, then print a redacted summary
    CheckConfig,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCommands {
    /// Show the current lock holder, if any
    Status,
    /// Remove the lock record regardless of holder
    Release,
}
