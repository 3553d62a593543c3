use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lifeos")]
#[command(about = "LifeOS client - sign in and keep the capture session running")]
#[command(version)]
pub struct Cli {
    /// Backend base URL (overrides config and LIFEOS_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and save the credential
    Login {
        /// Defaults to the last username used
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Create an account and sign in with it
    Register {
        #[arg(short, long)]
        username: String,
    },

    /// End the capture session and forget the saved credential
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Show sign-in state and the remote capture status
    Status {
        /// Print the remote status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep a capture session running until Ctrl-C
    Run,
}
