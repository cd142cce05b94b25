pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "yachtops")]
#[command(about = "YachtOps CLI - tokens, permissions and policy inspection")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Issue and inspect bearer tokens")]
    Token {
        #[command(subcommand)]
        cmd: commands::token::TokenCommands,
    },

    #[command(about = "Evaluate role permissions and overrides")]
    Permissions {
        #[command(subcommand)]
        cmd: commands::permissions::PermissionsCommands,
    },

    #[command(about = "Show the authorization policy table")]
    Policy {
        #[command(subcommand)]
        cmd: commands::policy::PolicyCommands,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Token { cmd } => commands::token::handle(cmd, output_format).await,
        Commands::Permissions { cmd } => commands::permissions::handle(cmd, output_format).await,
        Commands::Policy { cmd } => commands::policy::handle(cmd, output_format).await,
    }
}
