use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::chat::ChatArgs;
use commands::order::OrderCommands;
use commands::profile::ProfileCommands;
use util::Output;

#[derive(Parser)]
#[command(
    name = "healthybites",
    version,
    about = "HealthyBites Express CLI: drive the ordering API from a terminal"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "HB_API_URL", default_value = "http://localhost:3978")]
    api_url: String,

    /// Print compact JSON
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Talk to the assistant as a chat user
    Chat {
        /// Conversation id to speak as
        #[arg(long, default_value = "cli")]
        conversation: String,
        /// Push endpoint reported as this conversation's address
        #[arg(long)]
        service_url: Option<String>,
        /// Send a single message and exit
        #[arg(long)]
        text: Option<String>,
        /// Send a single button action (JSON) and exit
        #[arg(long)]
        action: Option<String>,
        /// Print reply JSON instead of rendering it
        #[arg(long)]
        json: bool,
    },
    /// Order intake
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
    /// Subscriptions, default orders and status
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Show today's menu
    Menu {
        /// Render the menu the way the assistant sends it
        #[arg(long)]
        markdown: bool,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let output = Output { raw: cli.raw };

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url, output).await,
        Commands::Chat {
            conversation,
            service_url,
            text,
            action,
            json,
        } => {
            commands::chat::run(
                &cli.api_url,
                ChatArgs {
                    conversation,
                    service_url,
                    text,
                    action,
                    json,
                },
                output,
            )
            .await
        }
        Commands::Order { command } => commands::order::run(&cli.api_url, command, output).await,
        Commands::Profile { command } => {
            commands::profile::run(&cli.api_url, command, output).await
        }
        Commands::Menu { markdown } => commands::menu::run(&cli.api_url, markdown, output).await,
    };

    std::process::exit(code);
}
