//! marketchat - terminal client for marketplace negotiation chats
//!
//! Talks to the marketplace backend's REST, auth and realtime services.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketchat::{api, auth, console};

#[derive(Parser)]
#[command(name = "marketchat")]
#[command(about = "Realtime negotiation chat for advertisers and influencers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email (prompted if not given or remembered)
        #[arg(short, long)]
        email: Option<String>,

        /// Sign in again even if a valid token is cached
        #[arg(short, long)]
        force: bool,
    },

    /// Log out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// List your conversations
    Conversations {
        /// Maximum number of conversations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print recent messages of a conversation
    History {
        /// Conversation ID (from `conversations` output)
        conversation_id: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Send a message and wait for the server to confirm it
    Send {
        /// Conversation ID (from `conversations` output)
        #[arg(short, long)]
        to: String,

        /// Message content
        message: String,
    },

    /// Open a conversation: live feed plus a prompt for sending
    Watch {
        /// Conversation ID (from `conversations` output)
        conversation_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout belongs to the console.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Login { email, force } => {
            tracing::info!("Starting authentication flow...");
            auth::login(email, force).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Conversations { limit } => {
            tracing::info!("Fetching conversations...");
            api::list_conversations(limit).await?;
        }
        Commands::History {
            conversation_id,
            limit,
        } => {
            api::read_history(&conversation_id, limit).await?;
        }
        Commands::Send { to, message } => {
            tracing::info!("Sending message...");
            console::send_once(&to, &message).await?;
        }
        Commands::Watch { conversation_id } => {
            console::watch(&conversation_id).await?;
        }
    }

    Ok(())
}
