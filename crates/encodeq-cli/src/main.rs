//! encodeq CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

#[derive(Parser)]
#[command(name = "encodeq")]
#[command(about = "encodeq job queue CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "ENCODEQ_API_URL", default_value = "http://localhost:3334")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a file for encoding
    Submit {
        /// Name of the file under the incoming directory
        filename: String,
        /// Identity of the submitter
        #[arg(long, env = "ENCODEQ_SUBMITTER")]
        submitter: String,
        /// Opaque JSON passed through with the job
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Inspect jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Validate a service configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "encodeq.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs
    List {
        /// Only show jobs with this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show job details
    Show {
        /// Job ID
        id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            filename,
            submitter,
            metadata,
        } => {
            commands::jobs::submit(&cli.api_url, filename, submitter, metadata).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::List { status } => {
                commands::jobs::list(&cli.api_url, status).await?;
            }
            JobCommands::Show { id } => {
                commands::jobs::show(&cli.api_url, id).await?;
            }
        },
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
