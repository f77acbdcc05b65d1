use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use tracing::{error, info};

use ev_insight::constants;
use ev_insight::dataset::Dataset;
use ev_insight::llm_interaction::{ChatClient, Credential};
use ev_insight::query::ChartOutput;
use ev_insight::{chat, web_server, AppContext};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that answers questions.
#[derive(Args, Debug)]
struct DataArgs {
    #[arg(long, help = "CSV file with the EV station dataset.")]
    data: Option<PathBuf>,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, help = "API key for the hosted model.")]
    api_key: Option<String>,
    #[arg(long, help = "Keep charts in memory instead of exporting PNG files.")]
    inline_charts: bool,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web UI.
    Serve {
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Answer a single question in the terminal.
    Ask {
        #[arg(help = "Question about the dataset.")]
        question: String,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Answer questions read from stdin, one per line.
    Chat {
        #[command(flatten)]
        data: DataArgs,
    },
}

/// Loads the dataset once and wires up the model clients.
fn build_context(args: DataArgs) -> Result<AppContext> {
    let path = args.data.unwrap_or_else(|| PathBuf::from(constants::DATA_PATH.as_str()));
    let dataset = Dataset::from_csv_path(&path).with_context(|| format!("Failed to load dataset {}", path.display()))?;

    let refine_client = ChatClient::new(constants::OPENAI_BASE_URL.as_str(), constants::REFINE_MODEL.as_str());
    let query_client = refine_client.with_model(constants::QUERY_MODEL.as_str());
    let chart_output = if args.inline_charts {
        ChartOutput::Inline
    } else {
        ChartOutput::SaveTo(PathBuf::from(constants::CHART_DIR.as_str()))
    };

    Ok(AppContext {
        dataset: Arc::new(dataset),
        refine_client,
        query_client,
        chart_output,
        default_credential: args.api_key.and_then(Credential::new),
    })
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for environment variables like API keys)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG environment variable (e.g., RUST_LOG=info,ev_insight=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, data } => {
            let context = Arc::new(build_context(data)?);
            info!("Starting web UI on port {}...", port);

            let server = web_server::start_web_server(port, context);
            tokio::select! {
                res = server => {
                    if let Err(e) = &res {
                        error!("Web server failed: {:?}", e);
                    }
                    res?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down.");
                }
            }
        }
        Commands::Ask { question, data } => {
            let context = build_context(data)?;
            chat::ask_once(&context, &question, &mut std::io::stdout()).await?;
        }
        Commands::Chat { data } => {
            let context = build_context(data)?;
            chat::run_stdin_chat(&context).await.context("Chat session failed")?;
        }
    }

    Ok(())
}
