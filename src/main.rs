use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rag_chat::commands::{
    add_files, ask_question, clean, index_documents, print_error, run_chat, show_status,
};
use rag_chat::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Chat with your PDF and text documents using a local Ollama model")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, documents and the index
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat over the knowledge base
    Chat,
    /// Answer a single question and exit
    Ask {
        /// The question to answer
        question: String,
    },
    /// Rebuild the knowledge base from the document directory
    Index,
    /// Copy PDF or TXT files into the document directory and re-index
    Add {
        /// Files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete all documents and the knowledge base
    Clean,
    /// Show documents, index and Ollama status
    Status,
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        print_error(&e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Chat => run_chat(&config_dir).await?,
        Commands::Ask { question } => ask_question(&config_dir, &question).await?,
        Commands::Index => {
            index_documents(&config_dir).await?;
        }
        Commands::Add { files } => add_files(&config_dir, &files).await?,
        Commands::Clean => clean(&config_dir)?,
        Commands::Status => show_status(&config_dir).await?,
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
    }

    Ok(())
}
