use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::RagError;
use crate::chat::{Answer, ChatSession};
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::index::{self, IndexLocation, IndexManifest};
use crate::llm::ollama::OllamaGenerator;
use crate::loader;

/// What the user typed at the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Quit,
    Refresh,
    Clean,
    ClearHistory,
    Empty,
    Question(String),
}

impl ChatInput {
    #[inline]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => Self::Empty,
            "/quit" | "/exit" | "q" | "quit" | "exit" => Self::Quit,
            "/refresh" => Self::Refresh,
            "/clean" => Self::Clean,
            "/clear" => Self::ClearHistory,
            _ => Self::Question(line.to_string()),
        }
    }
}

/// Print `err` and, when the failure has one, the step that fixes it
#[inline]
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", style("Error:").red().bold(), err);
    if let Some(hint) = remediation(err) {
        eprintln!("{} {}", style("Hint:").yellow().bold(), hint);
    }
}

/// Remediation of the first `RagError` in the error chain
#[inline]
pub fn remediation(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RagError>())
        .and_then(RagError::remediation)
}

/// Interactive question loop over the configured knowledge base
#[inline]
pub async fn run_chat(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let mut session = open_session(&config).await?;
    install_interrupt_handler(&session);

    println!("{}", style("💬 RAG Chat").bold().cyan());
    println!(
        "Documents: {}",
        style(session.data_dir().display()).cyan()
    );
    match session.knowledge_base().manifest().await {
        Some(manifest) => println!(
            "Knowledge base: {} chunks from {} documents",
            style(manifest.chunk_count).cyan(),
            style(manifest.document_count).cyan()
        ),
        None => println!(
            "{}",
            style("No knowledge base yet. Add documents and type /refresh.").yellow()
        ),
    }
    println!(
        "{}",
        style("Commands: /refresh, /clean, /clear, /quit (or q, exit). Ctrl-C stops an answer.")
            .dim()
    );
    println!();

    loop {
        let line: String = Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()?;

        match ChatInput::parse(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => break,
            ChatInput::ClearHistory => {
                session.clear_history();
                println!("{}", style("Conversation history cleared.").green());
            }
            ChatInput::Refresh => {
                let spinner = spinner("Rebuilding knowledge base...");
                let result = session.refresh().await;
                spinner.finish_and_clear();
                match result {
                    Ok(manifest) => print_manifest_summary(&manifest),
                    Err(e) => print_error(&e.into()),
                }
            }
            ChatInput::Clean => match session.clear_documents().await {
                Ok(report) => {
                    println!(
                        "{}",
                        style(format!("Removed {} documents and the index.", report.removed))
                            .green()
                    );
                    for failure in &report.failures {
                        println!(
                            "  {} {}: {}",
                            style("✗").red(),
                            failure.path.display(),
                            failure.reason
                        );
                    }
                }
                Err(e) => print_error(&e.into()),
            },
            ChatInput::Question(question) => {
                let thinking = spinner("Thinking...");
                let mut started = false;
                let result = session
                    .ask(&question, &mut |token: &str| {
                        if !started {
                            thinking.finish_and_clear();
                            print!("{} ", style("Assistant:").bold().green());
                            started = true;
                        }
                        print!("{token}");
                        flush_stdout();
                    })
                    .await;
                thinking.finish_and_clear();

                match result {
                    Ok(Answer::NoKnowledgeBase) => {
                        println!(
                            "{} {}",
                            style("Assistant:").bold().green(),
                            Answer::NoKnowledgeBase.text()
                        );
                    }
                    Ok(Answer::Generated { sources, .. }) => {
                        println!();
                        print_sources(&sources);
                    }
                    Err(RagError::Cancelled) => {
                        println!();
                        println!("{}", style("(answer interrupted)").dim());
                    }
                    Err(e) => {
                        println!();
                        print_error(&e.into());
                    }
                }
                println!();
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

/// Answer a single question and exit
#[inline]
pub async fn ask_question(config_dir: &Path, question: &str) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let mut session = open_session(&config).await?;
    install_interrupt_handler(&session);

    let answer = session
        .ask(question, &mut |token: &str| {
            print!("{token}");
            flush_stdout();
        })
        .await?;

    match answer {
        Answer::NoKnowledgeBase => println!("{}", Answer::NoKnowledgeBase.text()),
        Answer::Generated { sources, .. } => {
            println!();
            print_sources(&sources);
        }
    }
    Ok(())
}

/// Rebuild the knowledge base from the data directory
#[inline]
pub async fn index_documents(config_dir: &Path) -> Result<IndexManifest> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let data_dir = config.data_dir();
    println!(
        "📚 Indexing documents in {}",
        style(data_dir.display()).cyan()
    );

    let embedder = OllamaClient::new(&config)?;
    let session_cancel = crate::CancellationFlag::new();
    let interrupt = session_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let spinner = spinner("Embedding chunks...");
    let result = index::rebuild(
        &IndexLocation::from_config(&config),
        &data_dir,
        &config.chunking,
        &embedder,
        &session_cancel,
    )
    .await;
    spinner.finish_and_clear();

    let handle = result?;
    print_manifest_summary(handle.manifest());
    Ok(handle.manifest().clone())
}

/// Copy `files` into the data directory, then rebuild
#[inline]
pub async fn add_files(config_dir: &Path, files: &[PathBuf]) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let report = loader::add_documents(files, &config.data_dir())?;

    for path in &report.added {
        println!("  {} {}", style("+").green(), path.display());
    }
    for path in &report.already_present {
        println!("  {} {} (already in the data directory)", style("=").dim(), path.display());
    }
    for path in &report.rejected {
        println!(
            "  {} {} (only .pdf and .txt files are supported)",
            style("✗").red(),
            path.display()
        );
    }

    if report.added.is_empty() && report.already_present.is_empty() {
        println!("{}", style("No documents were added.").yellow());
        return Ok(());
    }

    println!(
        "Added {} of {} files.",
        style(report.added.len()).green(),
        files.len()
    );
    index_documents(config_dir).await?;
    Ok(())
}

/// Delete every document and the index
#[inline]
pub fn clean(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;
    let report =
        index::clear_with_documents(&IndexLocation::from_config(&config), &config.data_dir())?;

    println!(
        "🧹 Removed {} documents from {} and cleared the index.",
        style(report.removed).cyan(),
        config.data_dir().display()
    );
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            failure.path.display(),
            failure.reason
        );
    }
    Ok(())
}

#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("📁 Documents:");
    println!("   Directory: {}", config.data_dir().display());
    println!(
        "   Files: {}",
        loader::count_documents(&config.data_dir())
    );
    println!();

    println!("🔍 Knowledge Base:");
    match index::load(&IndexLocation::from_config(&config)).await {
        Ok(Some(handle)) => {
            let manifest = handle.manifest();
            println!("   ✅ Generation {}", manifest.generation);
            println!(
                "   📄 {} chunks from {} documents",
                manifest.chunk_count, manifest.document_count
            );
            println!(
                "   🔢 {} ({} dimensions)",
                manifest.embedding_model, manifest.dimension
            );
            println!(
                "   🕒 Built {}",
                manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            match handle.is_intact().await {
                Ok(true) => println!("   🩺 Integrity check passed"),
                Ok(false) => println!("   ❌ Integrity check failed (run `rag-chat index`)"),
                Err(e) => println!("   ❌ Integrity check failed - {}", e),
            }
        }
        Ok(None) => println!("   💤 Not built yet (run `rag-chat index`)"),
        Err(e) => {
            println!("   ❌ Unreadable - {}", e);
            if let Some(hint) = e.remediation() {
                println!("   💡 {}", hint);
            }
        }
    }
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!(
                "   ✅ Embedding model: {} ({}:{})",
                config.ollama.embedding_model, config.ollama.host, config.ollama.port
            ),
            Err(e) => println!("   ⚠️  Embedding model unavailable - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }
    match OllamaGenerator::new(&config) {
        Ok(generator) => match generator.health_check() {
            Ok(()) => println!("   ✅ Chat model: {}", config.ollama.llm_model),
            Err(e) => println!("   ⚠️  Chat model unavailable - {:#}", e),
        },
        Err(e) => debug!("Skipping chat model check: {:#}", e),
    }

    Ok(())
}

async fn open_session(config: &Config) -> Result<ChatSession> {
    let embedder = OllamaClient::new(config)?;
    let generator = OllamaGenerator::new(config)?;
    Ok(ChatSession::open(config, Arc::new(embedder), Arc::new(generator)).await?)
}

/// First Ctrl-C stops the running answer, a second one while idle exits
fn install_interrupt_handler(session: &ChatSession) {
    let cancel = session.cancellation();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.is_cancelled() {
                eprintln!();
                std::process::exit(130);
            }
            cancel.cancel();
        }
    });
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message);
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

fn print_manifest_summary(manifest: &IndexManifest) {
    println!(
        "{} Indexed {} chunks from {} documents (generation {})",
        style("✓").green(),
        style(manifest.chunk_count).cyan(),
        style(manifest.document_count).cyan(),
        manifest.generation
    );
}

fn print_sources(sources: &[PathBuf]) {
    if sources.is_empty() {
        return;
    }
    let names: Vec<String> = sources
        .iter()
        .map(|path| {
            path.file_name()
                .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
        })
        .collect();
    println!("{} {}", style("Sources:").dim(), style(names.join(", ")).dim());
}

fn flush_stdout() {
    if let Err(e) = std::io::stdout().flush() {
        warn!("Failed to flush stdout: {}", e);
    }
}
