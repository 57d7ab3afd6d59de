//! duet - Headless Prompt Comparison Driver
//!
//! Runs two conversations against the same model at once and prints both
//! transcripts, so two prompts can be judged side by side.
//!
//! # Usage
//!
//! ```bash
//! # Two system prompts, same user turns
//! duet system --left "You are terse." --right @prompts/thorough.txt \
//!     --input "Explain lifetimes" --input "Now with an example"
//!
//! # One system prompt, two phrasings of the question
//! duet user --system "You are a tutor." \
//!     --left "What is Rust?" --right "Explain Rust to a C programmer"
//!
//! # Available models
//! duet models
//!
//! # Share payload for one lane of a system comparison
//! duet share --side right --title "Lifetimes" --left @a.txt --right @b.txt --input "Explain"
//!
//! # Verbose logging
//! RUST_LOG=duet_core=debug duet system ...
//! ```
//!
//! Any prompt argument starting with `@` is read from that file.

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use duet_core::config::{load_config_from_path, ConfigOverrides, DuetConfig};
use duet_core::{
    Attachment, ComparisonController, ComparisonEvent, LlmBackend, OllamaBackend, Side,
};

/// duet - compare two prompts against the same model
#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DUET_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Ollama host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Ollama port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Provider id
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Model name
    #[arg(short = 'm', long, global = true)]
    model: Option<String>,

    /// Wait for whole responses instead of streaming
    #[arg(long, global = true)]
    no_stream: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DUET_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare two system prompts on the same user turns
    System(SystemArgs),
    /// Compare two user prompts under one system prompt
    User(UserArgs),
    /// List the models the backend offers
    Models,
    /// Run a system comparison and print one lane as a share payload
    Share(ShareArgs),
}

#[derive(clap::Args, Debug)]
struct SystemArgs {
    /// Original system prompt (text or @file)
    #[arg(long)]
    left: String,

    /// Optimized system prompt (text or @file)
    #[arg(long)]
    right: String,

    /// User turns, sent to both lanes in order
    #[arg(short = 'i', long = "input", required = true)]
    inputs: Vec<String>,

    /// Text file attached to the first turn
    #[arg(short = 'a', long = "attach", value_name = "FILE")]
    attachments: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct UserArgs {
    /// Shared system prompt (text or @file)
    #[arg(short = 's', long, default_value = "")]
    system: String,

    /// Original user turns, in order
    #[arg(long = "left", required = true)]
    left: Vec<String>,

    /// Optimized user turns, in order
    #[arg(long = "right", required = true)]
    right: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ShareArgs {
    /// Lane to export
    #[arg(long, value_enum)]
    side: SideArg,

    /// Conversation title
    #[arg(short = 't', long)]
    title: String,

    /// Never expire
    #[arg(long)]
    permanent: bool,

    /// Protect the share with a password
    #[arg(long)]
    password: Option<String>,

    #[command(flatten)]
    comparison: SystemArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SideArg {
    Left,
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

type Controller = ComparisonController<OllamaBackend>;

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("duet={level},duet_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(host) = &self.host {
            overrides = overrides.with_host(host.clone());
        }
        if let Some(port) = self.port {
            overrides = overrides.with_port(port);
        }
        if let Some(provider) = &self.provider {
            overrides = overrides.with_provider(provider.clone());
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_model(model.clone());
        }
        if self.no_stream {
            overrides = overrides.with_stream(false);
        }
        overrides
    }
}

/// Resolve `@path` arguments to file contents
async fn prompt_text(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt file: {path}")),
        None => Ok(arg.to_string()),
    }
}

async fn read_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        attachments.push(Attachment::new(name, "text/plain", data));
    }
    Ok(attachments)
}

/// Trace every controller event until the channel closes
fn spawn_event_logger(mut rx: broadcast::Receiver<ComparisonEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::trace!(side = ?event.side(), event = ?event, "Comparison event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_system(controller: &Controller, args: &SystemArgs) -> Result<()> {
    let left = prompt_text(&args.left).await?;
    let right = prompt_text(&args.right).await?;
    let attachments = read_attachments(&args.attachments).await?;

    controller.init_system_comparison(&left, &right);
    for (turn, input) in args.inputs.iter().enumerate() {
        controller.set_shared_user_input(prompt_text(input).await?);
        let attached: &[Attachment] = if turn == 0 { &attachments } else { &[] };
        controller.send_system_message(attached).await?;
        info!(turn, "Shared turn finished");
    }
    Ok(())
}

async fn run_user(controller: &Controller, args: &UserArgs) -> Result<()> {
    let system = prompt_text(&args.system).await?;
    controller.init_user_comparison(&system, "", "");

    let turns = args.left.len().max(args.right.len());
    for turn in 0..turns {
        for (side, inputs) in [(Side::Left, &args.left), (Side::Right, &args.right)] {
            if let Some(input) = inputs.get(turn) {
                controller.set_user_draft(side, prompt_text(input).await?);
            }
        }

        let (left, right) = tokio::join!(
            controller.send_left_user_message(&[]),
            controller.send_right_user_message(&[]),
        );
        left?;
        right?;
        info!(turn, "User turn finished");
    }
    Ok(())
}

async fn run_models(backend: &OllamaBackend) -> Result<()> {
    if !backend.health_check().await {
        anyhow::bail!("{} backend is not reachable", backend.name());
    }
    let models = backend.list_models().await?;
    if models.is_empty() {
        warn!("Backend reported no models");
    }
    print!("{}", render::models(&models));
    Ok(())
}

async fn run_share(controller: &Controller, args: &ShareArgs) -> Result<()> {
    run_system(controller, &args.comparison).await?;

    let mut payload = controller.share_payload(args.side.into(), &args.title)?;
    if args.permanent {
        payload = payload.permanent();
    }
    if let Some(password) = &args.password {
        payload = payload.with_password(password.clone());
    }

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn print_transcript(controller: &Controller) {
    let state = controller.snapshot();
    print!(
        "{}",
        render::transcript(
            state.mode,
            state.active_store(Side::Left).messages(),
            state.active_store(Side::Right).messages(),
        )
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let path = cli.config.clone().or_else(duet_core::config::default_config_path);
    let mut config: DuetConfig = tokio::task::spawn_blocking(move || load_config_from_path(path))
        .await
        .context("Config loader panicked")??;
    cli.overrides().apply(&mut config);
    config.validate()?;

    info!(
        source = %config.source(),
        host = %config.backend.host,
        port = config.backend.port,
        model = ?config.selection.model,
        "Configuration loaded"
    );

    let backend = Arc::new(OllamaBackend::from_config(&config.backend));
    let controller = ComparisonController::new(
        Arc::clone(&backend),
        Arc::new(config.settings()),
        config.comparison.clone(),
    );
    spawn_event_logger(controller.subscribe());

    match &cli.command {
        Command::System(args) => {
            run_system(&controller, args).await?;
            print_transcript(&controller);
        }
        Command::User(args) => {
            run_user(&controller, args).await?;
            print_transcript(&controller);
        }
        Command::Models => run_models(&backend).await?,
        Command::Share(args) => run_share(&controller, args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_system_command() {
        let cli = Cli::try_parse_from([
            "duet", "system", "--left", "a", "--right", "b", "-i", "one", "-i", "two",
        ])
        .unwrap();
        match cli.command {
            Command::System(args) => {
                assert_eq!(args.inputs, vec!["one".to_string(), "two".to_string()]);
                assert!(args.attachments.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "duet", "models", "--model", "qwen", "--port", "9000", "--no-stream",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.model.as_deref(), Some("qwen"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.stream, Some(false));
        assert_eq!(overrides.host, None);
    }

    #[test]
    fn test_share_requires_side() {
        assert!(Cli::try_parse_from([
            "duet", "share", "--title", "t", "--left", "a", "--right", "b", "-i", "x",
        ])
        .is_err());
    }

    #[tokio::test]
    async fn test_prompt_text_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        tokio::fs::write(&path, "from file").await.unwrap();

        assert_eq!(prompt_text("inline").await.unwrap(), "inline");
        assert_eq!(
            prompt_text(&format!("@{}", path.display())).await.unwrap(),
            "from file"
        );
        assert!(prompt_text("@/definitely/missing").await.is_err());
    }
}
