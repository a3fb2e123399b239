//! CLI entry point for `mailharvest`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailharvest::attachment::{AttachmentResolver, GcsStore};
use mailharvest::classify::gemini::GeminiClient;
use mailharvest::classify::Classifier;
use mailharvest::config::{self, Config};
use mailharvest::fingerprint::Fingerprint;
use mailharvest::mailbox::imap::ImapMailbox;
use mailharvest::model::message::RawMessage;
use mailharvest::parser::mime::decode_message;
use mailharvest::pipeline::{Pipeline, RunSummary};
use mailharvest::warehouse::BigQueryWarehouse;

#[derive(Parser)]
#[command(
    name = "mailharvest",
    version,
    about = "Classify staffing mail and store project and engineer records"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (overrides $MAILHARVEST_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, classify and store the most recent messages (default)
    Run {
        /// Number of most recent messages to fetch
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Decode a stored .eml file and show what the pipeline would see
    Inspect {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        None => cmd_run(&config, None),
        Some(Commands::Run { limit }) => cmd_run(&config, limit),
        Some(Commands::Inspect { path, json }) => cmd_inspect(&path, json),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailharvest.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Run one pipeline pass against the configured collaborators.
fn cmd_run(config: &Config, limit: Option<usize>) -> anyhow::Result<()> {
    config.validate()?;

    let mailbox = ImapMailbox::new(config.mailbox.clone());
    let gemini = GeminiClient::new(&config.inference);
    let store = GcsStore::new(&config.storage);
    let warehouse = BigQueryWarehouse::new(config.warehouse.clone());

    let classifier = Classifier::new(&gemini, &config.inference);
    let resolver = AttachmentResolver::new(&store, config.storage.key_prefix.clone());
    let limit = limit.unwrap_or(config.mailbox.fetch_limit);
    let pipeline = Pipeline::new(&mailbox, &warehouse, classifier, resolver, limit);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Processing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let summary = pipeline.run(Some(&|done: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    }));
    pb.finish_and_clear();

    if let Some(err) = &summary.fetch_error {
        eprintln!("Mailbox unavailable: {err}");
    }
    print_summary(&summary, start.elapsed());
    Ok(())
}

fn print_summary(summary: &RunSummary, elapsed: std::time::Duration) {
    println!();
    println!("  {:<25} {}", "Processed", summary.processed);
    println!("  {:<25} {}", "Engineer records", summary.engineer);
    println!("  {:<25} {}", "Project records", summary.project);
    println!("  {:<25} {}", "Skipped (duplicate)", summary.duplicate_skipped);
    println!("  {:<25} {}", "Skipped (other)", summary.other_skipped);
    println!("  {:<25} {}", "Classification failed", summary.classify_failed);
    println!("  {:<25} {}", "Insert failed", summary.write_failed);
    println!("  {:<25} {:.2?}", "Elapsed", elapsed);
    println!();
}

/// Decode one stored message without contacting any service.
fn cmd_inspect(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let raw = std::fs::read(path)?;
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let msg = decode_message(&id, &raw)?;
    let fp = Fingerprint::of_message(&msg);

    if json {
        let out = serde_json::json!({
            "fingerprint": fp,
            "message": msg,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_message(&msg, &fp);
    }
    Ok(())
}

fn print_message(msg: &RawMessage, fp: &Fingerprint) {
    use humansize::{format_size, BINARY};

    const EXCERPT_CHARS: usize = 400;

    println!();
    println!("  {:<12} {}", "From", msg.sender);
    println!("  {:<12} {}", "Subject", msg.subject);
    println!(
        "  {:<12} {}",
        "Sent",
        if msg.sent_at.is_empty() {
            "(unparseable)"
        } else {
            msg.sent_at.as_str()
        }
    );
    println!("  {:<12} {}", "Fingerprint", fp);

    if msg.attachments.is_empty() {
        println!("  {:<12} none", "Attachments");
    } else {
        println!("  Attachments");
        for att in &msg.attachments {
            println!(
                "    {:<40} {:>10}  {}{}",
                att.filename,
                format_size(att.size, BINARY),
                att.mime_type,
                if att.is_garbled { "  [garbled]" } else { "" }
            );
        }
    }

    println!();
    let excerpt: String = msg.body.chars().take(EXCERPT_CHARS).collect();
    println!("{excerpt}");
    if msg.body.chars().count() > EXCERPT_CHARS {
        println!("...");
    }
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailharvest", &mut std::io::stdout());
    Ok(())
}
