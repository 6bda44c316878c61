//! ImpMail command line
//!
//! Loads configuration, seeds an in-memory mail store from an email source
//! export and runs one engine operation, printing JSON to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use impmail_core::{
    types::UserPreferences, Email, Expectation, ExpectationExamples, ImpMail, ImpMailConfig,
    MailStore, MemoryMailStore,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Email source export: parsed emails plus optional per-user state
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailboxExport {
    emails: Vec<Email>,
    #[serde(default)]
    expectations: Vec<Expectation>,
    #[serde(default)]
    preferences: Vec<UserPreferences>,
}

#[derive(Parser)]
#[command(name = "impmail")]
#[command(about = "Importance filtering, digests and similarity ranking for email", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); IMPMAIL__SECTION__KEY variables override it
    #[arg(short, long, env = "IMPMAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON export of the mailbox to operate on
    #[arg(short, long)]
    emails: PathBuf,

    /// User whose mailbox is processed
    #[arg(short, long)]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every email that has no stored vector yet
    Index {
        /// Delete the user's vectors before indexing
        #[arg(long)]
        reset: bool,
    },

    /// Classify specific emails, or every unclassified one
    Classify {
        /// Email ids (defaults to all unclassified, non-hand-labeled emails)
        #[arg(long = "id")]
        ids: Vec<String>,
    },

    /// Run the incremental classification sweep
    Sweep {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Compute the digest since the last one
    Digest {
        /// Compute without recording the digest or advancing the watermark
        #[arg(long)]
        dry_run: bool,
    },

    /// Similarity of recent emails to the expectation prototype
    Scores {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Most similar threads, as a percentage of distinct threads
    TopSimilar {
        #[arg(short, long, default_value = "10")]
        percent: f64,
    },

    /// Threads least like the expectation
    Outliers {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Save like/dislike selections and score every email against them
    Preferences {
        #[arg(long, value_delimiter = ',')]
        liked: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        disliked: Vec<String>,
    },

    /// Set the active expectation
    Expect {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long)]
        important: Vec<String>,

        #[arg(long)]
        not_important: Vec<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_mailbox(path: &Path) -> anyhow::Result<Arc<MemoryMailStore>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read mailbox export {}", path.display()))?;
    let export: MailboxExport = serde_json::from_str(&raw)
        .with_context(|| format!("invalid mailbox export {}", path.display()))?;

    let store = Arc::new(MemoryMailStore::new());
    let email_count = export.emails.len();
    store.seed(export.emails).await;
    for expectation in export.expectations.into_iter().filter(|e| e.is_active) {
        store.save_expectation(expectation).await?;
    }
    for preferences in export.preferences {
        store.save_preferences(preferences).await?;
    }

    debug!("Seeded {} emails from {}", email_count, path.display());
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Keep HTTP client internals quiet unless explicitly asked for
    let filter = EnvFilter::new(format!(
        "impmail={level},impmail_core={level},reqwest=warn,hyper=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("impmail v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = ImpMailConfig::load(cli.config.as_deref())?;
    let mail = load_mailbox(&cli.emails).await?;
    let app = ImpMail::from_config(config, mail).await?;
    let user = cli.user.as_str();

    match cli.command {
        Commands::Index { reset } => {
            if reset {
                app.indexer.reset_user(user).await?;
            }
            print_json(&app.indexer.sync_user(user).await?)
        }
        Commands::Classify { ids } => {
            app.indexer.sync_user(user).await?;
            let ids = if ids.is_empty() {
                app.mail
                    .unclassified_emails(user, usize::MAX)
                    .await?
                    .into_iter()
                    .map(|e| e.id)
                    .collect()
            } else {
                ids
            };
            print_json(&app.classifier.classify_batch(user, &ids).await?)
        }
        Commands::Sweep { watch } => {
            app.indexer.sync_user(user).await?;
            if !watch {
                return print_json(&app.sweep.run_once(user).await?);
            }

            let sweep = Arc::clone(&app.sweep);
            let users = vec![user.to_string()];
            let handle = tokio::spawn(async move { sweep.run(users).await });

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, stopping sweep");
            app.sweep.stop();
            handle.await??;
            Ok(())
        }
        Commands::Digest { dry_run } => {
            app.indexer.sync_user(user).await?;
            print_json(&app.digest.compute_digest(user, dry_run).await?)
        }
        Commands::Scores { limit } => {
            app.indexer.sync_user(user).await?;
            print_json(&app.ranker.prototype_scores(user, limit).await?)
        }
        Commands::TopSimilar { percent } => {
            app.indexer.sync_user(user).await?;
            print_json(&app.ranker.top_similar(user, percent).await?)
        }
        Commands::Outliers { limit } => {
            app.indexer.sync_user(user).await?;
            print_json(&app.ranker.outliers(user, limit).await?)
        }
        Commands::Preferences { liked, disliked } => {
            app.indexer.sync_user(user).await?;
            app.preferences
                .save_preferences(user, liked, disliked)
                .await?;
            let ids: Vec<String> = app
                .mail
                .recent_emails(user, usize::MAX)
                .await?
                .into_iter()
                .map(|e| e.id)
                .collect();
            print_json(&app.preferences.score_emails(user, &ids).await?)
        }
        Commands::Expect {
            title,
            description,
            important,
            not_important,
        } => {
            let examples = ExpectationExamples {
                important,
                not_important,
            };
            let expectation = app
                .expectations
                .set_expectation(user, &title, &description, examples)
                .await?;
            print_json(&expectation)
        }
    }
}
