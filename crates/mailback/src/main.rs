//! # mailback
//!
//! Command-line front end: registers outbound contexts, correlates scanned
//! replies against them, and runs expiry sweeps on the local store.

#![deny(unsafe_code)]

mod collaborators;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use mailback_core::{
    ContextData, ContextId, ContextType, InboundDocument, NewContext, ReferenceGrammar,
    ReplyTemplate, UserId,
};
use mailback_correlate::{CorrelationEngine, CorrelationService, HandlerRegistry};
use mailback_settings::MailbackSettings;
use mailback_store::{ConnectionConfig, ContextStore};
use serde_json::Value;

use crate::collaborators::{PrintHandler, PrintRenderer};

/// Correlate scanned paper replies with the conversations they answer.
#[derive(Parser, Debug)]
#[command(name = "mailback", about = "Correlate scanned paper replies with outstanding conversations")]
struct Cli {
    /// Settings file (default `~/.mailback/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an outbound artifact that expects a paper reply.
    Create {
        /// Owning user.
        #[arg(long)]
        user: String,
        /// Context type: email, shopping, appointment or inquiry.
        #[arg(long = "type")]
        context_type: ContextType,
        /// Domain payload as JSON.
        #[arg(long, default_value = "{}")]
        data: String,
        /// Short descriptor printed on clarification forms.
        #[arg(long)]
        summary: Option<String>,
        /// Time to live in hours (default from settings).
        #[arg(long)]
        ttl_hours: Option<u64>,
        /// Number of lettered options printed on the reply form.
        #[arg(long)]
        options: Option<u32>,
    },
    /// Correlate one extraction result (JSON `InboundDocument`).
    Resolve {
        /// File holding the document.
        #[arg(long)]
        file: PathBuf,
        /// Evaluate only; claim nothing.
        #[arg(long)]
        dry_run: bool,
        /// Evaluation instant, RFC 3339 (default now).
        #[arg(long)]
        at: Option<String>,
    },
    /// Expire every context past its TTL once.
    Sweep,
    /// Run the periodic expiry sweeper until interrupted.
    Sweeper,
    /// Print the activity log of one context.
    Activity {
        /// Context ID.
        #[arg(long)]
        context: String,
    },
    /// Look up a context by reference code.
    Show {
        /// Reference code as printed.
        #[arg(long)]
        reference: String,
        /// Owning user.
        #[arg(long)]
        user: String,
    },
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Load settings and apply command-line overrides.
fn load_settings(args: &Cli) -> Result<MailbackSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(mailback_settings::settings_path);
    let mut settings = mailback_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(ref db_path) = args.db_path {
        settings.store.db_path = db_path.to_string_lossy().into_owned();
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn open_store(settings: &MailbackSettings) -> Result<ContextStore> {
    let db_path = settings.store.resolved_db_path();
    ensure_parent_dir(&db_path)?;
    let grammar = ReferenceGrammar::new(
        &settings.references.prefix,
        settings.references.sequence_width,
    )
    .context("Invalid reference grammar")?;
    ContextStore::open(
        &db_path.to_string_lossy(),
        &ConnectionConfig::from(&settings.store),
        grammar,
    )
    .with_context(|| format!("Failed to open database {}", db_path.display()))
}

fn hours(h: u64) -> Result<Duration> {
    i64::try_from(h)
        .ok()
        .and_then(Duration::try_hours)
        .with_context(|| format!("TTL of {h} hours is out of range"))
}

/// Build the outbound context described by `create` arguments.
fn new_context(
    user: &str,
    context_type: ContextType,
    data: &str,
    summary: Option<String>,
    ttl: Duration,
    options: Option<u32>,
) -> Result<NewContext> {
    anyhow::ensure!(
        context_type != ContextType::Disambiguation,
        "disambiguation contexts are issued by the engine"
    );
    let payload: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
    let context_data = ContextData::from_parts(context_type, payload)?;
    let mut new = NewContext::new(user, context_data, ttl);
    if let Some(summary) = summary {
        new = new.with_summary(summary);
    }
    if let Some(count) = options {
        new = new.with_template(
            ReplyTemplate::new(context_type.reply_family()).with_option_count(count),
        );
    }
    Ok(new)
}

fn read_document(path: &Path) -> Result<InboundDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not an extraction result", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load_settings(&args)?;
    mailback_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let store = open_store(&settings)?;
    let now = Utc::now();

    match args.command {
        Command::Create {
            user,
            context_type,
            data,
            summary,
            ttl_hours,
            options,
        } => {
            let ttl = hours(ttl_hours.unwrap_or(settings.lifecycle.default_ttl_hours))?;
            let new = new_context(&user, context_type, &data, summary, ttl, options)?;
            let ctx = store.create_context(&new, now).context("Failed to create context")?;
            tracing::info!(context_id = %ctx.id, reference_id = %ctx.reference_id, "context created");
            print_json(&ctx)?;
        }
        Command::Resolve { file, dry_run, at } => {
            let doc = read_document(&file)?;
            let at: DateTime<Utc> = match at {
                Some(ts) => mailback_core::time::parse_timestamp(&ts).context("Invalid --at")?,
                None => now,
            };
            let engine = Arc::new(CorrelationEngine::new(store, &settings));
            if dry_run {
                print_json(&engine.evaluate(&doc, at)?)?;
            } else {
                let service = CorrelationService::new(
                    engine,
                    HandlerRegistry::uniform(Arc::new(PrintHandler)),
                    Arc::new(PrintRenderer),
                )?;
                print_json(&service.process_at(doc, at).await?)?;
            }
        }
        Command::Sweep => {
            let expired = store.sweep_expired(now).context("Sweep failed")?;
            print_json(&expired)?;
        }
        Command::Sweeper => {
            let engine = CorrelationEngine::new(store, &settings);
            let period = std::time::Duration::from_secs(settings.lifecycle.sweep_interval_secs);
            let handle = engine.lifecycle().spawn_sweeper(period);
            tracing::info!(interval_secs = period.as_secs(), "sweeper running");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for ctrl-c")?;
            handle.abort();
            tracing::info!("sweeper stopped");
        }
        Command::Activity { context } => {
            let entries = store
                .list_activity(&ContextId::from(context.as_str()))
                .context("Failed to read activity")?;
            print_json(&entries)?;
        }
        Command::Show { reference, user } => {
            let reference_id = store.grammar().parse(&reference)?;
            match store.find_by_reference(&UserId::from(user.as_str()), &reference_id)? {
                Some(ctx) => print_json(&ctx)?,
                None => anyhow::bail!("no context {reference_id} for user {user}"),
            }
        }
    }
    Ok(())
}
