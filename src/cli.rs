//! Command-line interface

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::{GmailError, Result};
use crate::label::{resolve_label_id, LabelColor, LabelDraft, LabelInfo, LabelType};
use crate::mime::MimeTreeFlattener;
use crate::models::{ItemKind, MessageDetail, Payload};
use crate::mutation::{BatchMutationExecutor, DrainBudget, Mutation, MutationSpec};
use crate::pagination::PaginatedFetcher;
use crate::query::{Filter, ReadState};
use crate::retry::RetryPolicy;
use crate::transport::MailTransport;

#[derive(Parser, Debug)]
#[command(name = "gmail-sweep")]
#[command(version = "0.1.0")]
#[command(about = "Bulk search, inspect and clean up a Gmail mailbox", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file (overrides auth.credentials_path)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Path to token cache file (overrides auth.token_cache_path)
    #[arg(long)]
    pub token_cache: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Apply path overrides given on the command line
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(path) = &self.credentials {
            config.auth.credentials_path = path.clone();
        }
        if let Some(path) = &self.token_cache {
            config.auth.token_cache_path = path.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize access to the mailbox
    Auth {
        /// Discard stored tokens and authorize again
        #[arg(long)]
        force: bool,
    },

    /// List ids of matching messages or threads
    Search {
        #[command(flatten)]
        filter: FilterArgs,

        /// Stop after this many results
        #[arg(long)]
        max: Option<usize>,

        /// List threads instead of messages
        #[arg(long)]
        threads: bool,
    },

    /// Print headers and decoded parts of one message
    Show {
        /// Message id (or thread id with --thread)
        id: String,

        /// Treat the id as a thread and show every message in it
        #[arg(long)]
        thread: bool,

        /// Print full text bodies instead of the first lines
        #[arg(long)]
        full: bool,
    },

    /// Apply a change to every matching message until nothing matches
    Drain {
        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        action: ActionArgs,

        /// Maximum list-and-mutate rounds
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_rounds: Option<u32>,

        /// Only count the first round of candidates
        #[arg(long)]
        dry_run: bool,
    },

    /// Change a single message or thread
    Modify {
        id: String,

        #[command(flatten)]
        action: ActionArgs,

        /// Move the item out of the trash
        #[arg(long, conflicts_with_all = ["trash", "delete"])]
        untrash: bool,

        /// Treat the id as a thread
        #[arg(long)]
        thread: bool,
    },

    /// List labels, or create one
    Labels {
        /// Name of a label to create
        #[arg(long)]
        create: Option<String>,

        /// Text colour of the new label
        #[arg(long, requires = "create", default_value = "#000000")]
        text_color: String,

        /// Background colour of the new label
        #[arg(long, requires = "create", default_value = "#fcdee8")]
        background_color: String,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Search criteria shared by `search` and `drain`
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Free-text search, passed through verbatim
    #[arg(short, long)]
    pub query: Option<String>,

    #[arg(long, conflicts_with = "unread")]
    pub read: bool,

    #[arg(long)]
    pub unread: bool,

    /// Only items before this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub before: Option<NaiveDate>,

    /// Only items after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub after: Option<NaiveDate>,

    #[arg(long)]
    pub from: Option<String>,

    #[arg(long)]
    pub to: Option<String>,

    #[arg(long)]
    pub subject: Option<String>,

    /// Label name or id; repeat to require several
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

impl FilterArgs {
    /// Build the query part of the filter; labels are resolved separately
    pub fn to_filter(&self) -> Result<Filter> {
        let mut filter = Filter::new();
        if let Some(query) = &self.query {
            filter = filter.text(query.clone());
        }
        filter = filter.read(match (self.read, self.unread) {
            (true, _) => ReadState::Read,
            (_, true) => ReadState::Unread,
            _ => ReadState::Any,
        });
        if let Some(date) = self.before {
            filter = filter.before(date);
        }
        if let Some(date) = self.after {
            filter = filter.after(date);
        }
        if let Some(addr) = &self.from {
            filter = filter.from_addr(addr.clone());
        }
        if let Some(addr) = &self.to {
            filter = filter.to_addr(addr.clone());
        }
        if let Some(term) = &self.subject {
            filter = filter.subject(term.clone());
        }
        filter.validate()?;
        Ok(filter)
    }
}

/// What to do with the selected items
#[derive(Args, Debug, Clone, Default)]
pub struct ActionArgs {
    /// Move to the trash
    #[arg(long)]
    pub trash: bool,

    /// Delete permanently, bypassing the trash
    #[arg(long, conflicts_with_all = ["trash", "add", "remove"])]
    pub delete: bool,

    /// Label name or id to add
    #[arg(long)]
    pub add: Vec<String>,

    /// Label name or id to remove
    #[arg(long)]
    pub remove: Vec<String>,
}

impl ActionArgs {
    /// Resolve label names and build the mutation; an action with no effect is rejected
    pub fn to_mutation(&self, labels: &[LabelInfo]) -> Result<Mutation> {
        if self.delete {
            return Ok(Mutation::PermanentDelete);
        }
        self.to_spec(labels).map(Mutation::Relabel)
    }

    /// Label changes only; `--delete` has no label form and is rejected
    pub fn to_spec(&self, labels: &[LabelInfo]) -> Result<MutationSpec> {
        if self.delete {
            return Err(GmailError::validation(
                "delete",
                "permanent delete cannot be expressed as a label change",
            ));
        }

        let mut add = resolve_all(labels, &self.add)?;
        if self.trash {
            add.insert(crate::mutation::TRASH.to_string());
        }
        let remove = resolve_all(labels, &self.remove)?;

        MutationSpec::new(add, remove)
    }

    fn needs_labels(&self) -> bool {
        !self.add.is_empty() || !self.remove.is_empty()
    }
}

fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{}': {}", value, e))
}

fn resolve_all(labels: &[LabelInfo], names: &[String]) -> Result<BTreeSet<String>> {
    names
        .iter()
        .map(|name| {
            resolve_label_id(labels, name).ok_or_else(|| {
                GmailError::validation("label", format!("no label named '{}'", name))
            })
        })
        .collect()
}

async fn labels_if_needed(transport: &dyn MailTransport, needed: bool) -> Result<Vec<LabelInfo>> {
    if needed {
        transport.list_labels().await
    } else {
        Ok(Vec::new())
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the log writer so log lines print above the spinner
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_search(
    transport: &dyn MailTransport,
    config: &Config,
    args: &FilterArgs,
    max: Option<usize>,
    threads: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let filter = args.to_filter()?;
    let labels = resolve_all(
        &labels_if_needed(transport, !args.labels.is_empty()).await?,
        &args.labels,
    )?;

    let kind = if threads {
        ItemKind::Thread
    } else {
        ItemKind::Message
    };
    let fetcher = PaginatedFetcher::from_config(transport, config).with_kind(kind);
    let max = max.or(config.fetch.max_results);

    info!("Searching with query {:?}", filter.to_query());
    let listing = fetcher.fetch_listing(&filter, &labels, max, cancel).await?;

    for item in &listing.items {
        println!("{}\t{}", item.id, item.thread_id);
    }
    println!(
        "\n{} {} in {} pages{}",
        listing.items.len(),
        if threads { "threads" } else { "messages" },
        listing.pages,
        if listing.exhausted {
            ""
        } else {
            " (limit reached, more may match)"
        }
    );
    Ok(())
}

pub async fn run_show(
    transport: &dyn MailTransport,
    config: &Config,
    id: &str,
    thread: bool,
    full: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let messages = if thread {
        transport.get_thread(id).await?.messages
    } else {
        vec![transport.get_message(id).await?]
    };

    let flattener = MimeTreeFlattener::new(transport)
        .with_retry(RetryPolicy::from(&config.retry))
        .with_cancellation(cancel.clone());

    for message in messages {
        print_message(&flattener, message, full).await?;
    }
    Ok(())
}

async fn print_message(
    flattener: &MimeTreeFlattener<'_>,
    message: MessageDetail,
    full: bool,
) -> Result<()> {
    println!("Id:      {}", message.id);
    println!("Thread:  {}", message.thread_id);
    println!("Subject: {}", message.headers.subject);
    println!("From:    {}", message.headers.from);
    println!("To:      {}", message.headers.to);
    println!("Date:    {}", message.headers.date);
    println!("Labels:  {}", message.label_ids.join(", "));

    let mut parts = flattener.stream(&message.id, message.root);
    while let Some(part) = parts.next().await {
        let part = part?;
        println!("\n--- {} ({:?}) ---", part.filename, part.media_kind);
        match &part.payload {
            Payload::Text(text) if full => println!("{}", text),
            Payload::Text(text) => {
                for line in text.lines().take(20) {
                    println!("{}", truncate_string(line, 120));
                }
            }
            Payload::Bytes(bytes) => println!("{} bytes", bytes.len()),
        }
    }
    println!();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_drain(
    transport: &dyn MailTransport,
    config: &Config,
    args: &FilterArgs,
    action: &ActionArgs,
    max_rounds: Option<u32>,
    dry_run: bool,
    cancel: &CancellationToken,
    reporter: &ProgressReporter,
) -> Result<()> {
    if max_rounds == Some(0) {
        return Err(GmailError::validation("max_rounds", "must be at least 1"));
    }
    let filter = args.to_filter()?;
    let known = labels_if_needed(transport, action.needs_labels() || !args.labels.is_empty())
        .await?;
    let mutation = action.to_mutation(&known)?;
    let labels = resolve_all(&known, &args.labels)?;

    if filter.is_empty() && labels.is_empty() {
        return Err(GmailError::validation(
            "filter",
            "refusing to drain the whole mailbox; give at least one filter flag or label",
        ));
    }

    if dry_run {
        let listing = PaginatedFetcher::from_config(transport, config)
            .fetch_listing(&filter, &labels, config.fetch.max_results, cancel)
            .await?;
        println!(
            "Would apply {} to {}{} messages matching {:?}",
            mutation,
            if listing.exhausted { "" } else { "at least " },
            listing.items.len(),
            filter.to_query()
        );
        return Ok(());
    }

    let mut budget = DrainBudget::from(&config.mutation);
    if let Some(rounds) = max_rounds {
        budget.max_rounds = rounds;
    }

    let spinner = reporter.add_spinner(&format!("Applying {}...", mutation));
    let progress_bar = spinner.clone();
    let executor = BatchMutationExecutor::from_config(transport, config)
        .with_budget(budget)
        .with_progress(Arc::new(move |done| {
            progress_bar.set_message(format!("{} messages updated", done));
        }));

    match executor
        .drain_matching(&filter, &labels, &mutation, cancel)
        .await
    {
        Ok(count) => {
            reporter.finish_spinner(&spinner, &format!("Applied {} to {} messages", mutation, count));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            if let GmailError::MutationFailed { mutated, source } = &e {
                println!("Stopped after {} messages: {}", mutated, source);
            }
            Err(e)
        }
    }
}

pub async fn run_modify(
    transport: &dyn MailTransport,
    config: &Config,
    id: &str,
    action: &ActionArgs,
    untrash: bool,
    thread: bool,
) -> Result<()> {
    let executor = BatchMutationExecutor::from_config(transport, config);

    match (untrash, thread) {
        (true, false) => executor.untrash_message(id).await?,
        (true, true) => executor.untrash_thread(id).await?,
        _ if action.delete && thread => {
            return Err(GmailError::validation(
                "delete",
                "threads cannot be deleted permanently here; trash them instead",
            ));
        }
        _ if action.delete => executor.delete_message(id).await?,
        _ if action.trash && !action.needs_labels() => {
            if thread {
                executor.trash_thread(id).await?
            } else {
                executor.trash_message(id).await?
            }
        }
        _ => {
            let known = labels_if_needed(transport, action.needs_labels()).await?;
            let spec = action.to_spec(&known)?;
            if thread {
                executor.modify_thread(id, &spec).await?
            } else {
                executor.modify_message(id, &spec).await?
            }
        }
    }

    println!("Updated {} {}", if thread { "thread" } else { "message" }, id);
    Ok(())
}

pub async fn run_labels(
    transport: &dyn MailTransport,
    create: Option<&str>,
    text_color: &str,
    background_color: &str,
) -> Result<()> {
    if let Some(name) = create {
        let draft = LabelDraft::new(name)?.with_color(LabelColor::new(text_color, background_color)?);
        let id = transport.create_label(&draft).await?;
        println!("Created label '{}' with id {}", draft.name(), id);
        return Ok(());
    }

    let mut labels = transport.list_labels().await?;
    labels.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    for label in &labels {
        let kind = match label.label_type {
            LabelType::System => "system",
            LabelType::User => "user",
        };
        println!("{:<30} {:<8} {}", truncate_string(&label.name, 30), kind, label.id);
    }
    println!("\n{} labels", labels.len());
    Ok(())
}
