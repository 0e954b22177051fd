//! Bulk label changes, trash and permanent delete
//!
//! [`BatchMutationExecutor::drain_matching`] repeats "list what matches, mutate
//! it" until a listing comes back empty. Mutating usually removes items from
//! the match set (trashed mail drops out of default listings, a removed label
//! no longer matches a label filter), which is what makes the loop converge.
//! Another client re-applying labels as fast as they are removed would keep it
//! going forever; [`DrainBudget`] and the cancellation token bound that case.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, MutationConfig, MAX_BATCH_SIZE};
use crate::error::{GmailError, Result};
use crate::models::{ItemKind, ItemRef};
use crate::pagination::PaginatedFetcher;
use crate::query::Filter;
use crate::retry::RetryPolicy;
use crate::transport::MailTransport;

pub const TRASH: &str = "TRASH";
pub const INBOX: &str = "INBOX";
pub const UNREAD: &str = "UNREAD";

/// Candidates listed per drain round when the config sets no cap
const DEFAULT_ROUND_LIMIT: usize = 5000;

/// Called with the running total after every applied batch
pub type ProgressCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Label ids to add and remove; never empty, never overlapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSpec {
    add: BTreeSet<String>,
    remove: BTreeSet<String>,
}

impl MutationSpec {
    pub fn new<A, R, S, T>(add: A, remove: R) -> Result<Self>
    where
        A: IntoIterator<Item = S>,
        R: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let add: BTreeSet<String> = add.into_iter().map(Into::into).collect();
        let remove: BTreeSet<String> = remove.into_iter().map(Into::into).collect();

        if add.is_empty() && remove.is_empty() {
            return Err(GmailError::validation(
                "mutation",
                "at least one label must be added or removed",
            ));
        }
        if add.iter().chain(remove.iter()).any(|id| id.trim().is_empty()) {
            return Err(GmailError::validation("mutation", "label id cannot be empty"));
        }
        if let Some(id) = add.intersection(&remove).next() {
            return Err(GmailError::validation(
                "mutation",
                format!("label '{}' is both added and removed", id),
            ));
        }

        Ok(Self { add, remove })
    }

    pub fn trash() -> Self {
        Self::single(Some(TRASH), None)
    }

    pub fn untrash() -> Self {
        Self::single(None, Some(TRASH))
    }

    pub fn archive() -> Self {
        Self::single(None, Some(INBOX))
    }

    pub fn mark_read() -> Self {
        Self::single(None, Some(UNREAD))
    }

    pub fn mark_unread() -> Self {
        Self::single(Some(UNREAD), None)
    }

    fn single(add: Option<&str>, remove: Option<&str>) -> Self {
        Self {
            add: add.into_iter().map(str::to_string).collect(),
            remove: remove.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn add_labels(&self) -> Vec<String> {
        self.add.iter().cloned().collect()
    }

    pub fn remove_labels(&self) -> Vec<String> {
        self.remove.iter().cloned().collect()
    }
}

impl fmt::Display for MutationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let add: Vec<&str> = self.add.iter().map(String::as_str).collect();
        let remove: Vec<&str> = self.remove.iter().map(String::as_str).collect();
        write!(f, "+[{}] -[{}]", add.join(","), remove.join(","))
    }
}

/// What a batch call does to its ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// batchModify with the label sets of a [`MutationSpec`]
    Relabel(MutationSpec),
    /// batchDelete; skips the trash and cannot be undone
    PermanentDelete,
}

impl Mutation {
    /// True when mutated items move to the trash
    pub fn adds_trash(&self) -> bool {
        matches!(self, Mutation::Relabel(spec) if spec.add.contains(TRASH))
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Relabel(spec) => write!(f, "relabel {}", spec),
            Mutation::PermanentDelete => write!(f, "permanent delete"),
        }
    }
}

/// Ids for one batch call, size-checked at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    ids: Vec<String>,
}

impl Batch {
    pub fn new(items: &[ItemRef]) -> Result<Self> {
        if items.is_empty() {
            return Err(GmailError::validation("batch", "batch cannot be empty"));
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(GmailError::validation(
                "batch",
                format!(
                    "{} ids exceed the provider maximum of {}",
                    items.len(),
                    MAX_BATCH_SIZE
                ),
            ));
        }
        Ok(Self {
            ids: items.iter().map(|item| item.id.clone()).collect(),
        })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split `items` into consecutive batches of at most `batch_size`, keeping order
pub fn partition(items: &[ItemRef], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(GmailError::validation(
            "batch_size",
            format!("must be between 1 and {}", MAX_BATCH_SIZE),
        ));
    }
    items.chunks(batch_size).map(Batch::new).collect()
}

/// Upper bound on a drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
    pub max_rounds: u32,
    pub max_duration: Option<Duration>,
}

impl Default for DrainBudget {
    fn default() -> Self {
        Self::from(&MutationConfig::default())
    }
}

impl From<&MutationConfig> for DrainBudget {
    fn from(config: &MutationConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            max_duration: config.max_duration_secs.map(Duration::from_secs),
        }
    }
}

impl DrainBudget {
    fn exhausted(&self, rounds: u32, started: Instant) -> bool {
        rounds >= self.max_rounds
            || self
                .max_duration
                .is_some_and(|limit| started.elapsed() >= limit)
    }
}

pub struct BatchMutationExecutor<'a> {
    transport: &'a dyn MailTransport,
    fetcher: PaginatedFetcher<'a>,
    retry: RetryPolicy,
    batch_size: usize,
    round_limit: usize,
    budget: DrainBudget,
    progress: Option<ProgressCallback>,
}

impl<'a> BatchMutationExecutor<'a> {
    pub fn new(transport: &'a dyn MailTransport) -> Self {
        Self {
            transport,
            fetcher: PaginatedFetcher::new(transport),
            retry: RetryPolicy::default(),
            batch_size: MAX_BATCH_SIZE,
            round_limit: DEFAULT_ROUND_LIMIT,
            budget: DrainBudget::default(),
            progress: None,
        }
    }

    pub fn from_config(transport: &'a dyn MailTransport, config: &Config) -> Self {
        Self {
            transport,
            fetcher: PaginatedFetcher::from_config(transport, config),
            retry: RetryPolicy::from(&config.retry),
            batch_size: config.mutation.batch_size.clamp(1, MAX_BATCH_SIZE),
            round_limit: config.fetch.max_results.unwrap_or(DEFAULT_ROUND_LIMIT),
            budget: DrainBudget::from(&config.mutation),
            progress: None,
        }
    }

    /// Batch endpoints only take message ids, so the fetcher is forced to list messages
    pub fn with_fetcher(mut self, fetcher: PaginatedFetcher<'a>) -> Self {
        self.fetcher = fetcher.with_kind(ItemKind::Message);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Clamped to 1..=1000
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Most candidates listed per drain round
    pub fn with_round_limit(mut self, limit: usize) -> Self {
        self.round_limit = limit.max(1);
        self
    }

    pub fn with_budget(mut self, budget: DrainBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    async fn send(&self, batch: &Batch, mutation: &Mutation, cancel: &CancellationToken) -> Result<()> {
        debug!("Applying {} to {} items", mutation, batch.len());
        match mutation {
            Mutation::Relabel(spec) => {
                let add = spec.add_labels();
                let remove = spec.remove_labels();
                self.retry
                    .run("batch_modify", cancel, || {
                        self.transport.batch_modify(batch.ids(), &add, &remove)
                    })
                    .await
            }
            Mutation::PermanentDelete => {
                self.retry
                    .run("batch_delete", cancel, || {
                        self.transport.batch_delete(batch.ids())
                    })
                    .await
            }
        }
    }

    /// Apply `mutation` to one provider-sized batch.
    ///
    /// Size is checked before anything is sent; a rejected call comes back as
    /// [`GmailError::MutationFailed`] with nothing mutated.
    pub async fn apply_batch(&self, items: &[ItemRef], mutation: &Mutation) -> Result<()> {
        let batch = Batch::new(items)?;
        self.send(&batch, mutation, &CancellationToken::new())
            .await
            .map_err(|e| GmailError::MutationFailed {
                mutated: 0,
                source: Box::new(e),
            })
    }

    /// Mutate everything matching `filter` and `labels` until nothing matches.
    ///
    /// Returns the number of items mutated. Any failure, cancellation or budget
    /// exhaustion yields [`GmailError::MutationFailed`] with the count applied
    /// so far; applied batches are never rolled back.
    pub async fn drain_matching(
        &self,
        filter: &Filter,
        labels: &BTreeSet<String>,
        mutation: &Mutation,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        filter.validate()?;

        // trashed items would keep matching a listing that includes the trash
        let without_trash;
        let fetcher = if mutation.adds_trash() && self.fetcher.includes_spam_trash() {
            debug!("Listing without spam and trash while draining into the trash");
            without_trash = self.fetcher.clone().include_spam_trash(false);
            &without_trash
        } else {
            &self.fetcher
        };

        let started = Instant::now();
        let mut mutated = 0usize;
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(drain_failed(mutated, cancelled()));
            }

            let candidates = fetcher
                .fetch_all(filter, labels, Some(self.round_limit), cancel)
                .await
                .map_err(|e| drain_failed(mutated, e))?;

            if candidates.is_empty() {
                info!(
                    "Drain complete: {} items mutated in {} rounds",
                    mutated, rounds
                );
                return Ok(mutated);
            }

            if self.budget.exhausted(rounds, started) {
                warn!(
                    "Drain budget exhausted after {} rounds; {} candidates still match",
                    rounds,
                    candidates.len()
                );
                return Err(drain_failed(
                    mutated,
                    GmailError::DrainBudgetExceeded { rounds },
                ));
            }
            rounds += 1;

            let batches =
                partition(&candidates, self.batch_size).map_err(|e| drain_failed(mutated, e))?;
            debug!(
                "Drain round {}: {} candidates in {} batches",
                rounds,
                candidates.len(),
                batches.len()
            );

            for batch in &batches {
                if cancel.is_cancelled() {
                    return Err(drain_failed(mutated, cancelled()));
                }
                self.send(batch, mutation, cancel)
                    .await
                    .map_err(|e| drain_failed(mutated, e))?;
                mutated += batch.len();
                if let Some(progress) = &self.progress {
                    progress(mutated);
                }
            }

            info!(
                "Drain round {} finished: {} items ({} total)",
                rounds,
                candidates.len(),
                mutated
            );
        }
    }

    pub async fn modify_message(&self, id: &str, spec: &MutationSpec) -> Result<()> {
        let id = item_id(id)?;
        let (add, remove) = (spec.add_labels(), spec.remove_labels());
        self.single("modify_message", || self.transport.modify_message(id, &add, &remove))
            .await
    }

    pub async fn trash_message(&self, id: &str) -> Result<()> {
        let id = item_id(id)?;
        self.single("trash_message", || self.transport.trash_message(id))
            .await
    }

    pub async fn untrash_message(&self, id: &str) -> Result<()> {
        let id = item_id(id)?;
        self.single("untrash_message", || self.transport.untrash_message(id))
            .await
    }

    /// Permanently delete one message, bypassing the trash
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        let id = item_id(id)?;
        self.single("delete_message", || self.transport.delete_message(id))
            .await
    }

    pub async fn modify_thread(&self, id: &str, spec: &MutationSpec) -> Result<()> {
        let id = item_id(id)?;
        let (add, remove) = (spec.add_labels(), spec.remove_labels());
        self.single("modify_thread", || self.transport.modify_thread(id, &add, &remove))
            .await
    }

    pub async fn trash_thread(&self, id: &str) -> Result<()> {
        let id = item_id(id)?;
        self.single("trash_thread", || self.transport.trash_thread(id))
            .await
    }

    pub async fn untrash_thread(&self, id: &str) -> Result<()> {
        let id = item_id(id)?;
        self.single("untrash_thread", || self.transport.untrash_thread(id))
            .await
    }

    async fn single<F, Fut>(&self, operation: &str, call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.retry
            .run(operation, &CancellationToken::new(), call)
            .await
    }
}

fn item_id(id: &str) -> Result<&str> {
    if id.trim().is_empty() {
        Err(GmailError::validation("id", "item id cannot be empty"))
    } else {
        Ok(id)
    }
}

fn cancelled() -> GmailError {
    GmailError::OperationCancelled("drain".to_string())
}

fn drain_failed(mutated: usize, source: GmailError) -> GmailError {
    GmailError::MutationFailed {
        mutated,
        source: Box::new(source),
    }
}
