//! Exhaustive listing over continuation tokens
//!
//! [`PageCursor`] is the pure state machine: it folds pages into an
//! accumulator and decides whether another call is needed. [`PaginatedFetcher`]
//! owns the I/O side: quota-paced calls, retries on transient errors, an
//! optional fixed delay between pages and cancellation.
//!
//! Listing is not a snapshot. Items arriving or leaving the mailbox between
//! two page calls can make the accumulated sequence contain duplicates or miss
//! items relative to any single instant. Callers that need exact sets must
//! deduplicate themselves; the fetcher preserves provider order and nothing
//! else.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Config, MAX_PAGE_SIZE};
use crate::error::{GmailError, Result};
use crate::models::{ItemKind, ItemRef, PageResult};
use crate::query::Filter;
use crate::retry::RetryPolicy;
use crate::transport::{ListRequest, MailTransport};

/// What to do after absorbing a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStep {
    /// Ask for the page behind this token
    Continue(String),
    /// The provider has no further pages
    Exhausted,
    /// The cap was reached; more items may still match
    LimitReached,
}

impl PageStep {
    pub fn is_done(&self) -> bool {
        !matches!(self, PageStep::Continue(_))
    }
}

/// Accumulates pages in provider order and decides when to stop
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    max_results: Option<usize>,
    items: Vec<ItemRef>,
    pages: usize,
}

impl PageCursor {
    pub fn new(max_results: Option<usize>) -> Self {
        Self {
            max_results,
            items: Vec::new(),
            pages: 0,
        }
    }

    /// Fold one page in. Items beyond the cap are dropped.
    pub fn absorb(&mut self, page: PageResult) -> PageStep {
        self.pages += 1;
        let token = page.next_token().map(str::to_string);
        self.items.extend(page.items);

        if let Some(max) = self.max_results {
            if self.items.len() >= max {
                let truncated = self.items.len() > max;
                self.items.truncate(max);
                if truncated || token.is_some() {
                    return PageStep::LimitReached;
                }
            }
        }

        match token {
            Some(token) => PageStep::Continue(token),
            None => PageStep::Exhausted,
        }
    }

    /// How many items the next page should ask for, given `page_size`
    pub fn next_page_size(&self, page_size: u32) -> u32 {
        match self.max_results {
            Some(max) => {
                let remaining = max.saturating_sub(self.items.len()).max(1);
                page_size.min(u32::try_from(remaining).unwrap_or(u32::MAX))
            }
            None => page_size,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<ItemRef> {
        self.items
    }
}

/// Result of an exhaustive fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub items: Vec<ItemRef>,
    pub pages: usize,
    /// False when the cap stopped the fetch before the provider ran out
    pub exhausted: bool,
}

#[derive(Clone)]
pub struct PaginatedFetcher<'a> {
    transport: &'a dyn MailTransport,
    kind: ItemKind,
    page_size: u32,
    include_spam_trash: bool,
    page_delay: Duration,
    retry: RetryPolicy,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(transport: &'a dyn MailTransport) -> Self {
        Self {
            transport,
            kind: ItemKind::Message,
            page_size: 100,
            include_spam_trash: false,
            page_delay: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(transport: &'a dyn MailTransport, config: &Config) -> Self {
        Self::new(transport)
            .with_page_size(config.fetch.page_size)
            .include_spam_trash(config.fetch.include_spam_trash)
            .with_page_delay(config.fetch.page_delay())
            .with_retry(RetryPolicy::from(&config.retry))
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Clamped to the provider's 1..=500 range
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn include_spam_trash(mut self, include: bool) -> Self {
        self.include_spam_trash = include;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn includes_spam_trash(&self) -> bool {
        self.include_spam_trash
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn request(
        &self,
        filter: &Filter,
        labels: &BTreeSet<String>,
        page_token: Option<&str>,
        page_size: u32,
    ) -> ListRequest {
        let label_ids: BTreeSet<String> = filter.labels.union(labels).cloned().collect();
        ListRequest {
            kind: self.kind,
            query: filter.query_param(),
            label_ids: label_ids.into_iter().collect(),
            page_token: page_token.map(str::to_string),
            page_size,
            include_spam_trash: self.include_spam_trash,
        }
    }

    /// Single list call with retries. `labels` are layered on top of the filter's own.
    pub async fn fetch_page(
        &self,
        filter: &Filter,
        labels: &BTreeSet<String>,
        page_token: Option<&str>,
    ) -> Result<PageResult> {
        filter.validate()?;
        let request = self.request(filter, labels, page_token, self.page_size);
        self.retry
            .run("list_page", &CancellationToken::new(), || {
                self.transport.list_page(&request)
            })
            .await
    }

    /// Follow continuation tokens until exhaustion or `max_results`.
    ///
    /// Failure or cancellation yields [`GmailError::FetchFailed`] carrying every
    /// item fetched before it.
    pub async fn fetch_all(
        &self,
        filter: &Filter,
        labels: &BTreeSet<String>,
        max_results: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ItemRef>> {
        self.fetch_listing(filter, labels, max_results, cancel)
            .await
            .map(|listing| listing.items)
    }

    pub async fn fetch_listing(
        &self,
        filter: &Filter,
        labels: &BTreeSet<String>,
        max_results: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Listing> {
        filter.validate()?;
        if max_results == Some(0) {
            return Err(GmailError::validation(
                "max_results",
                "must be greater than 0 when set",
            ));
        }

        let mut cursor = PageCursor::new(max_results);
        let mut token: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(fetch_failed(cursor, cancelled()));
            }

            let request = self.request(
                filter,
                labels,
                token.as_deref(),
                cursor.next_page_size(self.page_size),
            );
            let page = match self
                .retry
                .run("list_page", cancel, || self.transport.list_page(&request))
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(fetch_failed(cursor, e)),
            };

            let page_len = page.items.len();
            let step = cursor.absorb(page);
            debug!(
                "Fetched page {} with {} items ({} total)",
                cursor.pages(),
                page_len,
                cursor.len()
            );

            let exhausted = step == PageStep::Exhausted;
            match step {
                PageStep::Continue(next) => token = Some(next),
                PageStep::Exhausted | PageStep::LimitReached => {
                    info!(
                        "Listing finished: {} items in {} pages{}",
                        cursor.len(),
                        cursor.pages(),
                        if exhausted { "" } else { " (limit reached)" }
                    );
                    let pages = cursor.pages();
                    return Ok(Listing {
                        items: cursor.into_items(),
                        pages,
                        exhausted,
                    });
                }
            }

            if !self.page_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(fetch_failed(cursor, cancelled())),
                    _ = tokio::time::sleep(self.page_delay) => {}
                }
            }
        }
    }
}

fn cancelled() -> GmailError {
    GmailError::OperationCancelled("listing".to_string())
}

fn fetch_failed(cursor: PageCursor, source: GmailError) -> GmailError {
    GmailError::FetchFailed {
        partial: cursor.into_items(),
        source: Box::new(source),
    }
}
