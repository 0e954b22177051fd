//! Gmail Sweep
//!
//! Bulk query and mutation engine for a Gmail mailbox: build a search from
//! structured criteria, list every match across continuation tokens, flatten
//! message bodies into decoded parts, and apply label changes or deletions in
//! provider-sized batches until nothing matches any more.
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_sweep::{
//!     auth::CredentialProvider, config::Config, mutation::BatchMutationExecutor,
//!     mutation::{Mutation, MutationSpec}, query::Filter,
//! };
//! use std::collections::BTreeSet;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let provider = CredentialProvider::from_config(&config.auth, &config.quota).await?;
//!     let transport = provider.authorized_transport();
//!
//!     let filter = Filter::new().from_addr("news@example.com");
//!     let trashed = BatchMutationExecutor::from_config(&transport, &config)
//!         .drain_matching(
//!             &filter,
//!             &BTreeSet::new(),
//!             &Mutation::Relabel(MutationSpec::trash()),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("trashed {trashed} messages");
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 credentials and Gmail hub construction
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`label`] - Label drafts, colours and name resolution
//! - [`mime`] - MIME tree flattening and base64url decoding
//! - [`models`] - Core data structures
//! - [`mutation`] - Batch label changes and drain loops
//! - [`pagination`] - Exhaustive listing over continuation tokens
//! - [`query`] - Structured filters and search-string rendering
//! - [`rate_limiter`] - Quota-unit token bucket
//! - [`retry`] - Exponential backoff for transient failures
//! - [`transport`] - The provider seam and its Gmail implementation

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod label;
pub mod mime;
pub mod models;
pub mod mutation;
pub mod pagination;
pub mod query;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

pub use error::{GmailError, Result};

pub use models::{
    ContentPart, ItemKind, ItemRef, MediaKind, MessageDetail, PageResult, Payload, RawPartNode,
    ThreadDetail,
};

pub use config::Config;
pub use label::{LabelColor, LabelDraft, LabelInfo};
pub use mime::MimeTreeFlattener;
pub use mutation::{BatchMutationExecutor, DrainBudget, Mutation, MutationSpec};
pub use pagination::PaginatedFetcher;
pub use query::{build_query, Filter, ReadState};
pub use transport::{GmailTransport, MailTransport};

pub use auth::CredentialProvider;
pub use cli::{Cli, Commands, ProgressReporter};
