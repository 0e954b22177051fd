//! Structured search filters and their translation to Gmail's search grammar
//!
//! Gmail treats space-separated tokens as an implicit AND, so token order carries
//! no meaning for the provider. It is still fixed here so the same filter always
//! renders to the same string:
//!
//! `<free text> before:<date> after:<date> is:read|is:unread from:<addr> to:<addr> subject:<term>`
//!
//! Labels are deliberately not part of the string. They travel as a separate
//! `labelIds` list on the listing request.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{GmailError, Result};

/// Date format used by the search grammar (year/month/day)
pub const QUERY_DATE_FORMAT: &str = "%Y/%m/%d";

/// Read-state constraint; `Any` leaves it out of the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Any,
    Read,
    Unread,
}

impl From<Option<bool>> for ReadState {
    fn from(read: Option<bool>) -> Self {
        match read {
            None => ReadState::Any,
            Some(true) => ReadState::Read,
            Some(false) => ReadState::Unread,
        }
    }
}

/// Search filter. An empty filter matches every item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub free_text: Option<String>,
    pub read: ReadState,
    pub before: Option<NaiveDate>,
    pub after: Option<NaiveDate>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub labels: BTreeSet<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }

    pub fn read(mut self, read: ReadState) -> Self {
        self.read = read;
        self
    }

    pub fn before(mut self, date: NaiveDate) -> Self {
        self.before = Some(date);
        self
    }

    pub fn after(mut self, date: NaiveDate) -> Self {
        self.after = Some(date);
        self
    }

    pub fn from_addr(mut self, addr: impl Into<String>) -> Self {
        self.from = Some(addr.into());
        self
    }

    pub fn to_addr(mut self, addr: impl Into<String>) -> Self {
        self.to = Some(addr.into());
        self
    }

    pub fn subject(mut self, term: impl Into<String>) -> Self {
        self.subject = Some(term.into());
        self
    }

    pub fn label(mut self, label_id: impl Into<String>) -> Self {
        self.labels.insert(label_id.into());
        self
    }

    /// Reject filters that cannot be expressed or can never match
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("filter.from", &self.from),
            ("filter.to", &self.to),
        ] {
            if let Some(addr) = value {
                if addr.trim().is_empty() {
                    return Err(GmailError::validation(field, "address cannot be empty"));
                }
                if addr.chars().any(char::is_whitespace) {
                    return Err(GmailError::validation(
                        field,
                        format!("address '{}' cannot contain whitespace", addr),
                    ));
                }
            }
        }

        if let Some(subject) = &self.subject {
            if subject.trim().is_empty() {
                return Err(GmailError::validation("filter.subject", "term cannot be empty"));
            }
            if subject.contains(['(', ')']) {
                return Err(GmailError::validation(
                    "filter.subject",
                    "term cannot contain parentheses",
                ));
            }
        }

        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after >= before {
                return Err(GmailError::validation(
                    "filter.after",
                    format!("after ({}) must be earlier than before ({})", after, before),
                ));
            }
        }

        if self.labels.iter().any(|label| label.trim().is_empty()) {
            return Err(GmailError::validation("filter.labels", "label id cannot be empty"));
        }

        Ok(())
    }

    /// Tokens in their fixed emission order
    pub fn tokens(&self) -> Vec<QueryToken> {
        let mut tokens = Vec::new();

        if let Some(text) = self.free_text.as_deref() {
            if !text.trim().is_empty() {
                tokens.push(QueryToken::FreeText(text.to_string()));
            }
        }
        if let Some(date) = self.before {
            tokens.push(QueryToken::Before(date));
        }
        if let Some(date) = self.after {
            tokens.push(QueryToken::After(date));
        }
        match self.read {
            ReadState::Any => {}
            ReadState::Read => tokens.push(QueryToken::IsRead(true)),
            ReadState::Unread => tokens.push(QueryToken::IsRead(false)),
        }
        if let Some(addr) = &self.from {
            tokens.push(QueryToken::From(addr.clone()));
        }
        if let Some(addr) = &self.to {
            tokens.push(QueryToken::To(addr.clone()));
        }
        if let Some(term) = &self.subject {
            tokens.push(QueryToken::Subject(term.trim().to_string()));
        }

        tokens
    }

    /// Render the search string. Empty means "match everything".
    pub fn to_query(&self) -> String {
        build_query(self)
    }

    /// Value for the `q` request parameter; `None` when the parameter must be omitted
    pub fn query_param(&self) -> Option<String> {
        Some(self.to_query()).filter(|q| !q.is_empty())
    }

    pub fn label_ids(&self) -> Vec<String> {
        self.labels.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty() && self.labels.is_empty()
    }
}

/// Translate a filter into Gmail's search-string grammar
pub fn build_query(filter: &Filter) -> String {
    filter
        .tokens()
        .iter()
        .map(QueryToken::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One field of a filter as it appears in the search string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryToken {
    FreeText(String),
    Before(NaiveDate),
    After(NaiveDate),
    IsRead(bool),
    From(String),
    To(String),
    Subject(String),
}

impl QueryToken {
    /// Parse a single rendered token back into its field.
    /// Anything without a recognised operator is free text.
    pub fn parse(token: &str) -> Option<QueryToken> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let parsed = if let Some(date) = token.strip_prefix("before:") {
            NaiveDate::parse_from_str(date, QUERY_DATE_FORMAT)
                .ok()
                .map(QueryToken::Before)
        } else if let Some(date) = token.strip_prefix("after:") {
            NaiveDate::parse_from_str(date, QUERY_DATE_FORMAT)
                .ok()
                .map(QueryToken::After)
        } else if token == "is:read" {
            Some(QueryToken::IsRead(true))
        } else if token == "is:unread" {
            Some(QueryToken::IsRead(false))
        } else if let Some(addr) = token.strip_prefix("from:") {
            Some(QueryToken::From(addr.to_string()))
        } else if let Some(addr) = token.strip_prefix("to:") {
            Some(QueryToken::To(addr.to_string()))
        } else if let Some(term) = token.strip_prefix("subject:") {
            let term = term
                .strip_prefix('(')
                .and_then(|t| t.strip_suffix(')'))
                .unwrap_or(term);
            Some(QueryToken::Subject(term.to_string()))
        } else {
            None
        };

        Some(parsed.unwrap_or_else(|| QueryToken::FreeText(token.to_string())))
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryToken::FreeText(text) => f.write_str(text),
            QueryToken::Before(date) => write!(f, "before:{}", date.format(QUERY_DATE_FORMAT)),
            QueryToken::After(date) => write!(f, "after:{}", date.format(QUERY_DATE_FORMAT)),
            QueryToken::IsRead(true) => f.write_str("is:read"),
            QueryToken::IsRead(false) => f.write_str("is:unread"),
            QueryToken::From(addr) => write!(f, "from:{}", addr),
            QueryToken::To(addr) => write!(f, "to:{}", addr),
            QueryToken::Subject(term) if term.chars().any(char::is_whitespace) => {
                write!(f, "subject:({})", term)
            }
            QueryToken::Subject(term) => write!(f, "subject:{}", term),
        }
    }
}
