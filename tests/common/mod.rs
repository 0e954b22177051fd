//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_sweep::error::{GmailError, Result};
use gmail_sweep::label::{LabelDraft, LabelInfo, LabelType};
use gmail_sweep::models::{ItemRef, MessageDetail, MessageHeaders, PageResult, ThreadDetail};
use gmail_sweep::retry::RetryPolicy;
use gmail_sweep::transport::{ListRequest, MailTransport};
use mockall::mock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

/// `n` refs named `{prefix}{i}`, each in its own thread
pub fn item_refs(prefix: &str, n: usize) -> Vec<ItemRef> {
    (0..n)
        .map(|i| ItemRef::new(format!("{prefix}{i}"), format!("thread_{prefix}{i}")))
        .collect()
}

/// Retries with millisecond backoff so tests do not sit out real delays
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn system_label(id: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: id.to_string(),
        label_type: LabelType::System,
    }
}

pub fn user_label(id: &str, name: &str) -> LabelInfo {
    LabelInfo {
        id: id.to_string(),
        name: name.to_string(),
        label_type: LabelType::User,
    }
}

/// How the fake reacts to a batch mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateBehavior {
    /// Mutated ids stop matching, like trashing from the inbox
    Shrink,
    /// Mutated ids keep matching, like adding a label nobody filters on
    Stuck,
    /// Mutated ids move to the trash and only match listings that include it
    Trash,
}

#[derive(Default)]
struct MailboxState {
    matching: Vec<ItemRef>,
    trashed: BTreeSet<String>,
    list_requests: Vec<ListRequest>,
    batch_calls: usize,
    batches: Vec<Vec<String>>,
    batch_labels: Vec<(Vec<String>, Vec<String>)>,
    deleted: Vec<String>,
    single_calls: Vec<String>,
    attachment_calls: Vec<String>,
    list_failures: HashMap<usize, GmailError>,
    batch_failures: HashMap<usize, GmailError>,
}

/// Stateful in-memory mailbox
///
/// Listing pages over the ids that currently match; the page token is the
/// offset of the next page. Failures can be scheduled for the n-th list or
/// batch call (1-based).
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
    behavior: MutateBehavior,
    attachments: HashMap<String, Vec<u8>>,
    messages: HashMap<String, MessageDetail>,
    labels: Vec<LabelInfo>,
}

impl FakeMailbox {
    pub fn new(matching: Vec<ItemRef>, behavior: MutateBehavior) -> Self {
        Self {
            state: Mutex::new(MailboxState {
                matching,
                ..Default::default()
            }),
            behavior,
            attachments: HashMap::new(),
            messages: HashMap::new(),
            labels: vec![
                system_label("INBOX"),
                system_label("TRASH"),
                system_label("UNREAD"),
            ],
        }
    }

    pub fn with_attachment(mut self, attachment_id: &str, bytes: &[u8]) -> Self {
        self.attachments
            .insert(attachment_id.to_string(), bytes.to_vec());
        self
    }

    pub fn with_message(mut self, message: MessageDetail) -> Self {
        self.messages.insert(message.id.clone(), message);
        self
    }

    pub fn with_label(mut self, label: LabelInfo) -> Self {
        self.labels.push(label);
        self
    }

    /// Fail the n-th list call with `error`
    pub fn fail_list_call(self, n: usize, error: GmailError) -> Self {
        self.lock().list_failures.insert(n, error);
        self
    }

    /// Fail the n-th batch call with `error`
    pub fn fail_batch_call(self, n: usize, error: GmailError) -> Self {
        self.lock().batch_failures.insert(n, error);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap()
    }

    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.lock().list_requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_requests.len()
    }

    /// Every batch call, including failed ones
    pub fn batch_calls(&self) -> usize {
        self.lock().batch_calls
    }

    /// Ids of the batch calls that succeeded
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.lock().batches.clone()
    }

    pub fn batch_labels(&self) -> Vec<(Vec<String>, Vec<String>)> {
        self.lock().batch_labels.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn single_calls(&self) -> Vec<String> {
        self.lock().single_calls.clone()
    }

    pub fn attachment_calls(&self) -> Vec<String> {
        self.lock().attachment_calls.clone()
    }

    pub fn remaining(&self) -> usize {
        let state = self.lock();
        state
            .matching
            .iter()
            .filter(|item| !state.trashed.contains(&item.id))
            .count()
    }

    fn record_batch(&self, ids: &[String]) -> Result<()> {
        let mut state = self.lock();
        state.batch_calls += 1;
        let call = state.batch_calls;
        if let Some(error) = state.batch_failures.remove(&call) {
            return Err(error);
        }
        state.batches.push(ids.to_vec());
        match self.behavior {
            MutateBehavior::Shrink => {
                let gone: BTreeSet<&String> = ids.iter().collect();
                state.matching.retain(|item| !gone.contains(&item.id));
            }
            MutateBehavior::Stuck => {}
            MutateBehavior::Trash => state.trashed.extend(ids.iter().cloned()),
        }
        Ok(())
    }

    fn record_single(&self, call: String) -> Result<()> {
        self.lock().single_calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl MailTransport for FakeMailbox {
    async fn list_page(&self, request: &ListRequest) -> Result<PageResult> {
        let mut state = self.lock();
        state.list_requests.push(request.clone());
        let call = state.list_requests.len();
        if let Some(error) = state.list_failures.remove(&call) {
            return Err(error);
        }

        let offset: usize = match &request.page_token {
            Some(token) => token
                .parse()
                .map_err(|_| GmailError::BadRequest(format!("bad page token {token}")))?,
            None => 0,
        };
        let visible: Vec<ItemRef> = state
            .matching
            .iter()
            .filter(|item| request.include_spam_trash || !state.trashed.contains(&item.id))
            .cloned()
            .collect();
        let end = (offset + request.page_size as usize).min(visible.len());
        let start = offset.min(end);
        let items = visible[start..end].to_vec();
        let next = (end < visible.len()).then(|| end.to_string());

        Ok(PageResult::new(items, next))
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail> {
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| GmailError::NotFound(id.to_string()))
    }

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail> {
        let mut messages: Vec<MessageDetail> = self
            .messages
            .values()
            .filter(|m| m.thread_id == id)
            .cloned()
            .collect();
        if messages.is_empty() {
            return Err(GmailError::NotFound(id.to_string()));
        }
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ThreadDetail {
            id: id.to_string(),
            messages,
        })
    }

    async fn get_attachment(&self, _message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        self.lock()
            .attachment_calls
            .push(attachment_id.to_string());
        self.attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| GmailError::NotFound(attachment_id.to_string()))
    }

    async fn batch_modify(&self, ids: &[String], add: &[String], remove: &[String]) -> Result<()> {
        self.record_batch(ids)?;
        self.lock()
            .batch_labels
            .push((add.to_vec(), remove.to_vec()));
        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        self.record_batch(ids)?;
        self.lock().deleted.extend(ids.iter().cloned());
        Ok(())
    }

    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        self.record_single(format!("modify_message {id} +{add:?} -{remove:?}"))
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        self.record_single(format!("trash_message {id}"))
    }

    async fn untrash_message(&self, id: &str) -> Result<()> {
        self.record_single(format!("untrash_message {id}"))
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        self.record_single(format!("delete_message {id}"))
    }

    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        self.record_single(format!("modify_thread {id} +{add:?} -{remove:?}"))
    }

    async fn trash_thread(&self, id: &str) -> Result<()> {
        self.record_single(format!("trash_thread {id}"))
    }

    async fn untrash_thread(&self, id: &str) -> Result<()> {
        self.record_single(format!("untrash_thread {id}"))
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.labels.clone())
    }

    async fn create_label(&self, draft: &LabelDraft) -> Result<String> {
        Ok(format!("Label_{}", draft.name().len()))
    }
}

/// A message whose headers carry `subject` and whose body is `root`
pub fn message(id: &str, thread_id: &str, subject: &str, root: gmail_sweep::RawPartNode) -> MessageDetail {
    MessageDetail {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        label_ids: vec!["INBOX".to_string()],
        headers: MessageHeaders {
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            to: "me@example.com".to_string(),
            date: "Mon, 1 Jan 2024 10:00:00 -0800".to_string(),
        },
        root,
    }
}

// Mock implementation of MailTransport for call-count expectations
mock! {
    pub Transport {}

    #[async_trait::async_trait]
    impl MailTransport for Transport {
        async fn list_page(&self, request: &ListRequest) -> Result<PageResult>;
        async fn get_message(&self, id: &str) -> Result<MessageDetail>;
        async fn get_thread(&self, id: &str) -> Result<ThreadDetail>;
        async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
        async fn batch_modify(&self, ids: &[String], add: &[String], remove: &[String]) -> Result<()>;
        async fn batch_delete(&self, ids: &[String]) -> Result<()>;
        async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
        async fn trash_message(&self, id: &str) -> Result<()>;
        async fn untrash_message(&self, id: &str) -> Result<()>;
        async fn delete_message(&self, id: &str) -> Result<()>;
        async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
        async fn trash_thread(&self, id: &str) -> Result<()>;
        async fn untrash_thread(&self, id: &str) -> Result<()>;
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, draft: &LabelDraft) -> Result<String>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_refs() {
        let refs = item_refs("m", 3);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[2].id, "m2");
        assert_eq!(refs[2].thread_id, "thread_m2");
    }

    #[tokio::test]
    async fn test_fake_pages_by_offset() {
        let mailbox = FakeMailbox::new(item_refs("m", 5), MutateBehavior::Shrink);
        let request = ListRequest {
            page_size: 2,
            page_token: Some("2".to_string()),
            ..Default::default()
        };

        let page = mailbox.list_page(&request).await.unwrap();
        assert_eq!(page.items[0].id, "m2");
        assert_eq!(page.next_token(), Some("4"));
    }
}
