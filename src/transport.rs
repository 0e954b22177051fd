//! The seam between the engine and the Gmail REST API
//!
//! [`MailTransport`] is the only thing the fetcher, flattener and mutation
//! executor talk to. [`GmailTransport`] implements it on top of the
//! `google-gmail1` hub with quota pacing and a per-request timeout; retries are
//! left to the callers so each one can decide what to do with partial progress.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use google_gmail1::api::{
    BatchDeleteMessagesRequest, BatchModifyMessagesRequest, Label, Message, MessagePart,
    ModifyMessageRequest, ModifyThreadRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{GmailError, Result};
use crate::label::{LabelDraft, LabelInfo, LabelType};
use crate::models::{
    ItemKind, ItemRef, MessageDetail, MessageHeaders, PageResult, RawLeaf, RawPartNode,
    ThreadDetail,
};
use crate::rate_limiter::{QuotaCost, QuotaRateLimiter};

/// Full mailbox access; batchDelete refuses anything narrower
pub const MAIL_SCOPE: &str = "https://mail.google.com/";

/// The authenticated account
pub const USER_ID: &str = "me";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters of one list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub kind: ItemKind,
    /// `None` means the `q` parameter is left off the request entirely
    pub query: Option<String>,
    pub label_ids: Vec<String>,
    pub page_token: Option<String>,
    pub page_size: u32,
    pub include_spam_trash: bool,
}

/// Operations the engine needs from the mail provider
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Fetch one page of message or thread references
    async fn list_page(&self, request: &ListRequest) -> Result<PageResult>;

    /// Fetch a message with its full part tree
    async fn get_message(&self, id: &str) -> Result<MessageDetail>;

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail>;

    /// Fetch an attachment body, already decoded
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// Add and remove labels on up to 1000 messages in one call
    async fn batch_modify(&self, ids: &[String], add: &[String], remove: &[String]) -> Result<()>;

    /// Permanently delete up to 1000 messages in one call
    async fn batch_delete(&self, ids: &[String]) -> Result<()>;

    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;

    async fn trash_message(&self, id: &str) -> Result<()>;

    async fn untrash_message(&self, id: &str) -> Result<()>;

    /// Permanently delete a single message, bypassing the trash
    async fn delete_message(&self, id: &str) -> Result<()>;

    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;

    async fn trash_thread(&self, id: &str) -> Result<()>;

    async fn untrash_thread(&self, id: &str) -> Result<()>;

    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a label and return its id
    async fn create_label(&self, draft: &LabelDraft) -> Result<String>;
}

/// Production transport backed by the Gmail API hub
///
/// Cheap to clone; clones share the hub and the quota bucket.
#[derive(Clone)]
pub struct GmailTransport {
    hub: Arc<GmailHub>,
    limiter: QuotaRateLimiter,
    request_timeout: Duration,
}

impl GmailTransport {
    pub fn new(hub: Arc<GmailHub>, limiter: QuotaRateLimiter) -> Self {
        Self {
            hub,
            limiter,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &QuotaRateLimiter {
        &self.limiter
    }

    /// Pay the quota for `cost`, then run the call under the request timeout
    async fn call<T, Fut>(&self, operation: &str, cost: QuotaCost, call: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        self.limiter.acquire(cost).await;
        debug!("Calling Gmail API: {}", operation);

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(GmailError::from),
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation, self.request_timeout
                );
                Err(GmailError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn list_page(&self, request: &ListRequest) -> Result<PageResult> {
        let users = self.hub.users();

        match request.kind {
            ItemKind::Message => {
                let mut call = users
                    .messages_list(USER_ID)
                    .max_results(request.page_size)
                    .include_spam_trash(request.include_spam_trash);
                if let Some(query) = request.query.as_deref() {
                    call = call.q(query);
                }
                if let Some(token) = request.page_token.as_deref() {
                    call = call.page_token(token);
                }
                for label in &request.label_ids {
                    call = call.add_label_ids(label);
                }

                let (_, response) = self
                    .call(
                        "messages.list",
                        QuotaCost::ListMessages,
                        call.add_scope(MAIL_SCOPE).doit(),
                    )
                    .await?;

                let items = response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| {
                        let id = m.id?;
                        Some(ItemRef::new(id, m.thread_id.unwrap_or_default()))
                    })
                    .collect();

                Ok(PageResult::new(items, response.next_page_token))
            }
            ItemKind::Thread => {
                let mut call = users
                    .threads_list(USER_ID)
                    .max_results(request.page_size)
                    .include_spam_trash(request.include_spam_trash);
                if let Some(query) = request.query.as_deref() {
                    call = call.q(query);
                }
                if let Some(token) = request.page_token.as_deref() {
                    call = call.page_token(token);
                }
                for label in &request.label_ids {
                    call = call.add_label_ids(label);
                }

                let (_, response) = self
                    .call(
                        "threads.list",
                        QuotaCost::ListThreads,
                        call.add_scope(MAIL_SCOPE).doit(),
                    )
                    .await?;

                let items = response
                    .threads
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|t| t.id.map(|id| ItemRef::new(id.clone(), id)))
                    .collect();

                Ok(PageResult::new(items, response.next_page_token))
            }
        }
    }

    async fn get_message(&self, id: &str) -> Result<MessageDetail> {
        let call = self
            .hub
            .users()
            .messages_get(USER_ID, id)
            .format("full")
            .add_scope(MAIL_SCOPE)
            .doit();
        let (_, message) = self.call("messages.get", QuotaCost::GetMessage, call).await?;
        message_detail(message)
    }

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail> {
        let call = self
            .hub
            .users()
            .threads_get(USER_ID, id)
            .format("full")
            .add_scope(MAIL_SCOPE)
            .doit();
        let (_, thread) = self.call("threads.get", QuotaCost::GetThread, call).await?;

        let messages = thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(message_detail)
            .collect::<Result<Vec<_>>>()?;

        Ok(ThreadDetail {
            id: thread.id.unwrap_or_else(|| id.to_string()),
            messages,
        })
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let call = self
            .hub
            .users()
            .messages_attachments_get(USER_ID, message_id, attachment_id)
            .add_scope(MAIL_SCOPE)
            .doit();
        let (_, body) = self
            .call("messages.attachments.get", QuotaCost::GetAttachment, call)
            .await?;

        body.data.ok_or_else(|| {
            GmailError::InvalidMessageFormat(format!(
                "Attachment {} of message {} has no data",
                attachment_id, message_id
            ))
        })
    }

    async fn batch_modify(&self, ids: &[String], add: &[String], remove: &[String]) -> Result<()> {
        let request = BatchModifyMessagesRequest {
            ids: Some(ids.to_vec()),
            add_label_ids: non_empty(add),
            remove_label_ids: non_empty(remove),
        };
        let call = self
            .hub
            .users()
            .messages_batch_modify(request, USER_ID)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.batchModify", QuotaCost::BatchModify, call)
            .await?;
        Ok(())
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<()> {
        let request = BatchDeleteMessagesRequest {
            ids: Some(ids.to_vec()),
        };
        let call = self
            .hub
            .users()
            .messages_batch_delete(request, USER_ID)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.batchDelete", QuotaCost::BatchDelete, call)
            .await?;
        Ok(())
    }

    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let request = ModifyMessageRequest {
            add_label_ids: non_empty(add),
            remove_label_ids: non_empty(remove),
        };
        let call = self
            .hub
            .users()
            .messages_modify(request, USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.modify", QuotaCost::ModifyMessage, call)
            .await?;
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .messages_trash(USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.trash", QuotaCost::ModifyMessage, call)
            .await?;
        Ok(())
    }

    async fn untrash_message(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .messages_untrash(USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.untrash", QuotaCost::ModifyMessage, call)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .messages_delete(USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("messages.delete", QuotaCost::DeleteMessage, call)
            .await?;
        Ok(())
    }

    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let request = ModifyThreadRequest {
            add_label_ids: non_empty(add),
            remove_label_ids: non_empty(remove),
        };
        let call = self
            .hub
            .users()
            .threads_modify(request, USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("threads.modify", QuotaCost::ModifyThread, call)
            .await?;
        Ok(())
    }

    async fn trash_thread(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .threads_trash(USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("threads.trash", QuotaCost::ModifyThread, call)
            .await?;
        Ok(())
    }

    async fn untrash_thread(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .threads_untrash(USER_ID, id)
            .add_scope(MAIL_SCOPE)
            .doit();
        self.call("threads.untrash", QuotaCost::ModifyThread, call)
            .await?;
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let call = self
            .hub
            .users()
            .labels_list(USER_ID)
            .add_scope(MAIL_SCOPE)
            .doit();
        let (_, response) = self.call("labels.list", QuotaCost::Labels, call).await?;

        let labels: Vec<LabelInfo> = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| {
                let label_type = match label.type_.as_deref() {
                    Some("system") => LabelType::System,
                    _ => LabelType::User,
                };
                match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo {
                        id,
                        name,
                        label_type,
                    }),
                    _ => None,
                }
            })
            .collect();

        debug!("Successfully parsed {} labels", labels.len());
        Ok(labels)
    }

    async fn create_label(&self, draft: &LabelDraft) -> Result<String> {
        let label = Label {
            name: Some(draft.name().to_string()),
            message_list_visibility: Some(draft.message_visibility.as_str().to_string()),
            label_list_visibility: Some(draft.label_visibility.as_str().to_string()),
            color: Some(google_gmail1::api::LabelColor {
                text_color: Some(draft.color.text().to_string()),
                background_color: Some(draft.color.background().to_string()),
            }),
            ..Default::default()
        };
        let call = self
            .hub
            .users()
            .labels_create(label, USER_ID)
            .add_scope(MAIL_SCOPE)
            .doit();
        let (_, created) = self.call("labels.create", QuotaCost::Labels, call).await?;

        created
            .id
            .ok_or_else(|| GmailError::ApiError("Created label has no ID".to_string()))
    }
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

fn message_detail(message: Message) -> Result<MessageDetail> {
    let id = message
        .id
        .ok_or_else(|| GmailError::InvalidMessageFormat("Missing message ID".to_string()))?;
    let payload = message.payload.ok_or_else(|| {
        GmailError::InvalidMessageFormat(format!("Message {} has no payload", id))
    })?;

    let headers = MessageHeaders::from_pairs(
        payload
            .headers
            .iter()
            .flatten()
            .filter_map(|h| Some((h.name.as_deref()?, h.value.as_deref()?))),
    );

    Ok(MessageDetail {
        thread_id: message.thread_id.unwrap_or_default(),
        label_ids: message.label_ids.unwrap_or_default(),
        headers,
        root: part_node(payload),
        id,
    })
}

/// Convert the provider part into the engine's tree.
///
/// The client library hands inline bodies over already decoded; they are put
/// back into unpadded base64url so the tree carries the wire form.
fn part_node(part: MessagePart) -> RawPartNode {
    let mime_type = part.mime_type.unwrap_or_default();

    match part.parts {
        Some(children) if !children.is_empty() => RawPartNode::Container {
            mime_type,
            children: children.into_iter().map(part_node).collect(),
        },
        _ => {
            let body = part.body.unwrap_or_default();
            RawPartNode::Leaf(RawLeaf {
                mime_type,
                filename: part.filename.filter(|name| !name.is_empty()),
                body_data: body.data.map(|data| URL_SAFE_NO_PAD.encode(data)),
                attachment_id: body.attachment_id,
            })
        }
    }
}
