//! Flattening of nested multipart bodies
//!
//! A message body arrives as a tree of containers and leaves. The tree is
//! moved into a [`PartTree`] arena and walked depth-first, pre-order, left to
//! right with an explicit stack; only leaves are ever emitted. Inline bodies
//! are decoded on the spot. Attachment payloads are fetched only when the
//! consumer of a [`PartStream`] reaches that part.

use async_stream::try_stream;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use futures::stream::{Stream, TryStreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{GmailError, Result};
use crate::models::{ContentPart, MediaKind, Payload, RawLeaf, RawPartNode};
use crate::retry::RetryPolicy;
use crate::transport::MailTransport;

/// Lazily resolved sequence of content parts
pub type PartStream<'a> = Pin<Box<dyn Stream<Item = Result<ContentPart>> + Send + 'a>>;

/// Restore the `=` padding providers routinely strip
pub fn padding_corrected(data: &str) -> Cow<'_, str> {
    let data = data.trim();
    match data.len() % 4 {
        2 => Cow::Owned(format!("{}==", data)),
        3 => Cow::Owned(format!("{}=", data)),
        _ => Cow::Borrowed(data),
    }
}

/// Decode a base64url body, with or without padding.
/// Standard-alphabet input is accepted as a fallback.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    let padded = padding_corrected(data);
    URL_SAFE
        .decode(padded.as_bytes())
        .or_else(|_| STANDARD.decode(padded.as_bytes()))
        .map_err(|e| GmailError::InvalidMessageFormat(format!("Invalid base64url body: {}", e)))
}

fn decode_text(data: &str) -> Result<String> {
    String::from_utf8(decode_base64url(data)?)
        .map_err(|e| GmailError::InvalidMessageFormat(format!("Body is not valid UTF-8: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PartSlot {
    Container {
        mime_type: String,
        children: Vec<usize>,
    },
    Leaf(RawLeaf),
}

/// Arena holding one message's part tree; each node owns only its child indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTree {
    nodes: Vec<PartSlot>,
}

impl From<RawPartNode> for PartTree {
    fn from(root: RawPartNode) -> Self {
        Self::new(root)
    }
}

impl PartTree {
    pub fn new(root: RawPartNode) -> Self {
        let mut nodes = vec![PartSlot::Leaf(RawLeaf::default())];
        let mut pending = vec![(root, 0usize)];

        while let Some((node, index)) = pending.pop() {
            let slot = match node {
                RawPartNode::Leaf(leaf) => PartSlot::Leaf(leaf),
                RawPartNode::Container {
                    mime_type,
                    children,
                } => {
                    let mut ids = Vec::with_capacity(children.len());
                    for child in children {
                        let id = nodes.len();
                        nodes.push(PartSlot::Leaf(RawLeaf::default()));
                        ids.push(id);
                        pending.push((child, id));
                    }
                    PartSlot::Container {
                        mime_type,
                        children: ids,
                    }
                }
            };
            nodes[index] = slot;
        }

        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// MIME type of the node at `index`
    pub fn mime_type(&self, index: usize) -> Option<&str> {
        self.nodes.get(index).map(|slot| match slot {
            PartSlot::Container { mime_type, .. } => mime_type.as_str(),
            PartSlot::Leaf(leaf) => leaf.mime_type.as_str(),
        })
    }

    /// Leaves in reading order (pre-order, left to right)
    pub fn leaves(&self) -> Vec<&RawLeaf> {
        let mut leaves = Vec::new();
        let mut stack = vec![0usize];

        while let Some(index) = stack.pop() {
            match &self.nodes[index] {
                PartSlot::Container { children, .. } => {
                    stack.extend(children.iter().rev().copied());
                }
                PartSlot::Leaf(leaf) => leaves.push(leaf),
            }
        }

        leaves
    }
}

/// Where a part's payload comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSource {
    /// Base64url body carried in the tree itself
    Inline(String),
    /// Payload behind the attachment endpoint
    Deferred(String),
}

/// A leaf that will produce a content part, before any payload is decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutline {
    pub filename: String,
    pub media_kind: MediaKind,
    pub source: PartSource,
}

impl PartOutline {
    fn from_leaf(leaf: &RawLeaf) -> Option<Self> {
        let media_kind = MediaKind::from_mime_type(&leaf.mime_type);

        let source = if media_kind.is_text() {
            // text parts without an inline body contribute nothing
            PartSource::Inline(leaf.body_data.clone()?)
        } else if let Some(id) = &leaf.attachment_id {
            PartSource::Deferred(id.clone())
        } else {
            PartSource::Inline(leaf.body_data.clone()?)
        };

        let filename = leaf
            .filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| media_kind.default_filename())
            .to_string();

        Some(Self {
            filename,
            media_kind,
            source,
        })
    }

    pub fn attachment_ref(&self) -> Option<&str> {
        match &self.source {
            PartSource::Deferred(id) => Some(id),
            PartSource::Inline(_) => None,
        }
    }
}

/// Classify every emitting leaf without decoding or fetching anything
pub fn outline(tree: &PartTree) -> Vec<PartOutline> {
    tree.leaves()
        .into_iter()
        .filter_map(|leaf| {
            let part = PartOutline::from_leaf(leaf);
            if part.is_none() {
                trace!("Skipping {} leaf without a payload", leaf.mime_type);
            }
            part
        })
        .collect()
}

pub struct MimeTreeFlattener<'a> {
    transport: &'a dyn MailTransport,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<'a> MimeTreeFlattener<'a> {
    pub fn new(transport: &'a dyn MailTransport) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Stream the parts of `root` in reading order.
    ///
    /// Attachments are downloaded when their part is polled; dropping the
    /// stream early skips the remaining downloads.
    pub fn stream(&self, message_id: &str, root: RawPartNode) -> PartStream<'a> {
        let transport = self.transport;
        let retry = self.retry.clone();
        let cancel = self.cancel.clone();
        let message_id = message_id.to_string();
        let plan = outline(&PartTree::new(root));

        Box::pin(try_stream! {
            for part in plan {
                let payload = match &part.source {
                    PartSource::Inline(data) if part.media_kind.is_text() => {
                        Payload::Text(decode_text(data)?)
                    }
                    PartSource::Inline(data) => Payload::Bytes(decode_base64url(data)?),
                    PartSource::Deferred(attachment_id) => {
                        debug!("Fetching attachment {} of message {}", attachment_id, message_id);
                        let bytes = retry
                            .run("get_attachment", &cancel, || {
                                transport.get_attachment(&message_id, attachment_id)
                            })
                            .await?;
                        Payload::Bytes(bytes)
                    }
                };

                let attachment_ref = part.attachment_ref().map(str::to_string);
                yield ContentPart {
                    filename: part.filename,
                    media_kind: part.media_kind,
                    payload,
                    attachment_ref,
                };
            }
        })
    }

    /// Collect every part, fetching all attachments
    pub async fn flatten(&self, message_id: &str, root: RawPartNode) -> Result<Vec<ContentPart>> {
        self.stream(message_id, root).try_collect().await
    }
}
