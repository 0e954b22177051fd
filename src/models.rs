use serde::{Deserialize, Serialize};

/// Which listing endpoint a fetch targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Message,
    Thread,
}

/// Reference to a single mailbox entry as returned by a listing call.
///
/// Identity is `id`; the provider guarantees uniqueness, nothing here enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    pub thread_id: String,
}

impl ItemRef {
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub items: Vec<ItemRef>,
    pub continuation_token: Option<String>,
}

impl PageResult {
    pub fn new(items: Vec<ItemRef>, continuation_token: Option<String>) -> Self {
        Self {
            items,
            continuation_token,
        }
    }

    /// Token for the next page; an empty token means this was the last page
    pub fn next_token(&self) -> Option<&str> {
        self.continuation_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    pub fn is_last(&self) -> bool {
        self.next_token().is_none()
    }
}

/// Typed content of a flattened leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    PlainText,
    Html,
    Attachment,
}

impl MediaKind {
    /// Classify a leaf's MIME type
    pub fn from_mime_type(mime_type: &str) -> Self {
        match mime_type.trim().to_ascii_lowercase().as_str() {
            "text/plain" => MediaKind::PlainText,
            "text/html" => MediaKind::Html,
            _ => MediaKind::Attachment,
        }
    }

    /// Filename used when the provider supplies none
    pub fn default_filename(&self) -> &'static str {
        match self {
            MediaKind::PlainText => "sample.txt",
            MediaKind::Html => "sample.html",
            MediaKind::Attachment => "sample",
        }
    }

    pub fn is_text(&self) -> bool {
        !matches!(self, MediaKind::Attachment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Bytes(bytes) => bytes,
        }
    }
}

/// A flattened, decoded leaf of a message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPart {
    pub filename: String,
    pub media_kind: MediaKind,
    pub payload: Payload,
    pub attachment_ref: Option<String>,
}

/// Leaf of a provider part tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLeaf {
    pub mime_type: String,
    pub filename: Option<String>,
    /// Inline body exactly as the provider sends it (base64url, padding optional)
    pub body_data: Option<String>,
    pub attachment_id: Option<String>,
}

/// Nested multipart body as received from the get endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPartNode {
    Container {
        mime_type: String,
        children: Vec<RawPartNode>,
    },
    Leaf(RawLeaf),
}

impl RawPartNode {
    pub fn container(mime_type: impl Into<String>, children: Vec<RawPartNode>) -> Self {
        RawPartNode::Container {
            mime_type: mime_type.into(),
            children,
        }
    }

    pub fn leaf(mime_type: impl Into<String>) -> Self {
        RawPartNode::Leaf(RawLeaf {
            mime_type: mime_type.into(),
            ..Default::default()
        })
    }

    /// Leaf carrying an inline base64url body
    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        RawPartNode::Leaf(RawLeaf {
            mime_type: mime_type.into(),
            body_data: Some(data.into()),
            ..Default::default()
        })
    }

    /// Leaf whose payload must be fetched from the attachment endpoint
    pub fn attachment(
        mime_type: impl Into<String>,
        filename: impl Into<String>,
        attachment_id: impl Into<String>,
    ) -> Self {
        RawPartNode::Leaf(RawLeaf {
            mime_type: mime_type.into(),
            filename: Some(filename.into()),
            attachment_id: Some(attachment_id.into()),
            ..Default::default()
        })
    }

    pub fn with_filename(mut self, name: impl Into<String>) -> Self {
        if let RawPartNode::Leaf(ref mut leaf) = self {
            leaf.filename = Some(name.into());
        }
        self
    }

    pub fn mime_type(&self) -> &str {
        match self {
            RawPartNode::Container { mime_type, .. } => mime_type,
            RawPartNode::Leaf(leaf) => &leaf.mime_type,
        }
    }
}

/// Headers lifted out of the flat header list by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub subject: String,
    pub date: String,
    pub from: String,
    pub to: String,
}

impl MessageHeaders {
    /// Pick Subject/Date/From/To out of `(name, value)` pairs.
    /// Names match case-insensitively; the first occurrence wins; absent headers stay empty.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let slot = match name.to_ascii_lowercase().as_str() {
                "subject" => &mut headers.subject,
                "date" => &mut headers.date,
                "from" => &mut headers.from,
                "to" => &mut headers.to,
                _ => continue,
            };
            if slot.is_empty() {
                *slot = value.to_string();
            }
        }
        headers
    }
}

/// Full message returned by the get endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDetail {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub headers: MessageHeaders,
    pub root: RawPartNode,
}

impl MessageDetail {
    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(self.id.clone(), self.thread_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDetail {
    pub id: String,
    pub messages: Vec<MessageDetail>,
}
