//! Validated label definitions
//!
//! Only construction and validation live here. Creating the label is a single
//! transport call; patch/update are not offered.

use serde::{Deserialize, Serialize};

use crate::error::{GmailError, Result};

/// Colours Gmail accepts for label text and background
pub const LABEL_PALETTE: &[&str] = &[
    "#000000", "#434343", "#666666", "#999999", "#cccccc", "#efefef", "#f3f3f3", "#ffffff",
    "#fb4c2f", "#ffad47", "#fad165", "#16a766", "#43d692", "#4a86e8", "#a479e2", "#f691b3",
    "#f6c5be", "#ffe6c7", "#fef1d1", "#b9e4d0", "#c6f3de", "#c9daf8", "#e4d7f5", "#fcdee8",
    "#efa093", "#ffd6a2", "#fce8b3", "#89d3b2", "#a0eac9", "#a4c2f4", "#d0bcf1", "#fbc8d9",
    "#e66550", "#ffbc6b", "#fcda83", "#44b984", "#68dfa9", "#6d9eeb", "#b694e8", "#f7a7c0",
    "#cc3a21", "#eaa041", "#f2c960", "#149e60", "#3dc789", "#3c78d8", "#8e63ce", "#e07798",
    "#ac2b16", "#cf8933", "#d5ae49", "#0b804b", "#2a9c68", "#285bac", "#653e9b", "#b65775",
    "#822111", "#a46a21", "#aa8831", "#076239", "#1a764d", "#1c4587", "#41236d", "#83334c",
    "#464646", "#e7e7e7", "#0d3472", "#b6cff5", "#0d3b44", "#98d7e4", "#3d188e", "#e3d7ff",
    "#711a36", "#fbd3e0", "#8a1c0a", "#f2b2a8", "#7a2e0b", "#ffc8af", "#7a4706", "#ffdeb5",
    "#594c05", "#fbe983", "#684e07", "#fdedc1", "#0b4f30", "#b3efd3", "#04502e", "#a2dcc1",
    "#c2c2c2", "#4986e7", "#2da2bb", "#b99aff", "#994a64", "#f691b2", "#ff7537", "#ffad46",
    "#662e37", "#ebdbde", "#cca6ac", "#094228", "#42d692", "#16a765",
];

const DEFAULT_TEXT_COLOR: &str = "#000000";
const DEFAULT_BACKGROUND_COLOR: &str = "#fcdee8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageListVisibility {
    #[default]
    Show,
    Hide,
}

impl MessageListVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageListVisibility::Show => "show",
            MessageListVisibility::Hide => "hide",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelListVisibility {
    #[default]
    LabelShow,
    LabelShowIfUnread,
    LabelHide,
}

impl LabelListVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelListVisibility::LabelShow => "labelShow",
            LabelListVisibility::LabelShowIfUnread => "labelShowIfUnread",
            LabelListVisibility::LabelHide => "labelHide",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelColor {
    text: String,
    background: String,
}

impl LabelColor {
    /// Both colours must come from [`LABEL_PALETTE`]; matching is case-insensitive
    pub fn new(text: &str, background: &str) -> Result<Self> {
        Ok(Self {
            text: palette_entry("label.color.text", text)?,
            background: palette_entry("label.color.background", background)?,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn background(&self) -> &str {
        &self.background
    }
}

impl Default for LabelColor {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_COLOR.to_string(),
            background: DEFAULT_BACKGROUND_COLOR.to_string(),
        }
    }
}

fn palette_entry(field: &'static str, color: &str) -> Result<String> {
    let normalized = color.trim().to_ascii_lowercase();
    if LABEL_PALETTE.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(GmailError::validation(
            field,
            format!("color '{}' is not in the Gmail palette", color),
        ))
    }
}

/// A label ready to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDraft {
    name: String,
    pub message_visibility: MessageListVisibility,
    pub label_visibility: LabelListVisibility,
    pub color: LabelColor,
}

impl LabelDraft {
    pub fn new(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(GmailError::validation("label.name", "name cannot be empty"));
        }
        if name.trim() != name {
            return Err(GmailError::validation(
                "label.name",
                "name cannot start or end with whitespace",
            ));
        }

        Ok(Self {
            name: name.to_string(),
            message_visibility: MessageListVisibility::default(),
            label_visibility: LabelListVisibility::default(),
            color: LabelColor::default(),
        })
    }

    pub fn with_color(mut self, color: LabelColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_visibility(
        mut self,
        message: MessageListVisibility,
        label: LabelListVisibility,
    ) -> Self {
        self.message_visibility = message;
        self.label_visibility = label;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Whether a label is built into Gmail or created by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
    pub label_type: LabelType,
}

/// Resolve a label given either by id or by (case-insensitive) name
pub fn resolve_label_id(labels: &[LabelInfo], name_or_id: &str) -> Option<String> {
    labels
        .iter()
        .find(|l| l.id == name_or_id)
        .or_else(|| {
            labels
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(name_or_id))
        })
        .map(|l| l.id.clone())
}
