use crate::error::{ControlPointError, Result};

/// Icon entry as read from a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconDraft {
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub depth: Option<u32>,
    pub url: Option<String>,
    /// Downloaded image, only for icons the icon filter selected
    pub binary: Option<Vec<u8>>,
}

/// A device icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    mime_type: String,
    width: u32,
    height: u32,
    depth: u32,
    url: String,
    binary: Option<Vec<u8>>,
}

impl Icon {
    pub fn from_draft(draft: IconDraft) -> Result<Self> {
        Ok(Self {
            mime_type: draft.mime_type.ok_or(ControlPointError::missing("Icon", "mimetype"))?,
            width: draft.width.ok_or(ControlPointError::missing("Icon", "width"))?,
            height: draft.height.ok_or(ControlPointError::missing("Icon", "height"))?,
            depth: draft.depth.ok_or(ControlPointError::missing("Icon", "depth"))?,
            url: draft.url.ok_or(ControlPointError::missing("Icon", "url"))?,
            binary: draft.binary,
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Absolute URL of the image
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn binary(&self) -> Option<&[u8]> {
        self.binary.as_deref()
    }
}
