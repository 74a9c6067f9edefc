//! Shared axis and extent primitives used by the editor and compositor.

use serde::{Deserialize, Serialize};

/// Stacking axis of a session. Also the axis crop handles are dragged along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    #[default]
    Vertical,
    Horizontal,
}

impl Axis {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Vertical => Self::Horizontal,
            Self::Horizontal => Self::Vertical,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
        }
    }

    /// Extent of `size` along this axis.
    pub const fn along(self, size: ImageSize) -> u32 {
        match self {
            Self::Vertical => size.height,
            Self::Horizontal => size.width,
        }
    }

    /// Extent of `size` across this axis.
    pub const fn across(self, size: ImageSize) -> u32 {
        match self {
            Self::Vertical => size.width,
            Self::Horizontal => size.height,
        }
    }

    /// Builds a size from an (along, across) pair.
    pub const fn size_from(self, along: u32, across: u32) -> ImageSize {
        match self {
            Self::Vertical => ImageSize::new(across, along),
            Self::Horizontal => ImageSize::new(along, across),
        }
    }

    /// Converts an (along, across) offset pair into canvas `(x, y)`.
    pub const fn point_from(self, along: u32, across: u32) -> (u32, u32) {
        match self {
            Self::Vertical => (across, along),
            Self::Horizontal => (along, across),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Half-open pixel range `[start, end)` along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSpan {
    pub start: u32,
    pub end: u32,
}

impl PixelSpan {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn len(self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }
}
