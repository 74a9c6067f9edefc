use thiserror::Error;

/// Smallest normalized slice a crop window may shrink to.
pub const CROP_MIN_SPAN: f32 = 0.01;

/// Default pick radius for crop handles, in normalized units.
pub const CROP_HANDLE_TOLERANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CropError {
    #[error("invalid crop state: start {start} end {end}")]
    InvalidCropState { start: f32, end: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropHandle {
    Start,
    End,
}

impl CropHandle {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

/// Normalized crop window `[start, end)` along the session axis.
///
/// Every write keeps `end - start >= CROP_MIN_SPAN` by clamping the written
/// bound against the opposite one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    start: f32,
    end: f32,
}

impl Default for CropWindow {
    fn default() -> Self {
        Self::FULL
    }
}

impl CropWindow {
    pub const FULL: Self = Self {
        start: 0.0,
        end: 1.0,
    };

    /// Builds a window from two bounds supplied together. Unlike the setters
    /// this does not clamp; an invalid pair is rejected.
    pub fn try_new(start: f32, end: f32) -> Result<Self, CropError> {
        let valid = start.is_finite()
            && end.is_finite()
            && (0.0..=1.0).contains(&start)
            && (0.0..=1.0).contains(&end)
            && end - start >= CROP_MIN_SPAN;
        if !valid {
            return Err(CropError::InvalidCropState { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> f32 {
        self.start
    }

    pub const fn end(&self) -> f32 {
        self.end
    }

    pub fn span(&self) -> f32 {
        self.end - self.start
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Stores `clamp(value, 0, end - CROP_MIN_SPAN)`. NaN leaves the bound
    /// unchanged. Returns whether the stored value changed.
    pub fn set_start(&mut self, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        let upper = (self.end - CROP_MIN_SPAN).max(0.0);
        let mut start = value.clamp(0.0, upper);
        while start > 0.0 && self.end - start < CROP_MIN_SPAN {
            start = step_down(start);
        }
        let changed = start != self.start;
        self.start = start;
        changed
    }

    /// Stores `clamp(value, start + CROP_MIN_SPAN, 1)`. NaN leaves the bound
    /// unchanged. Returns whether the stored value changed.
    pub fn set_end(&mut self, value: f32) -> bool {
        if value.is_nan() {
            return false;
        }
        let lower = (self.start + CROP_MIN_SPAN).min(1.0);
        let mut end = value.clamp(lower, 1.0);
        while end < 1.0 && end - self.start < CROP_MIN_SPAN {
            end = step_up(end);
        }
        let changed = end != self.end;
        self.end = end;
        changed
    }

    pub fn set(&mut self, handle: CropHandle, value: f32) -> bool {
        match handle {
            CropHandle::Start => self.set_start(value),
            CropHandle::End => self.set_end(value),
        }
    }

    /// Handle under a normalized pointer position, if any. The start handle
    /// wins when both are in reach.
    pub fn handle_at(&self, position: f32, tolerance: f32) -> Option<CropHandle> {
        if (position - self.start).abs() <= tolerance {
            Some(CropHandle::Start)
        } else if (position - self.end).abs() <= tolerance {
            Some(CropHandle::End)
        } else {
            None
        }
    }
}

// Adjacent representable values for non-negative finite floats.
fn step_down(value: f32) -> f32 {
    f32::from_bits(value.to_bits() - 1)
}

fn step_up(value: f32) -> f32 {
    f32::from_bits(value.to_bits() + 1)
}

/// Tracks which handle a drag grabbed and routes pointer positions to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropDrag {
    grabbed: Option<CropHandle>,
}

impl CropDrag {
    pub fn begin(&mut self, window: &CropWindow, position: f32, tolerance: f32) -> Option<CropHandle> {
        self.grabbed = window.handle_at(position, tolerance);
        self.grabbed
    }

    pub fn grabbed(&self) -> Option<CropHandle> {
        self.grabbed
    }

    /// Moves the grabbed handle to `position` (clamped into `[0, 1]` first).
    pub fn drag_to(&self, window: &mut CropWindow, position: f32) -> bool {
        match self.grabbed {
            Some(handle) => window.set(handle, position.clamp(0.0, 1.0)),
            None => false,
        }
    }

    pub fn end(&mut self) -> Option<CropHandle> {
        self.grabbed.take()
    }
}
