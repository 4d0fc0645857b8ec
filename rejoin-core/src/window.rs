//! Windowed aggregate over the sequence workload.
//!
//! The recovery scenario runs a "sequence window" application: for every
//! value divisible by the stride it keeps the most recent `width` such
//! values, newest first, and emits the window rendered as `[a,b,...]`.
//! After the full series `1..=N` has been processed, the last emitted window
//! is fully determined by `N`, so the harness can compute it up front and
//! wait for it byte-for-byte.

use rejoin_types::{frame, FrameError};
use thiserror::Error;

/// Errors from window construction or parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// Width or stride of zero.
    #[error("window width and stride must be non-zero")]
    ZeroSize,

    /// Rendered window text could not be parsed.
    #[error("malformed window: {0}")]
    Malformed(String),

    /// Rendered window does not fit in a frame.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Running window of the most recent stride-aligned values, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceWindow {
    width: usize,
    stride: u64,
    values: Vec<u64>,
}

impl SequenceWindow {
    /// Create an empty window.
    pub fn new(width: usize, stride: u64) -> Result<Self, WindowError> {
        if width == 0 || stride == 0 {
            return Err(WindowError::ZeroSize);
        }
        Ok(Self {
            width,
            stride,
            values: Vec::with_capacity(width),
        })
    }

    /// Restore a window from its rendered form, e.g. a persisted checkpoint.
    pub fn restore(width: usize, stride: u64, rendered: &str) -> Result<Self, WindowError> {
        let mut window = Self::new(width, stride)?;
        let mut values = parse_rendered(rendered)?;
        values.truncate(width);
        window.values = values;
        Ok(window)
    }

    /// Feed one value. Returns true if the value belongs to this window's
    /// partition (and therefore changed the window).
    pub fn observe(&mut self, value: u64) -> bool {
        if value % self.stride != 0 {
            return false;
        }
        self.values.insert(0, value);
        self.values.truncate(self.width);
        true
    }

    /// Current values, newest first.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Render as `[a,b,...]`.
    pub fn render(&self) -> String {
        render_values(&self.values)
    }

    /// Rendered window wrapped in a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, WindowError> {
        Ok(frame(self.render().as_bytes())?)
    }
}

/// The final window a correct run over `1..=N` must emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedWindow {
    /// Newest value in the window.
    pub last: u64,
    /// Number of values in the window.
    pub width: usize,
    /// Distance between consecutive values.
    pub stride: u64,
}

impl ExpectedWindow {
    /// Expected final window after the series `1..=sequence_length`.
    ///
    /// The newest value is the largest multiple of `stride` not exceeding
    /// `sequence_length`.
    pub fn for_sequence(
        sequence_length: u64,
        width: usize,
        stride: u64,
    ) -> Result<Self, WindowError> {
        if width == 0 || stride == 0 {
            return Err(WindowError::ZeroSize);
        }
        Ok(Self {
            last: sequence_length - sequence_length % stride,
            width,
            stride,
        })
    }

    /// Window values, newest first. Stops early rather than going below 1.
    pub fn values(&self) -> Vec<u64> {
        let mut values = Vec::with_capacity(self.width);
        let mut current = self.last;
        while values.len() < self.width && current > 0 {
            values.push(current);
            current = current.saturating_sub(self.stride);
        }
        values
    }

    /// True if the series is long enough to fill the whole window.
    pub fn is_full(&self) -> bool {
        self.values().len() == self.width
    }

    /// Unframed payload, e.g. `[200,198,196,194,192,190]`.
    pub fn payload(&self) -> String {
        render_values(&self.values())
    }

    /// Payload wrapped in a length-prefixed frame.
    pub fn framed(&self) -> Result<Vec<u8>, WindowError> {
        Ok(frame(self.payload().as_bytes())?)
    }
}

fn render_values(values: &[u64]) -> String {
    let joined = values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("[{}]", joined)
}

fn parse_rendered(rendered: &str) -> Result<Vec<u64>, WindowError> {
    let inner = rendered
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| WindowError::Malformed(rendered.to_string()))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|e| WindowError::Malformed(format!("{part:?}: {e}")))
        })
        .collect()
}
