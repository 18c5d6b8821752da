//! Natural-fade detection for overlap-mix.
//!
//! Overlap-mix sums segments without any crossfade envelope, so each segment
//! has to fade in and out on its own. A segment edge counts as faded when
//! its level sits at least `fade_margin_db` below the body of the segment.

use tracing::debug;

use crate::audio::AudioTool;
use crate::error::Result;
use crate::types::Segment;

/// Length of the head and tail windows in seconds.
pub const EDGE_WINDOW_SEC: f64 = 0.5;

/// Measured levels of one segment in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeLevels {
    pub head_db: f64,
    pub body_db: f64,
    pub tail_db: f64,
}

impl EdgeLevels {
    /// Returns true if both edges sit `margin_db` or more below the body.
    pub fn is_faded(&self, margin_db: f64) -> bool {
        self.body_db - self.head_db >= margin_db && self.body_db - self.tail_db >= margin_db
    }
}

/// Measures segment edges through an [`AudioTool`].
pub struct FadeCheck<'a> {
    tool: &'a dyn AudioTool,
    window_sec: f64,
}

impl<'a> FadeCheck<'a> {
    pub fn new(tool: &'a dyn AudioTool) -> Self {
        Self {
            tool,
            window_sec: EDGE_WINDOW_SEC,
        }
    }

    pub fn measure(&self, segment: &Segment) -> Result<EdgeLevels> {
        let duration = segment.duration_sec;
        let window = self.window_sec.min(duration / 2.0);

        let head_db = self.tool.measure_level(&segment.path, 0.0, window)?;
        let tail_db = self
            .tool
            .measure_level(&segment.path, duration - window, window)?;
        let body_db = if duration > 2.0 * window {
            self.tool
                .measure_level(&segment.path, window, duration - 2.0 * window)?
        } else {
            self.tool.measure_level(&segment.path, 0.0, duration)?
        };

        let levels = EdgeLevels {
            head_db,
            body_db,
            tail_db,
        };
        debug!(
            track = %segment.track,
            segment = segment.index,
            head = levels.head_db,
            body = levels.body_db,
            tail = levels.tail_db,
            "measured segment edges"
        );
        Ok(levels)
    }

    /// Indices of the segments whose edges are not faded.
    pub fn unfaded(&self, segments: &[Segment], margin_db: f64) -> Result<Vec<usize>> {
        let mut indices = Vec::new();
        for segment in segments {
            if !self.measure(segment)?.is_faded(margin_db) {
                indices.push(segment.index);
            }
        }
        Ok(indices)
    }
}
