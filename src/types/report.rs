//! Continuity report produced by the verifier.

use serde::Serialize;

/// A silent stretch of audio in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SilenceInterval {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl SilenceInterval {
    pub fn new(start_sec: f64, end_sec: f64) -> Self {
        Self { start_sec, end_sec }
    }

    /// Length of the interval in seconds.
    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Interior silence found in an assembled track.
///
/// Never persisted. An empty `gaps` list means the track is continuous.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuityReport {
    /// Gaps strictly inside the track, in order of appearance.
    pub gaps: Vec<SilenceInterval>,
    /// Every silent interval detected, edges included.
    pub total_detected: usize,
    /// Probed track duration in seconds.
    pub duration_sec: f64,
}

impl ContinuityReport {
    /// Returns true if no interior gap was found.
    pub fn is_continuous(&self) -> bool {
        self.gaps.is_empty()
    }
}
