//! Synthetic audio fixtures for unit tests.

use std::path::{Path, PathBuf};

use crate::audio::{write_wav, Pcm};
use crate::types::Segment;

pub const RATE: u32 = 8000;

fn frames(sec: f64) -> usize {
    (sec * RATE as f64).round() as usize
}

/// Stereo 440 Hz sine with silent padding before and after.
pub fn tone(lead_sec: f64, body_sec: f64, tail_sec: f64, amplitude: f32) -> Pcm {
    let mut samples = vec![0.0; frames(lead_sec) * 2];
    for i in 0..frames(body_sec) {
        let v = amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / RATE as f32).sin();
        samples.push(v);
        samples.push(v);
    }
    samples.extend(std::iter::repeat(0.0).take(frames(tail_sec) * 2));
    Pcm::new(RATE, 2, samples)
}

/// Sine that ramps linearly in and out over `fade_sec` at each end.
pub fn faded_tone(duration_sec: f64, fade_sec: f64, amplitude: f32) -> Pcm {
    let mut pcm = tone(0.0, duration_sec, 0.0, amplitude);
    let total = pcm.frames();
    let fade = frames(fade_sec).max(1);
    for i in 0..total {
        let edge = i.min(total - 1 - i);
        if edge < fade {
            let gain = edge as f32 / fade as f32;
            pcm.samples[i * 2] *= gain;
            pcm.samples[i * 2 + 1] *= gain;
        }
    }
    pcm
}

pub fn write_fixture(dir: &Path, name: &str, pcm: &Pcm) -> PathBuf {
    let path = dir.join(name);
    write_wav(pcm, &path).unwrap();
    path
}

pub fn segment(track: &str, index: usize, path: PathBuf, pcm: &Pcm) -> Segment {
    Segment {
        track: track.to_string(),
        index,
        path,
        duration_sec: pcm.duration_sec(),
    }
}
