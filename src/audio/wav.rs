//! WAV reading and writing.
//!
//! Decodes any integer or float WAV into interleaved f32 [`Pcm`] and writes
//! 32-bit float WAV using the hound crate.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::tool::{ToolError, ToolResult};

/// Interleaved f32 audio held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, `frames() * channels` long.
    pub samples: Vec<f32>,
}

impl Pcm {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Digital silence of the given length.
    pub fn silent(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_sec(&self) -> f64 {
        samples_to_duration(self.frames(), self.sample_rate)
    }

    /// Converts a time in seconds to a frame index at this sample rate.
    pub fn frame_at(&self, sec: f64) -> usize {
        (sec.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Samples of frame `index`.
    pub fn frame(&self, index: usize) -> &[f32] {
        let ch = self.channels as usize;
        &self.samples[index * ch..(index + 1) * ch]
    }

    /// Largest absolute sample of frame `index` across channels.
    pub fn frame_peak(&self, index: usize) -> f32 {
        self.frame(index)
            .iter()
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Copy of frames `[start, end)`.
    pub fn slice_frames(&self, start: usize, end: usize) -> Pcm {
        let ch = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        Pcm::new(
            self.sample_rate,
            self.channels,
            self.samples[start * ch..end * ch].to_vec(),
        )
    }
}

/// Reads a WAV file into interleaved f32.
pub fn read_wav(path: &Path) -> ToolResult<Pcm> {
    let wav_err = |source| ToolError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(wav_err)?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(wav_err)?
        }
    };

    Ok(Pcm::new(spec.sample_rate, spec.channels, samples))
}

fn float_spec(pcm: &Pcm) -> WavSpec {
    WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

/// Writes audio samples to a 32-bit float WAV file.
///
/// # Example
///
/// ```ignore
/// use soundbake::audio::{write_wav, Pcm};
///
/// let pcm = Pcm::new(44100, 2, vec![0.0, 0.0, 0.5, 0.5]);
/// write_wav(&pcm, Path::new("/tmp/test.wav"))?;
/// ```
pub fn write_wav(pcm: &Pcm, path: &Path) -> ToolResult<()> {
    let wav_err = |source| ToolError::Wav {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = WavWriter::create(path, float_spec(pcm)).map_err(wav_err)?;
    for sample in &pcm.samples {
        writer.write_sample(*sample).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

/// Writes audio samples to an in-memory WAV buffer.
///
/// Returns the WAV file contents as a byte vector.
pub fn write_wav_to_buffer(pcm: &Pcm) -> ToolResult<Vec<u8>> {
    let wav_err = |source| ToolError::Wav {
        path: "<memory>".into(),
        source,
    };
    let mut buffer = Vec::new();
    {
        let mut writer =
            WavWriter::new(Cursor::new(&mut buffer), float_spec(pcm)).map_err(wav_err)?;
        for sample in &pcm.samples {
            writer.write_sample(*sample).map_err(wav_err)?;
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(buffer)
}

/// Calculates the duration of audio in seconds from frame count.
pub fn samples_to_duration(frame_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frame_count as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_preserves_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let pcm = Pcm::new(8000, 2, vec![0.0, 0.5, -0.5, 0.25]);
        write_wav(&pcm, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
        assert_eq!(read_wav(&path).unwrap(), pcm);
    }

    #[test]
    fn reads_integer_wav_as_unit_floats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        writer.write_sample(16384i16).unwrap();
        writer.write_sample(-32768i16).unwrap();
        writer.finalize().unwrap();

        let pcm = read_wav(&path).unwrap();
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.samples, vec![0.5, -1.0]);
    }

    #[test]
    fn buffer_is_a_complete_wav() {
        let pcm = Pcm::new(8000, 2, vec![0.1; 16]);
        let buffer = write_wav_to_buffer(&pcm).unwrap();
        assert_eq!(&buffer[0..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(buffer)).unwrap();
        assert_eq!(reader.duration(), 8);
    }

    #[test]
    fn frame_helpers() {
        let pcm = Pcm::new(4, 2, vec![0.0, -0.8, 0.3, 0.1, 0.0, 0.0]);
        assert_eq!(pcm.frames(), 3);
        assert_eq!(pcm.frame_peak(0), 0.8);
        assert_eq!(pcm.duration_sec(), 0.75);
        assert_eq!(pcm.slice_frames(1, 10).samples, vec![0.3, 0.1, 0.0, 0.0]);
        assert_eq!(samples_to_duration(16000, 8000), 2.0);
    }
}
