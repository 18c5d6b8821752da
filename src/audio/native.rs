//! In-process audio tool over WAV files.
//!
//! [`WavTool`] implements every [`AudioTool`] operation natively with hound
//! for I/O and rubato for sample rate conversion. It needs no external
//! binaries, which makes it the tool of choice for tests and for machines
//! without ffmpeg. Loudness is estimated from the mean square of the signal
//! rather than a gated BS.1770 measurement.

use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::tool::{
    ensure_output, trim_span, AudioTool, DelayedInput, SilenceParams, ToolError, ToolResult,
    TrimParams,
};
use super::wav::{read_wav, samples_to_duration, write_wav, Pcm};
use crate::types::{MergePlan, SilenceInterval};

/// Level reported for digital silence.
const SILENCE_FLOOR_DB: f64 = -120.0;

const RESAMPLE_CHUNK: usize = 1024;

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Runs of frames whose peak stays below the noise floor for at least the
/// minimum duration. A run still open at the end closes at the duration.
fn silent_runs(pcm: &Pcm, params: &SilenceParams) -> Vec<SilenceInterval> {
    let threshold = db_to_linear(params.noise_db) as f32;
    let min_frames = pcm.frame_at(params.min_duration_sec);
    let rate = pcm.sample_rate as f64;

    let mut intervals = Vec::new();
    let mut run_start: Option<usize> = None;
    for i in 0..pcm.frames() {
        let silent = pcm.frame_peak(i) < threshold;
        match (silent, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_frames {
                    intervals.push(SilenceInterval::new(start as f64 / rate, i as f64 / rate));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if pcm.frames() - start >= min_frames {
            intervals.push(SilenceInterval::new(start as f64 / rate, pcm.duration_sec()));
        }
    }
    intervals
}

/// Native WAV implementation of [`AudioTool`].
#[derive(Debug, Clone, Default)]
pub struct WavTool;

impl WavTool {
    pub fn new() -> Self {
        Self
    }

    /// Reads `input` and converts it to the plan's sample rate and layout.
    fn load(&self, input: &Path, plan: &MergePlan) -> ToolResult<Pcm> {
        let pcm = read_wav(input)?;
        let pcm = conform_channels(pcm, plan.layout.channels(), input)?;
        if pcm.sample_rate == plan.sample_rate {
            return Ok(pcm);
        }
        debug!(
            "Resampling {} from {} Hz to {} Hz",
            input.display(),
            pcm.sample_rate,
            plan.sample_rate
        );
        resample(&pcm, plan.sample_rate)
    }

    fn store(&self, pcm: &Pcm, output: &Path) -> ToolResult<()> {
        if pcm.is_empty() {
            return Err(ToolError::Empty(output.to_path_buf()));
        }
        write_wav(pcm, output)?;
        ensure_output(output)
    }
}

/// Upmixes mono to the target channel count. Other mismatches are refused.
fn conform_channels(pcm: Pcm, channels: u16, path: &Path) -> ToolResult<Pcm> {
    if pcm.channels == channels {
        return Ok(pcm);
    }
    if pcm.channels != 1 {
        return Err(ToolError::Unsupported {
            path: path.to_path_buf(),
            reason: format!("{} channels, expected 1 or {}", pcm.channels, channels),
        });
    }
    let samples = pcm
        .samples
        .iter()
        .flat_map(|s| std::iter::repeat(*s).take(channels as usize))
        .collect();
    Ok(Pcm::new(pcm.sample_rate, channels, samples))
}

fn resample(pcm: &Pcm, target_rate: u32) -> ToolResult<Pcm> {
    let channels = pcm.channels as usize;
    let frames = pcm.frames();
    let ratio = target_rate as f64 / pcm.sample_rate as f64;
    let wanted = (frames as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| ToolError::Resample(e.to_string()))?;

    let planar: Vec<Vec<f32>> = (0..channels)
        .map(|c| pcm.samples.iter().skip(c).step_by(channels).copied().collect())
        .collect();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels];
    let append = |out: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
        for (dst, src) in out.iter_mut().zip(chunk) {
            dst.extend(src);
        }
    };

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= frames {
        let n = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + n]).collect();
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| ToolError::Resample(e.to_string()))?;
        append(&mut out, processed);
        pos += n;
    }

    let rest: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
    let processed = resampler
        .process_partial(Some(rest.as_slice()), None)
        .map_err(|e| ToolError::Resample(e.to_string()))?;
    append(&mut out, processed);

    let delay = resampler.output_delay();
    while out[0].len() < wanted + delay {
        let processed = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| ToolError::Resample(e.to_string()))?;
        if processed[0].is_empty() {
            break;
        }
        append(&mut out, processed);
    }

    let end = (delay + wanted).min(out[0].len());
    let mut samples = Vec::with_capacity(wanted * channels);
    for i in delay..end {
        for channel in &out {
            samples.push(channel[i]);
        }
    }
    Ok(Pcm::new(target_rate, pcm.channels, samples))
}

/// Estimated integrated loudness in LUFS, or `None` for silence.
fn loudness(pcm: &Pcm) -> Option<f64> {
    let frames = pcm.frames();
    if frames == 0 {
        return None;
    }
    let energy: f64 =
        pcm.samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / frames as f64;
    if energy <= 0.0 {
        return None;
    }
    Some(-0.691 + 10.0 * energy.log10())
}

fn peak(pcm: &Pcm) -> f64 {
    pcm.samples
        .iter()
        .fold(0.0f64, |peak, s| peak.max((*s as f64).abs()))
}

/// Scales `pcm` to the plan's loudness target without exceeding the
/// true-peak ceiling.
fn apply_loudness(pcm: &mut Pcm, plan: &MergePlan) {
    let Some(measured) = loudness(pcm) else {
        return;
    };
    let mut gain = db_to_linear(plan.loudness.integrated_lufs - measured);
    let ceiling = db_to_linear(plan.loudness.true_peak_db);
    let peak = peak(pcm);
    if peak * gain > ceiling {
        gain = ceiling / peak;
    }
    for sample in &mut pcm.samples {
        *sample = (*sample as f64 * gain) as f32;
    }
}

impl AudioTool for WavTool {
    fn name(&self) -> &'static str {
        "native"
    }

    fn output_extension(&self) -> &'static str {
        "wav"
    }

    fn probe_duration(&self, input: &Path) -> ToolResult<f64> {
        let reader = hound::WavReader::open(input).map_err(|source| ToolError::Wav {
            path: input.to_path_buf(),
            source,
        })?;
        let rate = reader.spec().sample_rate;
        Ok(samples_to_duration(reader.duration() as usize, rate))
    }

    fn trim_silence(
        &self,
        input: &Path,
        output: &Path,
        params: &TrimParams,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let pcm = self.load(input, plan)?;
        let runs = silent_runs(&pcm, &params.silence());
        let Some((start, end)) = trim_span(&runs, pcm.duration_sec()) else {
            return Err(ToolError::Empty(output.to_path_buf()));
        };
        self.store(
            &pcm.slice_frames(pcm.frame_at(start), pcm.frame_at(end)),
            output,
        )
    }

    fn normalize(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
        let mut pcm = self.load(input, plan)?;
        apply_loudness(&mut pcm, plan);
        self.store(&pcm, output)
    }

    fn fade(
        &self,
        input: &Path,
        output: &Path,
        duration_sec: f64,
        fade_sec: f64,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let mut pcm = self.load(input, plan)?;
        let channels = pcm.channels as usize;
        let frames = pcm.frames();
        let fade = pcm.frame_at(fade_sec).max(1);
        let end = pcm.frame_at(duration_sec).min(frames);
        let out_start = end.saturating_sub(fade);

        for i in 0..frames {
            let mut gain = 1.0f64;
            if i < fade {
                gain *= i as f64 / fade as f64;
            }
            if i >= end {
                gain = 0.0;
            } else if i >= out_start {
                gain *= (end - i) as f64 / fade as f64;
            }
            for sample in &mut pcm.samples[i * channels..(i + 1) * channels] {
                *sample = (*sample as f64 * gain) as f32;
            }
        }
        self.store(&pcm, output)
    }

    fn mix_delayed(
        &self,
        inputs: &[DelayedInput],
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        if inputs.is_empty() {
            return Err(ToolError::Unsupported {
                path: output.to_path_buf(),
                reason: "mix has no inputs".to_string(),
            });
        }
        let channels = plan.layout.channels() as usize;

        let mut placed = Vec::with_capacity(inputs.len());
        for input in inputs {
            let pcm = self.load(&input.path, plan)?;
            let offset = pcm.frame_at(input.delay_sec);
            placed.push((offset, pcm));
        }
        let length = placed
            .iter()
            .map(|(offset, pcm)| offset + pcm.frames())
            .max()
            .unwrap_or(0);

        let mut mix = Pcm::silent(plan.sample_rate, plan.layout.channels(), length);
        for (offset, pcm) in &placed {
            let dst = &mut mix.samples[offset * channels..(offset + pcm.frames()) * channels];
            for (d, s) in dst.iter_mut().zip(&pcm.samples) {
                *d += *s;
            }
        }
        apply_loudness(&mut mix, plan);
        self.store(&mix, output)
    }

    fn crossfade(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let a = self.load(first, plan)?;
        let b = self.load(second, plan)?;
        let channels = plan.layout.channels() as usize;
        let overlap = a.frame_at(plan.overlap_sec).min(a.frames()).min(b.frames());
        let head = a.frames() - overlap;

        let mut samples = Vec::with_capacity((a.frames() + b.frames() - overlap) * channels);
        samples.extend_from_slice(&a.samples[..head * channels]);
        for i in 0..overlap {
            let t = i as f64 / overlap as f64;
            let fade_out = plan.curve.gain(1.0 - t);
            let fade_in = plan.curve.gain(t);
            for (x, y) in a.frame(head + i).iter().zip(b.frame(i)) {
                samples.push((*x as f64 * fade_out + *y as f64 * fade_in) as f32);
            }
        }
        samples.extend_from_slice(&b.samples[overlap * channels..]);

        self.store(&Pcm::new(plan.sample_rate, a.channels, samples), output)
    }

    fn encode(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
        let pcm = self.load(input, plan)?;
        self.store(&pcm, output)
    }

    fn detect_silence(
        &self,
        input: &Path,
        params: &SilenceParams,
    ) -> ToolResult<Vec<SilenceInterval>> {
        Ok(silent_runs(&read_wav(input)?, params))
    }

    fn measure_level(&self, input: &Path, start_sec: f64, duration_sec: f64) -> ToolResult<f64> {
        let pcm = read_wav(input)?;
        let window = pcm.slice_frames(
            pcm.frame_at(start_sec),
            pcm.frame_at(start_sec + duration_sec),
        );
        if window.samples.is_empty() {
            return Ok(SILENCE_FLOOR_DB);
        }
        let mean_square = window
            .samples
            .iter()
            .map(|s| (*s as f64).powi(2))
            .sum::<f64>()
            / window.samples.len() as f64;
        if mean_square <= 0.0 {
            return Ok(SILENCE_FLOOR_DB);
        }
        Ok((10.0 * mean_square.log10()).max(SILENCE_FLOOR_DB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const RATE: u32 = 8000;

    fn plan() -> MergePlan {
        MergePlan {
            sample_rate: RATE,
            overlap_sec: 1.0,
            ..Default::default()
        }
    }

    /// Stereo sine with optional silent padding on both sides.
    fn tone(lead_sec: f64, body_sec: f64, tail_sec: f64, amplitude: f32) -> Pcm {
        let lead = (lead_sec * RATE as f64) as usize;
        let body = (body_sec * RATE as f64) as usize;
        let tail = (tail_sec * RATE as f64) as usize;
        let mut samples = vec![0.0; lead * 2];
        for i in 0..body {
            let v = amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / RATE as f32).sin();
            samples.push(v);
            samples.push(v);
        }
        samples.extend(std::iter::repeat(0.0).take(tail * 2));
        Pcm::new(RATE, 2, samples)
    }

    fn fixture(dir: &TempDir, name: &str, pcm: &Pcm) -> std::path::PathBuf {
        let path = dir.path().join(name);
        write_wav(pcm, &path).unwrap();
        path
    }

    #[test]
    fn trim_removes_edge_silence() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(0.5, 2.0, 0.3, 0.5));
        let output = dir.path().join("out.wav");

        WavTool::new()
            .trim_silence(&input, &output, &TrimParams::default(), &plan())
            .unwrap();

        let duration = WavTool::new().probe_duration(&output).unwrap();
        assert!((duration - 2.0).abs() < 0.01, "got {duration}");
    }

    #[test]
    fn trim_leaves_short_silence_alone() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(0.05, 1.0, 0.0, 0.5));
        let output = dir.path().join("out.wav");

        WavTool::new()
            .trim_silence(&input, &output, &TrimParams::default(), &plan())
            .unwrap();

        let duration = WavTool::new().probe_duration(&output).unwrap();
        assert!((duration - 1.05).abs() < 0.01, "got {duration}");
    }

    #[test]
    fn trim_keeps_interior_silence() {
        let dir = tempdir().unwrap();
        let mut pcm = tone(0.3, 1.0, 0.4, 0.5);
        pcm.samples.extend(tone(0.0, 1.0, 0.3, 0.5).samples);
        let input = fixture(&dir, "in.wav", &pcm);
        let output = dir.path().join("out.wav");

        WavTool::new()
            .trim_silence(&input, &output, &TrimParams::default(), &plan())
            .unwrap();

        let duration = WavTool::new().probe_duration(&output).unwrap();
        assert!((duration - 2.4).abs() < 0.01, "got {duration}");
    }

    #[test]
    fn trim_of_pure_silence_is_empty() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &Pcm::silent(RATE, 2, RATE as usize));
        let output = dir.path().join("out.wav");

        let err = WavTool::new()
            .trim_silence(&input, &output, &TrimParams::default(), &plan())
            .unwrap_err();
        assert!(matches!(err, ToolError::Empty(_)));
    }

    #[test]
    fn normalize_reaches_target_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(0.0, 2.0, 0.0, 0.1));
        let once = dir.path().join("once.wav");
        let twice = dir.path().join("twice.wav");
        let tool = WavTool::new();
        let plan = plan();

        tool.normalize(&input, &once, &plan).unwrap();
        tool.normalize(&once, &twice, &plan).unwrap();

        let first = read_wav(&once).unwrap();
        let second = read_wav(&twice).unwrap();
        let lufs = loudness(&first).unwrap();
        assert!((lufs - plan.loudness.integrated_lufs).abs() < 0.01, "got {lufs}");
        for (a, b) in first.samples.iter().zip(&second.samples) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn loud_input_is_held_under_the_peak_ceiling() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(0.0, 1.0, 0.0, 0.01));
        let output = dir.path().join("out.wav");
        let mut plan = plan();
        plan.loudness.integrated_lufs = 0.0;

        WavTool::new().normalize(&input, &output, &plan).unwrap();

        let ceiling = db_to_linear(plan.loudness.true_peak_db);
        assert!(peak(&read_wav(&output).unwrap()) <= ceiling + 1e-6);
    }

    #[test]
    fn crossfade_shortens_by_overlap() {
        let dir = tempdir().unwrap();
        let a = fixture(&dir, "a.wav", &tone(0.0, 3.0, 0.0, 0.5));
        let b = fixture(&dir, "b.wav", &tone(0.0, 2.5, 0.0, 0.5));
        let output = dir.path().join("out.wav");

        WavTool::new().crossfade(&a, &b, &output, &plan()).unwrap();

        let duration = WavTool::new().probe_duration(&output).unwrap();
        assert!((duration - 4.5).abs() < 1e-3, "got {duration}");
    }

    #[test]
    fn mix_lasts_until_the_last_input_ends() {
        let dir = tempdir().unwrap();
        let a = fixture(&dir, "a.wav", &tone(0.0, 3.0, 0.0, 0.3));
        let b = fixture(&dir, "b.wav", &tone(0.0, 3.0, 0.0, 0.3));
        let output = dir.path().join("out.wav");
        let inputs = [
            DelayedInput { path: a, delay_sec: 0.0 },
            DelayedInput { path: b, delay_sec: 2.0 },
        ];

        WavTool::new().mix_delayed(&inputs, &output, &plan()).unwrap();

        let duration = WavTool::new().probe_duration(&output).unwrap();
        assert!((duration - 5.0).abs() < 1e-3, "got {duration}");
    }

    #[test]
    fn fade_silences_both_edges() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(0.0, 4.0, 0.0, 0.5));
        let output = dir.path().join("out.wav");
        let tool = WavTool::new();

        tool.fade(&input, &output, 4.0, 1.0, &plan()).unwrap();

        let head = tool.measure_level(&output, 0.0, 0.1).unwrap();
        let body = tool.measure_level(&output, 1.5, 1.0).unwrap();
        let tail = tool.measure_level(&output, 3.9, 0.1).unwrap();
        assert!(body - head > 20.0);
        assert!(body - tail > 20.0);
    }

    #[test]
    fn silence_detection_reports_gaps_and_closes_open_runs() {
        let dir = tempdir().unwrap();
        let mut pcm = tone(0.0, 1.0, 1.5, 0.5);
        pcm.samples.extend(tone(0.0, 1.0, 0.8, 0.5).samples);
        let input = fixture(&dir, "in.wav", &pcm);

        let intervals = WavTool::new()
            .detect_silence(&input, &SilenceParams::default())
            .unwrap();

        assert_eq!(intervals.len(), 2);
        assert!((intervals[0].start_sec - 1.0).abs() < 0.01);
        assert!((intervals[0].duration_sec() - 1.5).abs() < 0.01);
        assert!((intervals[1].end_sec - 4.3).abs() < 1e-6);
    }

    #[test]
    fn mono_low_rate_input_is_conformed() {
        let dir = tempdir().unwrap();
        let mono: Vec<f32> = (0..4000)
            .map(|i| 0.5 * (i as f32 * 220.0 * std::f32::consts::TAU / 4000.0).sin())
            .collect();
        let input = fixture(&dir, "in.wav", &Pcm::new(4000, 1, mono));
        let output = dir.path().join("out.wav");

        WavTool::new().encode(&input, &output, &plan()).unwrap();

        let pcm = read_wav(&output).unwrap();
        assert_eq!(pcm.sample_rate, RATE);
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.frames(), RATE as usize);
    }

    #[test]
    fn silent_window_measures_at_the_floor() {
        let dir = tempdir().unwrap();
        let input = fixture(&dir, "in.wav", &tone(1.0, 1.0, 0.0, 0.5));
        let tool = WavTool::new();
        assert_eq!(tool.measure_level(&input, 0.0, 0.5).unwrap(), SILENCE_FLOOR_DB);
        assert!(tool.measure_level(&input, 1.2, 0.5).unwrap() > -12.0);
    }
}
