//! ffmpeg-backed audio tool.
//!
//! Every operation is one blocking `ffmpeg` (or `ffprobe`) invocation with a
//! deadline. Intermediates are 16-bit PCM WAV; final assets are MP3.
//! Bit-exact flags keep repeated runs byte-identical.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use super::tool::{
    ensure_output, trim_span, AudioTool, DelayedInput, SilenceParams, ToolError, ToolResult,
    TrimParams,
};
use crate::types::{MergePlan, SilenceInterval};

/// Bitrate of final MP3 assets.
pub const DEFAULT_BITRATE_KBPS: u32 = 192;

/// Number of stderr characters kept in error messages.
const STDERR_TAIL: usize = 600;

/// Captured output of a finished invocation.
#[derive(Debug)]
struct Invocation {
    stdout: String,
    stderr: String,
}

/// Audio tool that shells out to ffmpeg and ffprobe.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfmpegTool {
    /// Creates a tool using the given binaries and per-invocation timeout.
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    /// Verifies that both binaries can be launched.
    pub fn check_available(&self) -> ToolResult<()> {
        self.run(&self.ffmpeg, &["-version".to_string()])?;
        self.run(&self.ffprobe, &["-version".to_string()])?;
        Ok(())
    }

    /// Runs an ffmpeg transform `inputs -> output` with the given filter args.
    fn transform(&self, inputs: &[&Path], filter_args: Vec<String>, output: &Path) -> ToolResult<()> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostats".to_string(),
        ];
        for input in inputs {
            args.push("-i".to_string());
            args.push(path_arg(input));
        }
        args.extend(filter_args);
        args.extend(self.codec_args(output));
        args.push(path_arg(output));

        self.run(&self.ffmpeg, &args)?;
        ensure_output(output)
    }

    /// Codec and bit-exactness arguments for an output path.
    fn codec_args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = match extension(output).as_deref() {
            Some("mp3") => vec![
                "-c:a".into(),
                "libmp3lame".into(),
                "-b:a".into(),
                format!("{}k", DEFAULT_BITRATE_KBPS),
            ],
            _ => vec!["-c:a".into(), "pcm_s16le".into()],
        };
        args.extend(
            ["-map_metadata", "-1", "-fflags", "+bitexact", "-flags:a", "+bitexact"]
                .into_iter()
                .map(String::from),
        );
        args
    }

    /// Launches `program` and waits for it, killing it at the deadline.
    fn run(&self, program: &Path, args: &[String]) -> ToolResult<Invocation> {
        let name = program.display().to_string();
        debug!(program = %name, args = ?args, "running audio tool");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: name.clone(),
                source,
            })?;

        // Pipes are drained on reader threads while polling for exit
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ToolError::Timeout {
                            program: name,
                            timeout_sec: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Err(source) => {
                    return Err(ToolError::Spawn {
                        program: name,
                        source,
                    })
                }
            }
        };

        let stdout = stdout.map(join_reader).unwrap_or_default();
        let stderr = stderr.map(join_reader).unwrap_or_default();

        if !status.success() {
            return Err(ToolError::Exit {
                program: name,
                status: status.code().unwrap_or(-1),
                stderr_tail: tail(&stderr, STDERR_TAIL),
            });
        }

        Ok(Invocation { stdout, stderr })
    }

    /// Runs an analysis filter over `input` and returns ffmpeg's log output.
    fn analyze(&self, input_args: Vec<String>, filter: String) -> ToolResult<String> {
        let mut args = vec!["-hide_banner".to_string(), "-nostats".to_string()];
        args.extend(input_args);
        args.extend(["-af".to_string(), filter, "-f".into(), "null".into(), "-".into()]);
        Ok(self.run(&self.ffmpeg, &args)?.stderr)
    }
}

impl AudioTool for FfmpegTool {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn output_extension(&self) -> &'static str {
        "mp3"
    }

    fn probe_duration(&self, input: &Path) -> ToolResult<f64> {
        let args = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ]
        .into_iter()
        .map(String::from)
        .chain(std::iter::once(path_arg(input)))
        .collect::<Vec<_>>();

        let out = self.run(&self.ffprobe, &args)?;
        out.stdout.trim().parse::<f64>().map_err(|_| ToolError::Parse {
            program: "ffprobe".to_string(),
            detail: format!("duration {:?} for {}", out.stdout.trim(), input.display()),
        })
    }

    fn trim_silence(
        &self,
        input: &Path,
        output: &Path,
        params: &TrimParams,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let duration = self.probe_duration(input)?;
        let silence = self.detect_silence(input, &params.silence())?;
        let Some((start, end)) = trim_span(&silence, duration) else {
            return Err(ToolError::Empty(output.to_path_buf()));
        };
        debug!(input = %input.display(), start, end, "trim span");
        self.transform(&[input], af(trim_filter(start, end, plan)), output)
    }

    fn normalize(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
        let filter = format!("{},{}", loudnorm_filter(plan), format_filter(plan));
        self.transform(&[input], af(filter), output)
    }

    fn fade(
        &self,
        input: &Path,
        output: &Path,
        duration_sec: f64,
        fade_sec: f64,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        self.transform(&[input], af(fade_filter(duration_sec, fade_sec, plan)), output)
    }

    fn mix_delayed(
        &self,
        inputs: &[DelayedInput],
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let delays: Vec<f64> = inputs.iter().map(|i| i.delay_sec).collect();
        let paths: Vec<&Path> = inputs.iter().map(|i| i.path.as_path()).collect();
        let graph = mix_filter_graph(&delays, plan);
        self.transform(&paths, vec!["-filter_complex".into(), graph], output)
    }

    fn crossfade(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()> {
        let graph = crossfade_filter_graph(plan);
        self.transform(&[first, second], vec!["-filter_complex".into(), graph], output)
    }

    fn encode(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
        self.transform(&[input], af(format_filter(plan)), output)
    }

    fn detect_silence(
        &self,
        input: &Path,
        params: &SilenceParams,
    ) -> ToolResult<Vec<SilenceInterval>> {
        let filter = format!(
            "silencedetect=noise={}dB:d={}",
            params.noise_db, params.min_duration_sec
        );
        let log = self.analyze(vec!["-i".into(), path_arg(input)], filter)?;
        let duration = self.probe_duration(input)?;
        Ok(parse_silencedetect(&log, duration))
    }

    fn measure_level(&self, input: &Path, start_sec: f64, duration_sec: f64) -> ToolResult<f64> {
        let input_args = vec![
            "-ss".to_string(),
            format!("{:.3}", start_sec),
            "-t".to_string(),
            format!("{:.3}", duration_sec),
            "-i".to_string(),
            path_arg(input),
        ];
        let log = self.analyze(input_args, "volumedetect".to_string())?;
        parse_mean_volume(&log).ok_or_else(|| ToolError::Parse {
            program: "ffmpeg".to_string(),
            detail: format!("no mean_volume for {}", input.display()),
        })
    }
}

fn af(filter: String) -> Vec<String> {
    vec!["-af".to_string(), filter]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Sample format conversion appended to every transform.
pub fn format_filter(plan: &MergePlan) -> String {
    format!(
        "aformat=sample_fmts=fltp:sample_rates={}:channel_layouts={}",
        plan.sample_rate,
        plan.layout.as_str()
    )
}

/// Single-pass EBU R128 normalization to the plan target.
pub fn loudnorm_filter(plan: &MergePlan) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}",
        plan.loudness.integrated_lufs, plan.loudness.true_peak_db, plan.loudness.loudness_range
    )
}

/// Keeps `[start_sec, end_sec)` of the stream and rebases timestamps.
pub fn trim_filter(start_sec: f64, end_sec: f64, plan: &MergePlan) -> String {
    format!(
        "atrim=start={:.6}:end={:.6},asetpts=PTS-STARTPTS,{}",
        start_sec,
        end_sec,
        format_filter(plan)
    )
}

/// Linear fade-in at the start and fade-out ending at `duration_sec`.
pub fn fade_filter(duration_sec: f64, fade_sec: f64, plan: &MergePlan) -> String {
    let out_start = (duration_sec - fade_sec).max(0.0);
    format!(
        "afade=t=in:st=0:d={fade_sec},afade=t=out:st={out_start:.3}:d={fade_sec},{}",
        format_filter(plan)
    )
}

/// Filter graph delaying input `i` by `delays[i]` and mixing all inputs.
///
/// `amix` runs with `normalize=0` so overlapping fades sum without the
/// per-input attenuation; `loudnorm` then sets the final level.
pub fn mix_filter_graph(delays: &[f64], plan: &MergePlan) -> String {
    let format = format_filter(plan);
    let mut chains: Vec<String> = delays
        .iter()
        .enumerate()
        .map(|(i, delay)| {
            let delay_ms = (delay * 1000.0).round() as u64;
            if delay_ms == 0 {
                format!("[{i}]{format}[s{i}]")
            } else {
                format!("[{i}]{format},adelay={delay_ms}|{delay_ms}[s{i}]")
            }
        })
        .collect();

    let labels: String = (0..delays.len()).map(|i| format!("[s{i}]")).collect();
    chains.push(format!(
        "{labels}amix=inputs={}:duration=longest:normalize=0,{},{format}",
        delays.len(),
        loudnorm_filter(plan)
    ));
    chains.join(";")
}

/// Filter graph crossfading input 0 into input 1.
pub fn crossfade_filter_graph(plan: &MergePlan) -> String {
    let curve = plan.curve.ffmpeg_name();
    format!(
        "[0][1]acrossfade=d={}:c1={curve}:c2={curve},{}",
        plan.overlap_sec,
        format_filter(plan)
    )
}

fn silence_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"silence_start:\s*(-?[\d.]+)").expect("valid regex"))
}

fn silence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"silence_end:\s*(-?[\d.]+)\s*\|\s*silence_duration:\s*([\d.]+)")
            .expect("valid regex")
    })
}

fn mean_volume_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"mean_volume:\s*(-?[\d.]+|-inf) dB").expect("valid regex"))
}

/// Parses `silencedetect` log lines into intervals.
///
/// A start without a matching end is closed at `duration_sec`.
pub fn parse_silencedetect(log: &str, duration_sec: f64) -> Vec<SilenceInterval> {
    let mut intervals = Vec::new();
    let mut open: Option<f64> = None;

    for line in log.lines() {
        if let Some(caps) = silence_start_re().captures(line) {
            if let Ok(start) = caps[1].parse::<f64>() {
                open = Some(start.max(0.0));
            }
        }
        if let Some(caps) = silence_end_re().captures(line) {
            let (Ok(end), Ok(length)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) else {
                continue;
            };
            let start = open.take().unwrap_or((end - length).max(0.0));
            intervals.push(SilenceInterval::new(start, end));
        }
    }

    if let Some(start) = open {
        intervals.push(SilenceInterval::new(start, duration_sec.max(start)));
    }
    intervals
}

/// Extracts `mean_volume` from a `volumedetect` log.
pub fn parse_mean_volume(log: &str) -> Option<f64> {
    let caps = mean_volume_re().captures(log)?;
    match &caps[1] {
        "-inf" => Some(f64::NEG_INFINITY),
        value => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FadeCurve;

    #[test]
    fn mix_graph_delays_and_mixes_every_input() {
        let plan = MergePlan::default();
        let graph = mix_filter_graph(&[0.0, 16.0, 32.0], &plan);
        let chains: Vec<&str> = graph.split(';').collect();

        assert_eq!(chains.len(), 4);
        assert!(chains[0].starts_with("[0]aformat="));
        assert!(!chains[0].contains("adelay"));
        assert!(chains[1].ends_with("adelay=16000|16000[s1]"));
        assert!(chains[2].ends_with("adelay=32000|32000[s2]"));
        assert!(chains[3].starts_with("[s0][s1][s2]amix=inputs=3:duration=longest:normalize=0"));
        assert!(chains[3].contains("loudnorm=I=-16:TP=-1.5:LRA=11"));
    }

    #[test]
    fn crossfade_graph_uses_plan_curve() {
        let plan = MergePlan {
            curve: FadeCurve::EqualPower,
            overlap_sec: 4.5,
            ..Default::default()
        };
        let graph = crossfade_filter_graph(&plan);
        assert!(graph.starts_with("[0][1]acrossfade=d=4.5:c1=qsin:c2=qsin,"));
    }

    #[test]
    fn trim_filter_cuts_detected_span() {
        let graph = trim_filter(0.25, 21.5, &MergePlan::default());
        assert!(graph.starts_with("atrim=start=0.250000:end=21.500000,asetpts=PTS-STARTPTS,"));
        assert!(graph.ends_with(&format_filter(&MergePlan::default())));
    }

    #[test]
    fn trim_rule_matches_silencedetect_edges() {
        // Short leading silence is below `d` and never reported.
        let log = "\
[silencedetect @ 0x1] silence_start: 21.8
[silencedetect @ 0x1] silence_end: 22 | silence_duration: 0.2
";
        let params = TrimParams::default().silence();
        assert_eq!(params.noise_db, -45.0);
        assert_eq!(params.min_duration_sec, 0.1);
        let intervals = parse_silencedetect(log, 22.0);
        assert_eq!(trim_span(&intervals, 22.0), Some((0.0, 21.8)));
    }

    #[test]
    fn parses_silencedetect_log() {
        let log = "\
[silencedetect @ 0x55] silence_start: 0
[silencedetect @ 0x55] silence_end: 0.62 | silence_duration: 0.62
size=N/A time=00:01:00.00 bitrate=N/A speed= 300x
[silencedetect @ 0x55] silence_start: 30.25
[silencedetect @ 0x55] silence_end: 31.75 | silence_duration: 1.5
[silencedetect @ 0x55] silence_start: 59.4
";
        let intervals = parse_silencedetect(log, 60.0);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0], SilenceInterval::new(0.0, 0.62));
        assert_eq!(intervals[1], SilenceInterval::new(30.25, 31.75));
        assert!((intervals[1].duration_sec() - 1.5).abs() < 1e-9);
        // still open at end of stream
        assert_eq!(intervals[2], SilenceInterval::new(59.4, 60.0));
    }

    #[test]
    fn negative_silence_start_is_clamped() {
        let log = "silence_start: -0.00133\nsilence_end: 1.2 | silence_duration: 1.2013\n";
        let intervals = parse_silencedetect(log, 10.0);
        assert_eq!(intervals, vec![SilenceInterval::new(0.0, 1.2)]);
    }

    #[test]
    fn parses_mean_volume() {
        let log = "[Parsed_volumedetect_0 @ 0x1] n_samples: 88200\n\
                   [Parsed_volumedetect_0 @ 0x1] mean_volume: -23.4 dB\n\
                   [Parsed_volumedetect_0 @ 0x1] max_volume: -4.1 dB\n";
        assert_eq!(parse_mean_volume(log), Some(-23.4));
        assert_eq!(parse_mean_volume("mean_volume: -inf dB"), Some(f64::NEG_INFINITY));
        assert_eq!(parse_mean_volume("nothing here"), None);
    }

    #[test]
    fn codec_args_pick_format_from_extension() {
        let tool = FfmpegTool::new("ffmpeg", "ffprobe", Duration::from_secs(5));
        let mp3 = tool.codec_args(Path::new("/out/music-title.mp3"));
        assert!(mp3.contains(&"libmp3lame".to_string()));
        assert!(mp3.contains(&"192k".to_string()));
        let wav = tool.codec_args(Path::new("/scratch/merge01.wav"));
        assert!(wav.contains(&"pcm_s16le".to_string()));
        assert!(wav.contains(&"+bitexact".to_string()));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(tail("abcdef\n", 3), "def");
        assert_eq!(tail("ab", 10), "ab");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let tool = FfmpegTool::new(
            "/nonexistent/ffmpeg-binary",
            "/nonexistent/ffprobe-binary",
            Duration::from_secs(5),
        );
        assert!(matches!(tool.check_available(), Err(ToolError::Spawn { .. })));
    }
}
