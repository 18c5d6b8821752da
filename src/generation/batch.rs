//! Whole-catalog runs.
//!
//! A run has two phases. The clip phase fetches missing sound effects and
//! voice lines in small paced batches. The music phase runs one
//! [`TrackPipeline`] per track, `jobs` at a time. Both manifests are then
//! rewritten with every catalog entry, whether or not it was produced.

use std::path::PathBuf;
use std::thread;

use serde::Serialize;
use tracing::{error, info, warn};

use super::pipeline::{TrackOutcome, TrackPipeline};
use super::CancelFlag;
use crate::audio::AudioTool;
use crate::cache::{write_atomic, Manifest, SegmentStore};
use crate::config::{BakeConfig, BatchSettings};
use crate::error::{BakeError, ErrorCode, Result};
use crate::source::{fetch_with_retry, ClipRequest, SegmentSource};
use crate::types::Catalog;

/// File extension of clips returned by the generation service.
const CLIP_EXTENSION: &str = "mp3";

/// Aggregate counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Clips and segments fetched from the source.
    pub generated: usize,
    /// Clips and tracks whose output already existed.
    pub skipped: usize,
    /// Clips and tracks that could not be produced.
    pub failed: usize,
    /// Tracks assembled.
    pub assembled: usize,
}

impl RunSummary {
    /// Returns true if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// One clip to produce.
#[derive(Debug, Clone)]
struct ClipJob {
    label: String,
    path: PathBuf,
    request: ClipRequest,
}

enum ClipResult {
    Generated,
    Skipped,
    Failed,
}

/// Runs a catalog end to end.
pub struct BatchRunner<'a> {
    catalog: &'a Catalog,
    config: &'a BakeConfig,
    tool: &'a dyn AudioTool,
    source: Option<&'a dyn SegmentSource>,
    cancel: CancelFlag,
}

impl<'a> BatchRunner<'a> {
    pub fn new(catalog: &'a Catalog, config: &'a BakeConfig, tool: &'a dyn AudioTool) -> Self {
        Self {
            catalog,
            config,
            tool,
            source: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Sets the source for missing clips and segments.
    pub fn with_source(mut self, source: &'a dyn SegmentSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Shares a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs both phases, writes the manifests and applies cleanup.
    ///
    /// Per-asset failures are counted in the summary; only failures that
    /// affect the whole run (unwritable output, manifest I/O) are errors.
    pub fn run(&self) -> Result<RunSummary> {
        let output_dir = &self.config.output_dir;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| BakeError::io("create output directory", output_dir, e))?;

        let mut summary = RunSummary::default();

        if !self.config.generates() {
            info!("Phase 1: skipping clips (assemble-only)");
        } else if self.config.skip_clips {
            info!("Phase 1: skipping clips");
        } else {
            self.run_clips(&mut summary)?;
        }

        let store = SegmentStore::new(
            self.config.effective_segments_dir(),
            &self.config.segment_extension,
        );
        self.run_music(&store, &mut summary);

        self.write_manifests()?;

        if self.config.clean {
            if summary.is_success() {
                store.purge()?;
            } else {
                warn!(
                    failed = summary.failed,
                    "segment cache kept because the run had failures"
                );
            }
        } else if store.dir().exists() {
            info!(
                dir = %store.dir().display(),
                "segments kept (use --clean to remove)"
            );
        }

        info!(
            generated = summary.generated,
            skipped = summary.skipped,
            failed = summary.failed,
            assembled = summary.assembled,
            "Done!"
        );
        Ok(summary)
    }

    fn run_clips(&self, summary: &mut RunSummary) -> Result<()> {
        let sfx: Vec<ClipJob> = self
            .catalog
            .sfx
            .iter()
            .map(|clip| ClipJob {
                label: clip.key.clone(),
                path: self
                    .config
                    .output_dir
                    .join(format!("{}.{}", clip.key, CLIP_EXTENSION)),
                request: ClipRequest::SoundEffect {
                    prompt: clip.prompt.clone(),
                    duration_sec: clip.duration_sec,
                },
            })
            .collect();
        info!(count = sfx.len(), "Phase 1: sound effects");
        self.run_clip_batches(&sfx, self.config.sfx_batch, summary);

        let voices = &self.catalog.voices;
        let mut lines = Vec::with_capacity(voices.lines.len());
        for line in &voices.lines {
            let Some(voice_id) = voices.voice_id(&line.voice) else {
                error!(file = %line.filename, voice = %line.voice, "no voice id");
                summary.failed += 1;
                continue;
            };
            lines.push(ClipJob {
                label: line.filename.clone(),
                path: self.config.voices_dir.join(&line.filename),
                request: ClipRequest::Speech {
                    text: line.text.clone(),
                    voice_id: voice_id.to_string(),
                    model_id: voices.model_id.clone(),
                },
            });
        }
        if !lines.is_empty() {
            let voices_dir = &self.config.voices_dir;
            std::fs::create_dir_all(voices_dir)
                .map_err(|e| BakeError::io("create voices directory", voices_dir, e))?;
        }
        info!(count = lines.len(), "Phase 1: voice lines");
        self.run_clip_batches(&lines, self.config.voice_batch, summary);
        Ok(())
    }

    fn run_clip_batches(&self, jobs: &[ClipJob], settings: BatchSettings, summary: &mut RunSummary) {
        let total = jobs.len();
        let mut done = 0;
        for (batch_no, batch) in jobs.chunks(settings.size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = total - done, "cancelled, skipping remaining clips");
                summary.failed += total - done;
                return;
            }
            // Pace only between batches that actually hit the source
            if batch_no > 0 && batch.iter().any(|job| !job.path.exists()) {
                thread::sleep(settings.pacing());
            }

            let results: Vec<ClipResult> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|job| scope.spawn(move || self.run_clip(job)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or(ClipResult::Failed))
                    .collect()
            });

            for (job, result) in batch.iter().zip(results) {
                done += 1;
                match result {
                    ClipResult::Generated => {
                        summary.generated += 1;
                        info!("[{}/{}] OK   {}", done, total, job.label);
                    }
                    ClipResult::Skipped => {
                        summary.skipped += 1;
                        info!("[{}/{}] SKIP {}", done, total, job.label);
                    }
                    ClipResult::Failed => {
                        summary.failed += 1;
                        error!("[{}/{}] FAIL {}", done, total, job.label);
                    }
                }
            }
        }
    }

    fn run_clip(&self, job: &ClipJob) -> ClipResult {
        if job.path.exists() {
            return ClipResult::Skipped;
        }
        let Some(source) = self.source else {
            error!(clip = %job.label, error = %BakeError::missing_api_key(), "no source");
            return ClipResult::Failed;
        };
        let fetched = fetch_with_retry(source, &job.request, &self.config.retry_policy())
            .and_then(|bytes| write_atomic(&job.path, &bytes));
        match fetched {
            Ok(()) => ClipResult::Generated,
            Err(err) => {
                error!(clip = %job.label, error = %err, "clip failed");
                ClipResult::Failed
            }
        }
    }

    fn run_music(&self, store: &SegmentStore, summary: &mut RunSummary) {
        let tracks = &self.catalog.music;
        info!(
            tracks = tracks.len(),
            segments = self.catalog.segment_total(),
            jobs = self.config.jobs,
            "Phase 2: music"
        );

        let mut pipeline = TrackPipeline::new(self.tool, store, self.config, &self.cancel);
        if let Some(source) = self.source {
            pipeline = pipeline.with_source(source);
        }
        let pipeline = &pipeline;

        for chunk in tracks.chunks(self.config.jobs.max(1)) {
            let outcomes: Vec<TrackOutcome> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|spec| (spec, scope.spawn(move || pipeline.run(spec))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(spec, handle)| {
                        handle.join().unwrap_or_else(|_| TrackOutcome::Failed {
                            key: spec.key.clone(),
                            error: BakeError::new(ErrorCode::ToolFailed, "track pipeline panicked"),
                            generated: 0,
                        })
                    })
                    .collect()
            });

            for outcome in outcomes {
                summary.generated += outcome.generated();
                match outcome {
                    TrackOutcome::Assembled { .. } => summary.assembled += 1,
                    TrackOutcome::Skipped { .. } => summary.skipped += 1,
                    TrackOutcome::Failed { .. } => summary.failed += 1,
                }
            }
        }
    }

    /// Writes the audio manifest and, when the catalog has voice lines,
    /// the voice manifest.
    fn write_manifests(&self) -> Result<()> {
        let mut audio = Manifest::new();
        for clip in &self.catalog.sfx {
            audio.insert(&clip.key, format!("{}.{}", clip.key, CLIP_EXTENSION));
        }
        for track in &self.catalog.music {
            audio.insert(
                &track.key,
                format!("{}.{}", track.key, self.tool.output_extension()),
            );
        }
        audio.write(&self.config.output_dir.join("manifest.json"))?;

        if !self.catalog.voices.lines.is_empty() {
            let mut voices = Manifest::new();
            for line in &self.catalog.voices.lines {
                voices.insert(line.manifest_key(), &line.filename);
            }
            voices.write(&self.config.voices_dir.join("manifest.json"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav_to_buffer, WavTool};
    use crate::config::{RunMode, ToolKind};
    use crate::test_support::{faded_tone, RATE};
    use crate::types::MergePlan;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl SegmentSource for CountingSource {
        fn fetch(&self, request: &ClipRequest) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request {
                ClipRequest::Speech { text, .. } if text == "broken" => {
                    Err(BakeError::new(ErrorCode::SourceFailed, "rejected"))
                }
                ClipRequest::Speech { .. } => Ok(b"speech".to_vec()),
                ClipRequest::SoundEffect { duration_sec: None, .. } => Ok(b"sfx".to_vec()),
                ClipRequest::SoundEffect { .. } => {
                    Ok(write_wav_to_buffer(&faded_tone(4.0, 1.0, 0.4)).unwrap())
                }
            }
        }
    }

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"{
                "sfx": [{"key": "click", "prompt": "click"}],
                "voices": {
                    "default_voice": "system",
                    "voice_ids": {"system": "v1"},
                    "lines": [
                        {"text": "Ready!", "voice": "system", "filename": "ready.mp3"},
                        {"text": "broken", "voice": "system", "filename": "broken.mp3"}
                    ]
                },
                "music": [{"key": "music-a", "base": "b", "variations": ["x", "y"], "segment_seconds": 4.0}]
            }"#,
        )
        .unwrap()
    }

    fn config(dir: &tempfile::TempDir) -> BakeConfig {
        BakeConfig {
            output_dir: dir.path().join("audio"),
            voices_dir: dir.path().join("voices"),
            work_dir: Some(dir.path().join("work")),
            tool: ToolKind::Native,
            segment_extension: "wav".to_string(),
            sfx_batch: BatchSettings::new(1, 0),
            voice_batch: BatchSettings::new(3, 0),
            segment_batch: BatchSettings::new(1, 0),
            plan: MergePlan {
                sample_rate: RATE,
                overlap_sec: 1.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn full_run_counts_and_writes_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let catalog = catalog();
        let tool = WavTool::new();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };

        let summary = BatchRunner::new(&catalog, &config, &tool)
            .with_source(&source)
            .run()
            .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                generated: 4,
                skipped: 0,
                failed: 1,
                assembled: 1
            }
        );
        let audio: Manifest = serde_json::from_str(
            &std::fs::read_to_string(config.output_dir.join("manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(audio.get("click"), Some("click.mp3"));
        assert_eq!(audio.get("music-a"), Some("music-a.wav"));

        let voices: Manifest = serde_json::from_str(
            &std::fs::read_to_string(config.voices_dir.join("manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(voices.get("broken||system"), Some("broken.mp3"));
        assert!(config.voices_dir.join("ready.mp3").exists());
        assert!(!config.voices_dir.join("broken.mp3").exists());
    }

    #[test]
    fn cancelled_run_requests_nothing_and_still_writes_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let catalog = catalog();
        let tool = WavTool::new();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };
        let cancel = CancelFlag::new();
        cancel.cancel();

        let summary = BatchRunner::new(&catalog, &config, &tool)
            .with_source(&source)
            .with_cancel(cancel)
            .run()
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            summary,
            RunSummary {
                generated: 0,
                skipped: 0,
                failed: 4,
                assembled: 0
            }
        );
        assert!(config.output_dir.join("manifest.json").exists());
        assert!(!config.output_dir.join("music-a.wav").exists());
    }

    #[test]
    fn second_run_skips_everything_produced() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let catalog = catalog();
        let tool = WavTool::new();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };
        let runner = BatchRunner::new(&catalog, &config, &tool).with_source(&source);

        runner.run().unwrap();
        let calls = source.calls.load(Ordering::SeqCst);
        let summary = runner.run().unwrap();

        // only the broken voice line is requested again
        assert_eq!(source.calls.load(Ordering::SeqCst), calls + 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn clean_requires_a_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.clean = true;
        let mut catalog = catalog();
        let tool = WavTool::new();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
        };

        BatchRunner::new(&catalog, &config, &tool)
            .with_source(&source)
            .run()
            .unwrap();
        assert!(config.effective_segments_dir().exists());

        catalog.voices.lines.retain(|line| line.text != "broken");
        config.mode = RunMode::AssembleOnly;
        let summary = BatchRunner::new(&catalog, &config, &tool).run().unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.assembled, 1);
        assert!(!config.effective_segments_dir().exists());
    }
}
