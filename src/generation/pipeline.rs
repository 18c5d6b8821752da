//! Per-track pipeline.
//!
//! Drives one [`TrackSpec`] from cached or freshly generated segments to a
//! verified final asset: collect segments, preprocess them when the plan
//! asks for it, assemble, move the result into the output directory and
//! check it for silence gaps.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, error, info, warn};

use super::CancelFlag;
use crate::assembly::{ContinuityVerifier, SegmentPreprocessor, TrackAssembler};
use crate::audio::AudioTool;
use crate::cache::{write_atomic, SegmentStore};
use crate::config::BakeConfig;
use crate::error::{BakeError, ErrorCode, Result};
use crate::source::{fetch_with_retry, ClipRequest, SegmentSource};
use crate::types::{AssembledTrack, ContinuityReport, Segment, TrackSpec};

/// Result of running one track.
#[derive(Debug)]
pub enum TrackOutcome {
    /// The track was built and verified.
    Assembled {
        track: AssembledTrack,
        report: ContinuityReport,
        /// Segments fetched during this run.
        generated: usize,
    },
    /// The final asset already existed.
    Skipped { key: String },
    /// The track could not be built. Fetched segments stay cached.
    Failed {
        key: String,
        error: BakeError,
        generated: usize,
    },
}

impl TrackOutcome {
    pub fn key(&self) -> &str {
        match self {
            TrackOutcome::Assembled { track, .. } => &track.key,
            TrackOutcome::Skipped { key } | TrackOutcome::Failed { key, .. } => key,
        }
    }

    /// Segments fetched from the source while running the track.
    pub fn generated(&self) -> usize {
        match self {
            TrackOutcome::Assembled { generated, .. } | TrackOutcome::Failed { generated, .. } => {
                *generated
            }
            TrackOutcome::Skipped { .. } => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TrackOutcome::Failed { .. })
    }
}

/// Builds music tracks from segments.
pub struct TrackPipeline<'a> {
    tool: &'a dyn AudioTool,
    source: Option<&'a dyn SegmentSource>,
    store: &'a SegmentStore,
    config: &'a BakeConfig,
    cancel: &'a CancelFlag,
}

impl<'a> TrackPipeline<'a> {
    pub fn new(
        tool: &'a dyn AudioTool,
        store: &'a SegmentStore,
        config: &'a BakeConfig,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            tool,
            source: None,
            store,
            config,
            cancel,
        }
    }

    /// Sets the source used for segments missing from the cache.
    pub fn with_source(mut self, source: &'a dyn SegmentSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the final asset path of a track.
    pub fn final_path(&self, spec: &TrackSpec) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.{}", spec.key, self.tool.output_extension()))
    }

    /// Runs the pipeline for one track.
    ///
    /// Never fails as a whole: every error is captured in
    /// [`TrackOutcome::Failed`] so other tracks are unaffected.
    pub fn run(&self, spec: &TrackSpec) -> TrackOutcome {
        let final_path = self.final_path(spec);
        if final_path.exists() && !self.config.rebuilds_tracks() {
            info!(track = %spec.key, "SKIP (already exists)");
            return TrackOutcome::Skipped {
                key: spec.key.clone(),
            };
        }

        let mut generated = 0;
        match self.build(spec, &final_path, &mut generated) {
            Ok((track, report)) => {
                info!(
                    track = %spec.key,
                    path = %track.path.display(),
                    gaps = report.gaps.len(),
                    "DONE"
                );
                TrackOutcome::Assembled {
                    track,
                    report,
                    generated,
                }
            }
            Err(error) => {
                error!(track = %spec.key, error = %error, "track failed");
                TrackOutcome::Failed {
                    key: spec.key.clone(),
                    error,
                    generated,
                }
            }
        }
    }

    fn check_cancel(&self, key: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BakeError::cancelled(key));
        }
        Ok(())
    }

    fn build(
        &self,
        spec: &TrackSpec,
        final_path: &Path,
        generated: &mut usize,
    ) -> Result<(AssembledTrack, ContinuityReport)> {
        self.config.plan.validate(spec.segment_seconds)?;
        self.check_cancel(&spec.key)?;

        let paths = self.collect_segments(spec, generated)?;
        self.check_cancel(&spec.key)?;

        let segments = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| -> Result<Segment> {
                let duration_sec = self.tool.probe_duration(&path)?;
                Ok(Segment {
                    track: spec.key.clone(),
                    index,
                    path,
                    duration_sec,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let work_dir = self.config.effective_work_dir();
        fs::create_dir_all(&work_dir)
            .map_err(|e| BakeError::io("create work directory", &work_dir, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", spec.key))
            .tempdir_in(&work_dir)
            .map_err(|e| BakeError::io("create scratch directory", &work_dir, e))?;

        match self.assemble_in(spec, segments, final_path, scratch.path()) {
            Ok(built) => Ok(built),
            Err(err) => {
                if self.config.keep_intermediates {
                    let kept = scratch.keep();
                    warn!(
                        track = %spec.key,
                        path = %kept.display(),
                        "intermediates kept for inspection"
                    );
                }
                Err(err)
            }
        }
    }

    fn assemble_in(
        &self,
        spec: &TrackSpec,
        segments: Vec<Segment>,
        final_path: &Path,
        scratch: &Path,
    ) -> Result<(AssembledTrack, ContinuityReport)> {
        let plan = &self.config.plan;

        let segments = if plan.preprocesses() {
            let preprocessor = SegmentPreprocessor::new(self.tool);
            let mut processed = Vec::with_capacity(segments.len());
            for segment in &segments {
                self.check_cancel(&spec.key)?;
                processed.push(preprocessor.process(segment, plan, scratch)?);
            }
            processed
        } else {
            segments
        };
        self.check_cancel(&spec.key)?;

        info!(
            track = %spec.key,
            strategy = %plan.strategy,
            segments = segments.len(),
            "merging segments"
        );
        let staged = scratch.join(format!("{}.{}", spec.key, self.tool.output_extension()));
        let mut track = TrackAssembler::new(self.tool)
            .with_tolerance(self.config.duration_tolerance_sec)
            .assemble(
                &spec.key,
                &segments,
                plan,
                spec.segment_seconds,
                &staged,
                scratch,
            )?;
        self.check_cancel(&spec.key)?;

        move_into_place(&staged, final_path)?;
        track.path = final_path.to_path_buf();

        let report = ContinuityVerifier::new(self.tool)
            .with_params(self.config.gap_silence())
            .with_guard(self.config.gap_guard_sec)
            .verify(&spec.key, final_path)?;
        Ok((track, report))
    }

    /// Returns the cached path of every segment, fetching missing ones.
    fn collect_segments(&self, spec: &TrackSpec, generated: &mut usize) -> Result<Vec<PathBuf>> {
        let count = spec.segment_count();
        let mut missing = Vec::new();
        for index in 0..count {
            if self.store.contains(&spec.key, index) {
                debug!(track = %spec.key, segment = index, "seg {}/{} SKIP", index + 1, count);
            } else {
                missing.push(index);
            }
        }

        if let Some(&first) = missing.first() {
            if !self.config.generates() {
                return Err(BakeError::missing_segment(&self.store.path_for(&spec.key, first)));
            }
            let source = self.source.ok_or_else(BakeError::missing_api_key)?;
            info!(
                track = %spec.key,
                missing = missing.len(),
                total = count,
                "generating segments"
            );
            self.fetch_missing(spec, source, &missing, generated)?;
        }

        Ok((0..count)
            .map(|index| self.store.path_for(&spec.key, index))
            .collect())
    }

    /// Fetches segments in paced batches. A failing batch still runs to
    /// completion so its successful segments are cached; no later batch is
    /// requested.
    fn fetch_missing(
        &self,
        spec: &TrackSpec,
        source: &dyn SegmentSource,
        missing: &[usize],
        generated: &mut usize,
    ) -> Result<()> {
        let settings = self.config.segment_batch;
        let mut first_error = None;

        for (batch_no, batch) in missing.chunks(settings.size).enumerate() {
            if first_error.is_some() {
                break;
            }
            if batch_no > 0 {
                thread::sleep(settings.pacing());
            }
            self.check_cancel(&spec.key)?;

            let results: Vec<(usize, Result<()>)> = thread::scope(|scope| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|&index| {
                        (index, scope.spawn(move || self.fetch_segment(spec, source, index)))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(index, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(BakeError::new(
                                ErrorCode::SourceFailed,
                                "segment request panicked",
                            ))
                        });
                        (index, result)
                    })
                    .collect()
            });

            for (index, result) in results {
                match result {
                    Ok(()) => *generated += 1,
                    Err(err) => {
                        error!(
                            track = %spec.key,
                            segment = index,
                            error = %err,
                            "seg {}/{} FAIL",
                            index + 1,
                            spec.segment_count()
                        );
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fetch_segment(&self, spec: &TrackSpec, source: &dyn SegmentSource, index: usize) -> Result<()> {
        let prompt = spec.prompt_for(index).ok_or_else(|| {
            BakeError::invalid_plan(format!("track {} has no segment {}", spec.key, index))
        })?;
        let request = ClipRequest::SoundEffect {
            prompt,
            duration_sec: Some(spec.segment_seconds),
        };
        let bytes = fetch_with_retry(source, &request, &self.config.retry_policy())?;
        self.store.store(&spec.key, index, &bytes)?;
        info!(
            track = %spec.key,
            segment = index,
            "seg {}/{} OK",
            index + 1,
            spec.segment_count()
        );
        Ok(())
    }
}

/// Moves `from` over `to`. An existing `to` is only replaced once the new
/// file is complete.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| BakeError::io("create", parent, e))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_into_place(from, to)?;
    fs::remove_file(from).map_err(|e| BakeError::io("remove", from, e))
}

/// Cross-filesystem fallback: copies through `{to}.part`.
fn copy_into_place(from: &Path, to: &Path) -> Result<()> {
    let bytes = fs::read(from).map_err(|e| BakeError::io("read", from, e))?;
    write_atomic(to, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        write_wav_to_buffer, DelayedInput, SilenceParams, ToolError, ToolResult, TrimParams,
        WavTool,
    };
    use crate::config::{BatchSettings, RunMode, ToolKind};
    use crate::test_support::{faded_tone, RATE};
    use crate::types::{MergePlan, MergeStrategy, SilenceInterval};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Returns a faded tone for every prompt except those containing "FAIL".
    struct ToneSource {
        calls: AtomicUsize,
    }

    impl SegmentSource for ToneSource {
        fn fetch(&self, request: &ClipRequest) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request {
                ClipRequest::SoundEffect { prompt, .. } if prompt.contains("FAIL") => {
                    Err(BakeError::new(ErrorCode::SourceFailed, "rejected prompt"))
                }
                _ => Ok(write_wav_to_buffer(&faded_tone(4.0, 1.0, 0.4)).unwrap()),
            }
        }
    }

    fn source() -> ToneSource {
        ToneSource {
            calls: AtomicUsize::new(0),
        }
    }

    fn config(dir: &TempDir) -> BakeConfig {
        BakeConfig {
            output_dir: dir.path().join("out"),
            segments_dir: Some(dir.path().join("segments")),
            work_dir: Some(dir.path().join("work")),
            tool: ToolKind::Native,
            segment_extension: "wav".to_string(),
            segment_batch: BatchSettings::new(2, 0),
            plan: MergePlan {
                sample_rate: RATE,
                overlap_sec: 1.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn spec(variations: &[&str]) -> TrackSpec {
        TrackSpec {
            key: "music-test".to_string(),
            base: "calm".to_string(),
            variations: variations.iter().map(|v| v.to_string()).collect(),
            segment_seconds: 4.0,
        }
    }

    fn store(config: &BakeConfig) -> SegmentStore {
        SegmentStore::new(config.effective_segments_dir(), &config.segment_extension)
    }

    #[test]
    fn generates_assembles_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        let source = source();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec(&["a", "b", "c"]));

        let TrackOutcome::Assembled { track, report, generated } = outcome else {
            panic!("expected an assembled track, got {outcome:?}");
        };
        assert_eq!(generated, 3);
        assert_eq!(track.path, config.output_dir.join("music-test.wav"));
        assert!((track.measured_duration_sec - 10.0).abs() < 0.1);
        assert!(report.is_continuous());
        assert!(store.contains("music-test", 2));
        assert_eq!(fs::read_dir(config.effective_work_dir()).unwrap().count(), 0);
    }

    #[test]
    fn gap_rule_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.gap_min_sec = 0.02;
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        let source = source();
        let spec = spec(&["a", "b"]);

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec);
        let TrackOutcome::Assembled { report, .. } = outcome else {
            panic!("expected an assembled track, got {outcome:?}");
        };
        // Both quiet fade edges are detected but sit inside the guard.
        assert_eq!(report.total_detected, 2);
        assert!(report.is_continuous());

        config.gap_guard_sec = 0.0;
        config.mode = RunMode::AssembleOnly;
        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel).run(&spec);
        let TrackOutcome::Assembled { report, .. } = outcome else {
            panic!("expected an assembled track, got {outcome:?}");
        };
        assert!(!report.is_continuous());
        assert_eq!(report.gaps[0].start_sec, 0.0);
    }

    #[test]
    fn existing_track_is_skipped_unless_rebuilding() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        let source = source();
        let spec = spec(&["a", "b"]);

        {
            let store = store(&config);
            let pipeline = TrackPipeline::new(&tool, &store, &config, &cancel).with_source(&source);
            assert!(matches!(pipeline.run(&spec), TrackOutcome::Assembled { .. }));
            assert!(matches!(pipeline.run(&spec), TrackOutcome::Skipped { .. }));
        }

        config.mode = RunMode::AssembleOnly;
        let store = store(&config);
        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel).run(&spec);
        assert!(matches!(outcome, TrackOutcome::Assembled { generated: 0, .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn assemble_only_requires_cached_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.mode = RunMode::AssembleOnly;
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel).run(&spec(&["a"]));
        let TrackOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.code, ErrorCode::MissingSegment);
    }

    #[test]
    fn failed_segment_keeps_the_others_cached() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        let source = source();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec(&["a", "FAIL", "c", "d", "e"]));

        // The failing batch completes; later batches are not requested.
        assert!(outcome.is_failed());
        assert_eq!(outcome.generated(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(store.contains("music-test", 0));
        assert!(!store.contains("music-test", 1));
        assert!(!store.contains("music-test", 2));
        assert!(!config.output_dir.join("music-test.wav").exists());
    }

    #[test]
    fn cancelled_pipeline_stops() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let source = source();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec(&["a"]));

        let TrackOutcome::Failed { error, .. } = outcome else {
            panic!("expected cancellation");
        };
        assert_eq!(error.code, ErrorCode::Cancelled);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    /// Native tool whose crossfade fails from the given step on.
    struct BrokenCrossfade {
        inner: WavTool,
        fail_at: usize,
        calls: AtomicUsize,
    }

    impl AudioTool for BrokenCrossfade {
        fn name(&self) -> &'static str {
            "broken-crossfade"
        }

        fn output_extension(&self) -> &'static str {
            self.inner.output_extension()
        }

        fn probe_duration(&self, input: &Path) -> ToolResult<f64> {
            self.inner.probe_duration(input)
        }

        fn trim_silence(
            &self,
            input: &Path,
            output: &Path,
            params: &TrimParams,
            plan: &MergePlan,
        ) -> ToolResult<()> {
            self.inner.trim_silence(input, output, params, plan)
        }

        fn normalize(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
            self.inner.normalize(input, output, plan)
        }

        fn fade(
            &self,
            input: &Path,
            output: &Path,
            duration_sec: f64,
            fade_sec: f64,
            plan: &MergePlan,
        ) -> ToolResult<()> {
            self.inner.fade(input, output, duration_sec, fade_sec, plan)
        }

        fn mix_delayed(
            &self,
            inputs: &[DelayedInput],
            output: &Path,
            plan: &MergePlan,
        ) -> ToolResult<()> {
            self.inner.mix_delayed(inputs, output, plan)
        }

        fn crossfade(
            &self,
            first: &Path,
            second: &Path,
            output: &Path,
            plan: &MergePlan,
        ) -> ToolResult<()> {
            let step = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if step >= self.fail_at {
                return Err(ToolError::Exit {
                    program: "crossfade".to_string(),
                    status: 1,
                    stderr_tail: format!("step {step}"),
                });
            }
            self.inner.crossfade(first, second, output, plan)
        }

        fn encode(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()> {
            self.inner.encode(input, output, plan)
        }

        fn detect_silence(
            &self,
            input: &Path,
            params: &SilenceParams,
        ) -> ToolResult<Vec<SilenceInterval>> {
            self.inner.detect_silence(input, params)
        }

        fn measure_level(
            &self,
            input: &Path,
            start_sec: f64,
            duration_sec: f64,
        ) -> ToolResult<f64> {
            self.inner.measure_level(input, start_sec, duration_sec)
        }
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir(dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(files_under(&path));
            } else {
                found.push(path);
            }
        }
        found
    }

    #[test]
    fn failed_crossfade_chain_removes_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.plan.strategy = MergeStrategy::SequentialCrossfade;
        let store = store(&config);
        let tool = BrokenCrossfade {
            inner: WavTool::new(),
            fail_at: 2,
            calls: AtomicUsize::new(0),
        };
        let cancel = CancelFlag::new();
        let source = source();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec(&["a", "b", "c"]));

        let TrackOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.code, ErrorCode::ToolFailed);
        // The first merge step succeeded before the chain broke
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);

        let work = config.effective_work_dir();
        assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
        let leftovers: Vec<_> = files_under(dir.path())
            .into_iter()
            .filter(|path| {
                let name = path.file_name().unwrap().to_string_lossy();
                name.starts_with("merge") || name.ends_with(".part")
            })
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        assert!(!config.output_dir.join("music-test.wav").exists());
        // Raw segments stay cached for the next attempt
        assert!(store.contains("music-test", 2));
    }

    #[test]
    fn move_into_place_replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.wav");
        let target = dir.path().join("out").join("track.wav");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"old").unwrap();
        fs::write(&staged, b"new").unwrap();

        move_into_place(&staged, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn failed_copy_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("track.wav");
        fs::write(&target, b"old").unwrap();

        let err = copy_into_place(&dir.path().join("missing.wav"), &target).unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
        assert_eq!(fs::read(&target).unwrap(), b"old");

        let staged = dir.path().join("staged.wav");
        fs::write(&staged, b"new").unwrap();
        copy_into_place(&staged, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join("track.wav.part").exists());
    }

    #[test]
    fn failed_assembly_can_keep_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.keep_intermediates = true;
        // No real segment edge sits this far below its body
        config.plan.fade_margin_db = 200.0;
        let store = store(&config);
        let tool = WavTool::new();
        let cancel = CancelFlag::new();
        let source = source();

        let outcome = TrackPipeline::new(&tool, &store, &config, &cancel)
            .with_source(&source)
            .run(&spec(&["a", "b"]));

        let TrackOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.code, ErrorCode::UnfadedSegment);
        assert_eq!(fs::read_dir(config.effective_work_dir()).unwrap().count(), 1);
    }
}
