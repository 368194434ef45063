//! Frame-by-frame processing pipeline: read → inpaint → encode.
//!
//! State machine: Idle → Running → {Succeeded | Failed | Cancelled}.
//! The mask is built once on the first frame and reused; frames are written
//! in the exact order they are read. A failed read aborts the whole job —
//! skipping frames would desynchronize audio and video length.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::coordinates::NativeRect;
use super::encoder::{EncoderError, VideoEncoder};
use super::inpaint::{inpaint, InpaintError};
use super::mask::{MaskError, RegionMask};
use super::source::{SourceError, VideoSource};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Progress snapshot published after every durably written frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineProgress {
    /// Frames written to the intermediate stream so far
    pub processed_frames: u64,
    /// Frame count reported by the source container
    pub reported_frames: u64,
    /// 0-100; monotonically non-decreasing within one run
    pub percent: f64,
    pub state: PipelineState,
}

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline already ran (state {0:?})")]
    InvalidState(PipelineState),
    #[error("Source read error: {0}")]
    Source(#[from] SourceError),
    #[error("Mask error: {0}")]
    Mask(#[from] MaskError),
    #[error("Inpaint error: {0}")]
    Inpaint(#[from] InpaintError),
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("Processing cancelled")]
    Cancelled,
}

/// Result of a completed run: where the intermediate landed and how far the
/// stream actually went.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub intermediate_path: PathBuf,
    pub processed_frames: u64,
    pub reported_frames: u64,
    /// Final progress value; equals 100 iff all reported frames decoded
    pub final_percent: f64,
}

/// One-shot processing pipeline. Owns the source and encoder for the run.
pub struct ProcessingPipeline {
    source: Box<dyn VideoSource>,
    encoder: Box<dyn VideoEncoder>,
    region: NativeRect,
    inpaint_radius: u32,
    state: PipelineState,
    cancel: Arc<AtomicBool>,
}

impl ProcessingPipeline {
    pub fn new(
        source: Box<dyn VideoSource>,
        encoder: Box<dyn VideoEncoder>,
        region: NativeRect,
        inpaint_radius: u32,
    ) -> Self {
        Self {
            source,
            encoder,
            region,
            inpaint_radius,
            state: PipelineState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Shared cancellation flag; flip it from another thread to stop the run
    /// before the next frame read.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Adopt a caller-owned cancellation flag (e.g. one shared with a
    /// coordinator that outlives this pipeline).
    pub fn use_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = flag;
    }

    /// Run the pipeline to completion.
    ///
    /// `publish` is called once per written frame, on the same step as the
    /// write, so observed progress always reflects durable output. On any
    /// error the partial intermediate file is removed before returning.
    pub fn run<F>(&mut self, mut publish: F) -> Result<PipelineOutcome, PipelineError>
    where
        F: FnMut(PipelineProgress),
    {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::InvalidState(self.state));
        }
        self.state = PipelineState::Running;

        match self.run_inner(&mut publish) {
            Ok(outcome) => {
                self.state = PipelineState::Succeeded;
                publish(PipelineProgress {
                    processed_frames: outcome.processed_frames,
                    reported_frames: outcome.reported_frames,
                    percent: outcome.final_percent,
                    state: PipelineState::Succeeded,
                });
                Ok(outcome)
            }
            Err(e) => {
                self.state = if matches!(e, PipelineError::Cancelled) {
                    PipelineState::Cancelled
                } else {
                    PipelineState::Failed
                };
                // No salvaging: a partial intermediate is never a result
                self.discard_partial_output();
                Err(e)
            }
        }
    }

    fn run_inner<F>(&mut self, publish: &mut F) -> Result<PipelineOutcome, PipelineError>
    where
        F: FnMut(PipelineProgress),
    {
        let width = self.source.width();
        let height = self.source.height();
        let reported = self.source.total_frames();
        let frame_duration = if self.source.frame_rate() > 0.0 {
            1.0 / self.source.frame_rate()
        } else {
            1.0 / 30.0
        };

        self.source.rewind()?;
        self.encoder.start()?;

        // The mask is static: built once per run, reused for every frame
        let mask = RegionMask::build(&self.region, width, height)?;
        let mut processed = 0u64;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                log::info!("Processing cancelled after {processed} frames");
                return Err(PipelineError::Cancelled);
            }

            let frame = match self.source.read_frame()? {
                Some(frame) => frame,
                None => break,
            };

            let cleaned = inpaint(&frame, &mask, self.inpaint_radius)?;

            let pts = processed as f64 * frame_duration;
            self.encoder.append_frame(&cleaned.into_video_frame(pts))?;
            processed += 1;

            publish(PipelineProgress {
                processed_frames: processed,
                reported_frames: reported,
                percent: percent(processed, reported),
                state: PipelineState::Running,
            });
        }

        let intermediate_path = self.encoder.finish()?;

        if processed < reported {
            // The container over-reported; surface the honest ratio rather
            // than forcing 100 and masking the length discrepancy downstream
            log::warn!(
                "Source reported {reported} frames but only {processed} decoded"
            );
        }

        Ok(PipelineOutcome {
            intermediate_path,
            processed_frames: processed,
            reported_frames: reported,
            final_percent: percent(processed, reported),
        })
    }

    fn discard_partial_output(&mut self) {
        if self.encoder.is_encoding() {
            if let Ok(path) = self.encoder.finish() {
                if path.exists() {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }
}

fn percent(processed: u64, reported: u64) -> f64 {
    if reported == 0 {
        return 100.0;
    }
    (processed as f64 / reported as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoder::{EncoderConfig, StubEncoder};
    use crate::core::source::StubVideoSource;
    use std::path::PathBuf;

    fn stub_encoder(width: u32, height: u32) -> Box<StubEncoder> {
        Box::new(StubEncoder::new(EncoderConfig::new(
            width,
            height,
            30,
            PathBuf::from("/tmp/wipeframe_test_pipeline.mp4"),
        )))
    }

    fn full_frame_rect(width: u32, height: u32) -> NativeRect {
        NativeRect::new(0, 0, width, height)
    }

    #[test]
    fn test_pipeline_processes_all_frames() {
        // 10-frame 640x480 30fps source, rect covering the full frame
        let source = Box::new(StubVideoSource::new(640, 480, 30.0, 10));
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(640, 480),
            full_frame_rect(640, 480),
            3,
        );

        let outcome = pipeline.run(|_| {}).unwrap();
        assert_eq!(outcome.processed_frames, 10);
        assert_eq!(outcome.reported_frames, 10);
        assert!((outcome.final_percent - 100.0).abs() < 1e-10);
        assert_eq!(pipeline.state(), PipelineState::Succeeded);
    }

    #[test]
    fn test_pipeline_progress_monotonic_and_bounded() {
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 8));
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(64, 48),
            NativeRect::new(10, 10, 20, 15),
            3,
        );

        let mut last = 0.0f64;
        let mut updates = 0u64;
        pipeline
            .run(|p| {
                assert!(p.percent >= last, "progress regressed: {} < {last}", p.percent);
                assert!(p.percent <= 100.0);
                last = p.percent;
                updates += 1;
            })
            .unwrap();

        assert!((last - 100.0).abs() < 1e-10);
        // One update per frame plus the terminal publication
        assert_eq!(updates, 9);
    }

    #[test]
    fn test_pipeline_short_stream_succeeds_with_partial_progress() {
        // Reported 10, only 7 decodable: Succeeded at 70%, never forced to 100
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 10).with_decodable_frames(7));
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(64, 48),
            NativeRect::new(0, 0, 32, 24),
            3,
        );

        let outcome = pipeline.run(|_| {}).unwrap();
        assert_eq!(outcome.processed_frames, 7);
        assert_eq!(outcome.reported_frames, 10);
        assert!((outcome.final_percent - 70.0).abs() < 1e-10);
        assert_eq!(pipeline.state(), PipelineState::Succeeded);
    }

    #[test]
    fn test_pipeline_read_failure_aborts() {
        let mut source = StubVideoSource::new(64, 48, 30.0, 10);
        source.fail_read_at = Some(4);
        let mut pipeline = ProcessingPipeline::new(
            Box::new(source),
            stub_encoder(64, 48),
            NativeRect::new(0, 0, 16, 16),
            3,
        );

        match pipeline.run(|_| {}) {
            Err(PipelineError::Source(SourceError::Read(_))) => {}
            other => panic!("Expected Source(Read), got {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_pipeline_write_failure_aborts() {
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 10));
        let mut encoder = stub_encoder(64, 48);
        encoder.fail_write_after = Some(3);
        let mut pipeline = ProcessingPipeline::new(
            source,
            encoder,
            NativeRect::new(0, 0, 16, 16),
            3,
        );

        match pipeline.run(|_| {}) {
            Err(PipelineError::Encoder(EncoderError::Write(_))) => {}
            other => panic!("Expected Encoder(Write), got {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_pipeline_encoder_init_failure() {
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 10));
        // 0x0 encoder cannot be opened
        let encoder = stub_encoder(0, 0);
        let mut pipeline = ProcessingPipeline::new(
            source,
            encoder,
            NativeRect::new(0, 0, 16, 16),
            3,
        );

        match pipeline.run(|_| {}) {
            Err(PipelineError::Encoder(EncoderError::Init(_))) => {}
            other => panic!("Expected Encoder(Init), got {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn test_pipeline_cancellation() {
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 10));
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(64, 48),
            NativeRect::new(0, 0, 16, 16),
            3,
        );

        // Flag set before the run: cancelled before the first read
        pipeline.cancel_flag().store(true, Ordering::Relaxed);
        match pipeline.run(|_| {}) {
            Err(PipelineError::Cancelled) => {}
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        assert_eq!(pipeline.state(), PipelineState::Cancelled);
    }

    #[test]
    fn test_pipeline_invalid_rect_rejected_at_mask_seam() {
        let source = Box::new(StubVideoSource::new(64, 48, 30.0, 5));
        // Rect exceeds the 64x48 frame; the mask builder re-checks bounds
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(64, 48),
            NativeRect::new(60, 40, 20, 20),
            3,
        );

        match pipeline.run(|_| {}) {
            Err(PipelineError::Mask(MaskError::InvalidRect { .. })) => {}
            other => panic!("Expected Mask(InvalidRect), got {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_cannot_run_twice() {
        let source = Box::new(StubVideoSource::new(32, 24, 30.0, 2));
        let mut pipeline = ProcessingPipeline::new(
            source,
            stub_encoder(32, 24),
            NativeRect::new(0, 0, 8, 8),
            3,
        );
        pipeline.run(|_| {}).unwrap();
        assert!(matches!(
            pipeline.run(|_| {}),
            Err(PipelineError::InvalidState(PipelineState::Succeeded))
        ));
    }
}
