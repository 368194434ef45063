//! Cleanup job coordinator: owns the full viewport-selection → inpaint →
//! remux lifecycle and exposes polling status to the caller.
//!
//! State machine: Idle → Running → Succeeded | Failed | Cancelled.
//! A job is single-use: once started it can never be started again.
//!
//! The work runs on a worker thread; the coordinator shares a status slot
//! (`Arc<Mutex<JobStatus>>`) that the worker updates after every written
//! frame, and a cancellation flag checked before each frame read.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::{Deserialize, Serialize};

use super::coordinates::{map_selection, CoordinateError, NativeRect, ViewportSelection};
use super::encoder::{create_encoder, EncoderConfig, VideoEncoder};
use super::pipeline::{PipelineError, ProcessingPipeline};
use super::remux::{create_remuxer, RemuxError, RemuxRequest, Remuxer};
use super::settings::{ProcessingConfig, SettingsError};
use super::source::{open_video_source, SourceError, VideoSource};
use super::workspace::{WorkDir, WorkspaceError};

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Which stage the worker is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobPhase {
    Inpaint,
    Remux,
}

/// Job status snapshot exposed to the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    pub phase: JobPhase,
    pub processed_frames: u64,
    pub reported_frames: u64,
    /// Frame progress in percent; holds its last value through the remux phase
    pub percent: f64,
    /// Human-readable detail for terminal failure states
    pub message: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl JobStatus {
    fn idle() -> Self {
        Self {
            state: JobState::Idle,
            phase: JobPhase::Inpaint,
            processed_frames: 0,
            reported_frames: 0,
            percent: 0.0,
            message: None,
            output_path: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What the caller asks for
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub selection: ViewportSelection,
    pub config: ProcessingConfig,
}

/// Job coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid state transition: cannot {action} while {state:?}")]
    InvalidState { state: JobState, action: String },
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("Coordinate error: {0}")]
    Coordinate(#[from] CoordinateError),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Remux error: {0}")]
    Remux(#[from] RemuxError),
    #[error("Worker thread panicked")]
    WorkerPanic,
}

/// Cleanup job coordinator.
pub struct CleanupJob {
    status: Arc<Mutex<JobStatus>>,
    cancel: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<Result<PathBuf, JobError>>>,
    finished: bool,
}

impl CleanupJob {
    pub fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(JobStatus::idle())),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            finished: false,
        }
    }

    /// Start the job against the real source, encoder, and remuxer.
    pub fn start(&mut self, request: JobRequest) -> Result<(), JobError> {
        request.config.validate()?;
        let source = open_video_source(&request.input_path)?;

        let workdir = WorkDir::create()?;
        let encoder = create_encoder(EncoderConfig::new(
            source.width(),
            source.height(),
            source.frame_rate().round().max(1.0) as u32,
            workdir.intermediate_path(),
        ));

        self.start_with(request, source, encoder, create_remuxer(), Some(workdir))
    }

    /// Start with caller-supplied stages. The coordinate mapping runs here,
    /// synchronously, so a bad selection never reaches the worker.
    pub fn start_with(
        &mut self,
        request: JobRequest,
        source: Box<dyn VideoSource>,
        encoder: Box<dyn VideoEncoder>,
        remuxer: Box<dyn Remuxer>,
        workdir: Option<WorkDir>,
    ) -> Result<(), JobError> {
        if self.worker.is_some() || self.finished {
            let state = self.snapshot().state;
            return Err(JobError::InvalidState {
                state,
                action: "start".into(),
            });
        }
        request.config.validate()?;

        let region = map_selection(&request.selection, source.width(), source.height())?;
        let frame_rate = source.frame_rate();
        let has_audio = source.has_audio();

        {
            let mut status = lock_status(&self.status);
            *status = JobStatus::idle();
            status.state = JobState::Running;
            status.reported_frames = source.total_frames();
        }

        let status = self.status.clone();
        let cancel = self.cancel.clone();

        let handle = thread::spawn(move || {
            let result = run_job(
                &request, source, encoder, remuxer, region, frame_rate, has_audio, &status,
                cancel,
            );

            let mut snapshot = lock_status(&status);
            match &result {
                Ok(path) => {
                    snapshot.state = JobState::Succeeded;
                    snapshot.output_path = Some(path.clone());
                }
                Err(JobError::Pipeline(PipelineError::Cancelled)) => {
                    snapshot.state = JobState::Cancelled;
                }
                Err(e) => {
                    snapshot.state = JobState::Failed;
                    snapshot.message = Some(e.to_string());
                }
            }
            drop(snapshot);

            if let Some(dir) = workdir {
                match &result {
                    // A remux failure keeps the intermediate around so the
                    // inpaint work is not lost
                    Err(JobError::Remux(_)) => {
                        let kept = dir.keep();
                        log::warn!("Remux failed; intermediate preserved in {}", kept.display());
                    }
                    _ => dir.cleanup(),
                }
            }

            result
        });
        self.worker = Some(handle);
        Ok(())
    }

    /// Request cancellation; the worker stops before its next frame read.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Latest status snapshot for polling.
    pub fn status(&self) -> JobStatus {
        self.snapshot()
    }

    /// Block until the worker finishes and return its result.
    pub fn wait(&mut self) -> Result<PathBuf, JobError> {
        match self.worker.take() {
            Some(handle) => {
                self.finished = true;
                handle.join().map_err(|_| JobError::WorkerPanic)?
            }
            None => Err(JobError::InvalidState {
                state: self.snapshot().state,
                action: "wait".into(),
            }),
        }
    }

    fn snapshot(&self) -> JobStatus {
        lock_status(&self.status).clone()
    }
}

impl Default for CleanupJob {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_status(status: &Mutex<JobStatus>) -> std::sync::MutexGuard<'_, JobStatus> {
    match status.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_job(
    request: &JobRequest,
    source: Box<dyn VideoSource>,
    encoder: Box<dyn VideoEncoder>,
    remuxer: Box<dyn Remuxer>,
    region: NativeRect,
    frame_rate: f64,
    has_audio: bool,
    status: &Arc<Mutex<JobStatus>>,
    cancel: Arc<AtomicBool>,
) -> Result<PathBuf, JobError> {
    let mut pipeline =
        ProcessingPipeline::new(source, encoder, region, request.config.inpaint_radius);
    pipeline.use_cancel_flag(cancel);

    let status_for_progress = status.clone();
    let outcome = pipeline.run(move |progress| {
        let mut snapshot = lock_status(&status_for_progress);
        snapshot.processed_frames = progress.processed_frames;
        snapshot.reported_frames = progress.reported_frames;
        snapshot.percent = progress.percent;
    })?;

    {
        let mut snapshot = lock_status(status);
        snapshot.phase = JobPhase::Remux;
    }

    if !has_audio {
        log::info!("Source has no audio track; final output will be picture-only");
    }

    let output = remuxer.remux(&RemuxRequest {
        intermediate_path: outcome.intermediate_path,
        original_path: request.input_path.clone(),
        output_path: request.output_path.clone(),
        bitrate_mbps: request.config.bitrate_mbps,
        frame_rate,
    })?;

    log::info!(
        "Cleanup job complete: {} frames -> {}",
        outcome.processed_frames,
        output.display()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinates::ViewportPoint;
    use crate::core::encoder::StubEncoder;
    use crate::core::remux::StubRemuxer;
    use crate::core::source::StubVideoSource;

    fn full_selection() -> ViewportSelection {
        ViewportSelection::new(
            ViewportPoint::new(0.0, 0.0),
            ViewportPoint::new(320.0, 240.0),
            320.0,
            240.0,
        )
    }

    fn request(name: &str) -> JobRequest {
        JobRequest {
            input_path: std::env::temp_dir().join(format!("wipeframe_job_{name}_in.mp4")),
            output_path: std::env::temp_dir().join(format!("wipeframe_job_{name}_out.mp4")),
            selection: full_selection(),
            config: ProcessingConfig::default(),
        }
    }

    fn stub_encoder(path: PathBuf) -> Box<StubEncoder> {
        Box::new(StubEncoder::new(EncoderConfig::new(64, 48, 30, path)))
    }

    #[test]
    fn test_job_runs_to_success() {
        let req = request("ok");
        let intermediate = std::env::temp_dir().join("wipeframe_job_ok_intermediate.mp4");

        let mut job = CleanupJob::new();
        job.start_with(
            req.clone(),
            Box::new(StubVideoSource::new(64, 48, 30.0, 5).with_audio(true)),
            stub_encoder(intermediate.clone()),
            Box::new(StubRemuxer::new()),
            None,
        )
        .unwrap();

        let output = job.wait().unwrap();
        assert_eq!(output, req.output_path);
        assert!(output.exists());
        assert!(!intermediate.exists(), "intermediate must be gone after success");

        let status = job.status();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.phase, JobPhase::Remux);
        assert_eq!(status.processed_frames, 5);
        assert_eq!(status.percent, 100.0);
        assert_eq!(status.output_path, Some(req.output_path.clone()));

        let _ = std::fs::remove_file(&req.output_path);
    }

    #[test]
    fn test_job_rejects_bad_settings() {
        let mut req = request("badcfg");
        req.config.bitrate_mbps = 0;

        let mut job = CleanupJob::new();
        let result = job.start_with(
            req,
            Box::new(StubVideoSource::new(64, 48, 30.0, 5)),
            stub_encoder(std::env::temp_dir().join("wipeframe_job_badcfg_i.mp4")),
            Box::new(StubRemuxer::new()),
            None,
        );
        assert!(matches!(result, Err(JobError::Settings(_))));
        assert_eq!(job.status().state, JobState::Idle);
    }

    #[test]
    fn test_job_rejects_bad_selection_before_spawning() {
        let mut req = request("badsel");
        req.selection = ViewportSelection::new(
            ViewportPoint::new(10.0, 10.0),
            ViewportPoint::new(10.0, 10.0),
            320.0,
            240.0,
        );

        let mut job = CleanupJob::new();
        let result = job.start_with(
            req,
            Box::new(StubVideoSource::new(64, 48, 30.0, 5)),
            stub_encoder(std::env::temp_dir().join("wipeframe_job_badsel_i.mp4")),
            Box::new(StubRemuxer::new()),
            None,
        );
        assert!(matches!(
            result,
            Err(JobError::Coordinate(CoordinateError::EmptySelection))
        ));
    }

    #[test]
    fn test_job_cancel_stops_before_first_frame() {
        let req = request("cancel");
        let mut job = CleanupJob::new();
        job.cancel();
        job.start_with(
            req,
            Box::new(StubVideoSource::new(64, 48, 30.0, 100)),
            stub_encoder(std::env::temp_dir().join("wipeframe_job_cancel_i.mp4")),
            Box::new(StubRemuxer::new()),
            None,
        )
        .unwrap();

        match job.wait() {
            Err(JobError::Pipeline(PipelineError::Cancelled)) => {}
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        assert_eq!(job.status().state, JobState::Cancelled);
    }

    #[test]
    fn test_job_remux_failure_preserves_intermediate() {
        let req = request("remuxfail");
        let intermediate = std::env::temp_dir().join("wipeframe_job_remuxfail_i.mp4");

        let mut job = CleanupJob::new();
        job.start_with(
            req,
            Box::new(StubVideoSource::new(64, 48, 30.0, 3)),
            stub_encoder(intermediate.clone()),
            Box::new(StubRemuxer { fail: true }),
            None,
        )
        .unwrap();

        match job.wait() {
            Err(JobError::Remux(RemuxError::Write(_))) => {}
            other => panic!("Expected remux Write error, got {:?}", other),
        }
        assert!(intermediate.exists(), "intermediate must survive a remux failure");

        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.is_some());

        let _ = std::fs::remove_file(&intermediate);
    }

    #[test]
    fn test_job_is_single_use() {
        let req = request("once");
        let mut job = CleanupJob::new();
        job.start_with(
            req.clone(),
            Box::new(StubVideoSource::new(64, 48, 30.0, 2)),
            stub_encoder(std::env::temp_dir().join("wipeframe_job_once_i.mp4")),
            Box::new(StubRemuxer::new()),
            None,
        )
        .unwrap();
        job.wait().unwrap();

        let result = job.start_with(
            req.clone(),
            Box::new(StubVideoSource::new(64, 48, 30.0, 2)),
            stub_encoder(std::env::temp_dir().join("wipeframe_job_once_i2.mp4")),
            Box::new(StubRemuxer::new()),
            None,
        );
        assert!(matches!(result, Err(JobError::InvalidState { .. })));

        let _ = std::fs::remove_file(&req.output_path);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = JobStatus {
            state: JobState::Running,
            phase: JobPhase::Inpaint,
            processed_frames: 4,
            reported_frames: 10,
            percent: 40.0,
            message: None,
            output_path: None,
        };
        let json = status.to_json().unwrap();
        assert!(json.contains("\"state\":\"running\""));
        assert!(json.contains("\"phase\":\"inpaint\""));
        assert!(json.contains("\"processedFrames\":4"));
        assert!(json.contains("\"reportedFrames\":10"));
    }
}
