//! Recording state machine and encoder thread.
//!
//! ```text
//! Idle ─start─▶ Configuring ─▶ Encoding ─stop─▶ Draining ─▶ Finalizing ─▶ Closed
//!   ▲               │                                                    │
//!   └── failure ────┘                  release() from anywhere ─▶ Closed ┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use vizcast_common::clock::{timestamped_file_name, unique_path, RecordingClock};
use vizcast_common::config::{RecordingDefaults, StorageConfig};
use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::{Frame, FrameSink};

use crate::codec::CodecProvider;
use crate::encoder::VideoTarget;
use crate::queue::{FrameQueue, PushOutcome};
use crate::session::{remove_scratch, EncoderSession, SessionCounters};

/// Bounded wait of the encoder thread for the next frame.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long `stop_recording` waits for the encoder thread.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix of finalized recording names.
pub const RECORDING_PREFIX: &str = "Vizcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// No recording has been started.
    Idle,
    /// Opening encoder and muxer.
    Configuring,
    /// Frames are accepted and encoded.
    Encoding,
    /// Waiting for the encoder thread and flushing the encoder.
    Draining,
    /// Closing the container and moving it into place.
    Finalizing,
    /// Last recording finished or was released.
    Closed,
}

impl PipelineState {
    /// Whether a recording owns the pipeline.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::Configuring
                | PipelineState::Encoding
                | PipelineState::Draining
                | PipelineState::Finalizing
        )
    }
}

/// Parameters of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRequest {
    /// Output file name. Its extension is replaced by the container's.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub fps: u32,
}

impl RecordingRequest {
    /// Request with a timestamped name and the configured defaults.
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self {
            name: timestamped_file_name(RECORDING_PREFIX, "mp4"),
            width: defaults.width,
            height: defaults.height,
            bitrate: defaults.bitrate,
            fps: defaults.fps,
        }
    }

    pub fn target(&self) -> VideoTarget {
        VideoTarget {
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            fps: self.fps,
        }
    }

    pub fn validate(&self) -> VizcastResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VizcastError::recording(format!(
                "Recording size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(VizcastError::recording(format!(
                "Recording size must be even, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(VizcastError::recording("Frame rate must be non-zero"));
        }
        if self.bitrate == 0 {
            return Err(VizcastError::recording("Bitrate must be non-zero"));
        }
        Ok(())
    }

    /// File name for a container with `extension`.
    ///
    /// Directories in `name` are ignored; an empty name gets a timestamp.
    pub fn file_name(&self, extension: &str) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty());
        match stem {
            Some(stem) => format!("{stem}.{extension}"),
            None => timestamped_file_name(RECORDING_PREFIX, extension),
        }
    }
}

/// Where recordings are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    pub recordings_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl From<&StorageConfig> for RecorderOptions {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            recordings_dir: storage.recordings_dir.clone(),
            scratch_dir: storage.scratch_dir.clone(),
        }
    }
}

/// Outcome of a finished recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub frames_encoded: u64,
    pub samples_written: u64,
    /// Frames evicted from the full queue.
    pub frames_dropped: u64,
    /// Length of the encoded stream.
    pub media_duration_secs: f64,
    /// Wall-clock time from start to stop.
    pub wall_duration_secs: f64,
}

/// Runtime statistics of the current or last recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames accepted into the queue.
    pub frames_pushed: u64,
    /// Frames evicted because the queue was full.
    pub frames_dropped: u64,
    pub frames_encoded: u64,
    pub samples_written: u64,
    /// Frames that could not be converted for the encoder.
    pub frames_skipped: u64,
}

impl PipelineStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        if self.frames_pushed == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / self.frames_pushed as f64 * 100.0
    }
}

struct ActiveRecording {
    request: RecordingRequest,
    extension: String,
    clock: RecordingClock,
    stop: Arc<AtomicBool>,
    sessions: mpsc::Receiver<EncoderSession>,
    worker: JoinHandle<()>,
    scratch_path: PathBuf,
    queue: Arc<FrameQueue<Frame>>,
}

struct Inner {
    state: PipelineState,
    active: Option<ActiveRecording>,
}

/// Records frames pushed at any rate into a video file.
///
/// `push_frame` never blocks: frames go into a queue of
/// [`crate::FRAME_QUEUE_CAPACITY`] that drops its oldest entry when full,
/// and a dedicated thread encodes them.
pub struct VideoRecorder {
    codecs: Arc<dyn CodecProvider>,
    options: RecorderOptions,
    inner: Mutex<Inner>,
    /// Queue of the current or last recording. Each recording gets a new
    /// one so an abandoned encoder thread never sees later frames.
    queue: Mutex<Arc<FrameQueue<Frame>>>,
    frames_pushed: AtomicU64,
    counters: Mutex<Arc<SessionCounters>>,
}

impl VideoRecorder {
    pub fn new(codecs: Arc<dyn CodecProvider>, options: RecorderOptions) -> Self {
        Self {
            codecs,
            options,
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                active: None,
            }),
            queue: Mutex::new(Arc::new(FrameQueue::new())),
            frames_pushed: AtomicU64::new(0),
            counters: Mutex::new(Arc::new(SessionCounters::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: PipelineState) {
        let mut inner = self.lock();
        tracing::debug!(from = ?inner.state, to = ?state, "Recorder state change");
        inner.state = state;
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == PipelineState::Encoding
    }

    pub fn codecs(&self) -> &Arc<dyn CodecProvider> {
        &self.codecs
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        PipelineStats {
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped(),
            frames_encoded: counters.frames_encoded.load(Ordering::Relaxed),
            samples_written: counters.samples_written.load(Ordering::Relaxed),
            frames_skipped: counters.frames_skipped.load(Ordering::Relaxed),
        }
    }

    fn frames_dropped(&self) -> u64 {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evicted()
    }

    /// Open encoder and muxer and start the encoder thread.
    ///
    /// Fails if a recording is already active or the request is invalid.
    /// On failure nothing is left behind and the state returns to `Idle`.
    pub fn start_recording(&self, request: RecordingRequest) -> VizcastResult<()> {
        request.validate()?;
        {
            let mut inner = self.lock();
            if inner.state.is_active() {
                return Err(VizcastError::recording(format!(
                    "A recording is already in progress ({:?})",
                    inner.state
                )));
            }
            inner.state = PipelineState::Configuring;
        }

        match self.open(request) {
            Ok(active) => {
                let mut inner = self.lock();
                inner.active = Some(active);
                inner.state = PipelineState::Encoding;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start recording");
                self.set_state(PipelineState::Idle);
                Err(e)
            }
        }
    }

    fn open(&self, request: RecordingRequest) -> VizcastResult<ActiveRecording> {
        let target = request.target();
        let extension = self.codecs.container_extension().to_string();

        std::fs::create_dir_all(&self.options.scratch_dir)?;
        let scratch_path = unique_path(
            &self.options.scratch_dir,
            &timestamped_file_name("recording", &extension),
        );

        let mut encoder = self.codecs.open_encoder(&target)?;
        let muxer = match self.codecs.open_muxer(&scratch_path) {
            Ok(muxer) => muxer,
            Err(e) => {
                encoder.release();
                remove_scratch(&scratch_path);
                return Err(e);
            }
        };

        let session = EncoderSession::new(target, encoder, muxer, scratch_path.clone());
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = session.counters();

        let queue = Arc::new(FrameQueue::new());
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = queue.clone();
        self.frames_pushed.store(0, Ordering::Relaxed);

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, sessions) = mpsc::channel();
        let worker = {
            let queue = queue.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("vizcast-encoder".to_string())
                .spawn(move || run_encoder(session, queue, stop, tx))
        };
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                remove_scratch(&scratch_path);
                return Err(VizcastError::recording(format!(
                    "Failed to spawn encoder thread: {e}"
                )));
            }
        };

        tracing::info!(
            codecs = self.codecs.name(),
            width = target.width,
            height = target.height,
            bitrate = target.bitrate,
            fps = target.fps,
            scratch = %scratch_path.display(),
            "Recording started"
        );

        Ok(ActiveRecording {
            request,
            extension,
            clock: RecordingClock::start(),
            stop,
            sessions,
            worker,
            scratch_path,
            queue,
        })
    }

    /// Offer a frame to the encoder. Never blocks.
    ///
    /// Returns `false` if no recording is accepting frames. When the queue
    /// is full the oldest queued frame is dropped to make room.
    pub fn push_frame(&self, frame: Frame) -> bool {
        let queue = {
            let inner = self.lock();
            match &inner.active {
                Some(active) if inner.state == PipelineState::Encoding => active.queue.clone(),
                _ => return false,
            }
        };
        match queue.push(frame) {
            PushOutcome::Queued => {}
            PushOutcome::EvictedOldest => {
                tracing::trace!("Encoder queue full, dropped oldest frame");
            }
            PushOutcome::Closed => return false,
        }
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Stop the recording, flush the encoder and move the file into the
    /// recordings directory.
    ///
    /// Returns `Ok(None)` when nothing is recording. The state ends up
    /// `Closed` even when finalizing fails.
    pub fn stop_recording(&self) -> VizcastResult<Option<RecordingSummary>> {
        let active = {
            let mut inner = self.lock();
            if inner.state != PipelineState::Encoding {
                return Ok(None);
            }
            let Some(active) = inner.active.take() else {
                return Ok(None);
            };
            inner.state = PipelineState::Draining;
            active
        };

        let result = self.finalize(active);
        self.set_state(PipelineState::Closed);
        match &result {
            Ok(summary) => tracing::info!(
                path = %summary.path.display(),
                frames = summary.frames_encoded,
                samples = summary.samples_written,
                dropped = summary.frames_dropped,
                "Recording saved"
            ),
            Err(e) => tracing::error!(error = %e, "Recording failed"),
        }
        result.map(Some)
    }

    fn finalize(&self, active: ActiveRecording) -> VizcastResult<RecordingSummary> {
        let ActiveRecording {
            request,
            extension,
            clock,
            stop,
            sessions,
            worker,
            scratch_path,
            queue,
        } = active;

        stop.store(true, Ordering::SeqCst);
        queue.close();

        let mut session = match sessions.recv_timeout(WORKER_JOIN_TIMEOUT) {
            Ok(session) => session,
            Err(RecvTimeoutError::Timeout) => {
                // The thread drops the session, and with it the scratch file,
                // whenever it does finish.
                drop(sessions);
                queue.clear();
                tracing::warn!("Encoder thread did not stop in time; recording abandoned");
                return Err(VizcastError::recording(
                    "Encoder thread did not stop within 2s",
                ));
            }
            Err(RecvTimeoutError::Disconnected) => {
                remove_scratch(&scratch_path);
                return Err(VizcastError::recording("Encoder thread exited unexpectedly"));
            }
        };
        if worker.join().is_err() {
            tracing::warn!("Encoder thread panicked after returning its session");
        }
        queue.clear();

        let fault = session.take_fault();
        let drained = session.finish();

        self.set_state(PipelineState::Finalizing);
        let closed = session.close();

        let outcome = drained.and(closed).and_then(|()| {
            if !session.muxer_started() {
                return Err(VizcastError::recording("No frames were recorded"));
            }
            self.publish(&scratch_path, &request.file_name(&extension))
        });
        remove_scratch(&scratch_path);

        if let Some(fault) = fault {
            match &outcome {
                Ok(path) => {
                    tracing::warn!(path = %path.display(), "Recording saved after encoder fault")
                }
                Err(e) => tracing::debug!(error = %e, "Finalize after encoder fault also failed"),
            }
            return Err(fault);
        }
        let path = outcome?;

        let frames_encoded = session.frames_encoded();
        Ok(RecordingSummary {
            path,
            frames_encoded,
            samples_written: session.samples_written(),
            frames_dropped: self.frames_dropped(),
            media_duration_secs: frames_encoded as f64 / f64::from(request.fps),
            wall_duration_secs: clock.elapsed_secs(),
        })
    }

    /// Copy the scratch container to a collision-free destination.
    fn publish(&self, scratch: &Path, file_name: &str) -> VizcastResult<PathBuf> {
        std::fs::create_dir_all(&self.options.recordings_dir)?;
        let destination = unique_path(&self.options.recordings_dir, file_name);
        std::fs::copy(scratch, &destination).map_err(|e| {
            VizcastError::recording(format!(
                "Failed to copy recording to {}: {e}",
                destination.display()
            ))
        })?;
        Ok(destination)
    }

    /// Abort whatever is running without waiting for it. Idempotent.
    ///
    /// The encoder thread discards its session and partial file when it
    /// notices.
    pub fn release(&self) {
        let active = {
            let mut inner = self.lock();
            if inner.state == PipelineState::Closed && inner.active.is_none() {
                return;
            }
            inner.state = PipelineState::Closed;
            inner.active.take()
        };

        if let Some(ActiveRecording {
            stop,
            sessions,
            scratch_path,
            queue,
            ..
        }) = active
        {
            // Hang up first so the thread's hand-off fails and it drops the
            // session itself.
            drop(sessions);
            stop.store(true, Ordering::SeqCst);
            queue.close();
            queue.clear();
            tracing::info!(scratch = %scratch_path.display(), "Recording released");
        }
    }
}

impl FrameSink for VideoRecorder {
    fn on_frame(&self, frame: Frame) {
        self.push_frame(frame);
    }

    fn name(&self) -> &str {
        "recorder"
    }
}

impl Drop for VideoRecorder {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_encoder(
    mut session: EncoderSession,
    queue: Arc<FrameQueue<Frame>>,
    stop: Arc<AtomicBool>,
    sessions: mpsc::Sender<EncoderSession>,
) {
    tracing::debug!("Encoder thread started");
    loop {
        let frame = match queue.pop_timeout(POLL_INTERVAL) {
            Some(frame) => frame,
            None if stop.load(Ordering::SeqCst) => break,
            None => continue,
        };
        if let Err(e) = session.encode_frame(&frame) {
            tracing::error!(error = %e, "Encoding failed; stopping encoder thread");
            session.set_fault(e);
            break;
        }
    }

    tracing::debug!(frames = session.frames_encoded(), "Encoder thread finished");
    if sessions.send(session).is_err() {
        tracing::debug!("Recording was released; session discarded");
    }
}
