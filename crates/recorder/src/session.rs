//! State of one recording while frames are being encoded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vizcast_common::clock::presentation_time_us;
use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::yuv::rgba_to_i420;
use vizcast_frame::Frame;

use crate::encoder::{EncoderOutput, VideoEncoder, VideoTarget};
use crate::muxer::ContainerMuxer;

/// How long to keep pulling encoder output after end of stream.
const FINISH_TIMEOUT: Duration = Duration::from_secs(2);
const FINISH_IDLE_POLL: Duration = Duration::from_millis(5);

/// Counters visible outside the encoder thread.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_encoded: AtomicU64,
    pub samples_written: AtomicU64,
    /// Input frames that could not be converted and were skipped.
    pub frames_skipped: AtomicU64,
}

/// Encoder, muxer and bookkeeping for one recording.
///
/// Owned by the encoder thread while frames flow and handed back to the
/// caller for finalization.
pub struct EncoderSession {
    target: VideoTarget,
    encoder: Box<dyn VideoEncoder>,
    muxer: Box<dyn ContainerMuxer>,
    scratch_path: PathBuf,
    frame_index: u64,
    track: Option<usize>,
    muxer_started: bool,
    last_pts_us: Option<u64>,
    counters: Arc<SessionCounters>,
    fault: Option<VizcastError>,
}

impl EncoderSession {
    pub fn new(
        target: VideoTarget,
        encoder: Box<dyn VideoEncoder>,
        muxer: Box<dyn ContainerMuxer>,
        scratch_path: PathBuf,
    ) -> Self {
        Self {
            target,
            encoder,
            muxer,
            scratch_path,
            frame_index: 0,
            track: None,
            muxer_started: false,
            last_pts_us: None,
            counters: Arc::new(SessionCounters::default()),
            fault: None,
        }
    }

    pub fn target(&self) -> &VideoTarget {
        &self.target
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        self.counters.clone()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.counters.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn samples_written(&self) -> u64 {
        self.counters.samples_written.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.counters.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn muxer_started(&self) -> bool {
        self.muxer_started
    }

    pub fn track(&self) -> Option<usize> {
        self.track
    }

    /// Remember the error that ended encoding.
    pub fn set_fault(&mut self, error: VizcastError) {
        if self.fault.is_none() {
            self.fault = Some(error);
        }
    }

    pub fn take_fault(&mut self) -> Option<VizcastError> {
        self.fault.take()
    }

    /// Scale, convert and encode one frame, then write whatever the
    /// encoder has ready.
    ///
    /// A frame that cannot be converted is logged and skipped; only encoder
    /// and muxer failures are errors.
    pub fn encode_frame(&mut self, frame: &Frame) -> VizcastResult<()> {
        let converted = frame
            .resized(self.target.width, self.target.height)
            .and_then(|frame| rgba_to_i420(&frame));
        let yuv = match converted {
            Ok(yuv) => yuv,
            Err(e) => {
                self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    format = ?frame.format(),
                    width = frame.width(),
                    height = frame.height(),
                    "Skipping frame the encoder cannot take"
                );
                return Ok(());
            }
        };
        let pts_us = presentation_time_us(self.frame_index, self.target.fps);

        self.encoder.queue_frame(&yuv, pts_us)?;
        self.frame_index += 1;
        self.counters.frames_encoded.fetch_add(1, Ordering::Relaxed);

        self.drain()?;
        Ok(())
    }

    /// Write every output the encoder has ready.
    ///
    /// Returns `true` once the end-of-stream sample has been seen.
    pub fn drain(&mut self) -> VizcastResult<bool> {
        while let Some(output) = self.encoder.dequeue()? {
            match output {
                EncoderOutput::FormatChanged(format) => {
                    if self.track.is_some() {
                        tracing::warn!(mime = %format.mime, "Ignoring repeated output format change");
                        continue;
                    }
                    let track = self.muxer.add_track(&format)?;
                    self.muxer.start()?;
                    self.track = Some(track);
                    self.muxer_started = true;
                    tracing::debug!(
                        mime = %format.mime,
                        width = format.width,
                        height = format.height,
                        track,
                        "Muxer started"
                    );
                }
                EncoderOutput::Sample(sample) => {
                    let end_of_stream = sample.flags.end_of_stream;
                    if !sample.data.is_empty() && !sample.flags.codec_config {
                        let Some(track) = self.track else {
                            tracing::warn!(pts_us = sample.pts_us, "Sample before output format; dropped");
                            continue;
                        };
                        if self.last_pts_us.is_some_and(|last| sample.pts_us < last) {
                            tracing::warn!(
                                pts_us = sample.pts_us,
                                "Encoder emitted a timestamp out of order"
                            );
                        }
                        self.muxer.write_sample(track, &sample)?;
                        self.last_pts_us = Some(sample.pts_us);
                        self.counters.samples_written.fetch_add(1, Ordering::Relaxed);
                    }
                    if end_of_stream {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Signal end of stream and write the remaining output.
    pub fn finish(&mut self) -> VizcastResult<()> {
        self.encoder.signal_end_of_stream()?;
        let deadline = Instant::now() + FINISH_TIMEOUT;
        loop {
            if self.drain()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(encoder = self.encoder.name(), "Encoder did not report end of stream");
                return Ok(());
            }
            std::thread::sleep(FINISH_IDLE_POLL);
        }
    }

    /// Finalize the container and free the encoder.
    pub fn close(&mut self) -> VizcastResult<()> {
        let result = self.muxer.stop();
        self.encoder.release();
        result
    }

}

/// A session dropped without being published leaves nothing behind.
impl Drop for EncoderSession {
    fn drop(&mut self) {
        self.encoder.release();
        if let Err(e) = self.muxer.stop() {
            tracing::debug!(error = %e, "Muxer stop failed while discarding session");
        }
        remove_scratch(&self.scratch_path);
    }
}

pub(crate) fn remove_scratch(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Scratch file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::RawI420Encoder;
    use crate::muxer::Y4mMuxer;

    fn session(dir: &Path, fps: u32) -> EncoderSession {
        std::fs::create_dir_all(dir).unwrap();
        let target = VideoTarget {
            width: 8,
            height: 6,
            bitrate: 100_000,
            fps,
        };
        let path = dir.join("scratch.y4m");
        EncoderSession::new(
            target,
            Box::new(RawI420Encoder::new(target).unwrap()),
            Box::new(Y4mMuxer::create(&path).unwrap()),
            path,
        )
    }

    #[test]
    fn frames_are_scaled_and_written() {
        let dir = std::env::temp_dir().join("vizcast_test_session");
        let mut session = session(&dir, 20);
        let scratch = session.scratch_path().to_path_buf();

        let frame = Frame::solid(16, 12, [0, 0, 0, 255]).unwrap();
        for _ in 0..3 {
            session.encode_frame(&frame).unwrap();
        }
        session.finish().unwrap();
        session.close().unwrap();

        assert_eq!(session.frames_encoded(), 3);
        assert_eq!(session.samples_written(), 3);
        assert_eq!(session.track(), Some(0));
        assert!(session.muxer_started());

        let bytes = std::fs::read(&scratch).unwrap();
        let header_len = "YUV4MPEG2 W8 H6 F20:1 Ip A1:1 C420jpeg\n".len();
        assert_eq!(bytes.len(), header_len + 3 * (6 + 72));
        // Black converts to Y=16.
        assert_eq!(bytes[header_len + 6], 16);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn dropping_session_removes_scratch_file() {
        let dir = std::env::temp_dir().join("vizcast_test_session_drop");
        let mut session = session(&dir, 20);
        session
            .encode_frame(&Frame::solid(8, 6, [255, 255, 255, 255]).unwrap())
            .unwrap();

        let path = session.scratch_path().to_path_buf();
        assert!(path.exists());
        drop(session);
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unconvertible_frames_are_skipped() {
        let dir = std::env::temp_dir().join("vizcast_test_session_skip");
        let mut session = session(&dir, 20);

        let yuv = Frame::new(8, 6, vizcast_frame::PixelFormat::I420, vec![0u8; 72]).unwrap();
        session.encode_frame(&yuv).unwrap();
        session
            .encode_frame(&Frame::solid(8, 6, [0, 0, 0, 255]).unwrap())
            .unwrap();

        assert_eq!(session.frames_skipped(), 1);
        assert_eq!(session.frames_encoded(), 1);
        assert_eq!(session.samples_written(), 1);
        assert!(session.take_fault().is_none());

        drop(session);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
