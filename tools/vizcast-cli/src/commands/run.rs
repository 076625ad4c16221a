//! Feed a synthetic camera through the live pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::runtime::Handle;
use vizcast_common::config::AppConfig;
use vizcast_frame::snapshot::save_snapshot;
use vizcast_frame::{Frame, FrameSink};
use vizcast_recorder::pipeline::{RecorderOptions, RecordingRequest, VideoRecorder};
use vizcast_synthesis::backend::DefaultBackendFactory;
use vizcast_synthesis::dispatcher::{DispatchOptions, FrameDispatcher};
use vizcast_synthesis::live::LiveFeed;
use vizcast_synthesis::router::BackendRouter;
use vizcast_synthesis::stream::LatestFrameSlot;

pub struct RunOptions {
    pub seconds: f64,
    pub camera_fps: u32,
    pub width: u32,
    pub height: u32,
    pub backend: Option<String>,
    pub reference: bool,
    pub record: bool,
    pub encoder: Option<String>,
    pub snapshot: bool,
}

/// Counts frames that reach the display.
#[derive(Default)]
struct DisplayCounter {
    frames: AtomicU64,
}

impl FrameSink for DisplayCounter {
    fn on_frame(&self, _frame: Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "display"
    }
}

/// Moving diagonal gradient, so consecutive frames differ.
fn test_pattern(width: u32, height: u32, tick: u64) -> anyhow::Result<Frame> {
    let (w, h) = (width.max(1), height.max(1));
    let shift = (tick % u64::from(w * h)) as u32 * 4;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + shift) % w * 255 / w) as u8;
            let g = ((y + shift) % h * 255 / h) as u8;
            let b = ((x + y) % 256) as u8;
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Ok(Frame::from_rgba(width, height, data)?)
}

/// Soft checkerboard standing in for a user-chosen reference image.
fn reference_pattern(width: u32, height: u32) -> anyhow::Result<Frame> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let light = ((x / 32) + (y / 32)) % 2 == 0;
            let px = if light { [230, 200, 170, 255] } else { [60, 40, 90, 255] };
            data.extend_from_slice(&px);
        }
    }
    Ok(Frame::from_rgba(width, height, data)?)
}

pub async fn run(mut config: AppConfig, options: RunOptions) -> anyhow::Result<()> {
    if options.camera_fps == 0 {
        anyhow::bail!("--camera-fps must be at least 1");
    }
    if let Some(selection) = &options.backend {
        config.backend.selection = selection.clone();
    }
    if let Some(encoder) = &options.encoder {
        config.recording.encoder = encoder.clone();
    }

    println!("Vizcast live pipeline");
    println!("  Backend: {}", config.backend.selection);
    println!(
        "  Camera: {}x{} @ {} fps for {:.1}s",
        options.width, options.height, options.camera_fps, options.seconds
    );
    println!("  Reference: {}", options.reference);
    println!("  Record: {}", options.record);
    println!();

    let router = Arc::new(BackendRouter::new(
        config.backend.clone(),
        Arc::new(DefaultBackendFactory::new()),
    ));
    let ready = router.prepare().await;
    tracing::info!(?ready, "Backends prepared");

    let dispatcher = Arc::new(FrameDispatcher::new(
        router.clone(),
        DispatchOptions::from(&config.dispatch),
        Handle::current(),
    ));

    let display = Arc::new(DisplayCounter::default());
    let stream = Arc::new(LatestFrameSlot::new());
    dispatcher.add_sink(display.clone());
    dispatcher.add_sink(stream.clone());

    let recorder = if options.record {
        let codecs = vizcast_recorder::select_codecs(&config.recording.encoder)?;
        let recorder = Arc::new(VideoRecorder::new(
            codecs,
            RecorderOptions::from(&config.storage),
        ));
        recorder
            .start_recording(RecordingRequest::from_defaults(&config.recording))
            .context("Failed to start recording")?;
        dispatcher.add_sink(recorder.clone());
        Some(recorder)
    } else {
        None
    };

    let feed = LiveFeed::new(dispatcher.clone(), display.clone());
    if options.reference {
        feed.set_reference(Some(reference_pattern(options.width, options.height)?));
    }

    let period = Duration::from_secs_f64(1.0 / f64::from(options.camera_fps));
    let deadline = Instant::now() + Duration::from_secs_f64(options.seconds.max(0.0));
    let mut ticker = tokio::time::interval(period);
    let mut tick = 0u64;

    println!("Running... press Ctrl+C to stop early");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    break;
                }
                feed.on_live_frame(test_pattern(options.width, options.height, tick)?);
                tick += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted");
                break;
            }
        }
    }

    dispatcher.close().await;
    let stats = dispatcher.stats();

    println!();
    println!("Camera frames: {tick}");
    println!(
        "Dispatch: {} submitted, {} processed, {} dropped busy, {} failed",
        stats.submitted, stats.accepted, stats.dropped_busy, stats.failed
    );
    println!(
        "Display frames: {}",
        display.frames.load(Ordering::Relaxed)
    );
    println!("Stream frames: {}", stream.published());

    if options.snapshot {
        match stream.latest() {
            Some(frame) => {
                let path = save_snapshot(&frame, &config.storage.snapshots_dir)?;
                println!("Snapshot saved to: {}", path.display());
            }
            None => println!("No synthesized frame to snapshot"),
        }
    }

    if let Some(recorder) = recorder {
        let summary = tokio::task::spawn_blocking(move || recorder.stop_recording())
            .await
            .context("Recorder task failed")??;
        match summary {
            Some(summary) => {
                println!("Recording saved to: {}", summary.path.display());
                println!(
                    "  {} frames encoded, {} dropped, {:.2}s of video",
                    summary.frames_encoded, summary.frames_dropped, summary.media_duration_secs
                );
            }
            None => println!("Recording was not active"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_moves_between_ticks() {
        let a = test_pattern(16, 8, 0).unwrap();
        let b = test_pattern(16, 8, 1).unwrap();
        assert_eq!(a.width(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn reference_pattern_alternates_tiles() {
        let frame = reference_pattern(64, 64).unwrap();
        assert_ne!(frame.pixel(0, 0), frame.pixel(32, 0));
        assert_eq!(frame.pixel(0, 0), frame.pixel(32, 32));
    }
}
