//! H.264/MP4 recording through GStreamer. Skipped on machines without an
//! H.264 encoder element.
#![cfg(feature = "gstreamer")]

use std::path::PathBuf;
use std::sync::Arc;

use vizcast_frame::Frame;
use vizcast_recorder::codec::{CodecProvider, GstCodecs};
use vizcast_recorder::pipeline::{PipelineState, RecorderOptions, RecordingRequest, VideoRecorder};

fn count_boxes(bytes: &[u8], kind: &[u8; 4]) -> usize {
    bytes.windows(4).filter(|w| w == kind).count()
}

#[test]
fn forty_frames_make_one_single_track_mp4() {
    let Some(codecs) = GstCodecs::detect() else {
        eprintln!("no GStreamer H.264 encoder available; skipping");
        return;
    };
    assert_eq!(codecs.container_extension(), "mp4");

    let root = std::env::temp_dir().join("vizcast_test_recorder_gst");
    let _ = std::fs::remove_dir_all(&root);
    let options = RecorderOptions {
        recordings_dir: root.join("recordings"),
        scratch_dir: root.join("scratch"),
    };
    let recorder = VideoRecorder::new(Arc::new(codecs), options.clone());

    recorder
        .start_recording(RecordingRequest {
            name: "clip.mp4".to_string(),
            width: 640,
            height: 480,
            bitrate: 2_000_000,
            fps: 20,
        })
        .unwrap();
    for i in 0..40u8 {
        let frame = Frame::solid(640, 480, [i * 6, 128, 255 - i * 6, 255]).unwrap();
        assert!(recorder.push_frame(frame));
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let summary = recorder.stop_recording().unwrap().unwrap();
    assert_eq!(recorder.state(), PipelineState::Closed);
    assert!(summary.samples_written >= 1);
    assert_eq!(summary.frames_encoded + summary.frames_dropped, 40);

    let outputs: Vec<PathBuf> = std::fs::read_dir(&options.recordings_dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    assert_eq!(outputs, vec![options.recordings_dir.join("clip.mp4")]);

    let bytes = std::fs::read(&outputs[0]).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
    assert_eq!(count_boxes(&bytes, b"moov"), 1);
    assert_eq!(count_boxes(&bytes, b"trak"), 1);

    let _ = std::fs::remove_dir_all(&root);
}
