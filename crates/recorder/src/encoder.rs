//! Encoder seam and the software raw-I420 encoder.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::yuv::i420_len;

/// MIME type of uncompressed planar 4:2:0 output.
pub const RAW_I420_MIME: &str = "video/x-raw-i420";

/// MIME type of H.264 in length-prefixed (avc) form.
pub const H264_MIME: &str = "video/avc";

/// What a recording is encoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTarget {
    pub width: u32,
    pub height: u32,
    /// Bits per second.
    pub bitrate: u32,
    pub fps: u32,
}

impl VideoTarget {
    /// Size of one I420 frame at the target dimensions.
    pub fn frame_len(&self) -> usize {
        i420_len(self.width, self.height)
    }

    /// One keyframe every two seconds.
    pub fn keyframe_interval(&self) -> u32 {
        self.fps.saturating_mul(2).max(2)
    }
}

/// Encoder output description, emitted once before the first sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    /// GStreamer caps for the stream, when produced by a GStreamer encoder.
    pub caps: Option<String>,
}

impl OutputFormat {
    pub fn raw_i420(target: &VideoTarget) -> Self {
        Self {
            mime: RAW_I420_MIME.to_string(),
            width: target.width,
            height: target.height,
            fps: target.fps,
            bitrate: target.bitrate,
            caps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags {
    pub key_frame: bool,
    /// Carries codec setup data rather than a picture.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// One unit of compressed (or raw) output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub pts_us: u64,
    pub flags: SampleFlags,
}

impl EncodedSample {
    /// Empty marker signalling that the encoder has flushed everything.
    pub fn end_of_stream(pts_us: u64) -> Self {
        Self {
            data: Vec::new(),
            pts_us,
            flags: SampleFlags {
                end_of_stream: true,
                ..SampleFlags::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    FormatChanged(OutputFormat),
    Sample(EncodedSample),
}

/// A stateful video encoder driven by one thread.
///
/// Input is I420 at the target dimensions with a presentation timestamp.
/// Output is pulled with [`VideoEncoder::dequeue`] until it returns `None`.
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    fn queue_frame(&mut self, yuv: &[u8], pts_us: u64) -> VizcastResult<()>;

    /// Next available output, without waiting for more input.
    fn dequeue(&mut self) -> VizcastResult<Option<EncoderOutput>>;

    /// No more input follows. Output ends with an end-of-stream sample.
    fn signal_end_of_stream(&mut self) -> VizcastResult<()>;

    /// Free encoder resources. Safe to call more than once.
    fn release(&mut self);
}

/// Passes I420 frames through unchanged, one sample per frame.
pub struct RawI420Encoder {
    target: VideoTarget,
    pending: VecDeque<EncoderOutput>,
    format_sent: bool,
    last_pts_us: u64,
    finished: bool,
    released: bool,
}

impl RawI420Encoder {
    pub fn new(target: VideoTarget) -> VizcastResult<Self> {
        if target.width == 0 || target.height == 0 || target.width % 2 != 0 || target.height % 2 != 0
        {
            return Err(VizcastError::encoder(format!(
                "I420 needs even, non-zero dimensions, got {}x{}",
                target.width, target.height
            )));
        }
        Ok(Self {
            target,
            pending: VecDeque::new(),
            format_sent: false,
            last_pts_us: 0,
            finished: false,
            released: false,
        })
    }

    fn ensure_open(&self) -> VizcastResult<()> {
        if self.released {
            return Err(VizcastError::encoder("encoder already released"));
        }
        if self.finished {
            return Err(VizcastError::encoder("input after end of stream"));
        }
        Ok(())
    }
}

impl VideoEncoder for RawI420Encoder {
    fn name(&self) -> &str {
        "raw-i420"
    }

    fn queue_frame(&mut self, yuv: &[u8], pts_us: u64) -> VizcastResult<()> {
        self.ensure_open()?;
        let expected = self.target.frame_len();
        if yuv.len() != expected {
            return Err(VizcastError::encoder(format!(
                "I420 frame is {} bytes, expected {expected}",
                yuv.len()
            )));
        }

        if !self.format_sent {
            self.pending
                .push_back(EncoderOutput::FormatChanged(OutputFormat::raw_i420(&self.target)));
            self.format_sent = true;
        }
        self.pending.push_back(EncoderOutput::Sample(EncodedSample {
            data: yuv.to_vec(),
            pts_us,
            flags: SampleFlags {
                key_frame: true,
                ..SampleFlags::default()
            },
        }));
        self.last_pts_us = pts_us;
        Ok(())
    }

    fn dequeue(&mut self) -> VizcastResult<Option<EncoderOutput>> {
        Ok(self.pending.pop_front())
    }

    fn signal_end_of_stream(&mut self) -> VizcastResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.pending
            .push_back(EncoderOutput::Sample(EncodedSample::end_of_stream(self.last_pts_us)));
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending.clear();
            tracing::debug!(encoder = "raw-i420", "Encoder released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> VideoTarget {
        VideoTarget {
            width: 4,
            height: 2,
            bitrate: 1_000_000,
            fps: 20,
        }
    }

    #[test]
    fn format_precedes_first_sample() {
        let mut encoder = RawI420Encoder::new(target()).unwrap();
        let frame = vec![0u8; target().frame_len()];
        encoder.queue_frame(&frame, 0).unwrap();
        encoder.queue_frame(&frame, 50_000).unwrap();

        let first = encoder.dequeue().unwrap().unwrap();
        assert!(matches!(first, EncoderOutput::FormatChanged(ref f) if f.mime == RAW_I420_MIME));

        let pts: Vec<u64> = std::iter::from_fn(|| encoder.dequeue().unwrap())
            .map(|out| match out {
                EncoderOutput::Sample(s) => s.pts_us,
                EncoderOutput::FormatChanged(_) => panic!("format emitted twice"),
            })
            .collect();
        assert_eq!(pts, vec![0, 50_000]);
    }

    #[test]
    fn end_of_stream_is_last_output() {
        let mut encoder = RawI420Encoder::new(target()).unwrap();
        encoder
            .queue_frame(&vec![0u8; target().frame_len()], 0)
            .unwrap();
        encoder.signal_end_of_stream().unwrap();

        let mut last = None;
        while let Some(out) = encoder.dequeue().unwrap() {
            last = Some(out);
        }
        match last {
            Some(EncoderOutput::Sample(s)) => assert!(s.flags.end_of_stream),
            other => panic!("unexpected final output: {other:?}"),
        }
        assert!(encoder.queue_frame(&[0u8; 12], 1).is_err());
    }

    #[test]
    fn rejects_wrong_frame_size_and_odd_targets() {
        let mut encoder = RawI420Encoder::new(target()).unwrap();
        assert!(encoder.queue_frame(&[0u8; 3], 0).is_err());

        let odd = VideoTarget {
            width: 5,
            ..target()
        };
        assert!(RawI420Encoder::new(odd).is_err());
    }

    #[test]
    fn keyframe_interval_is_two_seconds() {
        assert_eq!(target().keyframe_interval(), 40);
        let slow = VideoTarget { fps: 0, ..target() };
        assert_eq!(slow.keyframe_interval(), 2);
    }
}
