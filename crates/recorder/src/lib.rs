//! Vizcast Recorder
//!
//! Turns frames arriving at an arbitrary rate into a muxed video file.
//!
//! Frames enter a bounded drop-oldest [`FrameQueue`]; a dedicated encoder
//! thread pops them, scales and converts them to I420, and feeds a
//! [`VideoEncoder`]. Encoder output goes to a [`ContainerMuxer`] in
//! emission order. [`CodecProvider`] decides which encoder and container
//! back a recording.

pub mod codec;
pub mod encoder;
#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod muxer;
pub mod pipeline;
pub mod queue;
pub mod session;

pub use codec::{select_codecs, CodecProvider, SoftwareCodecs};
pub use encoder::{
    EncodedSample, EncoderOutput, OutputFormat, RawI420Encoder, SampleFlags, VideoEncoder,
    VideoTarget,
};
pub use muxer::{ContainerMuxer, Y4mMuxer};
pub use pipeline::{
    PipelineState, PipelineStats, RecorderOptions, RecordingRequest, RecordingSummary,
    VideoRecorder,
};
pub use queue::{FrameQueue, PushOutcome, FRAME_QUEUE_CAPACITY};
pub use session::EncoderSession;
