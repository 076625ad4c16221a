//! Core frame types for Vizcast.
//!
//! A [`Frame`] is an immutable pixel buffer handed from stage to stage:
//! capture source, synthesis backend, display/streaming sinks, and the
//! recorder. Packed RGBA is used everywhere except at the encoder boundary,
//! where [`yuv::rgba_to_i420`] produces planar YUV 4:2:0.

pub mod frame;
pub mod sink;
pub mod snapshot;
pub mod yuv;

pub use frame::{Frame, PixelFormat};
pub use sink::FrameSink;
