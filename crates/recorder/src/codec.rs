//! Encoder and container selection.

use std::path::Path;
use std::sync::Arc;

use vizcast_common::error::{VizcastError, VizcastResult};

use crate::encoder::{RawI420Encoder, VideoEncoder, VideoTarget};
use crate::muxer::{ContainerMuxer, Y4mMuxer};

/// Opens the encoder and container that back a recording.
pub trait CodecProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Extension of the files written by [`CodecProvider::open_muxer`].
    fn container_extension(&self) -> &str;

    fn open_encoder(&self, target: &VideoTarget) -> VizcastResult<Box<dyn VideoEncoder>>;

    fn open_muxer(&self, path: &Path) -> VizcastResult<Box<dyn ContainerMuxer>>;
}

/// Raw I420 frames in a YUV4MPEG2 file. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCodecs;

impl CodecProvider for SoftwareCodecs {
    fn name(&self) -> &str {
        "software (raw I420 / Y4M)"
    }

    fn container_extension(&self) -> &str {
        "y4m"
    }

    fn open_encoder(&self, target: &VideoTarget) -> VizcastResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(RawI420Encoder::new(*target)?))
    }

    fn open_muxer(&self, path: &Path) -> VizcastResult<Box<dyn ContainerMuxer>> {
        Ok(Box::new(Y4mMuxer::create(path)?))
    }
}

/// H.264 through a detected GStreamer encoder, muxed into MP4.
#[cfg(feature = "gstreamer")]
#[derive(Debug, Clone)]
pub struct GstCodecs {
    encoder: crate::gst::EncoderInfo,
    label: String,
}

#[cfg(feature = "gstreamer")]
impl GstCodecs {
    pub fn new(encoder: crate::gst::EncoderInfo) -> Self {
        let label = format!("gstreamer {} / MP4", encoder.display_name());
        Self { encoder, label }
    }

    /// Best available encoder, if GStreamer has one.
    pub fn detect() -> Option<Self> {
        crate::gst::best_encoder().map(Self::new)
    }
}

#[cfg(feature = "gstreamer")]
impl CodecProvider for GstCodecs {
    fn name(&self) -> &str {
        &self.label
    }

    fn container_extension(&self) -> &str {
        "mp4"
    }

    fn open_encoder(&self, target: &VideoTarget) -> VizcastResult<Box<dyn VideoEncoder>> {
        Ok(Box::new(crate::gst::GstH264Encoder::new(
            self.encoder.clone(),
            *target,
        )?))
    }

    fn open_muxer(&self, path: &Path) -> VizcastResult<Box<dyn ContainerMuxer>> {
        Ok(Box::new(crate::gst::GstMp4Muxer::create(path)?))
    }
}

#[cfg(feature = "gstreamer")]
fn hardware_codecs() -> Option<Arc<dyn CodecProvider>> {
    GstCodecs::detect().map(|codecs| Arc::new(codecs) as Arc<dyn CodecProvider>)
}

#[cfg(not(feature = "gstreamer"))]
fn hardware_codecs() -> Option<Arc<dyn CodecProvider>> {
    None
}

/// Pick codecs from a configured preference.
///
/// `auto` prefers GStreamer (hardware encoders first) and falls back to
/// software; `software`/`y4m` and `gstreamer`/`h264`/`mp4` force one path.
pub fn select_codecs(preference: &str) -> VizcastResult<Arc<dyn CodecProvider>> {
    let preference = preference.trim().to_lowercase();
    match preference.as_str() {
        "" | "auto" => Ok(hardware_codecs().unwrap_or_else(|| {
            tracing::info!("No GStreamer H.264 encoder; recording raw Y4M");
            Arc::new(SoftwareCodecs)
        })),
        "software" | "y4m" | "raw" => Ok(Arc::new(SoftwareCodecs)),
        "gstreamer" | "h264" | "mp4" => hardware_codecs().ok_or_else(|| {
            VizcastError::unsupported(
                "GStreamer encoding is unavailable (built without the gstreamer feature or no H.264 encoder found)",
            )
        }),
        other => Err(VizcastError::config(format!(
            "Unknown encoder preference '{other}' (expected auto, software or gstreamer)"
        ))),
    }
}

/// Names of every codec path usable right now, best first.
pub fn available_codecs() -> Vec<String> {
    let mut names = Vec::new();
    if let Some(codecs) = hardware_codecs() {
        names.push(codecs.name().to_string());
    }
    names.push(SoftwareCodecs.name().to_string());
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_is_always_selectable() {
        let codecs = select_codecs("Software").unwrap();
        assert_eq!(codecs.container_extension(), "y4m");
        assert!(available_codecs()
            .last()
            .is_some_and(|name| name.contains("Y4M")));
    }

    #[test]
    fn auto_always_yields_codecs() {
        let codecs = select_codecs("auto").unwrap();
        assert!(["y4m", "mp4"].contains(&codecs.container_extension()));
    }

    #[test]
    fn unknown_preference_is_a_config_error() {
        let err = select_codecs("vp9").err().unwrap();
        assert!(matches!(err, VizcastError::Config { .. }));
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn forced_gstreamer_is_unsupported_without_feature() {
        let err = select_codecs("gstreamer").err().unwrap();
        assert!(matches!(err, VizcastError::Unsupported { .. }));
    }
}
