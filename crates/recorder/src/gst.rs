//! GStreamer H.264 encoder and MP4 muxer.
//!
//! The encoder is an `appsrc ! <h264 encoder> ! h264parse ! appsink`
//! pipeline so that compressed samples come back to the encoder thread,
//! which hands them to a separate `appsrc ! mp4mux ! filesink` pipeline.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use vizcast_common::clock::MICROS_PER_SEC;
use vizcast_common::error::{VizcastError, VizcastResult};

use crate::encoder::{
    EncodedSample, EncoderOutput, OutputFormat, SampleFlags, VideoEncoder, VideoTarget, H264_MIME,
};
use crate::muxer::ContainerMuxer;

const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_PULL_TIMEOUT_MS: u64 = 100;

pub fn init_gstreamer() -> VizcastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(VizcastError::encoder(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// An H.264 encoder element available on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Human-readable name, e.g. "VA-API H.264".
    pub name: String,
    /// GStreamer element name, e.g. "vaapih264enc".
    pub element: String,
    pub hardware: bool,
}

impl EncoderInfo {
    pub fn display_name(&self) -> String {
        if self.hardware {
            format!("{} (Hardware)", self.name)
        } else {
            format!("{} (Software)", self.name)
        }
    }

    /// Element properties for `target`. Bitrates are in kbit/s.
    pub fn element_options(&self, target: &VideoTarget) -> String {
        let kbps = (target.bitrate / 1000).max(1);
        let keyint = target.keyframe_interval();
        match self.element.as_str() {
            "x264enc" => format!(
                "tune=zerolatency speed-preset=veryfast bitrate={kbps} key-int-max={keyint}"
            ),
            "nvh264enc" => format!("bitrate={kbps} gop-size={keyint}"),
            "vaapih264enc" => format!("bitrate={kbps} keyframe-period={keyint}"),
            _ => String::new(),
        }
    }
}

/// Hardware encoders first, then x264.
const H264_CANDIDATES: &[(&str, &str, bool)] = &[
    ("VA-API H.264", "vaapih264enc", true),
    ("NVENC H.264", "nvh264enc", true),
    ("x264 H.264", "x264enc", false),
];

/// H.264 encoders present in the GStreamer registry, best first.
pub fn detect_encoders() -> Vec<EncoderInfo> {
    if let Err(e) = init_gstreamer() {
        tracing::warn!(error = %e, "GStreamer unavailable; no H.264 encoders");
        return Vec::new();
    }

    let required = ["appsrc", "appsink", "h264parse", "mp4mux", "filesink"];
    if let Some(missing) = required.iter().find(|e| gst::ElementFactory::find(e).is_none()) {
        tracing::warn!(element = missing, "GStreamer element missing; H.264 recording disabled");
        return Vec::new();
    }

    H264_CANDIDATES
        .iter()
        .filter(|(_, element, _)| gst::ElementFactory::find(element).is_some())
        .map(|(name, element, hardware)| EncoderInfo {
            name: name.to_string(),
            element: element.to_string(),
            hardware: *hardware,
        })
        .collect()
}

pub fn best_encoder() -> Option<EncoderInfo> {
    let best = detect_encoders().into_iter().next();
    if let Some(info) = &best {
        tracing::info!(encoder = %info.display_name(), "Selected H.264 encoder");
    }
    best
}

fn launch_pipeline(name: &str, launch: &str) -> VizcastResult<gst::Pipeline> {
    init_gstreamer()?;
    let element = gst::parse::launch(launch).map_err(|e| {
        VizcastError::encoder(format!("Failed to build {name} pipeline: {e}"))
    })?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| VizcastError::encoder("Launch string did not produce a pipeline"))
}

fn by_name<T: IsA<gst::Element>>(pipeline: &gst::Pipeline, name: &str) -> VizcastResult<T> {
    pipeline
        .by_name(name)
        .and_then(|element| element.dynamic_cast::<T>().ok())
        .ok_or_else(|| VizcastError::encoder(format!("Pipeline has no usable element {name}")))
}

fn buffer_from(data: Vec<u8>, pts_us: u64, duration_us: u64, delta: bool) -> VizcastResult<gst::Buffer> {
    let mut buffer = gst::Buffer::from_mut_slice(data);
    let buf = buffer
        .get_mut()
        .ok_or_else(|| VizcastError::encoder("Freshly allocated buffer is not writable"))?;
    buf.set_pts(gst::ClockTime::from_useconds(pts_us));
    buf.set_dts(gst::ClockTime::from_useconds(pts_us));
    buf.set_duration(gst::ClockTime::from_useconds(duration_us));
    if delta {
        buf.set_flags(gst::BufferFlags::DELTA_UNIT);
    }
    Ok(buffer)
}

/// Wait for EOS to propagate through `pipeline`, bounded by a timeout.
fn wait_for_eos(pipeline: &gst::Pipeline, name: &str) {
    let Some(bus) = pipeline.bus() else {
        return;
    };
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= EOS_DRAIN_TIMEOUT {
            tracing::warn!(pipeline = name, "EOS drain timed out");
            break;
        }
        let remaining = gst::ClockTime::from_nseconds((EOS_DRAIN_TIMEOUT - elapsed).as_nanos() as u64);
        match bus.timed_pop(remaining) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!(pipeline = name, "EOS received; pipeline drained");
                    break;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(pipeline = name, error = %e.error(), "Pipeline error during EOS drain");
                    break;
                }
                _ => {}
            },
            None => {
                tracing::warn!(pipeline = name, "EOS drain timed out");
                break;
            }
        }
    }
}

/// H.264 encoder backed by a GStreamer element.
pub struct GstH264Encoder {
    info: EncoderInfo,
    target: VideoTarget,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    pending: VecDeque<EncoderOutput>,
    format_sent: bool,
    eos_sent: bool,
    eos_reported: bool,
    last_pts_us: u64,
    released: bool,
}

impl GstH264Encoder {
    pub fn new(info: EncoderInfo, target: VideoTarget) -> VizcastResult<Self> {
        let launch = format!(
            "appsrc name=src format=time ! videoconvert ! {} {} ! h264parse ! video/x-h264,stream-format=avc,alignment=au ! appsink name=sink sync=false",
            info.element,
            info.element_options(&target)
        );
        let pipeline = launch_pipeline("encoder", &launch)?;
        let appsrc: gst_app::AppSrc = by_name(&pipeline, "src")?;
        let appsink: gst_app::AppSink = by_name(&pipeline, "sink")?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "I420")
            .field("width", target.width as i32)
            .field("height", target.height as i32)
            .field("framerate", gst::Fraction::new(target.fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            VizcastError::encoder(format!("Failed to start {} encoder: {e:?}", info.element))
        })?;
        tracing::info!(
            encoder = %info.display_name(),
            width = target.width,
            height = target.height,
            bitrate = target.bitrate,
            fps = target.fps,
            "GStreamer encoder started"
        );

        Ok(Self {
            info,
            target,
            pipeline,
            appsrc,
            appsink,
            pending: VecDeque::new(),
            format_sent: false,
            eos_sent: false,
            eos_reported: false,
            last_pts_us: 0,
            released: false,
        })
    }

    fn take_sample(&mut self, sample: &gst::Sample) -> VizcastResult<()> {
        if !self.format_sent {
            self.pending.push_back(EncoderOutput::FormatChanged(OutputFormat {
                mime: H264_MIME.to_string(),
                width: self.target.width,
                height: self.target.height,
                fps: self.target.fps,
                bitrate: self.target.bitrate,
                caps: sample.caps().map(|caps| caps.to_string()),
            }));
            self.format_sent = true;
        }

        let buffer = sample
            .buffer()
            .ok_or_else(|| VizcastError::encoder("Encoder sample without buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| VizcastError::encoder(format!("Failed to map encoded buffer: {e}")))?;
        let flags = buffer.flags();
        self.pending.push_back(EncoderOutput::Sample(EncodedSample {
            data: map.as_slice().to_vec(),
            pts_us: buffer.pts().map(|t| t.useconds()).unwrap_or(self.last_pts_us),
            flags: SampleFlags {
                key_frame: !flags.contains(gst::BufferFlags::DELTA_UNIT),
                codec_config: flags.contains(gst::BufferFlags::HEADER),
                end_of_stream: false,
            },
        }));
        Ok(())
    }
}

impl VideoEncoder for GstH264Encoder {
    fn name(&self) -> &str {
        &self.info.element
    }

    fn queue_frame(&mut self, yuv: &[u8], pts_us: u64) -> VizcastResult<()> {
        if self.released || self.eos_sent {
            return Err(VizcastError::encoder("encoder no longer accepts input"));
        }
        if yuv.len() != self.target.frame_len() {
            return Err(VizcastError::encoder(format!(
                "I420 frame is {} bytes, expected {}",
                yuv.len(),
                self.target.frame_len()
            )));
        }

        let duration_us = MICROS_PER_SEC / u64::from(self.target.fps.max(1));
        let buffer = buffer_from(yuv.to_vec(), pts_us, duration_us, false)?;
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| VizcastError::encoder(format!("Failed to push frame: {e:?}")))?;
        self.last_pts_us = pts_us;
        Ok(())
    }

    fn dequeue(&mut self) -> VizcastResult<Option<EncoderOutput>> {
        if let Some(out) = self.pending.pop_front() {
            return Ok(Some(out));
        }
        if self.released {
            return Ok(None);
        }

        let timeout = if self.eos_sent {
            gst::ClockTime::from_mseconds(DRAIN_PULL_TIMEOUT_MS)
        } else {
            gst::ClockTime::ZERO
        };
        match self.appsink.try_pull_sample(timeout) {
            Some(sample) => {
                self.take_sample(&sample)?;
                Ok(self.pending.pop_front())
            }
            None if self.eos_sent && !self.eos_reported && self.appsink.is_eos() => {
                self.eos_reported = true;
                Ok(Some(EncoderOutput::Sample(EncodedSample::end_of_stream(
                    self.last_pts_us,
                ))))
            }
            None => Ok(None),
        }
    }

    fn signal_end_of_stream(&mut self) -> VizcastResult<()> {
        if self.eos_sent {
            return Ok(());
        }
        self.appsrc
            .end_of_stream()
            .map_err(|e| VizcastError::encoder(format!("Failed to send EOS: {e:?}")))?;
        self.eos_sent = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending.clear();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(encoder = %self.info.element, error = ?e, "Failed to stop encoder pipeline");
        }
    }
}

impl Drop for GstH264Encoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// MP4 writer fed with H.264 samples.
pub struct GstMp4Muxer {
    path: PathBuf,
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_duration_us: u64,
    track_added: bool,
    started: bool,
    stopped: bool,
}

impl GstMp4Muxer {
    pub fn create(path: impl Into<PathBuf>) -> VizcastResult<Self> {
        init_gstreamer()?;
        let path = path.into();

        let pipeline = gst::Pipeline::new();
        let appsrc = gst_app::AppSrc::builder()
            .name("mux-src")
            .format(gst::Format::Time)
            .build();
        let mux = gst::ElementFactory::make("mp4mux")
            .build()
            .map_err(|e| VizcastError::muxer(format!("Failed to create mp4mux: {e}")))?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().to_string())
            .build()
            .map_err(|e| VizcastError::muxer(format!("Failed to create filesink: {e}")))?;

        pipeline
            .add_many([appsrc.upcast_ref(), &mux, &filesink])
            .map_err(|e| VizcastError::muxer(format!("Failed to assemble muxer: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &mux, &filesink])
            .map_err(|e| VizcastError::muxer(format!("Failed to link muxer: {e}")))?;

        Ok(Self {
            path,
            pipeline,
            appsrc,
            frame_duration_us: 0,
            track_added: false,
            started: false,
            stopped: false,
        })
    }
}

impl ContainerMuxer for GstMp4Muxer {
    fn add_track(&mut self, format: &OutputFormat) -> VizcastResult<usize> {
        if self.track_added {
            return Err(VizcastError::muxer("MP4 writer holds a single video track"));
        }
        if format.mime != H264_MIME {
            return Err(VizcastError::unsupported(format!(
                "MP4 writer cannot store {}",
                format.mime
            )));
        }
        let caps = format
            .caps
            .as_deref()
            .ok_or_else(|| VizcastError::muxer("H.264 track needs stream caps"))?;
        let caps = gst::Caps::from_str(caps)
            .map_err(|e| VizcastError::muxer(format!("Invalid track caps: {e}")))?;
        self.appsrc.set_caps(Some(&caps));
        self.frame_duration_us = MICROS_PER_SEC / u64::from(format.fps.max(1));
        self.track_added = true;
        Ok(0)
    }

    fn start(&mut self) -> VizcastResult<()> {
        if !self.track_added {
            return Err(VizcastError::muxer("start called before add_track"));
        }
        if self.started {
            return Ok(());
        }
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| VizcastError::muxer(format!("Failed to start muxer: {e:?}")))?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> VizcastResult<()> {
        if !self.started || self.stopped {
            return Err(VizcastError::muxer("muxer is not running"));
        }
        if track != 0 {
            return Err(VizcastError::muxer(format!("no track {track}")));
        }
        if sample.flags.codec_config || sample.data.is_empty() {
            return Ok(());
        }

        let buffer = buffer_from(
            sample.data.clone(),
            sample.pts_us,
            self.frame_duration_us,
            !sample.flags.key_frame,
        )?;
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| VizcastError::muxer(format!("Failed to write sample: {e:?}")))?;
        Ok(())
    }

    fn stop(&mut self) -> VizcastResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if self.started {
            match self.appsrc.end_of_stream() {
                Ok(_) => wait_for_eos(&self.pipeline, "mp4mux"),
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to send EOS; output may be truncated")
                }
            }
        }
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| VizcastError::muxer(format!("Failed to stop muxer: {e:?}")))?;
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for GstMp4Muxer {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
