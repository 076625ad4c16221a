//! Container seam and the YUV4MPEG2 writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use vizcast_common::error::{VizcastError, VizcastResult};

use crate::encoder::{EncodedSample, OutputFormat, RAW_I420_MIME};

/// Writes encoder output into a container file.
///
/// Call order: `add_track` once, `start`, any number of `write_sample`,
/// then `stop`.
pub trait ContainerMuxer: Send {
    /// Register the video track. Returns its index.
    fn add_track(&mut self, format: &OutputFormat) -> VizcastResult<usize>;

    fn start(&mut self) -> VizcastResult<()>;

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> VizcastResult<()>;

    /// Finalize the file. Safe to call more than once.
    fn stop(&mut self) -> VizcastResult<()>;

    fn output_path(&self) -> &Path;
}

/// Single-track YUV4MPEG2 (`.y4m`) writer for raw I420 samples.
pub struct Y4mMuxer {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    format: Option<OutputFormat>,
    started: bool,
    frames_written: u64,
}

impl Y4mMuxer {
    /// Create (or truncate) the output file.
    pub fn create(path: impl Into<PathBuf>) -> VizcastResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| {
            VizcastError::muxer(format!("Failed to create {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            format: None,
            started: false,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn writer(&mut self) -> VizcastResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| VizcastError::muxer("muxer already stopped"))
    }
}

/// Stream header for a progressive 4:2:0 stream with square pixels.
pub fn y4m_header(format: &OutputFormat) -> String {
    format!(
        "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg\n",
        format.width, format.height, format.fps
    )
}

impl ContainerMuxer for Y4mMuxer {
    fn add_track(&mut self, format: &OutputFormat) -> VizcastResult<usize> {
        if self.format.is_some() {
            return Err(VizcastError::muxer("Y4M holds a single video track"));
        }
        if format.mime != RAW_I420_MIME {
            return Err(VizcastError::unsupported(format!(
                "Y4M cannot store {}",
                format.mime
            )));
        }
        if format.fps == 0 {
            return Err(VizcastError::muxer("Y4M needs a non-zero frame rate"));
        }
        self.format = Some(format.clone());
        Ok(0)
    }

    fn start(&mut self) -> VizcastResult<()> {
        if self.started {
            return Ok(());
        }
        let header = match &self.format {
            Some(format) => y4m_header(format),
            None => return Err(VizcastError::muxer("start called before add_track")),
        };
        self.writer()?.write_all(header.as_bytes())?;
        self.started = true;
        tracing::debug!(path = %self.path.display(), "Y4M muxer started");
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> VizcastResult<()> {
        if !self.started {
            return Err(VizcastError::muxer("write_sample before start"));
        }
        if track != 0 {
            return Err(VizcastError::muxer(format!("no track {track}")));
        }
        if sample.flags.codec_config || sample.data.is_empty() {
            return Ok(());
        }

        let expected = self
            .format
            .as_ref()
            .map(|f| vizcast_frame::yuv::i420_len(f.width, f.height))
            .unwrap_or_default();
        if sample.data.len() != expected {
            return Err(VizcastError::muxer(format!(
                "sample is {} bytes, frame size is {expected}",
                sample.data.len()
            )));
        }

        let writer = self.writer()?;
        writer.write_all(b"FRAME\n")?;
        writer.write_all(&sample.data)?;
        self.frames_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> VizcastResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            tracing::debug!(
                path = %self.path.display(),
                frames = self.frames_written,
                "Y4M muxer stopped"
            );
        }
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{SampleFlags, VideoTarget};

    fn format() -> OutputFormat {
        OutputFormat::raw_i420(&VideoTarget {
            width: 2,
            height: 2,
            bitrate: 1,
            fps: 20,
        })
    }

    fn sample(fill: u8) -> EncodedSample {
        EncodedSample {
            data: vec![fill; 6],
            pts_us: 0,
            flags: SampleFlags::default(),
        }
    }

    #[test]
    fn writes_header_and_frames() {
        let dir = std::env::temp_dir().join("vizcast_test_y4m");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clip.y4m");

        let mut muxer = Y4mMuxer::create(&path).unwrap();
        let track = muxer.add_track(&format()).unwrap();
        muxer.start().unwrap();
        muxer.write_sample(track, &sample(1)).unwrap();
        muxer.write_sample(track, &EncodedSample::end_of_stream(0)).unwrap();
        muxer.write_sample(track, &sample(2)).unwrap();
        muxer.stop().unwrap();
        muxer.stop().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let header = "YUV4MPEG2 W2 H2 F20:1 Ip A1:1 C420jpeg\n";
        assert!(bytes.starts_with(header.as_bytes()));
        assert_eq!(bytes.len(), header.len() + 2 * (6 + 6));
        assert_eq!(muxer.frames_written(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn enforces_call_order_and_single_track() {
        let dir = std::env::temp_dir().join("vizcast_test_y4m_order");
        std::fs::create_dir_all(&dir).unwrap();

        let mut muxer = Y4mMuxer::create(dir.join("clip.y4m")).unwrap();
        assert!(muxer.start().is_err());
        assert!(muxer.write_sample(0, &sample(0)).is_err());

        muxer.add_track(&format()).unwrap();
        assert!(muxer.add_track(&format()).is_err());
        muxer.start().unwrap();
        assert!(muxer.write_sample(1, &sample(0)).is_err());

        let mut h264 = format();
        h264.mime = crate::encoder::H264_MIME.to_string();
        let mut other = Y4mMuxer::create(dir.join("other.y4m")).unwrap();
        assert!(other.add_track(&h264).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
