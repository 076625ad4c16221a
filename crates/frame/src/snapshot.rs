//! Still snapshots of the output stream.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use vizcast_common::clock::{timestamped_file_name, unique_path};
use vizcast_common::error::{VizcastError, VizcastResult};

use crate::frame::{Frame, PixelFormat};

/// JPEG quality used for snapshots.
pub const SNAPSHOT_QUALITY: u8 = 90;

/// Save `frame` as a JPEG in `dir` with a timestamped name.
///
/// Returns the path written.
pub fn save_snapshot(frame: &Frame, dir: &Path) -> VizcastResult<PathBuf> {
    let name = timestamped_file_name("Vizcast_capture", "jpg");
    let path = unique_path(dir, &name);
    write_jpeg(frame, &path)?;
    tracing::info!(path = %path.display(), "Saved snapshot");
    Ok(path)
}

/// Encode `frame` as JPEG at `path`. The alpha channel is discarded.
pub fn write_jpeg(frame: &Frame, path: &Path) -> VizcastResult<()> {
    if frame.format() != PixelFormat::Rgba8 {
        return Err(VizcastError::frame("Snapshots require an RGBA frame"));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rgb: Vec<u8> = frame
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, SNAPSHOT_QUALITY)
        .encode(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| VizcastError::frame(format!("JPEG encoding failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_writes_jpeg() {
        let dir = std::env::temp_dir().join("vizcast_test_snapshot");
        let _ = std::fs::remove_dir_all(&dir);

        let frame = Frame::solid(16, 16, [40, 80, 120, 255]).unwrap();
        let path = save_snapshot(&frame, &dir).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("Vizcast_capture_"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
