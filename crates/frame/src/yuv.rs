//! RGBA to planar YUV 4:2:0 (I420) conversion.
//!
//! Uses the BT.601 studio-swing integer approximation. Chroma is taken from
//! the top-left pixel of every 2x2 block rather than averaged.

use vizcast_common::error::{VizcastError, VizcastResult};

use crate::frame::{Frame, PixelFormat};

/// Size of an I420 buffer for `width` x `height`.
pub fn i420_len(width: u32, height: u32) -> usize {
    PixelFormat::I420.buffer_len(width, height)
}

/// Dimensions actually encoded for a frame: rounded down to even.
pub fn even_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width & !1, height & !1)
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
pub fn luma(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

#[inline]
pub fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128)
}

#[inline]
pub fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128)
}

/// Convert an RGBA frame to I420 bytes (Y plane, U plane, V plane).
///
/// Odd dimensions are truncated to the next even size: the last column
/// and/or row is dropped. Frames smaller than 2x2 are rejected.
pub fn rgba_to_i420(frame: &Frame) -> VizcastResult<Vec<u8>> {
    if frame.format() != PixelFormat::Rgba8 {
        return Err(VizcastError::frame(format!(
            "Color conversion expects RGBA input, got {:?}",
            frame.format()
        )));
    }

    let (width, height) = even_dimensions(frame.width(), frame.height());
    if width == 0 || height == 0 {
        return Err(VizcastError::frame(format!(
            "Frame {}x{} is too small for 4:2:0 subsampling",
            frame.width(),
            frame.height()
        )));
    }
    if (width, height) != (frame.width(), frame.height()) {
        tracing::trace!(
            from_width = frame.width(),
            from_height = frame.height(),
            width,
            height,
            "Truncating odd frame dimensions"
        );
    }

    let src = frame.data();
    let stride = frame.width() as usize * 4;
    let w = width as usize;
    let h = height as usize;
    let frame_size = w * h;
    let quarter = frame_size / 4;

    let mut out = vec![0u8; frame_size + 2 * quarter];
    let (y_plane, chroma) = out.split_at_mut(frame_size);
    let (u_plane, v_plane) = chroma.split_at_mut(quarter);

    let mut y_index = 0;
    let mut c_index = 0;
    for row in 0..h {
        let line = &src[row * stride..row * stride + w * 4];
        for (col, px) in line.chunks_exact(4).enumerate() {
            let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
            y_plane[y_index] = luma(r, g, b);
            y_index += 1;
            if row % 2 == 0 && col % 2 == 0 {
                u_plane[c_index] = chroma_u(r, g, b);
                v_plane[c_index] = chroma_v(r, g, b);
                c_index += 1;
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn black_frame_is_studio_black() {
        let frame = Frame::solid(8, 6, [0, 0, 0, 255]).unwrap();
        let out = rgba_to_i420(&frame).unwrap();
        assert_eq!(out.len(), 8 * 6 + 2 * (8 * 6 / 4));

        let (y, chroma) = out.split_at(48);
        assert!(y.iter().all(|&v| v == 16));
        assert!(chroma.iter().all(|&v| v == 128));
    }

    #[test]
    fn white_frame_is_studio_white() {
        let frame = Frame::solid(4, 4, [255, 255, 255, 255]).unwrap();
        let out = rgba_to_i420(&frame).unwrap();
        assert!(out[..16].iter().all(|&v| v == 235));
        assert!(out[16..].iter().all(|&v| v == 128));
    }

    #[test]
    fn pure_red_chroma() {
        let frame = Frame::solid(2, 2, [255, 0, 0, 255]).unwrap();
        let out = rgba_to_i420(&frame).unwrap();
        // Y = ((66*255 + 128) >> 8) + 16 = 82
        assert_eq!(out[0], 82);
        // U = ((-38*255 + 128) >> 8) + 128 = 90
        assert_eq!(out[4], 90);
        // V = ((112*255 + 128) >> 8) + 128 = 240
        assert_eq!(out[5], 240);
    }

    #[test]
    fn chroma_comes_from_even_row_and_column() {
        // 2x2 block: top-left blue, everything else red.
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 255, 255]);
        data.extend_from_slice(&[255, 0, 0, 255]);
        data.extend_from_slice(&[255, 0, 0, 255]);
        data.extend_from_slice(&[255, 0, 0, 255]);
        let frame = Frame::from_rgba(2, 2, data).unwrap();
        let out = rgba_to_i420(&frame).unwrap();
        assert_eq!(out[4], chroma_u(0, 0, 255));
        assert_eq!(out[5], chroma_v(0, 0, 255));
    }

    #[test]
    fn odd_dimensions_are_truncated() {
        let frame = Frame::solid(5, 3, [0, 0, 0, 255]).unwrap();
        let out = rgba_to_i420(&frame).unwrap();
        assert_eq!(out.len(), i420_len(4, 2));
    }

    #[test]
    fn tiny_and_yuv_frames_are_rejected() {
        let frame = Frame::solid(1, 1, [0, 0, 0, 255]).unwrap();
        assert!(rgba_to_i420(&frame).is_err());

        let yuv = Frame::new(2, 2, PixelFormat::I420, vec![0u8; 6]).unwrap();
        assert!(rgba_to_i420(&yuv).is_err());
    }

    proptest! {
        #[test]
        fn output_length_matches_formula(hw in 1u32..40, hh in 1u32..40) {
            let (w, h) = (hw * 2, hh * 2);
            let frame = Frame::solid(w, h, [12, 200, 99, 255]).unwrap();
            let out = rgba_to_i420(&frame).unwrap();
            let pixels = (w * h) as usize;
            prop_assert_eq!(out.len(), pixels + 2 * (pixels / 4));
        }

        #[test]
        fn luma_stays_in_studio_range(r in 0i32..=255, g in 0i32..=255, b in 0i32..=255) {
            let y = luma(r, g, b);
            prop_assert!((16..=235).contains(&y));
        }
    }
}
