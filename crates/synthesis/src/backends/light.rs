//! CPU-only compositing backend.
//!
//! Always available, so the router uses it as the fallback whenever another
//! variant cannot be initialized.

use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::Frame;

use crate::backend::SynthesisBackend;

pub struct LightweightBackend {
    /// Weight of the reference frame, clamped to [0.0, 1.0].
    weight: f32,
}

impl LightweightBackend {
    pub fn new(weight: f32) -> Self {
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self { weight }
    }
}

/// Blend `reference` (scaled to the live size) over `live`.
pub fn blend(live: &Frame, reference: &Frame, weight: f32) -> VizcastResult<Frame> {
    let reference = reference.resized(live.width(), live.height())?;
    if live.data().len() != reference.data().len() {
        return Err(VizcastError::backend("Blend inputs differ in size"));
    }

    let keep = 1.0 - weight;
    let data: Vec<u8> = live
        .data()
        .chunks_exact(4)
        .zip(reference.data().chunks_exact(4))
        .flat_map(|(l, r)| {
            let mix = |a: u8, b: u8| (a as f32 * keep + b as f32 * weight).round() as u8;
            [mix(l[0], r[0]), mix(l[1], r[1]), mix(l[2], r[2]), 255]
        })
        .collect();

    Frame::from_rgba(live.width(), live.height(), data)
}

#[async_trait::async_trait]
impl SynthesisBackend for LightweightBackend {
    fn name(&self) -> &str {
        "on-device"
    }

    async fn init(&mut self) -> VizcastResult<()> {
        tracing::debug!(weight = self.weight, "Lightweight backend ready");
        Ok(())
    }

    async fn process(&mut self, live: &Frame, reference: &Frame) -> VizcastResult<Option<Frame>> {
        blend(live, reference, self.weight).map(Some)
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_mixes_channels() {
        let live = Frame::solid(4, 4, [200, 0, 100, 255]).unwrap();
        let reference = Frame::solid(8, 8, [0, 200, 100, 255]).unwrap();
        let out = blend(&live, &reference, 0.5).unwrap();
        assert_eq!((out.width(), out.height()), (4, 4));
        assert_eq!(out.pixel(1, 1), Some([100, 100, 100, 255]));
    }

    #[test]
    fn weight_is_clamped() {
        assert_eq!(LightweightBackend::new(3.0).weight, 1.0);
        assert_eq!(LightweightBackend::new(f32::NAN).weight, 0.5);
    }

    #[tokio::test]
    async fn process_always_produces_a_frame() {
        let mut backend = LightweightBackend::new(0.0);
        backend.init().await.unwrap();
        let live = Frame::solid(4, 2, [9, 8, 7, 255]).unwrap();
        let reference = Frame::solid(2, 2, [0, 0, 0, 255]).unwrap();
        let out = backend.process(&live, &reference).await.unwrap().unwrap();
        assert_eq!(out, live);
    }
}
