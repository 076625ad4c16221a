//! HTTP inference backend.
//!
//! Frames are sent as base64 PNGs in a JSON body:
//!
//! ```text
//! POST <endpoint>
//! { "live": "<png>", "source": "<png>", "width": 640, "height": 480 }
//! ```
//!
//! The service answers `{ "image": "<png>" }`. A `204 No Content` response
//! or a missing/empty `image` field means "no result".

use std::io::Cursor;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::Frame;

use crate::backend::SynthesisBackend;

#[derive(Debug, Serialize)]
struct ProcessRequest {
    live: String,
    source: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    image: Option<String>,
}

pub struct RemoteBackend {
    endpoint: String,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl RemoteBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            client: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Encode an RGBA frame as base64 PNG.
pub fn encode_png_base64(frame: &Frame) -> VizcastResult<String> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            frame.data(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| VizcastError::backend(format!("PNG encoding failed: {e}")))?;
    Ok(general_purpose::STANDARD.encode(png))
}

/// Decode a base64 image (PNG or JPEG) into an RGBA frame.
pub fn decode_image_base64(encoded: &str) -> VizcastResult<Frame> {
    // Accept data URLs as well as bare base64.
    let payload = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| VizcastError::backend(format!("Invalid base64 image: {e}")))?;
    let image = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| VizcastError::backend(format!("Unreadable image: {e}")))?
        .decode()
        .map_err(|e| VizcastError::backend(format!("Image decoding failed: {e}")))?;
    Frame::from_rgba_image(image.to_rgba8())
}

#[async_trait::async_trait]
impl SynthesisBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    async fn init(&mut self) -> VizcastResult<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(VizcastError::config("Remote backend endpoint is not set"));
        }
        reqwest::Url::parse(endpoint).map_err(|e| {
            VizcastError::config(format!("Invalid remote endpoint {endpoint:?}: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| VizcastError::backend(format!("Failed to build HTTP client: {e}")))?;
        self.client = Some(client);
        tracing::info!(endpoint = %self.endpoint, "Remote backend ready");
        Ok(())
    }

    async fn process(&mut self, live: &Frame, reference: &Frame) -> VizcastResult<Option<Frame>> {
        let Some(client) = self.client.as_ref() else {
            return Ok(None);
        };

        let body = ProcessRequest {
            live: encode_png_base64(live)?,
            source: encode_png_base64(reference)?,
            width: live.width(),
            height: live.height(),
        };

        let response = client
            .post(self.endpoint.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| VizcastError::backend(format!("Remote request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VizcastError::backend(format!(
                "Remote backend returned {status}: {detail}"
            )));
        }

        let reply: ProcessResponse = response
            .json()
            .await
            .map_err(|e| VizcastError::backend(format!("Malformed remote response: {e}")))?;

        match reply.image.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => decode_image_base64(encoded).map(Some),
            _ => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_base64_roundtrip() {
        let frame = Frame::solid(6, 4, [1, 2, 3, 255]).unwrap();
        let encoded = encode_png_base64(&frame).unwrap();
        let decoded = decode_image_base64(&encoded).unwrap();
        assert_eq!(decoded, frame);

        let data_url = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_image_base64(&data_url).unwrap(), frame);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_image_base64("not base64!").is_err());
    }

    #[test]
    fn empty_image_field_parses() {
        let reply: ProcessResponse = serde_json::from_str("{}").unwrap();
        assert!(reply.image.is_none());
    }

    #[tokio::test]
    async fn init_requires_endpoint() {
        let mut backend = RemoteBackend::new("", Duration::from_secs(1));
        assert!(backend.init().await.is_err());

        let mut backend = RemoteBackend::new("not a url", Duration::from_secs(1));
        assert!(backend.init().await.is_err());

        let mut backend = RemoteBackend::new("http://127.0.0.1:9/reenact", Duration::from_secs(1));
        backend.init().await.unwrap();
        assert_eq!(backend.endpoint(), "http://127.0.0.1:9/reenact");
    }

    #[tokio::test]
    async fn unconnected_backend_yields_nothing() {
        let mut backend = RemoteBackend::new("http://127.0.0.1:9/", Duration::from_secs(1));
        let frame = Frame::solid(2, 2, [0, 0, 0, 255]).unwrap();
        assert!(backend.process(&frame, &frame).await.unwrap().is_none());
    }
}
