//! The synthesis backend contract and backend selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use vizcast_common::config::BackendSettings;
use vizcast_common::error::VizcastResult;
use vizcast_frame::Frame;

use crate::backends::{AcceleratedBackend, LightweightBackend, RemoteBackend};

/// Abstract interface for an image-synthesis backend.
///
/// The router guarantees that at most one call is active on a backend at a
/// time, so implementations need not be reentrant.
#[async_trait::async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Load models, open delegates, build clients.
    async fn init(&mut self) -> VizcastResult<()>;

    /// Produce an output frame from a live frame guided by a reference frame.
    ///
    /// `Ok(None)` means the backend ran but had nothing to show (no face
    /// found, empty remote response).
    async fn process(&mut self, live: &Frame, reference: &Frame) -> VizcastResult<Option<Frame>>;

    /// Release everything `init` acquired.
    async fn close(&mut self);
}

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// CPU compositing, always available.
    OnDeviceLight,
    /// Model inference through a GPU/CPU runtime.
    OnDeviceAccelerated,
    /// HTTP inference service.
    Remote,
    /// Accelerated first, remote when that yields nothing.
    Hybrid,
}

const ACCELERATED_TOKENS: &[&str] = &["accelerated", "tflite", "gpu"];
const REMOTE_TOKENS: &[&str] = &["remote"];
/// Too short to match inside other words ("capital", "rapid").
const REMOTE_WORDS: &[&str] = &["api"];
const HYBRID_TOKENS: &[&str] = &["hybrid"];

impl BackendKind {
    /// Map a persisted selection string to a variant.
    ///
    /// Case-insensitive substring match, checked in the order
    /// accelerated, remote, hybrid; `api` must stand alone as a word.
    /// Anything unrecognised is the default on-device variant.
    pub fn from_selection(selection: &str) -> Self {
        let selection = selection.to_lowercase();
        let matches = |tokens: &[&str]| tokens.iter().any(|t| selection.contains(t));
        let has_word = |words: &[&str]| {
            selection
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| words.contains(&w))
        };

        if matches(ACCELERATED_TOKENS) {
            BackendKind::OnDeviceAccelerated
        } else if matches(REMOTE_TOKENS) || has_word(REMOTE_WORDS) {
            BackendKind::Remote
        } else if matches(HYBRID_TOKENS) {
            BackendKind::Hybrid
        } else {
            BackendKind::OnDeviceLight
        }
    }

    /// Variants that must be built to serve this selection.
    pub fn components(self) -> &'static [BackendKind] {
        match self {
            BackendKind::OnDeviceLight => &[BackendKind::OnDeviceLight],
            BackendKind::OnDeviceAccelerated => &[BackendKind::OnDeviceAccelerated],
            BackendKind::Remote => &[BackendKind::Remote],
            BackendKind::Hybrid => &[BackendKind::OnDeviceAccelerated, BackendKind::Remote],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BackendKind::OnDeviceLight => "on-device",
            BackendKind::OnDeviceAccelerated => "accelerated",
            BackendKind::Remote => "remote",
            BackendKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Builds concrete backends for the router.
///
/// `Hybrid` is never requested; the router composes it from the
/// accelerated and remote variants.
pub trait BackendFactory: Send + Sync {
    fn build(&self, kind: BackendKind, settings: &BackendSettings) -> Box<dyn SynthesisBackend>;
}

/// Factory for the backends shipped with Vizcast.
#[derive(Default)]
pub struct DefaultBackendFactory {
    runtimes: Option<std::sync::Arc<dyn crate::backends::RuntimeFactory>>,
}

impl DefaultBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `runtimes` to execute models for the accelerated backend.
    pub fn with_runtime_factory(
        runtimes: std::sync::Arc<dyn crate::backends::RuntimeFactory>,
    ) -> Self {
        Self {
            runtimes: Some(runtimes),
        }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn build(&self, kind: BackendKind, settings: &BackendSettings) -> Box<dyn SynthesisBackend> {
        match kind {
            BackendKind::OnDeviceAccelerated => Box::new(AcceleratedBackend::new(
                settings.model_path.clone(),
                self.runtimes.clone(),
            )),
            BackendKind::Remote => Box::new(RemoteBackend::new(
                settings.remote_endpoint.clone(),
                std::time::Duration::from_millis(settings.remote_timeout_ms),
            )),
            BackendKind::OnDeviceLight | BackendKind::Hybrid => {
                Box::new(LightweightBackend::new(settings.blend_weight))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_tokens_map_to_variants() {
        assert_eq!(
            BackendKind::from_selection("TFLite (GPU)"),
            BackendKind::OnDeviceAccelerated
        );
        assert_eq!(
            BackendKind::from_selection("Accelerated"),
            BackendKind::OnDeviceAccelerated
        );
        assert_eq!(BackendKind::from_selection("Remote API"), BackendKind::Remote);
        assert_eq!(BackendKind::from_selection("HYBRID"), BackendKind::Hybrid);
        assert_eq!(
            BackendKind::from_selection("MLKit (on-device)"),
            BackendKind::OnDeviceLight
        );
        assert_eq!(BackendKind::from_selection(""), BackendKind::OnDeviceLight);
    }

    #[test]
    fn accelerated_wins_over_later_tokens() {
        // "Hybrid (TFLite + Remote)" names every token; the first check wins.
        assert_eq!(
            BackendKind::from_selection("Hybrid (TFLite + Remote)"),
            BackendKind::OnDeviceAccelerated
        );
        assert_eq!(
            BackendKind::from_selection("remote hybrid"),
            BackendKind::Remote
        );
    }

    #[test]
    fn api_token_must_stand_alone() {
        assert_eq!(
            BackendKind::from_selection("Rapid on-device"),
            BackendKind::OnDeviceLight
        );
        assert_eq!(BackendKind::from_selection("Capital"), BackendKind::OnDeviceLight);
        assert_eq!(
            BackendKind::from_selection("GPU-accelerated"),
            BackendKind::OnDeviceAccelerated
        );
        assert_eq!(BackendKind::from_selection("api"), BackendKind::Remote);
    }

    #[test]
    fn hybrid_components() {
        assert_eq!(
            BackendKind::Hybrid.components(),
            &[BackendKind::OnDeviceAccelerated, BackendKind::Remote]
        );
        assert_eq!(BackendKind::Remote.to_string(), "remote");
    }

    proptest::proptest! {
        #[test]
        fn selection_is_case_insensitive(s in "[a-zA-Z ()+]{0,24}") {
            proptest::prop_assert_eq!(
                BackendKind::from_selection(&s),
                BackendKind::from_selection(&s.to_uppercase())
            );
        }

        #[test]
        fn unknown_text_falls_back_to_on_device(s in "[bcdfjkmoqsuvwxz ]{0,24}") {
            proptest::prop_assert_eq!(BackendKind::from_selection(&s), BackendKind::OnDeviceLight);
        }
    }
}
