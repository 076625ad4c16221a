//! Backend routing and fallback.
//!
//! The router owns one lazily built instance per backend variant, resolves
//! the active selection on every call, and composes the hybrid variant.
//! A variant whose `init` fails is marked unusable and the router falls
//! back to the always-available on-device variant.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use vizcast_common::config::BackendSettings;
use vizcast_common::error::VizcastResult;
use vizcast_frame::Frame;

use crate::backend::{BackendFactory, BackendKind, SynthesisBackend};

/// Lifecycle of one cached backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Not constructed yet.
    Unbuilt,
    /// Constructed and initialized.
    Ready,
    /// Initialization failed; calls fall back to the on-device variant.
    Unusable,
}

enum Slot {
    Ready(Box<dyn SynthesisBackend>),
    Unusable,
}

enum Attempt {
    Ran(VizcastResult<Option<Frame>>),
    Unusable,
}

struct RouterState {
    config: BackendSettings,
    slots: HashMap<BackendKind, Slot>,
    closed: bool,
}

impl RouterState {
    /// Build and initialize `kind` on first use. Returns whether it is ready.
    async fn ensure(&mut self, factory: &dyn BackendFactory, kind: BackendKind) -> bool {
        if !self.slots.contains_key(&kind) {
            let mut backend = factory.build(kind, &self.config);
            let slot = match backend.init().await {
                Ok(()) => {
                    tracing::info!(backend = %kind, name = backend.name(), "Backend initialized");
                    Slot::Ready(backend)
                }
                Err(e) => {
                    tracing::warn!(backend = %kind, error = %e, "Backend unusable, falling back");
                    backend.close().await;
                    Slot::Unusable
                }
            };
            self.slots.insert(kind, slot);
        }
        matches!(self.slots.get(&kind), Some(Slot::Ready(_)))
    }

    async fn run(
        &mut self,
        factory: &dyn BackendFactory,
        kind: BackendKind,
        live: &Frame,
        reference: &Frame,
    ) -> Attempt {
        if !self.ensure(factory, kind).await {
            return Attempt::Unusable;
        }
        match self.slots.get_mut(&kind) {
            Some(Slot::Ready(backend)) => Attempt::Ran(backend.process(live, reference).await),
            _ => Attempt::Unusable,
        }
    }

    async fn fallback(
        &mut self,
        factory: &dyn BackendFactory,
        live: &Frame,
        reference: &Frame,
    ) -> VizcastResult<Option<Frame>> {
        match self
            .run(factory, BackendKind::OnDeviceLight, live, reference)
            .await
        {
            Attempt::Ran(result) => result,
            Attempt::Unusable => {
                tracing::error!("Default on-device backend is unusable; no output");
                Ok(None)
            }
        }
    }

    async fn evict(&mut self, kind: BackendKind) {
        if let Some(Slot::Ready(mut backend)) = self.slots.remove(&kind) {
            backend.close().await;
            tracing::debug!(backend = %kind, "Backend released after config change");
        }
    }
}

/// Owns and selects synthesis backends.
///
/// Construct one per application and share it with `Arc`. Calls are
/// serialized internally; the dispatcher's single-in-flight policy means
/// that lock is uncontended in practice.
pub struct BackendRouter {
    factory: Arc<dyn BackendFactory>,
    state: Mutex<RouterState>,
}

impl BackendRouter {
    pub fn new(config: BackendSettings, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(RouterState {
                config,
                slots: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Variant the current configuration selects.
    pub async fn active_kind(&self) -> BackendKind {
        BackendKind::from_selection(&self.state.lock().await.config.selection)
    }

    /// Current configuration.
    pub async fn config(&self) -> BackendSettings {
        self.state.lock().await.config.clone()
    }

    /// Lifecycle of the cached `kind` instance.
    pub async fn slot_status(&self, kind: BackendKind) -> SlotStatus {
        match self.state.lock().await.slots.get(&kind) {
            None => SlotStatus::Unbuilt,
            Some(Slot::Ready(_)) => SlotStatus::Ready,
            Some(Slot::Unusable) => SlotStatus::Unusable,
        }
    }

    /// Replace the configuration. Takes effect on the next `process` call.
    ///
    /// Variants whose settings changed are released so they are rebuilt
    /// (or retried, if previously unusable) on next use.
    pub async fn set_config(&self, config: BackendSettings) {
        let mut state = self.state.lock().await;
        let old = &state.config;

        let mut stale = Vec::new();
        if old.remote_endpoint != config.remote_endpoint
            || old.remote_timeout_ms != config.remote_timeout_ms
        {
            stale.push(BackendKind::Remote);
        }
        if old.model_path != config.model_path {
            stale.push(BackendKind::OnDeviceAccelerated);
        }
        if old.blend_weight != config.blend_weight {
            stale.push(BackendKind::OnDeviceLight);
        }
        for kind in stale {
            state.evict(kind).await;
        }

        tracing::info!(
            selection = %config.selection,
            backend = %BackendKind::from_selection(&config.selection),
            "Backend configuration updated"
        );
        state.config = config;
    }

    /// One-time setup: build and initialize what the current selection
    /// needs so the first frame does not pay for it.
    ///
    /// Returns the variants that are ready.
    pub async fn prepare(&self) -> Vec<BackendKind> {
        let factory = self.factory.as_ref();
        let mut state = self.state.lock().await;
        if state.closed {
            return Vec::new();
        }

        let kind = BackendKind::from_selection(&state.config.selection);
        let mut ready = Vec::new();
        for &part in kind.components() {
            if state.ensure(factory, part).await {
                ready.push(part);
            }
        }
        if ready.is_empty() && state.ensure(factory, BackendKind::OnDeviceLight).await {
            ready.push(BackendKind::OnDeviceLight);
        }
        ready
    }

    /// Run the selected backend on a live/reference pair.
    pub async fn process(&self, live: &Frame, reference: &Frame) -> VizcastResult<Option<Frame>> {
        let factory = self.factory.as_ref();
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(None);
        }

        let kind = BackendKind::from_selection(&state.config.selection);
        if kind != BackendKind::Hybrid {
            return match state.run(factory, kind, live, reference).await {
                Attempt::Ran(result) => result,
                Attempt::Unusable => state.fallback(factory, live, reference).await,
            };
        }

        let mut attempted = false;
        for &part in kind.components() {
            match state.run(factory, part, live, reference).await {
                Attempt::Ran(Ok(Some(frame))) => return Ok(Some(frame)),
                Attempt::Ran(Ok(None)) => attempted = true,
                Attempt::Ran(Err(e)) => {
                    tracing::debug!(backend = %part, error = %e, "Hybrid stage failed");
                    attempted = true;
                }
                Attempt::Unusable => {}
            }
        }

        if attempted {
            Ok(None)
        } else {
            state.fallback(factory, live, reference).await
        }
    }

    /// Release every constructed backend. Later calls return no output.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        for (kind, slot) in state.slots.drain() {
            if let Slot::Ready(mut backend) = slot {
                backend.close().await;
                tracing::debug!(backend = %kind, "Backend closed");
            }
        }
        tracing::info!("Backend router closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
