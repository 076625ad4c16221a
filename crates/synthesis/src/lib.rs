//! Vizcast Synthesis
//!
//! Turns live camera frames into synthesized frames and fans the results
//! out to sinks.
//!
//! # Architecture
//!
//! ```text
//! camera ──▶ LiveFeed ──(no reference)──────────────────▶ display
//!               │
//!               ▼ (live, reference)
//!         FrameDispatcher  (one task in flight, others dropped)
//!               │
//!               ▼
//!         BackendRouter ──▶ on-device | accelerated | remote | hybrid
//!               │
//!               ▼
//!        sinks: display, LatestFrameSlot (stream), recorder
//! ```

pub mod backend;
pub mod backends;
pub mod dispatcher;
pub mod live;
pub mod router;
pub mod stream;

pub use backend::{BackendFactory, BackendKind, DefaultBackendFactory, SynthesisBackend};
pub use dispatcher::{DispatchOptions, DispatchStatsSnapshot, FrameDispatcher, SubmitOutcome};
pub use live::{FeedOutcome, LiveFeed};
pub use router::{BackendRouter, SlotStatus};
pub use stream::LatestFrameSlot;
