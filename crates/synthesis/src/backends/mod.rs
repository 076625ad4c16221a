//! Concrete synthesis backends.

pub mod accelerated;
pub mod light;
pub mod remote;

pub use accelerated::{AcceleratedBackend, Delegate, ModelRuntime, RuntimeFactory, TensorShape};
pub use light::LightweightBackend;
pub use remote::RemoteBackend;
