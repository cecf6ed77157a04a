//! Versioned Kubernetes manifest bundles and the controllers that keep
//! them applied.

pub mod builtin;
pub mod collector;
pub mod controller;
pub mod effective;
pub mod patches;
pub mod source;

pub use collector::{Collector, ResourceFilter, ResourceReport};
pub use controller::{
    ControllerError, ControllerSpec, Inputs, ManifestController, RenderContext,
};
pub use effective::{ConfigHash, EffectiveConfig};
pub use source::{FileManifestSource, ManifestError, ManifestSource};
