//! Platform abstraction for the force-rotation engine.
//!
//! The engine consumes four host facilities, each behind a trait so the
//! platform binding and the in-memory doubles in [`memory`] are
//! interchangeable.

pub mod listeners;
pub mod memory;
pub mod settings;

use async_trait::async_trait;
use rotation_core::{AllowList, ForegroundNotification, OrientationMode, RotationResult};
use tokio::sync::mpsc::UnboundedSender;

pub use listeners::{ListenerId, ListenerRegistry};
pub use settings::{SettingsRequest, SettingsResponse, SettingsStore};

/// Source of the effective force-rotation package set.
///
/// A fetch may cross a process boundary and fail transiently.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch_effective_packages(&self) -> RotationResult<AllowList>;
}

/// Edge-triggered, payload-less signal fired whenever the selected package
/// set is written.
pub trait ConfigChangeChannel: Send + Sync {
    fn subscribe(&self, listener: UnboundedSender<()>) -> RotationResult<ListenerId>;
    fn unsubscribe(&self, id: ListenerId) -> RotationResult<()>;
}

/// Delivers one notification per foreground task transition.
///
/// Delivery is not trusted: duplicates and unresolved packages are expected.
pub trait ForegroundSource: Send + Sync {
    fn register(&self, listener: UnboundedSender<ForegroundNotification>)
        -> RotationResult<ListenerId>;
    fn unregister(&self, id: ListenerId) -> RotationResult<()>;
}

/// Opaque handle to a live overlay carrier.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CarrierHandle(pub u64);

/// Invisible overlay whose only job is to hold an orientation hint.
///
/// Every call happens on the carrier-owning thread, never concurrently.
pub trait OverlayCarrier: Send {
    fn create(&mut self, title: &str, mode: OrientationMode) -> RotationResult<CarrierHandle>;
    fn update(&mut self, handle: &CarrierHandle, mode: OrientationMode) -> RotationResult<()>;
    fn remove(&mut self, handle: CarrierHandle) -> RotationResult<()>;
}

/// Builds a fresh carrier for each service start.
pub trait CarrierFactory: Send + Sync {
    fn build(&self) -> Box<dyn OverlayCarrier>;
}
