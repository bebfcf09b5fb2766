//! Force-rotation decision engine.
//!
//! Pipeline: config-change signal -> allow-list refresh (background);
//! foreground notification -> dedup -> orientation decision on the carrier
//! thread -> conditional carrier update.

pub mod allow_list;
pub mod foreground;
pub mod overlay;
pub mod replay;
pub mod service;
pub mod sink;

pub use allow_list::AllowListStore;
pub use foreground::ForegroundTracker;
pub use overlay::{CarrierThread, OrientationOverlayController, OverlayHandle};
pub use service::{supervise, RotationService, ServiceDeps};
