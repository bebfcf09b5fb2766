//! Domain models, shared types, and error definitions.
//!
//! Foundation crate -- no async or I/O dependencies.

pub mod config;
pub mod error;
pub mod types;

pub use config::{PlatformPackages, ServiceConfig};
pub use error::{RotationError, RotationResult};
pub use types::{
    AllowList, ForegroundNotification, ForegroundState, OrientationMode, OverlayState, PackageId,
    ServiceState,
};
