//! Runtime configuration for the rotation service.

use crate::types::PackageId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default wait for the first allow-list refresh during start.
const DEFAULT_INITIAL_REFRESH_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables for one service instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long `start` waits for the first refresh before continuing
    /// best-effort. Zero means do not wait at all.
    pub initial_refresh_timeout: Duration,
    /// Name of the OS thread that owns the overlay carrier.
    pub carrier_thread_name: String,
    /// Window title given to the overlay carrier.
    pub overlay_title: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            initial_refresh_timeout: DEFAULT_INITIAL_REFRESH_TIMEOUT,
            carrier_thread_name: "overlay-carrier".into(),
            overlay_title: "ForceRotationOverlay".into(),
        }
    }
}

impl ServiceConfig {
    pub fn with_initial_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.initial_refresh_timeout = timeout;
        self
    }

    pub fn with_carrier_thread_name(mut self, name: impl Into<String>) -> Self {
        self.carrier_thread_name = name.into();
        self
    }

    pub fn with_overlay_title(mut self, title: impl Into<String>) -> Self {
        self.overlay_title = title.into();
        self
    }
}

/// Read-only package sets baked into the host image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPackages {
    /// Used when the user never made a selection.
    #[serde(default)]
    pub defaults: HashSet<PackageId>,
    /// Always included, regardless of selection.
    #[serde(default)]
    pub extras: HashSet<PackageId>,
}

impl PlatformPackages {
    pub fn new<D, E>(defaults: D, extras: E) -> Self
    where
        D: IntoIterator,
        D::Item: Into<PackageId>,
        E: IntoIterator,
        E::Item: Into<PackageId>,
    {
        Self {
            defaults: defaults.into_iter().map(Into::into).collect(),
            extras: extras.into_iter().map(Into::into).collect(),
        }
    }
}
