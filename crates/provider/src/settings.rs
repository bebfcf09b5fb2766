//! Settings store: the producer side of the configuration source.
//!
//! Holds the enabled flag and the user's package selection as a small
//! key/value document, optionally persisted as JSON. Writes to the selection
//! fire the config-change channel; writes to the enabled flag are published
//! on a watch so a supervisor can start or stop the service.
//!
//! ```ignore
//! let settings = SettingsStore::open("settings.json", platform)?;
//! settings.set_packages(["com.example.game".into()])?;
//! let effective = settings.effective_packages();
//! ```

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::{ConfigChangeChannel, ConfigSource};
use async_trait::async_trait;
use rotation_core::{AllowList, PackageId, PlatformPackages, RotationError, RotationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

pub const METHOD_IS_CHECKED: &str = "isChecked";
pub const METHOD_ON_CHECKED_CHANGED: &str = "onCheckedChanged";
pub const METHOD_GET_FORCE_ROTATION_PACKAGES: &str = "getForceRotationPackages";

/// On-disk layout. A missing packages key means "never selected".
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(rename = "force_rotation_enabled", default)]
    enabled: bool,
    #[serde(
        rename = "force_rotation_packages",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    packages: Option<Vec<PackageId>>,
}

#[derive(Debug, Clone, Default)]
struct Values {
    enabled: bool,
    selected: Option<HashSet<PackageId>>,
}

impl Values {
    fn to_file(&self) -> SettingsFile {
        SettingsFile {
            enabled: self.enabled,
            packages: self.selected.as_ref().map(|set| {
                let mut v: Vec<PackageId> = set.iter().cloned().collect();
                v.sort();
                v
            }),
        }
    }
}

impl From<SettingsFile> for Values {
    fn from(file: SettingsFile) -> Self {
        Self {
            enabled: file.enabled,
            selected: file.packages.map(|v| v.into_iter().collect()),
        }
    }
}

struct Inner {
    values: Values,
    change_listeners: ListenerRegistry<()>,
}

pub struct SettingsStore {
    platform: PlatformPackages,
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
    enabled_tx: watch::Sender<bool>,
}

impl SettingsStore {
    /// Store with no backing file; everything starts at its default.
    pub fn in_memory(platform: PlatformPackages) -> Self {
        Self::with_values(platform, None, Values::default())
    }

    /// Loads `path` if it exists; a missing file yields defaults and is
    /// created on the first write.
    pub fn open(path: impl AsRef<Path>, platform: PlatformPackages) -> RotationResult<Self> {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let file: SettingsFile = serde_json::from_str(&text).map_err(|e| {
                    RotationError::Settings(format!("Failed to parse {}: {e}", path.display()))
                })?;
                Values::from(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Values::default(),
            Err(e) => {
                return Err(RotationError::Settings(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::debug!(path = %path.display(), enabled = values.enabled, "settings loaded");
        Ok(Self::with_values(platform, Some(path), values))
    }

    fn with_values(platform: PlatformPackages, path: Option<PathBuf>, values: Values) -> Self {
        let (enabled_tx, _) = watch::channel(values.enabled);
        Self {
            platform,
            path,
            inner: Mutex::new(Inner {
                values,
                change_listeners: ListenerRegistry::new(),
            }),
            enabled_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn platform(&self) -> &PlatformPackages {
        &self.platform
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().values.enabled
    }

    pub fn set_enabled(&self, enabled: bool) -> RotationResult<()> {
        tracing::debug!(enabled, "set_enabled");
        {
            let mut inner = self.lock();
            let mut next = inner.values.clone();
            next.enabled = enabled;
            self.persist(&next)?;
            inner.values = next;
        }
        self.enabled_tx.send_replace(enabled);
        Ok(())
    }

    /// Follows the enabled flag; the current value is visible immediately.
    pub fn watch_enabled(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }

    /// `None` until the user makes a selection.
    pub fn selected_packages(&self) -> Option<HashSet<PackageId>> {
        self.lock().values.selected.clone()
    }

    pub fn set_packages<I>(&self, packages: I) -> RotationResult<()>
    where
        I: IntoIterator<Item = PackageId>,
    {
        self.write_selection(Some(packages.into_iter().collect()))
    }

    /// Forgets the selection so the platform defaults apply again.
    pub fn clear_packages(&self) -> RotationResult<()> {
        self.write_selection(None)
    }

    fn write_selection(&self, selected: Option<HashSet<PackageId>>) -> RotationResult<()> {
        let mut inner = self.lock();
        let mut next = inner.values.clone();
        next.selected = selected;
        self.persist(&next)?;
        inner.values = next;

        let notified = inner.change_listeners.broadcast(());
        tracing::debug!(
            selected = inner.values.selected.as_ref().map(HashSet::len),
            notified,
            "package selection changed"
        );
        Ok(())
    }

    /// `(selected or defaults) ∪ extras`.
    pub fn effective_packages(&self) -> AllowList {
        let inner = self.lock();
        AllowList::effective(
            inner.values.selected.as_ref(),
            &self.platform.defaults,
            &self.platform.extras,
        )
    }

    /// Request/response surface exposed to other processes.
    pub fn call(&self, request: SettingsRequest) -> RotationResult<SettingsResponse> {
        tracing::debug!(?request, "settings call");
        match request {
            SettingsRequest::IsChecked => Ok(SettingsResponse::Checked(self.is_enabled())),
            SettingsRequest::OnCheckedChanged { checked } => {
                self.set_enabled(checked)?;
                Ok(SettingsResponse::Ack)
            }
            SettingsRequest::GetForceRotationPackages => {
                Ok(SettingsResponse::Packages(self.effective_packages().sorted()))
            }
        }
    }

    fn persist(&self, values: &Values) -> RotationResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&values.to_file())
            .map_err(|e| RotationError::Settings(format!("Failed to encode settings: {e}")))?;

        // Write-then-rename so readers never observe a torn file.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| {
            RotationError::Settings(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, path).map_err(|e| {
            RotationError::Settings(format!("Failed to replace {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for SettingsStore {
    async fn fetch_effective_packages(&self) -> RotationResult<AllowList> {
        Ok(self.effective_packages())
    }
}

impl ConfigChangeChannel for SettingsStore {
    fn subscribe(&self, listener: UnboundedSender<()>) -> RotationResult<ListenerId> {
        Ok(self.lock().change_listeners.insert(listener))
    }

    fn unsubscribe(&self, id: ListenerId) -> RotationResult<()> {
        if self.lock().change_listeners.remove(id) {
            Ok(())
        } else {
            Err(RotationError::Registration(format!(
                "config-change listener {id} is not subscribed"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Call surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum SettingsRequest {
    IsChecked,
    OnCheckedChanged { checked: bool },
    GetForceRotationPackages,
}

impl SettingsRequest {
    /// Builds a request from a method name and its optional boolean extra.
    pub fn parse(method: &str, checked: Option<bool>) -> RotationResult<Self> {
        match method {
            METHOD_IS_CHECKED => Ok(Self::IsChecked),
            METHOD_ON_CHECKED_CHANGED => checked
                .map(|checked| Self::OnCheckedChanged { checked })
                .ok_or_else(|| {
                    RotationError::Settings(format!("{method} requires a checked state"))
                }),
            METHOD_GET_FORCE_ROTATION_PACKAGES => Ok(Self::GetForceRotationPackages),
            other => {
                tracing::warn!(method = other, "unsupported settings method");
                Err(RotationError::Settings(format!(
                    "Unsupported method: {other}"
                )))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsResponse {
    Checked(bool),
    Ack,
    Packages(Vec<PackageId>),
}
