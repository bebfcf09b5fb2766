//! Domain types for the force-rotation service.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

/// Opaque identifier of an installed application.
///
/// Equality is exact string match; nothing is normalized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for PackageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Set of packages for which free rotation is forced.
///
/// Always built wholesale via [`AllowList::effective`]; never merged into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(HashSet<PackageId>);

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(selected, or defaults if nothing was ever selected) ∪ extras`.
    ///
    /// `selected == Some(empty)` is an explicit empty selection and does not
    /// fall back to the defaults.
    pub fn effective<'a>(
        selected: Option<&'a HashSet<PackageId>>,
        defaults: &'a HashSet<PackageId>,
        extras: &'a HashSet<PackageId>,
    ) -> Self {
        let base = selected.unwrap_or(defaults);
        Self(base.union(extras).cloned().collect())
    }

    pub fn contains(&self, pkg: &str) -> bool {
        self.0.contains(pkg)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageId> {
        self.0.iter()
    }

    /// Sorted copy, for stable logging and serialization.
    pub fn sorted(&self) -> Vec<PackageId> {
        let mut v: Vec<PackageId> = self.0.iter().cloned().collect();
        v.sort();
        v
    }
}

impl FromIterator<PackageId> for AllowList {
    fn from_iter<I: IntoIterator<Item = PackageId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for AllowList {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(PackageId::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Foreground
// ---------------------------------------------------------------------------

/// One delivery from the foreground-change source.
///
/// `top_package` is `None` when the topmost activity has no resolvable package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundNotification {
    pub top_package: Option<PackageId>,
}

impl ForegroundNotification {
    pub fn package(pkg: impl Into<PackageId>) -> Self {
        Self {
            top_package: Some(pkg.into()),
        }
    }

    pub fn unresolved() -> Self {
        Self { top_package: None }
    }
}

/// Deduplication state owned by the foreground tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundState {
    pub current_package: Option<PackageId>,
    /// Last package a transition was emitted for.
    pub previous_package: Option<PackageId>,
}

// ---------------------------------------------------------------------------
// Orientation
// ---------------------------------------------------------------------------

/// Orientation hint carried by the overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrientationMode {
    /// Rotate freely, ignoring the app's own lock.
    Unconstrained,
    /// Defer to the platform's orientation policy for the app.
    #[default]
    PlatformDefault,
}

impl OrientationMode {
    #[inline]
    pub fn for_membership(allowed: bool) -> Self {
        if allowed {
            Self::Unconstrained
        } else {
            Self::PlatformDefault
        }
    }
}

impl fmt::Display for OrientationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconstrained => f.write_str("unconstrained"),
            Self::PlatformDefault => f.write_str("platform-default"),
        }
    }
}

/// Controller-owned view of the carrier.
///
/// `applied_mode` is tracked even while detached so that a redundant push is
/// never issued once the carrier is back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverlayState {
    pub attached: bool,
    pub applied_mode: OrientationMode,
}

// ---------------------------------------------------------------------------
// Service lifecycle
// ---------------------------------------------------------------------------

/// `Stopped → Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<PackageId> {
        items.iter().map(|s| PackageId::from(*s)).collect()
    }

    #[test]
    fn effective_uses_selection_plus_extras() {
        let selected = set(&["com.game.a", "com.video.b"]);
        let defaults = set(&["com.default"]);
        let extras = set(&["com.extra"]);

        let list = AllowList::effective(Some(&selected), &defaults, &extras);

        assert_eq!(list.len(), 3);
        assert!(list.contains("com.game.a"));
        assert!(list.contains("com.extra"));
        assert!(!list.contains("com.default"));
    }

    #[test]
    fn effective_falls_back_to_defaults_when_never_selected() {
        let defaults = set(&["com.default"]);
        let extras = set(&["com.extra"]);

        let list = AllowList::effective(None, &defaults, &extras);

        assert_eq!(
            list.sorted(),
            vec![PackageId::from("com.default"), PackageId::from("com.extra")]
        );
    }

    #[test]
    fn extras_survive_an_explicit_empty_selection() {
        let empty = HashSet::new();
        let defaults = set(&["com.default"]);
        let extras = set(&["com.extra"]);

        let list = AllowList::effective(Some(&empty), &defaults, &extras);

        assert_eq!(list.sorted(), vec![PackageId::from("com.extra")]);
    }

    #[test]
    fn duplicates_collapse() {
        let list: AllowList = ["a", "a", "b"].into_iter().collect();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn package_match_is_exact() {
        let list: AllowList = ["com.Example.App"].into_iter().collect();
        assert!(!list.contains("com.example.app"));
        assert!(!list.contains("com.Example.App "));
    }

    #[test]
    fn membership_maps_to_mode() {
        assert_eq!(
            OrientationMode::for_membership(true),
            OrientationMode::Unconstrained
        );
        assert_eq!(
            OrientationMode::for_membership(false),
            OrientationMode::PlatformDefault
        );
        assert_eq!(OverlayState::default().applied_mode, OrientationMode::PlatformDefault);
    }

    #[test]
    fn lifecycle_transitions() {
        use ServiceState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Stopping));
    }
}
