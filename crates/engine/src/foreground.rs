//! Foreground deduplication.
//!
//! The platform may report the same foreground package several times in a
//! row; only actual changes become transition events.

use rotation_core::{ForegroundNotification, ForegroundState, PackageId};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ForegroundTracker {
    state: ForegroundState,
    observed: u64,
    emitted: u64,
}

impl ForegroundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one notification. Returns the package if this is a transition.
    ///
    /// Notifications without a resolvable package, or naming the package of
    /// the last emitted transition, return `None`.
    pub fn observe(&mut self, notification: &ForegroundNotification) -> Option<PackageId> {
        self.observed += 1;

        let pkg = notification.top_package.as_ref()?;
        if self.state.previous_package.as_ref() == Some(pkg) {
            tracing::trace!(package = %pkg, "duplicate foreground notification");
            return None;
        }

        self.state.previous_package = Some(pkg.clone());
        self.state.current_package = Some(pkg.clone());
        self.emitted += 1;
        Some(pkg.clone())
    }

    pub fn state(&self) -> &ForegroundState {
        &self.state
    }

    /// Notifications seen, including ignored ones.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Transition events emitted.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Drains `notifications` through `tracker` in arrival order, calling
/// `on_transition` once per emitted event, until cancelled or the source
/// drops its sender.
pub async fn forward_foreground_events<F>(
    mut notifications: UnboundedReceiver<ForegroundNotification>,
    tracker: Arc<Mutex<ForegroundTracker>>,
    cancel: CancellationToken,
    mut on_transition: F,
) where
    F: FnMut(PackageId) + Send,
{
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            next = notifications.recv() => match next {
                Some(n) => n,
                None => break,
            },
        };

        // Forward while still holding the lock so `observed()` never runs
        // ahead of what has been handed on.
        {
            let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pkg) = tracker.observe(&notification) {
                tracing::debug!(package = %pkg, "foreground changed");
                on_transition(pkg);
            }
        }
    }
    tracing::debug!("foreground forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn feed(tracker: &mut ForegroundTracker, seq: &[&str]) -> Vec<PackageId> {
        seq.iter()
            .filter_map(|p| tracker.observe(&ForegroundNotification::package(*p)))
            .collect()
    }

    #[test]
    fn suppresses_consecutive_duplicates() {
        let mut tracker = ForegroundTracker::new();
        let events = feed(&mut tracker, &["A", "A", "B", "B", "B", "A"]);

        assert_eq!(
            events,
            vec![PackageId::from("A"), PackageId::from("B"), PackageId::from("A")]
        );
        assert_eq!(tracker.observed(), 6);
        assert_eq!(tracker.emitted(), 3);
    }

    #[test]
    fn unresolved_notifications_are_ignored() {
        let mut tracker = ForegroundTracker::new();
        assert!(tracker.observe(&ForegroundNotification::unresolved()).is_none());
        assert_eq!(tracker.state(), &ForegroundState::default());

        tracker.observe(&ForegroundNotification::package("A"));
        // An unresolved gap does not reset dedup state.
        assert!(tracker.observe(&ForegroundNotification::unresolved()).is_none());
        assert!(tracker.observe(&ForegroundNotification::package("A")).is_none());
        assert_eq!(
            tracker.state().current_package,
            Some(PackageId::from("A"))
        );
    }

    #[tokio::test]
    async fn forwarding_preserves_order_and_stops_on_close() {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Mutex::new(ForegroundTracker::new()));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(forward_foreground_events(
            rx,
            tracker.clone(),
            CancellationToken::new(),
            move |pkg| {
                let _ = out_tx.send(pkg);
            },
        ));

        for p in ["x", "y", "y", "z"] {
            tx.send(ForegroundNotification::package(p)).unwrap();
        }
        drop(tx);
        task.await.unwrap();

        let mut got = Vec::new();
        while let Ok(pkg) = out_rx.try_recv() {
            got.push(pkg.to_string());
        }
        assert_eq!(got, vec!["x", "y", "z"]);
        assert_eq!(tracker.lock().unwrap().observed(), 4);
    }

    #[tokio::test]
    async fn forwarding_stops_on_cancel() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward_foreground_events(
            rx,
            Arc::new(Mutex::new(ForegroundTracker::new())),
            cancel.clone(),
            |_| {},
        ));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("forwarder did not stop")
            .unwrap();
    }
}
