//! Service lifecycle: wires the store, tracker, and overlay together.
//!
//! ```ignore
//! let mut service = RotationService::new(deps, ServiceConfig::default());
//! service.start().await?;
//! // ... runs until ...
//! service.stop().await?;
//! ```
//!
//! Every start builds fresh state; nothing survives a stop.

use crate::allow_list::AllowListStore;
use crate::foreground::{forward_foreground_events, ForegroundTracker};
use crate::overlay::{CarrierThread, OrientationOverlayController, OverlayHandle};
use rotation_core::{
    AllowList, ForegroundState, OverlayState, RotationError, RotationResult, ServiceConfig,
    ServiceState,
};
use rotation_provider::{
    CarrierFactory, ConfigChangeChannel, ConfigSource, ForegroundSource, ListenerId,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Host facilities the service consumes.
#[derive(Clone)]
pub struct ServiceDeps {
    pub config_source: Arc<dyn ConfigSource>,
    pub config_changes: Arc<dyn ConfigChangeChannel>,
    pub foreground: Arc<dyn ForegroundSource>,
    pub carriers: Arc<dyn CarrierFactory>,
}

/// Everything that exists only between start and stop.
struct Running {
    cancel: CancellationToken,
    tasks: TaskTracker,
    store: Arc<AllowListStore>,
    tracker: Arc<Mutex<ForegroundTracker>>,
    carrier: CarrierThread,
    overlay: OverlayHandle,
    config_listener: Option<ListenerId>,
    foreground_listener: Option<ListenerId>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct RotationService {
    deps: ServiceDeps,
    config: ServiceConfig,
    state: ServiceState,
    running: Option<Running>,
}

impl RotationService {
    pub fn new(deps: ServiceDeps, config: ServiceConfig) -> Self {
        Self {
            deps,
            config,
            state: ServiceState::Stopped,
            running: None,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    fn transition(&mut self, next: ServiceState) -> RotationResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(RotationError::InvalidState(format!(
                "cannot go from {:?} to {next:?}",
                self.state
            )));
        }
        tracing::info!(from = ?self.state, to = ?next, "service state");
        self.state = next;
        Ok(())
    }

    /// Attaches the overlay, loads the allow-list, then subscribes to config
    /// changes and foreground changes. Only fails if called while not
    /// stopped or if the carrier thread cannot be spawned; every other
    /// failure is logged and the service runs degraded.
    pub async fn start(&mut self) -> RotationResult<()> {
        self.transition(ServiceState::Starting)?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let store = Arc::new(AllowListStore::new(
            self.deps.config_source.clone(),
            cancel.clone(),
        ));

        let controller = OrientationOverlayController::new(
            self.deps.carriers.build(),
            store.clone(),
            self.config.overlay_title.clone(),
        );
        let carrier = match CarrierThread::spawn(&self.config.carrier_thread_name, controller) {
            Ok(carrier) => carrier,
            Err(e) => {
                self.state = ServiceState::Stopped;
                return Err(e);
            }
        };
        let overlay = carrier.handle();

        // 1. Overlay first so the first decision can take effect.
        match overlay.attach().await {
            Ok(state) if state.attached => {}
            Ok(_) => tracing::warn!("running without overlay; orientation will not be overridden"),
            Err(e) => tracing::warn!(error = %e, "overlay attach request failed"),
        }

        // 2. Initial allow-list.
        self.initial_refresh(&store, &tasks).await;

        // 3. Config changes.
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let config_listener = match self.deps.config_changes.subscribe(change_tx) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "config-change subscription failed; allow-list will not follow settings");
                None
            }
        };
        if config_listener.is_some() {
            tasks.spawn(forward_config_changes(
                change_rx,
                store.clone(),
                tasks.clone(),
                cancel.clone(),
            ));
        }

        // 4. Foreground changes.
        let tracker = Arc::new(Mutex::new(ForegroundTracker::new()));
        let (fg_tx, fg_rx) = mpsc::unbounded_channel();
        let foreground_listener = match self.deps.foreground.register(fg_tx) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "foreground listener registration failed; orientation will not follow apps");
                None
            }
        };
        if foreground_listener.is_some() {
            let overlay = overlay.clone();
            tasks.spawn(forward_foreground_events(
                fg_rx,
                tracker.clone(),
                cancel.clone(),
                move |pkg| overlay.foreground_changed(pkg),
            ));
        }

        self.running = Some(Running {
            cancel,
            tasks,
            store,
            tracker,
            carrier,
            overlay,
            config_listener,
            foreground_listener,
        });
        self.transition(ServiceState::Running)
    }

    async fn initial_refresh(&self, store: &Arc<AllowListStore>, tasks: &TaskTracker) {
        let timeout = self.config.initial_refresh_timeout;
        if timeout.is_zero() {
            spawn_refresh(tasks, store.clone());
            return;
        }

        match tokio::time::timeout(timeout, store.refresh()).await {
            Ok(Ok(count)) => tracing::info!(packages = count, "allow-list loaded"),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "initial allow-list refresh failed; starting empty")
            }
            Err(_) => {
                tracing::warn!(
                    ?timeout,
                    "initial allow-list refresh timed out; continuing in background"
                );
                spawn_refresh(tasks, store.clone());
            }
        }
    }

    /// Unregisters both listeners, detaches the overlay, and cancels
    /// outstanding refreshes, in that order. Each step is best-effort.
    pub async fn stop(&mut self) -> RotationResult<()> {
        self.transition(ServiceState::Stopping)?;

        if let Some(mut running) = self.running.take() {
            if let Some(id) = running.foreground_listener.take() {
                if let Err(e) = self.deps.foreground.unregister(id) {
                    tracing::warn!(error = %e, "failed to unregister foreground listener");
                }
            }

            if let Some(id) = running.config_listener.take() {
                if let Err(e) = self.deps.config_changes.unsubscribe(id) {
                    tracing::warn!(error = %e, "failed to unsubscribe from config changes");
                }
            }

            if let Err(e) = running.overlay.detach().await {
                tracing::warn!(error = %e, "overlay detach request failed");
            }

            running.store.close();
            running.tasks.close();
            running.tasks.wait().await;

            if let Err(e) = running.carrier.shutdown().await {
                tracing::warn!(error = %e, "carrier thread did not shut down cleanly");
            }
        }

        self.transition(ServiceState::Stopped)
    }

    /// Starts or stops to match the enabled setting. No-op if already there.
    pub async fn apply_enabled(&mut self, enabled: bool) -> RotationResult<()> {
        match (enabled, self.state) {
            (true, ServiceState::Stopped) => self.start().await,
            (false, ServiceState::Running) => self.stop().await,
            _ => Ok(()),
        }
    }

    /// Schedules a background refresh, as a config-change signal would.
    pub fn request_refresh(&self) -> RotationResult<()> {
        let running = self.running()?;
        spawn_refresh(&running.tasks, running.store.clone());
        Ok(())
    }

    fn running(&self) -> RotationResult<&Running> {
        self.running
            .as_ref()
            .ok_or_else(|| RotationError::InvalidState(format!("service is {:?}", self.state)))
    }

    /// Snapshot of the current allow-list; `None` when not running.
    pub fn allow_list(&self) -> Option<AllowList> {
        self.running.as_ref().map(|r| r.store.snapshot())
    }

    /// Store handle for inspection; it keeps answering (empty) after stop.
    pub fn allow_list_store(&self) -> Option<Arc<AllowListStore>> {
        self.running.as_ref().map(|r| r.store.clone())
    }

    pub fn foreground_state(&self) -> Option<ForegroundState> {
        self.running
            .as_ref()
            .map(|r| lock_tracker(&r.tracker).state().clone())
    }

    /// Overlay state after every previously queued decision has run.
    pub async fn overlay_state(&self) -> RotationResult<OverlayState> {
        self.running()?.overlay.state().await
    }

    /// Waits until the tracker has seen `count` notifications, then until the
    /// carrier thread has drained the resulting decisions.
    pub async fn settle(&self, count: u64, timeout: Duration) -> RotationResult<OverlayState> {
        let running = self.running()?;
        let tracker = running.tracker.clone();

        tokio::time::timeout(timeout, async move {
            while lock_tracker(&tracker).observed() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .map_err(|_| {
            RotationError::Internal(format!("timed out waiting for {count} notifications"))
        })?;

        running.overlay.state().await
    }

    /// Transition events emitted since start.
    pub fn transitions(&self) -> u64 {
        self.running
            .as_ref()
            .map_or(0, |r| lock_tracker(&r.tracker).emitted())
    }
}

fn lock_tracker(tracker: &Mutex<ForegroundTracker>) -> std::sync::MutexGuard<'_, ForegroundTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_refresh(tasks: &TaskTracker, store: Arc<AllowListStore>) {
    tasks.spawn(async move {
        match store.refresh().await {
            Ok(count) => tracing::debug!(packages = count, "allow-list refresh done"),
            Err(RotationError::Cancelled) => tracing::debug!("allow-list refresh cancelled"),
            Err(e) => tracing::warn!(error = %e, "allow-list refresh failed; keeping previous list"),
        }
    });
}

async fn forward_config_changes(
    mut signals: mpsc::UnboundedReceiver<()>,
    store: Arc<AllowListStore>,
    tasks: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(()) => {
                    tracing::debug!("force-rotation package list changed");
                    spawn_refresh(&tasks, store.clone());
                }
                None => break,
            },
        }
    }
    tracing::debug!("config-change forwarding stopped");
}

/// Keeps `service` in step with the enabled flag until `cancel` fires or the
/// flag's sender goes away, then stops it.
pub async fn supervise(
    service: &mut RotationService,
    mut enabled: watch::Receiver<bool>,
    cancel: CancellationToken,
) -> RotationResult<()> {
    loop {
        let want = *enabled.borrow_and_update();
        if let Err(e) = service.apply_enabled(want).await {
            tracing::warn!(error = %e, enabled = want, "failed to apply enabled setting");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = enabled.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if service.state() == ServiceState::Running {
        service.stop().await?;
    }
    Ok(())
}
