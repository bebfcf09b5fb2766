//! Orientation overlay control.
//!
//! [`OrientationOverlayController`] is the decision logic plus exclusive
//! ownership of the carrier. It is not `Sync` and is never shared: it lives on
//! a dedicated [`CarrierThread`] and is driven through an [`OverlayHandle`],
//! so carrier create/update/remove never overlap and always run on the
//! carrier-owning thread regardless of where the request came from.

use crate::allow_list::AllowListStore;
use rotation_core::{OrientationMode, OverlayState, PackageId, RotationError, RotationResult};
use rotation_provider::{CarrierHandle, OverlayCarrier};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct OrientationOverlayController {
    carrier: Box<dyn OverlayCarrier>,
    handle: Option<CarrierHandle>,
    state: OverlayState,
    allow_list: Arc<AllowListStore>,
    title: String,
}

impl OrientationOverlayController {
    pub fn new(
        carrier: Box<dyn OverlayCarrier>,
        allow_list: Arc<AllowListStore>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            carrier,
            handle: None,
            state: OverlayState::default(),
            allow_list,
            title: title.into(),
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Creates the carrier with the current applied mode.
    ///
    /// On failure the controller stays detached: decisions keep being
    /// computed but nothing is pushed. If a carrier survives from a failed
    /// update, it is brought back in sync with the applied mode, or replaced
    /// when it still rejects updates.
    pub fn attach(&mut self) {
        if self.state.attached {
            tracing::debug!("overlay already attached");
            return;
        }

        if let Some(handle) = self.handle.take() {
            match self.carrier.update(&handle, self.state.applied_mode) {
                Ok(()) => {
                    self.handle = Some(handle);
                    self.state.attached = true;
                    tracing::info!(mode = %self.state.applied_mode, "overlay resynced");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stale overlay rejected resync; recreating");
                    if let Err(e) = self.carrier.remove(handle) {
                        tracing::warn!(error = %e, "failed to remove stale overlay");
                    }
                }
            }
        }

        match self.carrier.create(&self.title, self.state.applied_mode) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state.attached = true;
                tracing::info!(mode = %self.state.applied_mode, "overlay attached");
            }
            Err(e) => {
                self.state.attached = false;
                tracing::warn!(error = %e, "failed to add overlay; orientation override inactive");
            }
        }
    }

    /// Applies the decision for a new foreground package.
    ///
    /// Returns the new mode if it differs from the applied one; `None` means
    /// nothing changed and the carrier was not touched.
    pub fn on_foreground_changed(&mut self, pkg: &PackageId) -> Option<OrientationMode> {
        // One membership read per event; later refreshes affect later events.
        let desired = OrientationMode::for_membership(self.allow_list.contains(pkg.as_str()));
        if desired == self.state.applied_mode {
            tracing::debug!(package = %pkg, mode = %desired, "orientation unchanged");
            return None;
        }

        tracing::info!(package = %pkg, mode = %desired, "orientation mode changed");
        self.state.applied_mode = desired;

        if self.state.attached {
            if let Some(handle) = self.handle.as_ref() {
                if let Err(e) = self.carrier.update(handle, desired) {
                    self.state.attached = false;
                    tracing::warn!(error = %e, "overlay update failed; treating overlay as detached");
                }
            }
        }
        Some(desired)
    }

    /// Removes the carrier if one was created. Safe to call repeatedly;
    /// always leaves the controller detached.
    pub fn detach(&mut self) {
        match self.handle.take() {
            Some(handle) => {
                if let Err(e) = self.carrier.remove(handle) {
                    tracing::warn!(error = %e, "failed to remove overlay");
                } else {
                    tracing::info!("overlay detached");
                }
            }
            None => tracing::debug!("overlay not attached; nothing to remove"),
        }
        self.state.attached = false;
    }
}

// ---------------------------------------------------------------------------
// Carrier thread
// ---------------------------------------------------------------------------

enum OverlayCommand {
    Attach(oneshot::Sender<OverlayState>),
    ForegroundChanged(PackageId),
    Detach(oneshot::Sender<OverlayState>),
    State(oneshot::Sender<OverlayState>),
    Shutdown,
}

/// Cloneable sender side of the carrier thread's queue.
///
/// Commands run strictly in the order they were posted.
#[derive(Clone)]
pub struct OverlayHandle {
    tx: mpsc::UnboundedSender<OverlayCommand>,
}

impl OverlayHandle {
    fn post(&self, cmd: OverlayCommand) -> RotationResult<()> {
        self.tx
            .send(cmd)
            .map_err(|_| RotationError::Internal("carrier thread has stopped".into()))
    }

    async fn request(
        &self,
        cmd: impl FnOnce(oneshot::Sender<OverlayState>) -> OverlayCommand,
    ) -> RotationResult<OverlayState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(cmd(reply_tx))?;
        reply_rx
            .await
            .map_err(|_| RotationError::Internal("carrier thread dropped the request".into()))
    }

    pub async fn attach(&self) -> RotationResult<OverlayState> {
        self.request(OverlayCommand::Attach).await
    }

    /// Fire-and-forget; the decision runs on the carrier thread.
    pub fn foreground_changed(&self, pkg: PackageId) {
        if self.post(OverlayCommand::ForegroundChanged(pkg)).is_err() {
            tracing::debug!("carrier thread gone; dropping foreground event");
        }
    }

    pub async fn detach(&self) -> RotationResult<OverlayState> {
        self.request(OverlayCommand::Detach).await
    }

    /// Current state, after every previously posted command has run.
    pub async fn state(&self) -> RotationResult<OverlayState> {
        self.request(OverlayCommand::State).await
    }
}

/// OS thread that owns an [`OrientationOverlayController`].
pub struct CarrierThread {
    handle: OverlayHandle,
    join: Option<JoinHandle<()>>,
}

impl CarrierThread {
    pub fn spawn(name: &str, controller: OrientationOverlayController) -> RotationResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut controller = controller;
                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        OverlayCommand::Attach(reply) => {
                            controller.attach();
                            let _ = reply.send(controller.state());
                        }
                        OverlayCommand::ForegroundChanged(pkg) => {
                            controller.on_foreground_changed(&pkg);
                        }
                        OverlayCommand::Detach(reply) => {
                            controller.detach();
                            let _ = reply.send(controller.state());
                        }
                        OverlayCommand::State(reply) => {
                            let _ = reply.send(controller.state());
                        }
                        OverlayCommand::Shutdown => break,
                    }
                }
                // Never leave a carrier behind.
                controller.detach();
                tracing::debug!("carrier thread exiting");
            })
            .map_err(|e| RotationError::Internal(format!("failed to spawn carrier thread: {e}")))?;

        Ok(Self {
            handle: OverlayHandle { tx },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> OverlayHandle {
        self.handle.clone()
    }

    /// Stops the thread after draining already-posted commands and waits for it.
    pub async fn shutdown(&mut self) -> RotationResult<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let _ = self.handle.post(OverlayCommand::Shutdown);

        tokio::task::spawn_blocking(move || join.join())
            .await
            .map_err(|e| RotationError::Internal(format!("carrier join task failed: {e}")))?
            .map_err(|_| RotationError::Internal("carrier thread panicked".into()))
    }
}

impl Drop for CarrierThread {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.handle.post(OverlayCommand::Shutdown);
        }
    }
}
