//! In-process platform doubles.
//!
//! Used by the replay harness and by tests. Each double can be told to fail
//! so every degraded path of the engine is reachable without a device.

use crate::listeners::{ListenerId, ListenerRegistry};
use crate::{
    CarrierFactory, CarrierHandle, ConfigChangeChannel, ConfigSource, ForegroundSource,
    OverlayCarrier,
};
use async_trait::async_trait;
use rotation_core::{
    AllowList, ForegroundNotification, OrientationMode, RotationError, RotationResult,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Notification sources
// ---------------------------------------------------------------------------

/// Listener set whose register/unregister calls can be made to fail.
#[derive(Debug)]
struct FallibleListeners<T> {
    registry: Mutex<ListenerRegistry<T>>,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
    unregister_calls: AtomicUsize,
}

impl<T: Clone> Default for FallibleListeners<T> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(ListenerRegistry::new()),
            fail_register: AtomicBool::new(false),
            fail_unregister: AtomicBool::new(false),
            unregister_calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> FallibleListeners<T> {
    fn register(&self, what: &str, listener: UnboundedSender<T>) -> RotationResult<ListenerId> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(RotationError::Registration(format!(
                "{what} registration rejected"
            )));
        }
        Ok(lock(&self.registry).insert(listener))
    }

    fn unregister(&self, what: &str, id: ListenerId) -> RotationResult<()> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(RotationError::Registration(format!(
                "{what} unregistration rejected"
            )));
        }
        if lock(&self.registry).remove(id) {
            Ok(())
        } else {
            Err(RotationError::Registration(format!(
                "{what} listener {id} is not registered"
            )))
        }
    }

    fn broadcast(&self, value: T) -> usize {
        lock(&self.registry).broadcast(value)
    }

    fn len(&self) -> usize {
        lock(&self.registry).len()
    }
}

/// Foreground source driven by hand: every [`emit`](Self::emit) is delivered
/// to all registered listeners in call order.
#[derive(Debug, Default)]
pub struct ManualForegroundSource {
    listeners: FallibleListeners<ForegroundNotification>,
}

impl ManualForegroundSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many listeners received the notification.
    pub fn emit(&self, notification: ForegroundNotification) -> usize {
        self.listeners.broadcast(notification)
    }

    pub fn emit_package(&self, pkg: &str) -> usize {
        self.emit(ForegroundNotification::package(pkg))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn unregister_calls(&self) -> usize {
        self.listeners.unregister_calls.load(Ordering::SeqCst)
    }

    pub fn fail_registration(&self, fail: bool) {
        self.listeners.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregistration(&self, fail: bool) {
        self.listeners.fail_unregister.store(fail, Ordering::SeqCst);
    }
}

impl ForegroundSource for ManualForegroundSource {
    fn register(
        &self,
        listener: UnboundedSender<ForegroundNotification>,
    ) -> RotationResult<ListenerId> {
        self.listeners.register("foreground", listener)
    }

    fn unregister(&self, id: ListenerId) -> RotationResult<()> {
        self.listeners.unregister("foreground", id)
    }
}

/// Config-change channel fired by hand.
#[derive(Debug, Default)]
pub struct ManualChangeChannel {
    listeners: FallibleListeners<()>,
}

impl ManualChangeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) -> usize {
        self.listeners.broadcast(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn unregister_calls(&self) -> usize {
        self.listeners.unregister_calls.load(Ordering::SeqCst)
    }

    pub fn fail_registration(&self, fail: bool) {
        self.listeners.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unregistration(&self, fail: bool) {
        self.listeners.fail_unregister.store(fail, Ordering::SeqCst);
    }
}

impl ConfigChangeChannel for ManualChangeChannel {
    fn subscribe(&self, listener: UnboundedSender<()>) -> RotationResult<ListenerId> {
        self.listeners.register("config-change", listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> RotationResult<()> {
        self.listeners.unregister("config-change", id)
    }
}

// ---------------------------------------------------------------------------
// Configuration source
// ---------------------------------------------------------------------------

/// Configuration source returning a settable set, with failure injection and
/// a gate that holds fetches in flight until released.
///
/// A fetch returns the set as it was when the fetch started, like a reply
/// computed remotely and delivered late.
#[derive(Debug)]
pub struct ScriptedConfigSource {
    packages: Mutex<AllowList>,
    failing: AtomicBool,
    fetches_started: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for ScriptedConfigSource {
    fn default() -> Self {
        Self::new(AllowList::new())
    }
}

impl ScriptedConfigSource {
    pub fn new(packages: AllowList) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            packages: Mutex::new(packages),
            failing: AtomicBool::new(false),
            fetches_started: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn set_packages(&self, packages: AllowList) {
        *lock(&self.packages) = packages;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Holds every subsequent fetch until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetches_started(&self) -> usize {
        self.fetches_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSource for ScriptedConfigSource {
    async fn fetch_effective_packages(&self) -> RotationResult<AllowList> {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);
        let packages = lock(&self.packages).clone();

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| RotationError::Fetch("configuration source went away".into()))?;

        if self.failing.load(Ordering::SeqCst) {
            return Err(RotationError::Fetch("cross-process call failed".into()));
        }
        Ok(packages)
    }
}

// ---------------------------------------------------------------------------
// Overlay carrier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierOpKind {
    Create,
    Update,
    Remove,
}

/// One carrier call as observed by [`RecordingCarrier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarrierOp {
    pub seq: usize,
    pub kind: CarrierOpKind,
    pub mode: Option<OrientationMode>,
    pub ok: bool,
    /// Name of the thread the call ran on.
    pub thread: Option<String>,
}

#[derive(Debug, Default)]
struct CarrierScript {
    ops: Vec<CarrierOp>,
    fail_create: bool,
    fail_update: bool,
    fail_remove: bool,
    next_handle: u64,
    live: Option<u64>,
}

/// Shared, cloneable record of every call made to carriers built by a
/// [`RecordingCarrierFactory`].
#[derive(Debug, Clone, Default)]
pub struct CarrierLog {
    script: Arc<Mutex<CarrierScript>>,
}

impl CarrierLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<CarrierOp> {
        lock(&self.script).ops.clone()
    }

    /// Modes passed to `update`, including failed attempts.
    pub fn updates(&self) -> Vec<OrientationMode> {
        lock(&self.script)
            .ops
            .iter()
            .filter(|op| op.kind == CarrierOpKind::Update)
            .filter_map(|op| op.mode)
            .collect()
    }

    pub fn count(&self, kind: CarrierOpKind) -> usize {
        lock(&self.script)
            .ops
            .iter()
            .filter(|op| op.kind == kind)
            .count()
    }

    /// Whether a created carrier is currently live (created and not removed).
    pub fn is_live(&self) -> bool {
        lock(&self.script).live.is_some()
    }

    pub fn fail_create(&self, fail: bool) {
        lock(&self.script).fail_create = fail;
    }

    pub fn fail_update(&self, fail: bool) {
        lock(&self.script).fail_update = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        lock(&self.script).fail_remove = fail;
    }

    fn record(&self, kind: CarrierOpKind, mode: Option<OrientationMode>, ok: bool) {
        let mut script = lock(&self.script);
        let seq = script.ops.len();
        script.ops.push(CarrierOp {
            seq,
            kind,
            mode,
            ok,
            thread: std::thread::current().name().map(str::to_string),
        });
    }
}

/// Carrier that records calls instead of touching a window manager.
#[derive(Debug)]
pub struct RecordingCarrier {
    log: CarrierLog,
}

impl RecordingCarrier {
    pub fn new(log: CarrierLog) -> Self {
        Self { log }
    }
}

impl OverlayCarrier for RecordingCarrier {
    fn create(&mut self, title: &str, mode: OrientationMode) -> RotationResult<CarrierHandle> {
        let result = {
            let mut script = lock(&self.log.script);
            if script.fail_create {
                Err(RotationError::Carrier(format!("cannot add overlay {title}")))
            } else {
                script.next_handle += 1;
                let id = script.next_handle;
                script.live = Some(id);
                Ok(CarrierHandle(id))
            }
        };
        self.log
            .record(CarrierOpKind::Create, Some(mode), result.is_ok());
        result
    }

    fn update(&mut self, handle: &CarrierHandle, mode: OrientationMode) -> RotationResult<()> {
        let result = {
            let script = lock(&self.log.script);
            if script.fail_update {
                Err(RotationError::Carrier("update rejected".into()))
            } else if script.live != Some(handle.0) {
                Err(RotationError::Carrier(format!(
                    "overlay {} is not attached",
                    handle.0
                )))
            } else {
                Ok(())
            }
        };
        self.log
            .record(CarrierOpKind::Update, Some(mode), result.is_ok());
        result
    }

    fn remove(&mut self, handle: CarrierHandle) -> RotationResult<()> {
        let result = {
            let mut script = lock(&self.log.script);
            if script.fail_remove {
                Err(RotationError::Carrier("remove rejected".into()))
            } else if script.live != Some(handle.0) {
                Err(RotationError::Carrier(format!(
                    "overlay {} is not attached",
                    handle.0
                )))
            } else {
                script.live = None;
                Ok(())
            }
        };
        self.log.record(CarrierOpKind::Remove, None, result.is_ok());
        result
    }
}

/// Builds [`RecordingCarrier`]s that all share one [`CarrierLog`].
#[derive(Debug, Clone, Default)]
pub struct RecordingCarrierFactory {
    log: CarrierLog,
}

impl RecordingCarrierFactory {
    pub fn new(log: CarrierLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &CarrierLog {
        &self.log
    }
}

impl CarrierFactory for RecordingCarrierFactory {
    fn build(&self) -> Box<dyn OverlayCarrier> {
        Box::new(RecordingCarrier::new(self.log.clone()))
    }
}
