//! Service-level behavior against the in-memory platform doubles.

use rotation_core::{
    AllowList, ForegroundNotification, OrientationMode, PlatformPackages, RotationError,
    ServiceConfig, ServiceState,
};
use rotation_engine::{supervise, RotationService, ServiceDeps};
use rotation_provider::memory::{
    CarrierLog, CarrierOpKind, ManualChangeChannel, ManualForegroundSource,
    RecordingCarrierFactory, ScriptedConfigSource,
};
use rotation_provider::SettingsStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    source: Arc<ScriptedConfigSource>,
    changes: Arc<ManualChangeChannel>,
    foreground: Arc<ManualForegroundSource>,
    log: CarrierLog,
}

impl Harness {
    fn new(packages: &[&str]) -> Self {
        Self {
            source: Arc::new(ScriptedConfigSource::new(
                packages.iter().copied().collect(),
            )),
            changes: Arc::new(ManualChangeChannel::new()),
            foreground: Arc::new(ManualForegroundSource::new()),
            log: CarrierLog::new(),
        }
    }

    fn service(&self) -> RotationService {
        let deps = ServiceDeps {
            config_source: self.source.clone(),
            config_changes: self.changes.clone(),
            foreground: self.foreground.clone(),
            carriers: Arc::new(RecordingCarrierFactory::new(self.log.clone())),
        };
        RotationService::new(deps, ServiceConfig::default())
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn start_and_stop_walk_the_state_machine() {
    let h = Harness::new(&["app1"]);
    let mut service = h.service();
    assert_eq!(service.state(), ServiceState::Stopped);

    service.start().await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.allow_list().unwrap().contains("app1"));
    assert_eq!(h.foreground.listener_count(), 1);
    assert_eq!(h.changes.listener_count(), 1);
    assert!(h.log.is_live());

    assert!(matches!(
        service.start().await,
        Err(RotationError::InvalidState(_))
    ));

    service.stop().await.unwrap();
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(h.foreground.listener_count(), 0);
    assert_eq!(h.changes.listener_count(), 0);
    assert!(!h.log.is_live());
    assert!(service.allow_list().is_none());

    assert!(matches!(
        service.stop().await,
        Err(RotationError::InvalidState(_))
    ));
}

#[tokio::test]
async fn listed_app_rotates_and_unlisted_restores() {
    let h = Harness::new(&["com.example.app"]);
    let mut service = h.service();
    service.start().await.unwrap();

    h.foreground.emit_package("com.example.app");
    h.foreground.emit_package("com.other.app");
    let state = service.settle(2, WAIT).await.unwrap();
    service.stop().await.unwrap();

    assert_eq!(state.applied_mode, OrientationMode::PlatformDefault);
    assert_eq!(
        h.log.updates(),
        vec![OrientationMode::Unconstrained, OrientationMode::PlatformDefault]
    );
}

#[tokio::test]
async fn unlisted_apps_cause_no_updates() {
    let h = Harness::new(&["com.example.app"]);
    let mut service = h.service();
    service.start().await.unwrap();

    h.foreground.emit_package("com.other.app");
    h.foreground.emit_package("com.other2.app");
    service.settle(2, WAIT).await.unwrap();
    service.stop().await.unwrap();

    assert_eq!(h.log.count(CarrierOpKind::Update), 0);
}

#[tokio::test]
async fn duplicate_foreground_notifications_are_collapsed() {
    let h = Harness::new(&["A"]);
    let mut service = h.service();
    service.start().await.unwrap();

    for p in ["A", "A", "B", "B", "B", "A"] {
        h.foreground.emit_package(p);
    }
    h.foreground.emit(ForegroundNotification::unresolved());
    service.settle(7, WAIT).await.unwrap();

    assert_eq!(service.transitions(), 3);
    let fg = service.foreground_state().unwrap();
    assert_eq!(fg.current_package.as_ref().map(|p| p.as_str()), Some("A"));
    service.stop().await.unwrap();

    // A -> unconstrained, B -> default, A -> unconstrained.
    assert_eq!(h.log.count(CarrierOpKind::Update), 3);
}

#[tokio::test]
async fn config_change_signal_refreshes_the_list() {
    let h = Harness::new(&["app1"]);
    let mut service = h.service();
    service.start().await.unwrap();
    let store = service.allow_list_store().unwrap();

    h.source.set_packages(["app2"].into_iter().collect());
    assert_eq!(h.changes.fire(), 1);
    eventually(|| store.contains("app2")).await;
    assert!(!store.contains("app1"));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn settings_store_drives_refresh_end_to_end() {
    let settings = Arc::new(SettingsStore::in_memory(PlatformPackages::new(
        ["com.default"],
        ["com.extra"],
    )));
    let foreground = Arc::new(ManualForegroundSource::new());
    let log = CarrierLog::new();
    let deps = ServiceDeps {
        config_source: settings.clone(),
        config_changes: settings.clone(),
        foreground: foreground.clone(),
        carriers: Arc::new(RecordingCarrierFactory::new(log.clone())),
    };
    let mut service = RotationService::new(deps, ServiceConfig::default());
    service.start().await.unwrap();
    let store = service.allow_list_store().unwrap();
    assert!(store.contains("com.default"));
    assert!(store.contains("com.extra"));

    settings.set_packages(["com.game".into()]).unwrap();
    eventually(|| store.contains("com.game")).await;
    assert!(!store.contains("com.default"));
    assert!(store.contains("com.extra"));

    foreground.emit_package("com.game");
    service.settle(1, WAIT).await.unwrap();
    service.stop().await.unwrap();
    assert_eq!(log.updates(), vec![OrientationMode::Unconstrained]);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_list() {
    let h = Harness::new(&["app1", "app2"]);
    let mut service = h.service();
    service.start().await.unwrap();

    h.source.set_failing(true);
    service.request_refresh().unwrap();
    eventually(|| h.source.fetches_started() >= 2).await;
    // Let the failed refresh finish before checking.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(service.allow_list().unwrap().contains("app1"));
    service.stop().await.unwrap();
}

#[tokio::test]
async fn failed_initial_refresh_still_starts() {
    let h = Harness::new(&["app1"]);
    h.source.set_failing(true);
    let mut service = h.service();

    service.start().await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert!(service.allow_list().unwrap().is_empty());

    h.source.set_failing(false);
    h.changes.fire();
    let store = service.allow_list_store().unwrap();
    eventually(|| store.contains("app1")).await;
    service.stop().await.unwrap();
}

#[tokio::test]
async fn stop_cancels_in_flight_refresh() {
    let h = Harness::new(&["app1"]);
    let mut service = h.service();
    service.start().await.unwrap();
    let store = service.allow_list_store().unwrap();

    h.source.set_packages(AllowList::from_iter(["app2"]));
    h.source.hold();
    service.request_refresh().unwrap();
    eventually(|| h.source.fetches_started() >= 2).await;

    service.stop().await.unwrap();
    h.source.release();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.is_closed());
    assert!(store.is_empty());
    assert!(!store.contains("app2"));
}

#[tokio::test]
async fn slow_initial_refresh_continues_in_background() {
    let h = Harness::new(&["app1"]);
    h.source.hold();
    let deps = ServiceDeps {
        config_source: h.source.clone(),
        config_changes: h.changes.clone(),
        foreground: h.foreground.clone(),
        carriers: Arc::new(RecordingCarrierFactory::new(h.log.clone())),
    };
    let config = ServiceConfig::default().with_initial_refresh_timeout(Duration::from_millis(10));
    let mut service = RotationService::new(deps, config);

    service.start().await.unwrap();
    let store = service.allow_list_store().unwrap();
    assert!(store.is_empty());

    h.source.release();
    eventually(|| store.contains("app1")).await;
    service.stop().await.unwrap();
}

#[tokio::test]
async fn registration_failures_leave_service_running() {
    let h = Harness::new(&["app1"]);
    h.foreground.fail_registration(true);
    h.changes.fail_registration(true);
    let mut service = h.service();

    service.start().await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(h.foreground.emit_package("app1"), 0);
    assert_eq!(h.changes.fire(), 0);

    service.stop().await.unwrap();
    // Nothing was registered, so nothing is unregistered.
    assert_eq!(h.foreground.unregister_calls(), 0);
    assert_eq!(h.changes.unregister_calls(), 0);
    assert!(!h.log.is_live());
}

#[tokio::test]
async fn stop_steps_are_independent() {
    let h = Harness::new(&["app1"]);
    let mut service = h.service();
    service.start().await.unwrap();

    h.foreground.fail_unregistration(true);
    h.changes.fail_unregistration(true);
    service.stop().await.unwrap();

    assert_eq!(h.foreground.unregister_calls(), 1);
    assert_eq!(h.changes.unregister_calls(), 1);
    assert!(!h.log.is_live());
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn carrier_failure_degrades_without_crashing() {
    let h = Harness::new(&["app1"]);
    h.log.fail_create(true);
    let mut service = h.service();
    service.start().await.unwrap();

    h.foreground.emit_package("app1");
    let state = service.settle(1, WAIT).await.unwrap();

    assert!(!state.attached);
    assert_eq!(state.applied_mode, OrientationMode::Unconstrained);
    assert_eq!(h.log.count(CarrierOpKind::Update), 0);
    service.stop().await.unwrap();
    assert_eq!(h.log.count(CarrierOpKind::Remove), 0);
}

#[tokio::test]
async fn restart_rebuilds_from_scratch() {
    let h = Harness::new(&["app1"]);
    let mut service = h.service();

    service.start().await.unwrap();
    h.foreground.emit_package("app1");
    service.settle(1, WAIT).await.unwrap();
    service.stop().await.unwrap();

    service.start().await.unwrap();
    let fg = service.foreground_state().unwrap();
    assert!(fg.previous_package.is_none());
    let state = service.overlay_state().await.unwrap();
    assert!(state.attached);
    assert_eq!(state.applied_mode, OrientationMode::PlatformDefault);

    // Same package again is a fresh transition after restart.
    h.foreground.emit_package("app1");
    service.settle(1, WAIT).await.unwrap();
    service.stop().await.unwrap();

    assert_eq!(h.log.count(CarrierOpKind::Create), 2);
    assert_eq!(h.log.count(CarrierOpKind::Update), 2);
}

#[tokio::test]
async fn supervisor_follows_enabled_flag() {
    let settings = Arc::new(SettingsStore::in_memory(PlatformPackages::default()));
    let log = CarrierLog::new();
    let deps = ServiceDeps {
        config_source: settings.clone(),
        config_changes: settings.clone(),
        foreground: Arc::new(ManualForegroundSource::new()),
        carriers: Arc::new(RecordingCarrierFactory::new(log.clone())),
    };
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        let enabled = settings.watch_enabled();
        async move {
            let mut service = RotationService::new(deps, ServiceConfig::default());
            supervise(&mut service, enabled, cancel).await?;
            Ok::<_, RotationError>(service.state())
        }
    });

    // Disabled by default: nothing started.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(log.count(CarrierOpKind::Create), 0);

    settings.set_enabled(true).unwrap();
    eventually(|| log.is_live()).await;

    settings.set_enabled(false).unwrap();
    eventually(|| !log.is_live()).await;

    settings.set_enabled(true).unwrap();
    eventually(|| log.count(CarrierOpKind::Create) == 2).await;

    cancel.cancel();
    let final_state = tokio::time::timeout(WAIT, task)
        .await
        .expect("supervisor did not exit")
        .unwrap()
        .unwrap();
    assert_eq!(final_state, ServiceState::Stopped);
    assert!(!log.is_live());
}
