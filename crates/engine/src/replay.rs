//! Replays a recorded foreground trace through a full service instance.
//!
//! The service runs against the real settings store and in-memory doubles
//! for the foreground source and overlay carrier, so the carrier calls it
//! would have made can be inspected afterwards.

use crate::service::{RotationService, ServiceDeps};
use rotation_core::{
    AllowList, ForegroundNotification, OverlayState, PackageId, RotationResult, ServiceConfig,
};
use rotation_provider::memory::{
    CarrierLog, CarrierOp, ManualForegroundSource, RecordingCarrierFactory,
};
use rotation_provider::SettingsStore;
use std::sync::Arc;
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Marker for a notification with no resolvable package.
const UNRESOLVED: &str = "-";

/// Outcome of one replay.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub notifications: u64,
    pub transitions: u64,
    pub allow_list: AllowList,
    /// Overlay state after the last notification, before stop.
    pub final_state: OverlayState,
    pub carrier_ops: Vec<CarrierOp>,
}

impl ReplayReport {
    /// Human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Force-rotation replay ===\n");
        out.push_str(&format!(
            "notifications: {}  transitions: {}  allow-list: {} package(s)\n",
            self.notifications,
            self.transitions,
            self.allow_list.len()
        ));
        for pkg in self.allow_list.sorted() {
            out.push_str(&format!("  + {pkg}\n"));
        }
        out.push_str("carrier calls:\n");
        if self.carrier_ops.is_empty() {
            out.push_str("  (none)\n");
        }
        for op in &self.carrier_ops {
            let mode = op.mode.map(|m| m.to_string()).unwrap_or_default();
            let status = if op.ok { "" } else { "  FAILED" };
            out.push_str(&format!("  #{:<3} {:?} {mode}{status}\n", op.seq, op.kind));
        }
        out.push_str(&format!(
            "final: {} (overlay {})\n",
            self.final_state.applied_mode,
            if self.final_state.attached {
                "attached"
            } else {
                "detached"
            }
        ));
        out
    }
}

/// One package id per line. `-` is an unresolved notification; blank lines
/// and `#` comments are skipped.
pub fn parse_trace(text: &str) -> Vec<ForegroundNotification> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line == UNRESOLVED {
                ForegroundNotification::unresolved()
            } else {
                ForegroundNotification::package(PackageId::from(line))
            }
        })
        .collect()
}

pub async fn replay(
    settings: Arc<SettingsStore>,
    trace: &[ForegroundNotification],
    config: ServiceConfig,
) -> RotationResult<ReplayReport> {
    let foreground = Arc::new(ManualForegroundSource::new());
    let log = CarrierLog::new();
    let deps = ServiceDeps {
        config_source: settings.clone(),
        config_changes: settings,
        foreground: foreground.clone(),
        carriers: Arc::new(RecordingCarrierFactory::new(log.clone())),
    };

    let mut service = RotationService::new(deps, config);
    service.start().await?;

    for notification in trace {
        foreground.emit(notification.clone());
    }
    let settled = service.settle(trace.len() as u64, SETTLE_TIMEOUT).await;
    let transitions = service.transitions();
    let allow_list = service.allow_list().unwrap_or_default();

    service.stop().await?;
    let final_state = settled?;

    tracing::info!(
        notifications = trace.len(),
        transitions,
        carrier_ops = log.ops().len(),
        "replay complete"
    );

    Ok(ReplayReport {
        notifications: trace.len() as u64,
        transitions,
        allow_list,
        final_state,
        carrier_ops: log.ops(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotation_core::{OrientationMode, PlatformPackages};
    use rotation_provider::memory::CarrierOpKind;

    #[test]
    fn trace_parsing() {
        let trace = parse_trace("# warmup\ncom.a\n\n  com.b  \n-\n");
        assert_eq!(
            trace,
            vec![
                ForegroundNotification::package("com.a"),
                ForegroundNotification::package("com.b"),
                ForegroundNotification::unresolved(),
            ]
        );
    }

    #[tokio::test]
    async fn replay_reports_decisions() {
        let settings = Arc::new(SettingsStore::in_memory(PlatformPackages::new(
            ["com.example.app"],
            Vec::<&str>::new(),
        )));
        let trace = parse_trace("com.example.app\ncom.example.app\ncom.other.app\n-\n");

        let report = replay(settings, &trace, ServiceConfig::default())
            .await
            .unwrap();

        assert_eq!(report.notifications, 4);
        assert_eq!(report.transitions, 2);
        assert_eq!(report.final_state.applied_mode, OrientationMode::PlatformDefault);

        let kinds: Vec<CarrierOpKind> = report.carrier_ops.iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CarrierOpKind::Create,
                CarrierOpKind::Update,
                CarrierOpKind::Update,
                CarrierOpKind::Remove,
            ]
        );

        let (summary, events) = report.to_rows();
        assert_eq!(summary.carrier_updates, 2);
        assert_eq!(events.len(), 4);
    }
}
