//! Refresh and resolve through the facade, end to end over the fake locator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use crate::cache::{CACHE_FILE_NAME, ResultCache};
use crate::configure::{ConfigurationSource, ToolOverrides};
use crate::error::LocatorError;
use crate::events::TracingLocatorEvents;
use crate::locator::Locator;
use crate::records::{
    DiscoveredEnvironment, DiscoveredManagerTool, DiscoveredRecord, EnvironmentKind,
    ManagerToolKind,
};
use crate::scope::RefreshScope;
use crate::test_support::{FakeEvent, FakeLocator, Reaction, fast_settings, locator_over};
use crate::tests::resolved_environment;

#[fixture]
fn fake() -> FakeLocator {
    FakeLocator::new()
        .with_environment(resolved_environment(EnvironmentKind::Venv, "/proj/.venv/bin/python"))
        .with_manager(DiscoveredManagerTool {
            tool: ManagerToolKind::Poetry,
            executable: PathBuf::from("/usr/bin/poetry"),
            version: None,
        })
}

fn executables(records: &[DiscoveredRecord]) -> Vec<PathBuf> {
    records
        .iter()
        .filter_map(DiscoveredRecord::as_environment)
        .filter_map(|environment| environment.executable().map(Path::to_path_buf))
        .collect()
}

#[rstest]
#[tokio::test]
async fn soft_refresh_serves_cache_without_locator(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    let cached = vec![DiscoveredRecord::Environment(resolved_environment(
        EnvironmentKind::Pyenv,
        "/home/u/.pyenv/versions/3.11.4/bin/python",
    ))];
    locator.cache().put(&RefreshScope::All, &cached);

    let records = locator
        .refresh(false, RefreshScope::All)
        .await
        .expect("cached refresh");

    assert_eq!(records, cached);
    assert_eq!(fake.launches(), 0);
}

#[rstest]
#[tokio::test]
async fn hard_refresh_always_queries_and_overwrites(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    locator.cache().put(&RefreshScope::All, &[]);

    let records = locator.refresh(true, RefreshScope::All).await.expect("refresh");

    assert_eq!(executables(&records), vec![PathBuf::from("/proj/.venv/bin/python")]);
    assert!(records.iter().any(|record| record.as_manager().is_some()));
    assert_eq!(locator.cache().get(&RefreshScope::All), Some(records));
    assert_eq!(fake.received("refresh").len(), 1);
}

#[rstest]
#[tokio::test]
async fn malformed_cache_entry_forces_a_refresh(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    locator
        .cache()
        .put_value(&RefreshScope::All, json!([{"type": "environment", "kind": 12}]));

    let records = locator
        .refresh(false, RefreshScope::All)
        .await
        .expect("refresh after corrupt cache");

    assert_eq!(records.len(), 2);
    assert_eq!(fake.launches(), 1);
}

#[tokio::test]
async fn empty_discovery_is_success() {
    let fake = FakeLocator::new();
    let locator = locator_over(&fake, fast_settings());

    let records = locator.refresh(true, RefreshScope::All).await.expect("refresh");

    assert!(records.is_empty());
    assert_eq!(locator.cache().get(&RefreshScope::All), Some(Vec::new()));
}

/// Returns the same directories in a different order on every call.
#[derive(Default)]
struct ShufflingSource {
    flipped: AtomicBool,
}

impl ConfigurationSource for ShufflingSource {
    fn workspace_directories(&self) -> Vec<PathBuf> {
        let mut roots = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        if self.flipped.fetch_xor(true, Ordering::SeqCst) {
            roots.reverse();
        }
        roots
    }

    fn environment_directories(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/envs")]
    }

    fn tool_overrides(&self) -> ToolOverrides {
        ToolOverrides::default()
    }

    fn cache_directory(&self) -> Option<PathBuf> {
        None
    }
}

#[rstest]
#[tokio::test]
async fn reordered_configuration_is_not_resent(fake: FakeLocator) {
    let locator = Locator::new(
        fast_settings(),
        Arc::new(fake.clone()),
        Arc::new(ShufflingSource::default()),
        Arc::new(TracingLocatorEvents),
    );

    locator.refresh(true, RefreshScope::All).await.expect("first");
    locator.refresh(true, RefreshScope::All).await.expect("second");
    locator
        .resolve(Path::new("/proj/.venv/bin/python"))
        .await
        .expect_err("no resolution scripted");

    assert_eq!(fake.received("configure").len(), 1);
}

#[rstest]
#[tokio::test]
async fn restarted_process_is_reconfigured(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    locator.refresh(true, RefreshScope::All).await.expect("first");

    locator.supervisor().kill().await;
    locator.refresh(true, RefreshScope::All).await.expect("after kill");

    let configures: Vec<u32> = fake
        .events()
        .iter()
        .filter_map(|event| match event {
            FakeEvent::Received { launch, method, .. } if method == "configure" => Some(*launch),
            _ => None,
        })
        .collect();
    assert_eq!(configures, vec![1, 2]);
}

#[rstest]
#[tokio::test]
async fn locations_scope_keeps_configured_directories(fake: FakeLocator) {
    let locator = Locator::new(
        fast_settings(),
        Arc::new(fake.clone()),
        Arc::new(ShufflingSource::default()),
        Arc::new(TracingLocatorEvents),
    );

    locator
        .refresh(true, RefreshScope::Locations(vec![PathBuf::from("/proj")]))
        .await
        .expect("refresh");

    assert_eq!(
        fake.received("refresh"),
        vec![json!({"searchPaths": ["/proj", "/envs"]})]
    );
}

#[tokio::test]
async fn partial_environment_is_resolved_before_returning() {
    let complete = DiscoveredEnvironment {
        kind: Some(EnvironmentKind::LinuxGlobal),
        version: Some(String::from("3.12.3")),
        prefix: Some(PathBuf::from("/usr")),
        ..DiscoveredEnvironment::for_executable("/usr/bin/python3")
    };
    let fake = FakeLocator::new()
        .with_environment(DiscoveredEnvironment::for_executable("/usr/bin/python3"))
        .with_resolution("/usr/bin/python3", complete.clone());
    let locator = locator_over(&fake, fast_settings());

    let records = locator.refresh(true, RefreshScope::All).await.expect("refresh");

    assert_eq!(records, vec![DiscoveredRecord::Environment(complete)]);
    let configure = fake.received("configure");
    assert_eq!(configure.len(), 1);
    let sent = configure.first().expect("configure sent");
    assert_eq!(sent.get("workspaceDirectories"), Some(&json!(["/proj"])));
    assert_eq!(sent.get("environmentDirectories"), Some(&json!([])));
    assert_eq!(
        fake.received("resolve"),
        vec![json!({"executable": "/usr/bin/python3"})]
    );
}

#[tokio::test]
async fn failed_follow_up_keeps_partial_record() {
    let partial = DiscoveredEnvironment::for_executable("/opt/python/bin/python3");
    let fake = FakeLocator::new().with_environment(partial.clone());
    let locator = locator_over(&fake, fast_settings());

    let records = locator.refresh(true, RefreshScope::All).await.expect("refresh");

    assert_eq!(records, vec![DiscoveredRecord::Environment(partial)]);
}

#[rstest]
#[tokio::test]
async fn hung_refresh_times_out_then_restarts(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    fake.react("refresh", Reaction::Hang);

    let error = locator
        .refresh(true, RefreshScope::All)
        .await
        .expect_err("refresh hangs");
    assert!(error.is_timeout());
    assert_eq!(locator.cache().get(&RefreshScope::All), None);

    let records = locator
        .refresh(true, RefreshScope::All)
        .await
        .expect("restarted refresh");

    assert_eq!(records.len(), 2);
    assert_eq!(fake.launches(), 2);
    assert_eq!(fake.received("$/cancelRequest").len(), 1);
    assert_eq!(locator.supervisor().restart_attempts(), 0);
}

#[rstest]
#[tokio::test]
async fn crash_during_refresh_is_retried(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    fake.react("refresh", Reaction::Crash);

    let records = locator.refresh(true, RefreshScope::All).await.expect("retried");

    assert_eq!(records.len(), 2);
    assert_eq!(fake.launches(), 2);
}

#[rstest]
#[tokio::test]
async fn repeated_configure_timeouts_kill_the_process(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    fake.react("configure", Reaction::Hang);
    fake.react("configure", Reaction::Hang);

    let first = locator.refresh(true, RefreshScope::All).await.expect_err("first timeout");
    assert!(matches!(first, LocatorError::Timeout { timeout_ms: 200, .. }));
    assert_eq!(fake.launches(), 1);

    let second = locator.refresh(true, RefreshScope::All).await.expect_err("second timeout");
    assert!(matches!(second, LocatorError::Timeout { timeout_ms: 400, .. }));

    let records = locator.refresh(true, RefreshScope::All).await.expect("fresh process");
    assert_eq!(records.len(), 2);
    assert_eq!(fake.launches(), 2);
}

#[rstest]
#[tokio::test]
async fn server_error_between_configure_timeouts_spares_the_process(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    fake.react("configure", Reaction::Hang);
    fake.react(
        "configure",
        Reaction::Fail {
            code: -32603,
            message: String::from("bad cache directory"),
        },
    );
    fake.react("configure", Reaction::Hang);

    let first = locator.refresh(true, RefreshScope::All).await.expect_err("first timeout");
    assert!(matches!(first, LocatorError::Timeout { timeout_ms: 200, .. }));

    let rejected = locator.refresh(true, RefreshScope::All).await.expect_err("rejected");
    assert!(matches!(rejected, LocatorError::Server { code: -32603, .. }));

    let third = locator.refresh(true, RefreshScope::All).await.expect_err("timeout again");
    assert!(matches!(third, LocatorError::Timeout { timeout_ms: 200, .. }));

    let records = locator.refresh(true, RefreshScope::All).await.expect("same process");
    assert_eq!(records.len(), 2);
    assert_eq!(fake.launches(), 1);
    assert_eq!(fake.received("configure").len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_do_not_interleave() {
    let fake = FakeLocator::new()
        .with_environment(resolved_environment(EnvironmentKind::Conda, "/conda/envs/a/bin/python"))
        .with_environment(resolved_environment(EnvironmentKind::Venv, "/proj/.venv/bin/python"))
        .with_environment(resolved_environment(EnvironmentKind::Conda, "/conda/envs/b/bin/python"))
        .with_environment(resolved_environment(EnvironmentKind::Venv, "/work/.venv/bin/python"))
        .with_notification_delay(Duration::from_millis(2));
    let locator = locator_over(&fake, fast_settings());

    let (conda, venv, all) = tokio::join!(
        locator.refresh(true, RefreshScope::Kind(EnvironmentKind::Conda)),
        locator.refresh(true, RefreshScope::Kind(EnvironmentKind::Venv)),
        locator.refresh(true, RefreshScope::All),
    );

    let only = |records: &[DiscoveredRecord], kind: EnvironmentKind| {
        records
            .iter()
            .filter_map(DiscoveredRecord::as_environment)
            .all(|environment| environment.kind == Some(kind))
    };
    let conda = conda.expect("conda refresh");
    let venv = venv.expect("venv refresh");
    assert_eq!(conda.len(), 2);
    assert!(only(&conda, EnvironmentKind::Conda));
    assert_eq!(venv.len(), 2);
    assert!(only(&venv, EnvironmentKind::Venv));
    assert_eq!(all.expect("full refresh").len(), 4);

    let mut in_flight = false;
    for event in fake.events() {
        match event {
            FakeEvent::Received { method, .. } if method == "refresh" => {
                assert!(!in_flight, "refresh started while another was streaming");
                in_flight = true;
            }
            FakeEvent::Notified { .. } => assert!(in_flight, "notification outside a refresh"),
            FakeEvent::Answered { method, .. } if method == "refresh" => in_flight = false,
            _ => {}
        }
    }
}

#[rstest]
#[tokio::test]
async fn server_errors_propagate_without_touching_budget(fake: FakeLocator) {
    let locator = locator_over(&fake, fast_settings());
    fake.react(
        "resolve",
        Reaction::Fail {
            code: -4,
            message: String::from("not a python"),
        },
    );

    let error = locator
        .resolve(Path::new("/bin/sh"))
        .await
        .expect_err("resolve rejected");

    assert!(matches!(error, LocatorError::Server { code: -4, .. }));
    assert_eq!(fake.launches(), 1);
    assert_eq!(locator.supervisor().restart_attempts(), 0);
}

#[tokio::test]
async fn resolve_timeout_kills_and_is_not_retried() {
    let fake = FakeLocator::new().with_resolution(
        "/usr/bin/python3",
        resolved_environment(EnvironmentKind::LinuxGlobal, "/usr/bin/python3"),
    );
    let locator = locator_over(&fake, fast_settings());
    fake.react("resolve", Reaction::Hang);

    let error = locator
        .resolve(Path::new("/usr/bin/python3"))
        .await
        .expect_err("resolve hangs");
    assert!(error.is_timeout());
    assert_eq!(fake.received("resolve").len(), 1);

    let resolved = locator
        .resolve(Path::new("/usr/bin/python3"))
        .await
        .expect("fresh process answers");
    assert_eq!(resolved.version.as_deref(), Some("3.12.1"));
    assert_eq!(fake.launches(), 2);
}

#[rstest]
#[tokio::test]
async fn dispose_persists_cache_and_stops_everything(fake: FakeLocator) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join(CACHE_FILE_NAME);
    let locator = locator_over(&fake, fast_settings()).with_cache(ResultCache::open(&path));
    locator.refresh(true, RefreshScope::All).await.expect("refresh");

    locator.dispose().await;

    assert!(matches!(
        locator.refresh(true, RefreshScope::All).await,
        Err(LocatorError::Disposed)
    ));
    let persisted = ResultCache::open(&path).get(&RefreshScope::All);
    assert_eq!(persisted.map(|records| records.len()), Some(2));
}
