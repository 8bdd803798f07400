mod common;

use common::TestDaemon;
use dockhand::images::AuthConfig;
use dockhand::{DockhandError, RemoveOptions};

#[tokio::test]
async fn test_resolve_repository_uses_default_index() {
    let t = TestDaemon::new().await;

    let info = t.daemon.resolve_repository("redis:7").unwrap();
    assert_eq!(info.index.name, "docker.io");
    assert!(info.official);

    let info = t
        .daemon
        .resolve_repository("registry.local:5000/team/app")
        .unwrap();
    assert_eq!(info.index.name, "registry.local:5000");
    assert_eq!(info.name, "team/app");
    assert!(!info.official);
}

#[tokio::test]
async fn test_authenticate_without_transport_is_unsupported() {
    let t = TestDaemon::new().await;
    let auth = AuthConfig {
        username: "ops".into(),
        password: "secret".into(),
        ..Default::default()
    };
    let err = t
        .daemon
        .authenticate_to_registry(&auth, "dockhand-test")
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::Unsupported(_)), "{err}");
}

#[tokio::test]
async fn test_metrics_track_create_and_remove() {
    let t = TestDaemon::new().await;
    let id = t.create("web");
    t.create("db");
    assert_eq!(t.daemon.metrics().containers_created_total(), 2);

    t.daemon
        .container_remove(id.as_str(), RemoveOptions::default())
        .await
        .unwrap();
    assert_eq!(t.daemon.metrics().containers_removed_total(), 1);
}
