mod common;

use std::sync::atomic::Ordering;

use common::{TestDaemon, eventually};
use dockhand::supervisor::Signal;
use dockhand::{ContainerStatus, DockhandError, HostConfig, RemoveOptions, RestartPolicy};

fn status(t: &TestDaemon, key: &str) -> ContainerStatus {
    t.daemon.container_inspect(key).unwrap().state.status
}

#[tokio::test]
async fn test_create_then_start() {
    let t = TestDaemon::new().await;
    let id = t.create("web");
    assert_eq!(status(&t, "web"), ContainerStatus::Created);

    t.daemon.container_start("web").await.unwrap();
    let container = t.daemon.container_inspect(id.as_str()).unwrap();
    assert_eq!(container.state.status, ContainerStatus::Running);
    assert!(container.state.pid.is_some());
    assert!(container.state.started_at.is_some());

    let spec = t.supervisor.last_start().unwrap();
    assert_eq!(spec.args, vec!["sleep", "infinity"]);
    assert!(spec.env.contains(&"BASE=1".to_string()));
    assert!(spec.env.iter().any(|e| e.starts_with("HOSTNAME=")));
    assert_eq!(t.daemon.metrics().num_running_containers(), 1);
}

#[tokio::test]
async fn test_duplicate_name_conflicts() {
    let t = TestDaemon::new().await;
    t.create("web");
    let err = t
        .daemon
        .container_create(
            Some("web"),
            dockhand::ContainerConfig::new(common::BASE_IMAGE),
            HostConfig::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DockhandError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_create_with_unknown_image_fails() {
    let t = TestDaemon::new().await;
    let err = t
        .daemon
        .container_create(
            Some("web"),
            dockhand::ContainerConfig::new("missing:latest"),
            HostConfig::default(),
        )
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert!(t.daemon.container_list(true).is_empty());
}

#[tokio::test]
async fn test_start_running_container_is_invalid_state() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let err = t.daemon.container_start("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_stop_uses_stop_signal() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    t.daemon.container_stop("web", None).await.unwrap();

    let container = t.daemon.container_inspect("web").unwrap();
    assert_eq!(container.state.status, ContainerStatus::Exited);
    assert_eq!(container.state.exit_code, 143);
    assert!(container.state.manually_stopped);
    assert_eq!(t.supervisor.signals(), vec![(id, Signal::SIGTERM)]);
}

#[tokio::test]
async fn test_stop_escalates_to_kill_after_timeout() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;
    t.supervisor.ignore_term.store(true, Ordering::SeqCst);

    t.daemon.container_stop("web", Some(0)).await.unwrap();

    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
    assert_eq!(t.daemon.container_inspect("web").unwrap().state.exit_code, 137);
    assert_eq!(
        t.supervisor.signals(),
        vec![(id.clone(), Signal::SIGTERM), (id, Signal::SIGKILL)]
    );
}

#[tokio::test]
async fn test_stop_created_container_is_invalid_state() {
    let t = TestDaemon::new().await;
    t.create("web");
    let err = t.daemon.container_stop("web", None).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_kill_with_signal_name() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    t.daemon.container_kill("web", Some("KILL")).await.unwrap();
    assert_eq!(t.daemon.container_wait("web").await.unwrap(), 137);
    assert_eq!(t.supervisor.signals(), vec![(id, Signal::SIGKILL)]);

    let err = t.daemon.container_kill("web", Some("NOPE")).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidParameter(_)), "{err}");
}

#[tokio::test]
async fn test_pause_and_unpause() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    t.daemon.container_pause("web").await.unwrap();
    assert_eq!(status(&t, "web"), ContainerStatus::Paused);
    assert!(t.supervisor.is_paused(&id));

    let err = t.daemon.container_pause("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
    let err = t.daemon.container_start("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");

    t.daemon.container_unpause("web").await.unwrap();
    assert_eq!(status(&t, "web"), ContainerStatus::Running);
    assert!(!t.supervisor.is_paused(&id));

    let err = t.daemon.container_unpause("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_pause_created_container_is_invalid_state() {
    let t = TestDaemon::new().await;
    t.create("web");
    let err = t.daemon.container_pause("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_wait_returns_exit_code() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    let daemon = t.daemon.clone();
    let waiter = tokio::spawn(async move { daemon.container_wait("web").await });
    t.supervisor.exit(&id, 3);

    assert_eq!(waiter.await.unwrap().unwrap(), 3);
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
}

#[tokio::test]
async fn test_restart_always_restarts_after_exit() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy::always(),
        ..Default::default()
    };
    let id = t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    t.supervisor.exit(&id, 1);

    assert!(
        eventually(|| t.supervisor.starts().len() == 2
            && status(&t, "web") == ContainerStatus::Running)
        .await
    );
    assert_eq!(t.daemon.container_inspect("web").unwrap().state.restart_count, 1);
}

#[tokio::test]
async fn test_on_failure_ignores_clean_exit() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy::on_failure(3),
        ..Default::default()
    };
    let id = t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    t.supervisor.exit(&id, 0);
    assert_eq!(t.daemon.container_wait("web").await.unwrap(), 0);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(t.supervisor.starts().len(), 1);
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
}

#[tokio::test]
async fn test_explicit_start_rearms_on_failure_budget() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy::on_failure(1),
        ..Default::default()
    };
    let id = t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    t.supervisor.exit(&id, 1);
    assert!(
        eventually(|| t.supervisor.starts().len() == 2
            && status(&t, "web") == ContainerStatus::Running)
        .await
    );

    // Budget spent: the second failure is final
    t.supervisor.exit(&id, 1);
    assert_eq!(t.daemon.container_wait("web").await.unwrap(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(t.supervisor.starts().len(), 2);
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);

    t.daemon.container_start("web").await.unwrap();
    assert_eq!(t.daemon.container_inspect("web").unwrap().state.restart_count, 0);

    t.supervisor.exit(&id, 1);
    assert!(
        eventually(|| t.supervisor.starts().len() == 4
            && status(&t, "web") == ContainerStatus::Running)
        .await
    );
    assert_eq!(t.daemon.container_inspect("web").unwrap().state.restart_count, 1);
}

#[tokio::test]
async fn test_stop_is_not_undone_by_restart_policy() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy::always(),
        ..Default::default()
    };
    t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    t.daemon.container_stop("web", None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(t.supervisor.starts().len(), 1);
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
}

#[tokio::test]
async fn test_start_failure_records_exit_code() {
    let t = TestDaemon::new().await;
    t.create("web");
    t.supervisor.fail_start.store(true, Ordering::SeqCst);

    let err = t.daemon.container_start("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::Engine(_)), "{err}");

    let container = t.daemon.container_inspect("web").unwrap();
    assert_eq!(container.state.status, ContainerStatus::Created);
    assert_eq!(container.state.exit_code, 128);
    assert!(container.state.error.contains("scripted start failure"));
    assert_eq!(t.daemon.metrics().start_failures_total(), 1);

    // A later start works once the supervisor recovers
    t.supervisor.fail_start.store(false, Ordering::SeqCst);
    t.daemon.container_start("web").await.unwrap();
    assert_eq!(status(&t, "web"), ContainerStatus::Running);
}

#[tokio::test]
async fn test_remove_running_requires_force() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    let err = t
        .daemon
        .container_remove("web", RemoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DockhandError::Conflict(_)), "{err}");
    assert_eq!(status(&t, "web"), ContainerStatus::Running);

    let force = RemoveOptions {
        force: true,
        ..Default::default()
    };
    t.daemon.container_remove("web", force).await.unwrap();
    assert!(t.daemon.container_inspect(id.as_str()).unwrap_err().is_not_found());
    assert!(t.supervisor.signals().contains(&(id.clone(), Signal::SIGKILL)));

    // Second removal of the same id is a no-op
    t.daemon.container_remove(id.as_str(), force).await.unwrap();
    // The name is free again
    t.create("web");
}

#[tokio::test]
async fn test_remove_unknown_container_is_not_found() {
    let t = TestDaemon::new().await;
    let err = t
        .daemon
        .container_remove("nothing-here", RemoveOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[tokio::test]
async fn test_auto_remove_after_exit() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        auto_remove: true,
        ..Default::default()
    };
    let id = t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    t.supervisor.exit(&id, 0);
    assert!(eventually(|| t.daemon.container_inspect(id.as_str()).is_err()).await);
}

#[tokio::test]
async fn test_links_inject_environment() {
    let t = TestDaemon::new().await;
    t.run("db").await;
    let host_config = HostConfig {
        links: vec!["db:store".into()],
        ..Default::default()
    };
    t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();

    let env = t.supervisor.last_start().unwrap().env;
    assert!(env.contains(&"STORE_NAME=/web/store".to_string()));
    assert!(env.contains(&"STORE_ENV_BASE=1".to_string()));
    assert!(!env.iter().any(|e| e.starts_with("STORE_ENV_PATH=")));
}

#[tokio::test]
async fn test_link_to_stopped_container_fails_start() {
    let t = TestDaemon::new().await;
    t.create("db");
    let host_config = HostConfig {
        links: vec!["db".into()],
        ..Default::default()
    };
    t.create_with("web", host_config);

    let err = t.daemon.container_start("web").await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
    assert_eq!(t.daemon.container_inspect("web").unwrap().state.exit_code, 128);
}

#[tokio::test]
async fn test_list_filters_stopped_containers() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    t.create("idle");

    let running = t.daemon.container_list(false);
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].name, "web");
    assert_eq!(t.daemon.container_list(true).len(), 2);
}

#[tokio::test]
async fn test_prune_removes_only_stopped_containers() {
    let t = TestDaemon::new().await;
    let running = t.run("web").await;
    let idle = t.create("idle");

    let report = t.daemon.containers_prune().await;
    assert_eq!(report.deleted, vec![idle.as_str().to_string()]);
    assert!(report.errors.is_empty());
    assert!(t.daemon.container_inspect(running.as_str()).is_ok());
    assert!(t.daemon.container_inspect(idle.as_str()).is_err());
}

#[tokio::test]
async fn test_restore_restarts_always_containers() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy::always(),
        ..Default::default()
    };
    let always = t.create_with("always", host_config);
    t.daemon.container_start("always").await.unwrap();
    let plain = t.run("plain").await;
    let created = t.create("created");

    let t = t.reopen().await;

    assert_eq!(status(&t, always.as_str()), ContainerStatus::Running);
    assert_eq!(t.supervisor.starts().len(), 1);
    assert_eq!(t.supervisor.starts()[0].container_id, always);

    let plain = t.daemon.container_inspect(plain.as_str()).unwrap();
    assert_eq!(plain.state.status, ContainerStatus::Exited);
    assert_eq!(plain.state.exit_code, 255);

    assert_eq!(status(&t, created.as_str()), ContainerStatus::Created);
}

#[tokio::test]
async fn test_restore_keeps_unless_stopped_container_down_after_stop() {
    let t = TestDaemon::new().await;
    let host_config = HostConfig {
        restart_policy: RestartPolicy {
            name: dockhand::RestartPolicyName::UnlessStopped,
            maximum_retry_count: 0,
        },
        ..Default::default()
    };
    t.create_with("web", host_config);
    t.daemon.container_start("web").await.unwrap();
    t.daemon.container_stop("web", None).await.unwrap();

    let t = t.reopen().await;
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
    assert!(t.supervisor.starts().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_running_containers() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    t.daemon.shutdown().await;
    assert_eq!(status(&t, "web"), ContainerStatus::Exited);
}
