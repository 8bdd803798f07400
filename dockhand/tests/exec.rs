mod common;

use common::{TestDaemon, eventually};
use dockhand::{DockhandError, ExecConfig, RemoveOptions};

#[tokio::test]
async fn test_exec_requires_running_container() {
    let t = TestDaemon::new().await;
    t.create("web");
    let err = t
        .daemon
        .exec_create("web", ExecConfig::new(["ls"]))
        .unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_exec_rejects_empty_command() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let err = t
        .daemon
        .exec_create("web", ExecConfig::default())
        .unwrap_err();
    assert!(matches!(err, DockhandError::InvalidParameter(_)), "{err}");
}

#[tokio::test]
async fn test_exec_on_paused_container() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    t.daemon.container_pause("web").await.unwrap();
    let err = t
        .daemon
        .exec_create("web", ExecConfig::new(["ls"]))
        .unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}

#[tokio::test]
async fn test_exec_start_and_wait() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;

    let mut config = ExecConfig::new(["exit", "4"]);
    config.env = vec!["EXTRA=1".into()];
    let exec_id = t.daemon.exec_create("web", config).unwrap();

    let inspect = t.daemon.exec_inspect(&exec_id).unwrap();
    assert!(!inspect.running);
    assert_eq!(inspect.container_id, id);
    assert!(
        t.daemon
            .container_inspect("web")
            .unwrap()
            .exec_ids
            .contains(&exec_id)
    );

    t.daemon.exec_start(&exec_id).await.unwrap();
    assert_eq!(t.daemon.exec_wait(&exec_id).await.unwrap(), 4);

    let spec = &t.supervisor.exec_starts()[0];
    assert_eq!(spec.args, vec!["exit", "4"]);
    assert!(spec.env.contains(&"BASE=1".to_string()));
    assert!(spec.env.contains(&"EXTRA=1".to_string()));
    assert_eq!(spec.rootfs, t.supervisor.last_start().unwrap().rootfs.upper);

    let inspect = t.daemon.exec_inspect(&exec_id).unwrap();
    assert_eq!(inspect.exit_code, Some(4));
    assert!(!inspect.running);
    assert!(
        eventually(|| !t
            .daemon
            .container_inspect("web")
            .unwrap()
            .exec_ids
            .contains(&exec_id))
        .await
    );
    assert_eq!(t.daemon.metrics().execs_started_total(), 1);
}

#[tokio::test]
async fn test_exec_cannot_start_twice() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let exec_id = t.daemon.exec_create("web", ExecConfig::new(["top"])).unwrap();

    t.daemon.exec_start(&exec_id).await.unwrap();
    let err = t.daemon.exec_start(&exec_id).await.unwrap_err();
    assert!(matches!(err, DockhandError::Conflict(_)), "{err}");

    t.supervisor.exit_exec(&exec_id, 0);
    t.daemon.exec_wait(&exec_id).await.unwrap();
    let err = t.daemon.exec_start(&exec_id).await.unwrap_err();
    assert!(matches!(err, DockhandError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_exec_resize_requires_running_session() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let exec_id = t.daemon.exec_create("web", ExecConfig::new(["top"])).unwrap();

    let err = t.daemon.exec_resize(&exec_id, 24, 80).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");

    t.daemon.exec_start(&exec_id).await.unwrap();
    t.daemon.exec_resize(&exec_id, 24, 80).await.unwrap();
}

#[tokio::test]
async fn test_exec_gc_takes_two_passes() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let finished = t.daemon.exec_create("web", ExecConfig::new(["exit"])).unwrap();
    let pending = t.daemon.exec_create("web", ExecConfig::new(["top"])).unwrap();

    t.daemon.exec_start(&finished).await.unwrap();
    t.daemon.exec_wait(&finished).await.unwrap();
    assert!(
        eventually(|| !t
            .daemon
            .container_inspect("web")
            .unwrap()
            .exec_ids
            .contains(&finished))
        .await
    );

    assert_eq!(t.daemon.exec_gc(), 0);
    assert!(t.daemon.exec_inspect(&finished).unwrap().can_remove);
    assert!(!t.daemon.exec_inspect(&pending).unwrap().can_remove);

    assert_eq!(t.daemon.exec_gc(), 1);
    assert!(t.daemon.exec_inspect(&finished).unwrap_err().is_not_found());
    assert!(t.daemon.exec_inspect(&pending).is_ok());
}

#[tokio::test]
async fn test_remove_container_kills_execs() {
    let t = TestDaemon::new().await;
    let id = t.run("web").await;
    let exec_id = t.daemon.exec_create("web", ExecConfig::new(["top"])).unwrap();
    t.daemon.exec_start(&exec_id).await.unwrap();

    let force = RemoveOptions {
        force: true,
        ..Default::default()
    };
    t.daemon.container_remove(id.as_str(), force).await.unwrap();

    assert!(t.daemon.exec_inspect(&exec_id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_exec_after_container_stop() {
    let t = TestDaemon::new().await;
    t.run("web").await;
    let exec_id = t.daemon.exec_create("web", ExecConfig::new(["top"])).unwrap();
    t.daemon.container_stop("web", None).await.unwrap();

    let err = t.daemon.exec_start(&exec_id).await.unwrap_err();
    assert!(matches!(err, DockhandError::InvalidState(_)), "{err}");
}
