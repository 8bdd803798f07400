//! Two-pass garbage collection of finished exec sessions.

use std::collections::HashSet;

use super::ExecStore;
use crate::runtime::types::ExecId;

/// One GC sweep.
///
/// `live` holds every exec id still attached to a container. Sessions
/// already marked are purged; detached sessions are marked so the next
/// sweep removes them. Returns the number purged.
pub(crate) fn collect(store: &ExecStore, live: &HashSet<ExecId>) -> usize {
    let mut purged = 0;
    for id in store.ids() {
        let Ok(session) = store.get(&id) else {
            continue;
        };
        let mut session = session.lock();
        if session.can_remove {
            drop(session);
            store.delete(&id);
            purged += 1;
        } else if !live.contains(&id) && !session.running {
            session.can_remove = true;
        }
    }
    if purged > 0 {
        tracing::debug!(purged, "Purged finished exec sessions");
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecConfig, ExecSession};
    use crate::runtime::types::ContainerId;

    #[test]
    fn test_mark_then_purge() {
        let store = ExecStore::new();
        let cid = ContainerId::new();
        store.add(ExecSession::new("live".into(), cid.clone(), ExecConfig::new(["top"])));
        let done = store.add(ExecSession::new("done".into(), cid, ExecConfig::new(["ls"])));
        done.lock().set_exited(0);

        let live = HashSet::from(["live".to_string()]);

        assert_eq!(collect(&store, &live), 0);
        assert!(store.get("done").unwrap().lock().can_remove);
        assert!(!store.get("live").unwrap().lock().can_remove);

        assert_eq!(collect(&store, &live), 1);
        assert!(store.get("done").is_err());
        assert!(store.get("live").is_ok());
    }

    #[test]
    fn test_running_session_never_marked() {
        let store = ExecStore::new();
        let running = store.add(ExecSession::new(
            "r".into(),
            ContainerId::new(),
            ExecConfig::new(["sleep"]),
        ));
        running.lock().set_running(5);

        collect(&store, &HashSet::new());
        collect(&store, &HashSet::new());
        assert!(store.get("r").is_ok());
    }
}
