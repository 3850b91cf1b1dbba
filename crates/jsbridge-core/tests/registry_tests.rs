//! Process-wide session registry

use serial_test::serial;

use jsbridge_core::{BridgeError, DisposedSessions, EngineSession};

#[test]
#[serial]
fn test_sessions_register_and_unregister() {
    let registry = DisposedSessions::global();
    let before = registry.live_count();

    let first = EngineSession::default();
    let second = EngineSession::default();
    assert_ne!(first.id(), second.id());
    assert_eq!(registry.live_count(), before + 2);
    assert!(!registry.is_disposed(first.id()));

    first.shutdown();
    assert!(registry.is_disposed(first.id()));
    assert_eq!(registry.live_count(), before + 1);

    let id = second.id();
    drop(second);
    assert!(registry.is_disposed(id));
    assert_eq!(registry.live_count(), before);
}

#[test]
#[serial]
fn test_registry_returns_to_baseline() {
    let registry = DisposedSessions::global();
    let before = registry.live_count();

    let ids: Vec<_> = (0..50)
        .map(|_| {
            let session = EngineSession::default();
            let id = session.id();
            session.shutdown();
            id
        })
        .collect();
    assert_eq!(registry.live_count(), before);
    assert!(ids.iter().all(|id| registry.is_disposed(*id)));

    let kept = EngineSession::default();
    assert_eq!(registry.live_count(), before + 1);
    drop(kept);
    assert_eq!(registry.live_count(), before);
}

#[test]
#[serial]
fn test_disposed_session_refuses_work() {
    let session = EngineSession::default();
    let id = session.create_integer(1).unwrap();
    let clone = session.clone();
    session.shutdown();

    assert!(clone.is_disposed());
    assert!(matches!(
        clone.create_integer(2),
        Err(BridgeError::SessionDisposed(sid)) if sid == session.id()
    ));
    assert!(!clone.try_dispose(id));
    assert!(!clone.mark_disposing(id));
    assert!(clone.request_weak(id).is_err());
}

#[test]
#[serial]
fn test_handle_outlives_session() {
    let session = EngineSession::default();
    let session_id = session.id();
    let handle = session.wrap(session.create_object(1).unwrap()).unwrap();
    drop(session);

    assert!(DisposedSessions::global().is_disposed(session_id));
    assert_eq!(handle.session_id(), session_id);
    assert!(handle.session().is_none());
    assert!(handle.value().is_none());
    drop(handle);
}

#[test]
#[serial]
fn test_unknown_session_counts_as_disposed() {
    let unused = DisposedSessions::next_id();
    assert!(DisposedSessions::global().is_disposed(unused));
}
