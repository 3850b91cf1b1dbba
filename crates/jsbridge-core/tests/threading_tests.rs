//! Cross-thread disposal and termination

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use jsbridge_core::{
    CallbackScope, DisposalState, EngineSession, FunctionCall, FunctionCallback, HandleId,
    TransitionOutcome, ValueType,
};

fn function(
    f: impl Fn(&CallbackScope<'_>, &FunctionCall<'_>) -> Option<HandleId> + Send + Sync + 'static,
) -> FunctionCallback {
    Arc::new(f)
}

#[test]
fn test_requests_from_other_thread_queue_during_script() {
    let session = EngineSession::default();
    let entered = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));

    let (gate_in, gate_out) = (entered.clone(), resume.clone());
    let block = session
        .create_function_template(
            "block",
            Some(function(move |_, _| {
                gate_in.wait();
                gate_out.wait();
                None
            })),
        )
        .unwrap();
    let function = session.get_function(block).unwrap();
    let global = session.global().unwrap();
    session.set_property(global, "block", function, None).unwrap();

    let target = session.create_object(17).unwrap();
    assert!(session.mark_disposing(target));
    let scratch = session.create_string("scratch").unwrap();

    let worker = {
        let session = session.clone();
        thread::spawn(move || session.execute("block(); 1", "block.js").unwrap())
    };

    entered.wait();
    assert!(session.is_executing());
    assert_eq!(session.request_weak(target).unwrap(), TransitionOutcome::Queued);
    assert!(session.try_dispose(scratch));
    assert_eq!(session.stats().pending_releases, 1);
    assert_eq!(session.handle_info(target).unwrap().state, DisposalState::ManagedDisposing);
    resume.wait();

    let result = worker.join().unwrap();
    assert_eq!(session.value_type(result).unwrap(), ValueType::Int32);
    assert_eq!(session.handle_info(target).unwrap().state, DisposalState::WeakFlagged);
    assert_eq!(session.stats().pending_weak, 0);

    // the next engine lock flushes the deferred release
    drop(session.lock().unwrap());
    assert_eq!(session.stats().pending_releases, 0);
}

#[test]
fn test_terminate_from_watchdog() {
    let session = EngineSession::default();
    let watchdog = {
        let session = session.clone();
        thread::spawn(move || {
            while !session.is_executing() {
                thread::sleep(Duration::from_millis(1));
            }
            thread::sleep(Duration::from_millis(10));
            session.terminate_execution();
        })
    };

    let id = session.execute("while (true) {}", "spin.js").unwrap();
    watchdog.join().unwrap();

    assert_eq!(session.value_type(id).unwrap(), ValueType::ExecutionTerminated);
    assert!(!session.is_executing());
    assert!(!session.is_terminating());

    // the session stays usable
    let next = session.execute("1 + 1", "after.js").unwrap();
    assert_eq!(session.value_type(next).unwrap(), ValueType::Int32);
}

#[test]
fn test_handles_dropped_from_many_threads() {
    let session = EngineSession::default();
    let ids: Vec<_> = (0..8).map(|i| session.create_object(100 + i).unwrap()).collect();
    let handles: Vec<_> = ids.iter().map(|id| session.wrap(*id).unwrap()).collect();

    let workers: Vec<_> = handles
        .into_iter()
        .map(|handle| thread::spawn(move || drop(handle)))
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for id in ids {
        assert_eq!(session.handle_info(id).unwrap().state, DisposalState::Cached);
    }
    assert_eq!(session.stats().recycled, 8);
    assert_eq!(session.stats().identity_mappings, 0);
}
