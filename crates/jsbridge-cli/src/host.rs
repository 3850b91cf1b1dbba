//! Host bindings the CLI installs into every session

use std::io::Write;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jsbridge_core::{
    BridgeResult, CallbackScope, EngineSession, FunctionCall, FunctionCallback, HandleId, HandleValue,
    ValueType,
};
use parking_lot::Mutex;
use tracing::warn;

/// Text of a handle the way `print` shows it
pub fn display(session: &EngineSession, id: HandleId) -> BridgeResult<String> {
    let text = match session.value_type(id)? {
        ValueType::Undefined | ValueType::Uninitialized => "undefined".to_string(),
        ValueType::Null => "null".to_string(),
        _ => match session.update_value(id)? {
            HandleValue::None => String::new(),
            HandleValue::Bool(b) => b.to_string(),
            HandleValue::Int32(n) => n.to_string(),
            HandleValue::Number(n) => number(n),
            HandleValue::String(text) => text.to_string_lossy(),
        },
    };
    Ok(text)
}

fn number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        n.to_string()
    }
}

/// Bind a global `print(...args)` that writes one line per call to `out`
pub fn install_print<W: Write + Send + 'static>(session: &EngineSession, out: W) -> BridgeResult<()> {
    let out = Mutex::new(out);
    let print: FunctionCallback = Arc::new(move |scope: &CallbackScope<'_>, call: &FunctionCall<'_>| {
        let line = call
            .args
            .iter()
            .map(|&id| display(scope.session(), id).unwrap_or_else(|err| format!("<{err}>")))
            .collect::<Vec<_>>()
            .join(" ");
        let mut out = out.lock();
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(%err, "print failed");
        }
        None
    });

    let template = session.create_function_template("print", Some(print))?;
    let function = session.get_function(template)?;
    let global = session.global()?;
    let bound = session.set_property(global, "print", function, None);
    session.try_dispose(function);
    session.try_dispose(global);
    bound.map(|_| ())
}

/// Terminates the session's script if it runs past a deadline
pub struct Watchdog {
    done: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<bool>>,
}

impl Watchdog {
    pub fn spawn(session: EngineSession, timeout: Duration) -> std::io::Result<Self> {
        let (done, finished) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("jsbridge-watchdog".into())
            .spawn(move || match finished.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_ms = timeout.as_millis() as u64, "script timed out; terminating");
                    session.terminate_execution();
                    true
                }
                _ => false,
            })?;
        Ok(Self {
            done: Some(done),
            thread: Some(thread),
        })
    }

    /// Stop watching. Returns whether the deadline passed.
    pub fn finish(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        // disconnecting wakes the thread
        self.done.take();
        self.thread
            .take()
            .map(|thread| thread.join().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
