//! Embedder surface tests
//!
//! Exercise the isolate the way the bridge drives it: templates with
//! interceptors, native callbacks re-entering the isolate, persistent
//! handles across collections and cooperative termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use jsbridge_engine::{
    CallInfo, EngineError, InternalField, Intercepted, Isolate, NativeAccessor, NativeFunction,
    ObjectRef, PropertyAttributes, PropertyInterceptor, Value, ValueKind,
};

fn native(
    f: impl Fn(&Isolate, &CallInfo<'_>) -> Result<Value, Value> + Send + Sync + 'static,
) -> Arc<dyn NativeFunction> {
    Arc::new(f)
}

/// Interceptor answering `answer` and counting writes
#[derive(Default)]
struct CountingInterceptor {
    writes: AtomicUsize,
}

impl PropertyInterceptor for CountingInterceptor {
    fn get_named(&self, _isolate: &Isolate, _holder: ObjectRef, name: &str) -> Intercepted<Value> {
        match name {
            "answer" => Intercepted::Value(Value::Int32(42)),
            _ => Intercepted::NotIntercepted,
        }
    }

    fn set_named(
        &self,
        _isolate: &Isolate,
        _holder: ObjectRef,
        name: &str,
        _value: &Value,
    ) -> Intercepted<Value> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if name == "swallowed" {
            Intercepted::Value(Value::Undefined)
        } else {
            Intercepted::NotIntercepted
        }
    }

    fn query_named(
        &self,
        _isolate: &Isolate,
        _holder: ObjectRef,
        name: &str,
    ) -> Intercepted<PropertyAttributes> {
        match name {
            "answer" => Intercepted::Value(PropertyAttributes::READ_ONLY),
            _ => Intercepted::NotIntercepted,
        }
    }

    fn enumerate_named(&self, _isolate: &Isolate, _holder: ObjectRef) -> Intercepted<Vec<String>> {
        Intercepted::Value(vec!["answer".to_string()])
    }

    fn get_indexed(&self, _isolate: &Isolate, _holder: ObjectRef, index: u32) -> Intercepted<Value> {
        Intercepted::Value(Value::Int32(index as i32 * 10))
    }
}

#[test]
fn test_interceptor_on_template_instance() {
    let isolate = Isolate::new();
    let interceptor = Arc::new(CountingInterceptor::default());
    let template = isolate.new_object_template();
    isolate
        .set_template_interceptor(template, Some(interceptor.clone()))
        .unwrap();
    let obj = isolate.new_instance(template).unwrap();
    isolate
        .set_property(isolate.global(), "host", Value::Object(obj))
        .unwrap();

    let result = isolate
        .execute("host.swallowed = 1; host.kept = 2; host.answer + host[3] + host.kept", "i.js")
        .unwrap();
    assert_eq!(result, Value::Int32(74));
    assert_eq!(interceptor.writes.load(Ordering::SeqCst), 2);
    assert_eq!(isolate.get_property(obj, "swallowed").unwrap(), Value::Undefined);
    assert_eq!(
        isolate.property_attributes(obj, "answer").unwrap(),
        Some(PropertyAttributes::READ_ONLY)
    );
    assert_eq!(
        isolate.property_names(obj).unwrap(),
        vec!["answer".to_string(), "kept".to_string()]
    );
}

#[test]
fn test_global_template_interceptor_sees_assignments() {
    let isolate = Isolate::new();
    let interceptor = Arc::new(CountingInterceptor::default());
    let template = isolate.new_object_template();
    isolate
        .set_template_interceptor(template, Some(interceptor.clone()))
        .unwrap();
    let global = isolate.set_global_template(template).unwrap();
    assert_eq!(isolate.global(), global);
    assert_eq!(isolate.internal_field_count(global), 2);

    let result = isolate.execute("counter = 1; counter + answer", "g.js").unwrap();
    assert_eq!(result, Value::Int32(43));
    assert_eq!(interceptor.writes.load(Ordering::SeqCst), 1);
    // Builtins survive the global replacement.
    assert!(isolate.execute("new Error('x')", "g.js").is_ok());
}

#[test]
fn test_function_template_callback_and_construct() {
    let isolate = Isolate::new();
    let add = native(|isolate, info| {
        if info.is_construct {
            let this = info.this.as_object().ok_or(Value::Undefined)?;
            isolate
                .set_property(this, "seed", info.arg(0))
                .map_err(|e| isolate.rethrow(e))?;
            return Ok(Value::Undefined);
        }
        Ok(Value::number(info.arg(0).to_number() + info.arg(1).to_number()))
    });
    let template = isolate.new_function_template("Adder", Some(add));
    isolate
        .set_function_template_property(template, "version", Value::Int32(3), PropertyAttributes::NONE)
        .unwrap();
    let function = isolate.function_from_template(template).unwrap();
    assert_eq!(isolate.function_from_template(template).unwrap(), function);
    isolate
        .set_property(isolate.global(), "Adder", Value::Object(function))
        .unwrap();

    assert_eq!(isolate.execute("Adder(2, 3)", "f.js").unwrap(), Value::Int32(5));
    assert_eq!(isolate.execute("Adder.version", "f.js").unwrap(), Value::Int32(3));
    assert_eq!(
        isolate.execute("var a = new Adder(7); a.seed", "f.js").unwrap(),
        Value::Int32(7)
    );
    assert_eq!(
        isolate.execute("a instanceof Adder", "f.js").unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        isolate.kind_of(&Value::Object(function)),
        ValueKind::Function
    );

    let instance = isolate.new_function_instance(template, &[Value::Int32(9)]).unwrap();
    let instance = instance.as_object().unwrap();
    assert_eq!(isolate.get_property(instance, "seed").unwrap(), Value::Int32(9));
    assert_eq!(isolate.internal_field_count(instance), 2);
}

#[test]
fn test_native_exception_carries_script_position() {
    let isolate = Isolate::new();
    let fail = native(|isolate, _info| {
        Err(isolate.new_error(jsbridge_engine::ErrorName::Error, "native failure"))
    });
    let template = isolate.new_function_template("fail", Some(fail));
    let function = isolate.function_from_template(template).unwrap();
    isolate
        .set_property(isolate.global(), "fail", Value::Object(function))
        .unwrap();

    let err = isolate.execute("var x = 1;\nfail();", "native.js").unwrap_err();
    match err {
        EngineError::Exception {
            message,
            line,
            stack,
            ..
        } => {
            assert_eq!(message, "Error: native failure");
            assert_eq!(line, Some(2));
            assert!(stack.unwrap().contains("native.js:2:1"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

struct Counter {
    reads: AtomicUsize,
}

impl NativeAccessor for Counter {
    fn get(&self, _isolate: &Isolate, _holder: ObjectRef, _name: &str) -> Result<Value, Value> {
        Ok(Value::Int32(self.reads.fetch_add(1, Ordering::SeqCst) as i32))
    }
}

#[test]
fn test_accessor_property() {
    let isolate = Isolate::new();
    let obj = isolate.new_object();
    let counter = Arc::new(Counter {
        reads: AtomicUsize::new(0),
    });
    isolate
        .set_accessor(obj, "tick", counter, PropertyAttributes::NONE)
        .unwrap();
    assert_eq!(isolate.get_property(obj, "tick").unwrap(), Value::Int32(0));
    assert_eq!(isolate.get_property(obj, "tick").unwrap(), Value::Int32(1));
    // Default setter ignores writes.
    isolate.set_property(obj, "tick", Value::Int32(100)).unwrap();
    assert_eq!(isolate.get_property(obj, "tick").unwrap(), Value::Int32(2));
}

#[test]
fn test_persistent_keeps_object_alive() {
    let isolate = Isolate::new();
    let obj = isolate.new_object();
    let handle = isolate.new_persistent(Value::Object(obj));
    isolate.collect_garbage().unwrap();
    assert!(isolate.is_live(obj));
    assert_eq!(isolate.persistent_value(handle), Some(Value::Object(obj)));

    assert!(isolate.reset_persistent(handle));
    isolate.collect_garbage().unwrap();
    assert!(!isolate.is_live(obj));
}

#[test]
fn test_weak_persistent_notice_and_revival() {
    let isolate = Isolate::new();
    let obj = isolate.new_object();
    let handle = isolate.new_persistent(Value::Object(obj));
    isolate.make_weak(handle, 0xABCD);

    assert!(isolate.idle_notification());
    assert_eq!(isolate.take_weak_notices(), vec![0xABCD]);
    // Revived: still alive and strong until the embedder decides.
    assert!(isolate.is_live(obj));
    assert!(!isolate.is_weak(handle));

    isolate.reset_persistent(handle);
    assert!(!isolate.idle_notification());
    assert!(!isolate.is_live(obj));
}

#[test]
fn test_weak_then_strong_keeps_value() {
    let isolate = Isolate::new();
    let obj = isolate.new_object();
    let handle = isolate.new_persistent(Value::Object(obj));
    isolate.make_weak(handle, 1);
    assert!(isolate.clear_weak(handle));
    isolate.collect_garbage().unwrap();
    assert!(isolate.take_weak_notices().is_empty());
    assert_eq!(isolate.persistent_value(handle), Some(Value::Object(obj)));
}

#[test]
fn test_collection_refused_while_running() {
    let isolate = Isolate::new();
    let observed = Arc::new(AtomicUsize::new(0));
    let observed_in_callback = observed.clone();
    let inspect = native(move |isolate, _info| {
        if isolate.collect_garbage().is_none() {
            observed_in_callback.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Value::Bool(isolate.is_running()))
    });
    let template = isolate.new_function_template("inspect", Some(inspect));
    let function = isolate.function_from_template(template).unwrap();
    isolate
        .set_property(isolate.global(), "inspect", Value::Object(function))
        .unwrap();
    assert_eq!(isolate.execute("inspect()", "p.js").unwrap(), Value::Bool(true));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert!(!isolate.is_running());
}

#[test]
fn test_termination_from_another_thread() {
    let isolate = Isolate::new();
    let handle = isolate.termination_handle();
    let watchdog = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.terminate();
    });
    let err = isolate.execute("var i = 0; while (true) { i++; }", "loop.js").unwrap_err();
    watchdog.join().unwrap();
    assert!(err.is_terminated());
    // The flag is cleared once the outermost run unwinds.
    assert!(!isolate.is_terminating());
    assert_eq!(isolate.execute("1 + 1", "after.js").unwrap(), Value::Int32(2));
}

#[test]
fn test_internal_field_values_are_traced() {
    let isolate = Isolate::new();
    let template = isolate.new_object_template();
    let holder = isolate.new_instance(template).unwrap();
    let child = isolate.new_object();
    isolate
        .set_internal_field(holder, 0, InternalField::Value(Value::Object(child)))
        .unwrap();
    let handle = isolate.new_persistent(Value::Object(holder));
    isolate.collect_garbage().unwrap();
    assert!(isolate.is_live(child));
    isolate.reset_persistent(handle);
    isolate.collect_garbage().unwrap();
    assert!(!isolate.is_live(child));
}

#[test]
fn test_call_handler_makes_object_callable() {
    let isolate = Isolate::new();
    let template = isolate.new_object_template();
    let handler = native(|_isolate, info| Ok(Value::Int32(info.args.len() as i32)));
    isolate
        .set_template_call_handler(template, Some(handler))
        .unwrap();
    let obj = isolate.new_instance(template).unwrap();
    let result = isolate
        .call(&Value::Object(obj), Value::Undefined, &[Value::Null, Value::Null])
        .unwrap();
    assert_eq!(result, Value::Int32(2));
    assert!(matches!(
        isolate.call(&Value::Int32(1), Value::Undefined, &[]),
        Err(EngineError::NotAFunction)
    ));
}
