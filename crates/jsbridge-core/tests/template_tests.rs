//! Object and function templates calling back into Rust

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use jsbridge_core::{
    AccessorGetter, AccessorSetter, BridgeError, CallbackScope, EngineSession, FunctionCall,
    FunctionCallback, HandleId, HandleValue, IndexedGetter, IndexedHandlers, NamedGetter,
    NamedHandlers, NamedSetter, PropertyAttributes, ValueType,
};

fn named_getter(
    f: impl Fn(&CallbackScope<'_>, &str) -> Option<HandleId> + Send + Sync + 'static,
) -> NamedGetter {
    Arc::new(f)
}

fn named_setter(
    f: impl Fn(&CallbackScope<'_>, &str, HandleId) -> Option<HandleId> + Send + Sync + 'static,
) -> NamedSetter {
    Arc::new(f)
}

fn indexed_getter(
    f: impl Fn(&CallbackScope<'_>, u32) -> Option<HandleId> + Send + Sync + 'static,
) -> IndexedGetter {
    Arc::new(f)
}

fn function(
    f: impl Fn(&CallbackScope<'_>, &FunctionCall<'_>) -> Option<HandleId> + Send + Sync + 'static,
) -> FunctionCallback {
    Arc::new(f)
}

fn accessor_getter(
    f: impl Fn(&CallbackScope<'_>, &str) -> Option<HandleId> + Send + Sync + 'static,
) -> AccessorGetter {
    Arc::new(f)
}

fn accessor_setter(
    f: impl Fn(&CallbackScope<'_>, &str, HandleId) + Send + Sync + 'static,
) -> AccessorSetter {
    Arc::new(f)
}

/// Sums all arguments
fn adder() -> FunctionCallback {
    function(|scope, call| {
        let session = scope.session();
        let sum: f64 = call
            .args
            .iter()
            .map(|id| session.value(*id).map(|v| v.to_number()).unwrap_or(f64::NAN))
            .sum();
        session.create_number(sum).ok()
    })
}

fn expose(session: &EngineSession, name: &str, id: HandleId) {
    let global = session.global().unwrap();
    assert!(session.set_property(global, name, id, None).unwrap());
}

fn run(session: &EngineSession, source: &str) -> HandleValue {
    let id = session.execute(source, "template.js").unwrap();
    session.update_value(id).unwrap()
}

fn text(session: &EngineSession, source: &str) -> String {
    run(session, source).as_text().unwrap_or_default()
}

#[test]
fn test_named_handlers_see_managed_id() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let seen = writes.clone();

    session
        .register_named_handlers(
            template,
            NamedHandlers {
                getter: Some(named_getter(|scope, name| {
                    if name != "greeting" {
                        return None;
                    }
                    let text = format!("hello from {}", scope.managed_object_id());
                    scope.session().create_string(&text).ok()
                })),
                setter: Some(named_setter(move |scope, name, value| {
                    let written = scope.session().update_value(value).ok()?.as_text()?;
                    seen.lock().push((scope.managed_object_id(), name.to_string(), written));
                    Some(value)
                })),
                ..Default::default()
            },
        )
        .unwrap();

    let host = session.create_object_from_template(template, 12).unwrap();
    expose(&session, "host", host);

    assert_eq!(text(&session, "host.greeting"), "hello from 12");
    assert_eq!(text(&session, "host.name = 'bridge'"), "bridge");
    assert_eq!(
        *writes.lock(),
        vec![(12, "name".to_string(), "bridge".to_string())]
    );

    // intercepted writes never land on the object
    let missing = session.execute("host.name", "template.js").unwrap();
    assert_eq!(session.value_type(missing).unwrap(), ValueType::Undefined);
}

#[test]
fn test_indexed_getter() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    session
        .register_indexed_handlers(
            template,
            IndexedHandlers {
                getter: Some(indexed_getter(|scope, index| {
                    scope.session().create_integer(index as i32 * 2).ok()
                })),
                ..Default::default()
            },
        )
        .unwrap();

    let host = session.create_object_from_template(template, -1).unwrap();
    expose(&session, "host", host);
    assert_eq!(run(&session, "host[4]"), HandleValue::Int32(8));

    session.unregister_indexed_handlers(template).unwrap();
    let after = session.execute("host[4]", "template.js").unwrap();
    assert_eq!(session.value_type(after).unwrap(), ValueType::Undefined);
}

#[test]
fn test_deleted_template_stops_calling_back() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    session
        .register_named_handlers(
            template,
            NamedHandlers {
                getter: Some(named_getter(|scope, _| scope.session().create_integer(1).ok())),
                ..Default::default()
            },
        )
        .unwrap();
    let host = session.create_object_from_template(template, 1).unwrap();
    expose(&session, "host", host);
    assert_eq!(run(&session, "host.anything"), HandleValue::Int32(1));

    session.delete_object_template(template).unwrap();
    let after = session.execute("host.anything", "template.js").unwrap();
    assert_eq!(session.value_type(after).unwrap(), ValueType::Undefined);
    assert!(matches!(
        session.create_object_from_template(template, 2),
        Err(BridgeError::UnknownTemplate)
    ));
}

#[test]
fn test_template_property_is_copied_to_instances() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    let version = session.create_integer(3).unwrap();
    session
        .set_template_property(template, "version", version, PropertyAttributes::READ_ONLY)
        .unwrap();

    let instance = session.create_object_from_template(template, 5).unwrap();
    let value = session.get_property(instance, "version").unwrap();
    assert_eq!(session.update_value(value).unwrap(), HandleValue::Int32(3));
    assert_eq!(
        session.property_attributes(instance, "version").unwrap(),
        Some(PropertyAttributes::READ_ONLY)
    );
}

#[test]
fn test_function_template_callback() {
    let session = EngineSession::default();
    let add = session.create_function_template("add", Some(adder())).unwrap();
    let function = session.get_function(add).unwrap();
    expose(&session, "add", function);

    let before = session.stats().in_use;
    assert_eq!(run(&session, "add(2, 3)"), HandleValue::Int32(5));
    // only the result proxy survives the call
    assert_eq!(session.stats().in_use, before + 1);
}

#[test]
fn test_function_instance_takes_managed_id() {
    let session = EngineSession::default();
    let constructs = Arc::new(Mutex::new(Vec::new()));
    let seen = constructs.clone();
    let point = session
        .create_function_template(
            "Point",
            Some(function(move |_, call| {
                seen.lock().push((call.is_construct, call.args.len()));
                None
            })),
        )
        .unwrap();

    let x = session.create_integer(1).unwrap();
    let id = session.create_function_instance(point, 77, &[x]).unwrap();
    assert_eq!(session.value_type(id).unwrap(), ValueType::Object);
    assert_eq!(session.managed_object_id(id).unwrap(), 77);
    assert_eq!(*constructs.lock(), vec![(true, 1)]);

    let value = session.value(id).unwrap();
    assert_eq!(session.resolve(value).unwrap(), id);
}

#[test]
fn test_instance_template_handlers_apply_to_constructed_objects() {
    let session = EngineSession::default();
    let widget = session.create_function_template("Widget", None).unwrap();
    let instance = session.function_instance_template(widget).unwrap();
    assert_eq!(session.function_instance_template(widget).unwrap(), instance);
    session
        .register_named_handlers(
            instance,
            NamedHandlers {
                getter: Some(named_getter(|scope, name| {
                    (name == "kind").then(|| scope.session().create_string("widget").ok())?
                })),
                ..Default::default()
            },
        )
        .unwrap();

    let object = session.create_function_instance(widget, 8, &[]).unwrap();
    let kind = session.get_property(object, "kind").unwrap();
    assert_eq!(session.update_value(kind).unwrap().as_text().as_deref(), Some("widget"));
}

#[test]
fn test_call_with_and_without_name() {
    let session = EngineSession::default();
    let add = session.create_function_template("add", Some(adder())).unwrap();
    let function = session.get_function(add).unwrap();
    let object = session.create_object(-1).unwrap();
    session.set_property(object, "add", function, None).unwrap();

    let two = session.create_integer(2).unwrap();
    let three = session.create_integer(3).unwrap();

    let result = session.call(object, Some("add"), None, &[two, three]).unwrap();
    assert_eq!(session.update_value(result).unwrap(), HandleValue::Int32(5));

    let result = session.call(function, None, None, &[three, three]).unwrap();
    assert_eq!(session.update_value(result).unwrap(), HandleValue::Int32(6));

    assert!(matches!(
        session.call(two, None, None, &[]),
        Err(BridgeError::NotAFunction(id)) if id == two
    ));
    assert!(matches!(
        session.call(object, Some("missing"), None, &[]),
        Err(BridgeError::NotAFunction(id)) if id == object
    ));
}

#[test]
fn test_call_passes_receiver() {
    let session = EngineSession::default();
    let receivers = Arc::new(Mutex::new(Vec::new()));
    let seen = receivers.clone();
    let whoami = session
        .create_function_template(
            "whoami",
            Some(function(move |scope, call| {
                let session = scope.session();
                seen.lock().push(session.managed_object_id(call.this).unwrap_or(-3));
                None
            })),
        )
        .unwrap();
    let function = session.get_function(whoami).unwrap();
    let object = session.create_object(41).unwrap();
    session.set_property(object, "whoami", function, None).unwrap();
    let other = session.create_object(42).unwrap();

    session.call(object, Some("whoami"), None, &[]).unwrap();
    session.call(object, Some("whoami"), Some(other), &[]).unwrap();
    assert_eq!(*receivers.lock(), vec![41, 42]);
}

#[test]
fn test_panicking_callback_becomes_exception() {
    let session = EngineSession::default();
    let explode = session
        .create_function_template(
            "explode",
            Some(function(|_, _| panic!("managed side failed"))),
        )
        .unwrap();
    expose(&session, "explode", session.get_function(explode).unwrap());

    let id = session.execute("explode()", "panic.js").unwrap();
    assert_eq!(session.value_type(id).unwrap(), ValueType::ExecutionError);
    let message = session.update_value(id).unwrap().as_text().unwrap();
    assert!(
        message.contains("'FunctionCallback' no longer exists - perhaps the GC collected it."),
        "{message}"
    );
}

#[test]
fn test_error_result_is_rethrown() {
    let session = EngineSession::default();
    let fail = session
        .create_function_template(
            "fail",
            Some(function(|scope, _| {
                scope
                    .session()
                    .create_error("bad input", ValueType::ExecutionError)
                    .ok()
            })),
        )
        .unwrap();
    expose(&session, "fail", session.get_function(fail).unwrap());

    let id = session.execute("var r = fail(); r", "fail.js").unwrap();
    assert_eq!(session.value_type(id).unwrap(), ValueType::ExecutionError);
    let message = session.update_value(id).unwrap().as_text().unwrap();
    assert!(message.contains("bad input"), "{message}");
}

#[test]
fn test_callable_template_instance_returns_argument() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    session
        .set_call_handler(template, Some(function(|_, call| call.arg(0))))
        .unwrap();
    let host = session.create_object_from_template(template, 3).unwrap();
    expose(&session, "echo", host);

    assert_eq!(text(&session, "echo('back')"), "back");

    session.set_call_handler(template, None).unwrap();
    let id = session.execute("echo('back')", "echo.js").unwrap();
    assert_eq!(session.value_type(id).unwrap(), ValueType::ExecutionError);
}

#[test]
fn test_accessor_get_and_set() {
    let session = EngineSession::default();
    let object = session.create_object(9).unwrap();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let seen = writes.clone();

    session
        .set_accessor(
            object,
            "label",
            accessor_getter(|scope, name| {
                let text = format!("{name}:{}", scope.managed_object_id());
                scope.session().create_string(&text).ok()
            }),
            Some(accessor_setter(move |scope, _, value| {
                if let Ok(written) = scope.session().update_value(value) {
                    seen.lock().push(written);
                }
            })),
            PropertyAttributes::NONE,
        )
        .unwrap();
    expose(&session, "o", object);

    assert_eq!(text(&session, "o.label"), "label:9");
    run(&session, "o.label = 7");
    assert_eq!(*writes.lock(), vec![HandleValue::Int32(7)]);
}

#[test]
fn test_classification_does_not_run_accessors() {
    let session = EngineSession::default();
    let object = session.execute("var d = { $__Value: 1 }; d", "descriptor.js").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    session
        .set_accessor(
            object,
            "$__TypeID",
            accessor_getter(move |scope, _| {
                counted.fetch_add(1, Ordering::SeqCst);
                scope.session().create_integer(4).ok()
            }),
            None,
            PropertyAttributes::NONE,
        )
        .unwrap();

    let again = session.resolve(session.value(object).unwrap()).unwrap();
    assert_ne!(again, object);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.handle_info(again).unwrap().type_descriptor, None);
    assert!(session.try_dispose(again));
}

#[test]
fn test_global_object_template() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    session
        .register_named_handlers(
            template,
            NamedHandlers {
                getter: Some(named_getter(|scope, name| {
                    (name == "host_version").then(|| scope.session().create_integer(2).ok())?
                })),
                ..Default::default()
            },
        )
        .unwrap();

    let global = session.set_global_object_template(template).unwrap();
    let current = session.global().unwrap();
    assert_eq!(session.value(current).unwrap(), session.value(global).unwrap());
    assert_eq!(run(&session, "host_version"), HandleValue::Int32(2));
}
