//! The C ABI driven the way a host would drive it

use std::ptr;

use jsbridge_ffi::*;

fn utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

fn session() -> FfiSession {
    let session = unsafe { jsbridge_session_create(ptr::null()) };
    assert_ne!(session, NO_SESSION);
    session
}

fn execute(session: FfiSession, source: &str) -> i32 {
    let source = utf16(source);
    let name = utf16("host.js");
    unsafe { jsbridge_execute(session, source.as_ptr(), source.len(), name.as_ptr(), name.len()) }
}

fn value(session: FfiSession, id: i32) -> FfiValue {
    let mut out = FfiValue::default();
    assert!(unsafe { jsbridge_update_value(session, id, &mut out) });
    out
}

fn value_text(value: &FfiValue) -> String {
    let units = unsafe { std::slice::from_raw_parts(value.text, value.text_len) };
    String::from_utf16_lossy(units)
}

fn expose(session: FfiSession, name: &str, id: i32) {
    let global = jsbridge_global(session);
    let name = utf16(name);
    assert!(unsafe { jsbridge_set_property(session, global, name.as_ptr(), name.len(), id, -1) });
}

const INT32: i32 = 6;
const STRING: i32 = 9;
const UNDEFINED: i32 = 1;
const EXECUTION_ERROR: i32 = -2;

#[test]
fn test_session_lifecycle() {
    let session = session();
    let id = execute(session, "6 * 7");
    let result = value(session, id);
    assert_eq!(result.value_type, INT32);
    assert_eq!(result.int32, 42);
    assert!(!jsbridge_is_executing(session));
    assert!(!jsbridge_is_terminating(session));

    assert!(jsbridge_session_destroy(session));
    assert!(!jsbridge_session_destroy(session));
    assert!(!jsbridge_try_dispose(session, id));
    assert_eq!(jsbridge_create_integer(session, 1), NO_HANDLE);
    assert_eq!(jsbridge_managed_object_id(session, id), NO_OBJECT);
}

#[test]
fn test_config_round_trip() {
    let mut config = FfiSessionConfig {
        initial_handle_capacity: 0,
        initial_string_capacity: 0,
        idle_collect_on_growth: false,
        duck_typed_type_descriptors: false,
        drain_per_safe_point: 0,
    };
    assert!(unsafe { jsbridge_default_config(&mut config) });
    assert_eq!(config.initial_handle_capacity, 1000);
    assert_eq!(config.drain_per_safe_point, 1);

    config.initial_handle_capacity = 4;
    let session = unsafe { jsbridge_session_create(&config) };
    assert_ne!(session, NO_SESSION);
    for i in 0..6 {
        assert!(jsbridge_create_integer(session, i) >= 0);
    }
    let mut stats = FfiStats::default();
    assert!(unsafe { jsbridge_stats(session, &mut stats) });
    assert!(stats.total_slots >= 6);
    jsbridge_session_destroy(session);
}

#[test]
fn test_string_round_trip() {
    let session = session();
    let text = utf16("héllo wörld");
    let id = unsafe { jsbridge_create_string(session, text.as_ptr(), text.len()) };
    let result = value(session, id);
    assert_eq!(result.value_type, STRING);
    assert_eq!(value_text(&result), "héllo wörld");
    assert!(jsbridge_try_dispose(session, id));
    jsbridge_session_destroy(session);
}

#[test]
fn test_script_error_is_a_handle() {
    let session = session();
    let id = execute(session, "throw new TypeError('nope')");
    assert!(id >= 0);
    let result = value(session, id);
    assert_eq!(result.value_type, EXECUTION_ERROR);
    assert!(value_text(&result).contains("TypeError: nope"));
    jsbridge_session_destroy(session);
}

#[test]
fn test_misuse_returns_sentinels() {
    let session = session();
    let number = jsbridge_create_number(session, 1.5);
    let name = utf16("x");

    assert_eq!(
        unsafe { jsbridge_get_property(session, number, name.as_ptr(), name.len()) },
        NO_HANDLE
    );
    assert_eq!(jsbridge_array_length(session, number), -1);
    assert_eq!(jsbridge_managed_object_id(session, 9999), NO_OBJECT);
    assert!(!unsafe { jsbridge_set_property(session, number, ptr::null(), 0, number, -1) });
    assert_eq!(
        unsafe { jsbridge_call(session, number, ptr::null(), 0, -1, ptr::null(), 0) },
        NO_HANDLE
    );
    assert_eq!(jsbridge_value_type(session, 9999), 0);
    jsbridge_session_destroy(session);
}

extern "C" fn add(
    session: FfiSession,
    _managed_object_id: i32,
    _is_construct: bool,
    _this: i32,
    args: *const i32,
    arg_count: u32,
) -> i32 {
    let args = unsafe { std::slice::from_raw_parts(args, arg_count as usize) };
    let sum: f64 = args.iter().map(|id| value(session, *id).number).sum();
    jsbridge_create_number(session, sum)
}

#[test]
fn test_function_callback() {
    let session = session();
    let class_name = utf16("add");
    let template =
        unsafe { jsbridge_create_function_template(session, class_name.as_ptr(), class_name.len(), Some(add)) };
    assert!(template >= 0);
    let function = jsbridge_get_function(session, template);
    expose(session, "add", function);

    let result = value(session, execute(session, "add(20, 22)"));
    assert_eq!(result.value_type, INT32);
    assert_eq!(result.int32, 42);

    let (a, b) = (jsbridge_create_integer(session, 1), jsbridge_create_integer(session, 2));
    let args = [a, b];
    let id = unsafe { jsbridge_call(session, function, ptr::null(), 0, -1, args.as_ptr(), args.len()) };
    assert_eq!(value(session, id).int32, 3);
    jsbridge_session_destroy(session);
}

extern "C" fn id_getter(name: *const u16, len: usize, info: *const FfiAccessorInfo) -> i32 {
    let name = String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(name, len) });
    let info = unsafe { &*info };
    if name == "id" {
        jsbridge_create_integer(info.session, info.managed_object_id)
    } else {
        NO_HANDLE
    }
}

#[test]
fn test_named_getter_callback() {
    let session = session();
    let template = jsbridge_create_object_template(session);
    let handlers = FfiNamedHandlers {
        getter: Some(id_getter),
        ..Default::default()
    };
    assert!(unsafe { jsbridge_register_named_handlers(session, template, &handlers) });

    let host = jsbridge_create_object_from_template(session, template, 31);
    assert_eq!(jsbridge_managed_object_id(session, host), 31);
    expose(session, "host", host);

    assert_eq!(value(session, execute(session, "host.id")).int32, 31);
    assert_eq!(value(session, execute(session, "host.other")).value_type, UNDEFINED);

    assert!(unsafe { jsbridge_register_named_handlers(session, template, ptr::null()) });
    assert_eq!(value(session, execute(session, "host.id")).value_type, UNDEFINED);
    jsbridge_session_destroy(session);
}

extern "C" fn always_dispose(_session: FfiSession, info: *const FfiHandleInfo) -> bool {
    let info = unsafe { &*info };
    info.object_id == 5
}

#[test]
fn test_weak_handle_collected() {
    let session = session();
    assert!(jsbridge_register_gc_callback(session, Some(always_dispose)));

    let object = jsbridge_create_object(session, 5);
    assert!(jsbridge_mark_disposing(session, object));
    assert_eq!(jsbridge_make_weak(session, object), 0);

    let mut info = FfiHandleInfo::default();
    assert!(unsafe { jsbridge_handle_info(session, object, &mut info) });
    assert_eq!(info.state, 2);

    assert!(jsbridge_force_gc(session));
    assert!(unsafe { jsbridge_handle_info(session, object, &mut info) });
    assert_eq!(info.state, 3);
    assert!(!jsbridge_dispose(session, object));
    jsbridge_session_destroy(session);
}

#[test]
fn test_managed_refs() {
    let session = session();
    let id = jsbridge_create_boolean(session, true);
    assert_eq!(jsbridge_add_managed_ref(session, id), 1);
    assert_eq!(jsbridge_add_managed_ref(session, id), 2);
    assert!(!jsbridge_try_dispose(session, id));
    assert_eq!(jsbridge_release_managed_ref(session, id), 1);
    assert!(jsbridge_try_dispose(session, id));
    assert_eq!(jsbridge_release_managed_ref(session, id), NO_HANDLE);
    jsbridge_session_destroy(session);
}
