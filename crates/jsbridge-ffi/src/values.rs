//! Value creation and marshalling

use jsbridge_core::ValueType;

use crate::boundary::{NO_HANDLE, OrSentinel, ids, text, with_session};
use crate::types::{FfiSession, FfiString, FfiValue};

macro_rules! create_export {
    ($name:ident, $method:ident, $arg:ident: $ty:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name(session: FfiSession, $arg: $ty) -> i32 {
            with_session(session, stringify!($name), NO_HANDLE, |entry| {
                entry
                    .session
                    .$method($arg)
                    .or_sentinel(stringify!($name), NO_HANDLE)
            })
        }
    };
    ($name:ident, $method:ident) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $name(session: FfiSession) -> i32 {
            with_session(session, stringify!($name), NO_HANDLE, |entry| {
                entry
                    .session
                    .$method()
                    .or_sentinel(stringify!($name), NO_HANDLE)
            })
        }
    };
}

create_export!(jsbridge_create_boolean, create_boolean, value: bool);
create_export!(jsbridge_create_integer, create_integer, value: i32);
create_export!(jsbridge_create_number, create_number, value: f64);
create_export!(jsbridge_create_date, create_date, time: f64);
create_export!(jsbridge_create_object, create_object, managed_object_id: i32);
create_export!(jsbridge_create_null, create_null);
create_export!(jsbridge_create_undefined, create_undefined);
create_export!(jsbridge_global, global);

/// # Safety
///
/// `value` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_string(session: FfiSession, value: *const u16, len: usize) -> i32 {
    with_session(session, "jsbridge_create_string", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(value) = (unsafe { text(value, len) }) else {
            return NO_HANDLE;
        };
        entry
            .session
            .create_string(&value)
            .or_sentinel("jsbridge_create_string", NO_HANDLE)
    })
}

/// Error handle of one of the failure kinds (`-1` to `-4`).
///
/// # Safety
///
/// `message` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_error(
    session: FfiSession,
    message: *const u16,
    len: usize,
    value_type: i32,
) -> i32 {
    with_session(session, "jsbridge_create_error", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(message) = (unsafe { text(message, len) }) else {
            return NO_HANDLE;
        };
        let Some(kind) = ValueType::from_i32(value_type) else {
            return NO_HANDLE;
        };
        entry
            .session
            .create_error(&message, kind)
            .or_sentinel("jsbridge_create_error", NO_HANDLE)
    })
}

/// # Safety
///
/// `items` must be null or valid for `count` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_array(session: FfiSession, items: *const i32, count: usize) -> i32 {
    with_session(session, "jsbridge_create_array", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantee
        let items = unsafe { ids(items, count) };
        entry
            .session
            .create_array(items)
            .or_sentinel("jsbridge_create_array", NO_HANDLE)
    })
}

/// # Safety
///
/// `items` must be null or valid for `count` reads, each entry valid for
/// its own length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_string_array(
    session: FfiSession,
    items: *const FfiString,
    count: usize,
) -> i32 {
    with_session(session, "jsbridge_create_string_array", NO_HANDLE, |entry| {
        let items = if items.is_null() || count == 0 {
            &[][..]
        } else {
            // SAFETY: forwarded caller guarantee
            unsafe { std::slice::from_raw_parts(items, count) }
        };
        let mut strings = Vec::with_capacity(items.len());
        for item in items {
            // SAFETY: forwarded caller guarantee
            strings.push(unsafe { text(item.ptr, item.len) }.unwrap_or_default());
        }
        let borrowed: Vec<&str> = strings.iter().map(String::as_str).collect();
        entry
            .session
            .create_string_array(&borrowed)
            .or_sentinel("jsbridge_create_string_array", NO_HANDLE)
    })
}

/// Refresh the marshalled value of a handle into `out`.
///
/// # Safety
///
/// `out` must be null or point to writable memory for one `FfiValue`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_update_value(session: FfiSession, id: i32, out: *mut FfiValue) -> bool {
    with_session(session, "jsbridge_update_value", false, |entry| {
        // SAFETY: caller guarantees `out` is null or writable
        let Some(out) = (unsafe { out.as_mut() }) else {
            return false;
        };
        let snapshot = entry.session.update_value(id).and_then(|value| {
            let value_type = entry.session.value_type(id)?;
            let object_id = entry.session.managed_object_id(id)?;
            Ok((value_type, object_id, value))
        });
        match snapshot {
            Ok((value_type, object_id, value)) => {
                // the text buffer moves into the entry with its heap storage intact
                *out = FfiValue::new(value_type, object_id, &value);
                entry.retain(id, value);
                true
            }
            Err(err) => {
                tracing::debug!(id, %err, "jsbridge_update_value failed");
                false
            }
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_value_type(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_value_type", ValueType::Uninitialized.as_i32(), |entry| {
        entry
            .session
            .value_type(id)
            .map(ValueType::as_i32)
            .or_sentinel("jsbridge_value_type", ValueType::Uninitialized.as_i32())
    })
}
