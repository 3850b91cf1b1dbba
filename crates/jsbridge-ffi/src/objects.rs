//! Object, property and call exports

use jsbridge_core::{ObjectTemplateHandle, PropertyAttributes};

use crate::boundary::{NO_HANDLE, NO_OBJECT, OrSentinel, ids, text, with_session};
use crate::templates::object_template;
use crate::types::{AccessorGetterFn, AccessorSetterFn, FfiSession};

/// Attribute bits, or `None` for a negative value
pub(crate) fn attributes(bits: i32) -> Option<PropertyAttributes> {
    u32::try_from(bits).ok().map(PropertyAttributes::from_bits)
}

/// Tag an object with a managed id. `template` is `-1` for none.
/// Returns the id stored, or `-2`.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_connect_object(
    session: FfiSession,
    id: i32,
    managed_object_id: i32,
    template: i32,
) -> i32 {
    with_session(session, "jsbridge_connect_object", NO_OBJECT, |entry| {
        let template: Option<ObjectTemplateHandle> = object_template(template);
        entry
            .session
            .connect_object(id, managed_object_id, template)
            .or_sentinel("jsbridge_connect_object", NO_OBJECT)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_prototype_of(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_prototype_of", NO_HANDLE, |entry| {
        entry
            .session
            .prototype_of(id)
            .or_sentinel("jsbridge_prototype_of", NO_HANDLE)
    })
}

/// Call `subject` (null `name`) or its method `name`. `this` is `-1` for the
/// default receiver. Script exceptions come back as error handles.
///
/// # Safety
///
/// `name` must be null or valid for `name_len` reads, `args` null or valid
/// for `arg_count` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_call(
    session: FfiSession,
    subject: i32,
    name: *const u16,
    name_len: usize,
    this: i32,
    args: *const i32,
    arg_count: usize,
) -> i32 {
    with_session(session, "jsbridge_call", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantees
        let (name, args) = unsafe { (text(name, name_len), ids(args, arg_count)) };
        let this = (this >= 0).then_some(this);
        entry
            .session
            .call(subject, name.as_deref(), this, args)
            .or_sentinel("jsbridge_call", NO_HANDLE)
    })
}

/// Assign a property. `attributes` of `-1` performs a normal assignment,
/// anything else defines an own property with those attribute bits.
///
/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_set_property(
    session: FfiSession,
    id: i32,
    name: *const u16,
    len: usize,
    value: i32,
    attributes: i32,
) -> bool {
    with_session(session, "jsbridge_set_property", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(name) = (unsafe { text(name, len) }) else {
            return false;
        };
        entry
            .session
            .set_property(id, &name, value, self::attributes(attributes))
            .or_sentinel("jsbridge_set_property", false)
    })
}

/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_get_property(session: FfiSession, id: i32, name: *const u16, len: usize) -> i32 {
    with_session(session, "jsbridge_get_property", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(name) = (unsafe { text(name, len) }) else {
            return NO_HANDLE;
        };
        entry
            .session
            .get_property(id, &name)
            .or_sentinel("jsbridge_get_property", NO_HANDLE)
    })
}

/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_delete_property(session: FfiSession, id: i32, name: *const u16, len: usize) -> bool {
    with_session(session, "jsbridge_delete_property", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(name) = (unsafe { text(name, len) }) else {
            return false;
        };
        entry
            .session
            .delete_property(id, &name)
            .or_sentinel("jsbridge_delete_property", false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_property_index(session: FfiSession, id: i32, index: u32, value: i32) -> bool {
    with_session(session, "jsbridge_set_property_index", false, |entry| {
        entry
            .session
            .set_property_index(id, index, value)
            .or_sentinel("jsbridge_set_property_index", false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_get_property_index(session: FfiSession, id: i32, index: u32) -> i32 {
    with_session(session, "jsbridge_get_property_index", NO_HANDLE, |entry| {
        entry
            .session
            .get_property_index(id, index)
            .or_sentinel("jsbridge_get_property_index", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_delete_property_index(session: FfiSession, id: i32, index: u32) -> bool {
    with_session(session, "jsbridge_delete_property_index", false, |entry| {
        entry
            .session
            .delete_property_index(id, index)
            .or_sentinel("jsbridge_delete_property_index", false)
    })
}

/// Define an accessor property calling back into the host
///
/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_set_accessor(
    session: FfiSession,
    id: i32,
    name: *const u16,
    len: usize,
    getter: Option<AccessorGetterFn>,
    setter: Option<AccessorSetterFn>,
    attributes: i32,
) -> bool {
    with_session(session, "jsbridge_set_accessor", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let (Some(name), Some(getter)) = (unsafe { text(name, len) }, getter) else {
            return false;
        };
        let attributes = self::attributes(attributes).unwrap_or_default();
        entry
            .session
            .set_accessor(
                id,
                &name,
                crate::templates::accessor_getter(getter),
                setter.map(crate::templates::accessor_setter),
                attributes,
            )
            .map(|()| true)
            .or_sentinel("jsbridge_set_accessor", false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_property_names(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_property_names", NO_HANDLE, |entry| {
        entry
            .session
            .property_names(id)
            .or_sentinel("jsbridge_property_names", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_own_property_names(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_own_property_names", NO_HANDLE, |entry| {
        entry
            .session
            .own_property_names(id)
            .or_sentinel("jsbridge_own_property_names", NO_HANDLE)
    })
}

/// Attribute bits of an own property, `-1` when absent or on failure
///
/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_property_attributes(session: FfiSession, id: i32, name: *const u16, len: usize) -> i32 {
    with_session(session, "jsbridge_property_attributes", -1, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(name) = (unsafe { text(name, len) }) else {
            return -1;
        };
        entry
            .session
            .property_attributes(id, &name)
            .map(|attributes| attributes.map_or(-1, |a| a.bits() as i32))
            .or_sentinel("jsbridge_property_attributes", -1)
    })
}

/// Element count of an array handle, `-1` for anything else
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_array_length(session: FfiSession, id: i32) -> i32 {
    with_session(session, "jsbridge_array_length", -1, |entry| {
        entry
            .session
            .array_length(id)
            .map(|length| i32::try_from(length).unwrap_or(i32::MAX))
            .or_sentinel("jsbridge_array_length", -1)
    })
}
