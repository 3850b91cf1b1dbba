//! Template exports and host callback adapters
//!
//! Host callbacks are plain function pointers. Each is wrapped in a closure
//! of the matching core capability type; text crosses as UTF-16 and handle
//! ids as `i32`, with `-1` meaning "nothing" in both directions.

use std::sync::Arc;

use jsbridge_core::{
    AccessorGetter, AccessorSetter, CallbackScope, FunctionCall, FunctionCallback,
    FunctionTemplateHandle, HandleId, IndexedDeleter, IndexedGetter, IndexedHandlers,
    IndexedQuery, IndexedSetter, Intercept, NamedDeleter, NamedEnumerator, NamedGetter,
    NamedHandlers, NamedQuery, NamedSetter, ObjectTemplateHandle, PropertyAttributes,
};

use crate::boundary::{NO_HANDLE, OrSentinel, ids, text, utf16, with_session};
use crate::objects::attributes;
use crate::types::{
    AccessorGetterFn, AccessorSetterFn, EnumeratorFn, FfiAccessorInfo, FfiIndexedHandlers,
    FfiNamedHandlers, FfiSession, FunctionCallbackFn, IndexedDeleterFn, IndexedGetterFn,
    IndexedQueryFn, IndexedSetterFn, NamedDeleterFn, NamedGetterFn, NamedQueryFn, NamedSetterFn,
};

pub(crate) fn object_template(raw: i32) -> Option<ObjectTemplateHandle> {
    u32::try_from(raw).ok().map(ObjectTemplateHandle::from_raw)
}

fn function_template(raw: i32) -> Option<FunctionTemplateHandle> {
    u32::try_from(raw).ok().map(FunctionTemplateHandle::from_raw)
}

fn raw_id(raw: u32) -> i32 {
    i32::try_from(raw).unwrap_or(NO_HANDLE)
}

fn info(scope: &CallbackScope<'_>) -> FfiAccessorInfo {
    FfiAccessorInfo {
        session: scope.session().id(),
        managed_object_id: scope.managed_object_id(),
    }
}

fn returned(id: i32) -> Option<HandleId> {
    (id >= 0).then_some(id)
}

fn query_result(raw: i32) -> Intercept<PropertyAttributes> {
    attributes(raw).map_or(Intercept::PassThrough, Intercept::Value)
}

fn deleter_result(raw: i32) -> Intercept<bool> {
    if raw < 0 {
        Intercept::PassThrough
    } else {
        Intercept::Value(raw != 0)
    }
}

fn named_getter(f: NamedGetterFn) -> NamedGetter {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str| {
        let name = utf16(name);
        returned(f(name.as_ptr(), name.len(), &info(scope)))
    })
}

fn named_setter(f: NamedSetterFn) -> NamedSetter {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str, value: HandleId| {
        let name = utf16(name);
        returned(f(name.as_ptr(), name.len(), value, &info(scope)))
    })
}

fn named_query(f: NamedQueryFn) -> NamedQuery {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str| {
        let name = utf16(name);
        query_result(f(name.as_ptr(), name.len(), &info(scope)))
    })
}

fn named_deleter(f: NamedDeleterFn) -> NamedDeleter {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str| {
        let name = utf16(name);
        deleter_result(f(name.as_ptr(), name.len(), &info(scope)))
    })
}

fn enumerator(f: EnumeratorFn) -> NamedEnumerator {
    Arc::new(move |scope: &CallbackScope<'_>| returned(f(&info(scope))))
}

fn named(handlers: &FfiNamedHandlers) -> NamedHandlers {
    NamedHandlers {
        getter: handlers.getter.map(named_getter),
        setter: handlers.setter.map(named_setter),
        query: handlers.query.map(named_query),
        deleter: handlers.deleter.map(named_deleter),
        enumerator: handlers.enumerator.map(enumerator),
    }
}

fn indexed_getter(f: IndexedGetterFn) -> IndexedGetter {
    Arc::new(move |scope: &CallbackScope<'_>, index: u32| returned(f(index, &info(scope))))
}

fn indexed_setter(f: IndexedSetterFn) -> IndexedSetter {
    Arc::new(move |scope: &CallbackScope<'_>, index: u32, value: HandleId| {
        returned(f(index, value, &info(scope)))
    })
}

fn indexed_query(f: IndexedQueryFn) -> IndexedQuery {
    Arc::new(move |scope: &CallbackScope<'_>, index: u32| query_result(f(index, &info(scope))))
}

fn indexed_deleter(f: IndexedDeleterFn) -> IndexedDeleter {
    Arc::new(move |scope: &CallbackScope<'_>, index: u32| deleter_result(f(index, &info(scope))))
}

fn indexed(handlers: &FfiIndexedHandlers) -> IndexedHandlers {
    IndexedHandlers {
        getter: handlers.getter.map(indexed_getter),
        setter: handlers.setter.map(indexed_setter),
        query: handlers.query.map(indexed_query),
        deleter: handlers.deleter.map(indexed_deleter),
        // same signature for both enumerators
        enumerator: handlers.enumerator.map(enumerator),
    }
}

pub(crate) fn function(f: FunctionCallbackFn) -> FunctionCallback {
    Arc::new(move |scope: &CallbackScope<'_>, call: &FunctionCall<'_>| {
        let arg_count = u32::try_from(call.args.len()).unwrap_or(u32::MAX);
        returned(f(
            scope.session().id(),
            scope.managed_object_id(),
            call.is_construct,
            call.this,
            call.args.as_ptr(),
            arg_count,
        ))
    })
}

pub(crate) fn accessor_getter(f: AccessorGetterFn) -> AccessorGetter {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str| {
        let name = utf16(name);
        returned(f(&info(scope), name.as_ptr(), name.len()))
    })
}

pub(crate) fn accessor_setter(f: AccessorSetterFn) -> AccessorSetter {
    Arc::new(move |scope: &CallbackScope<'_>, name: &str, value: HandleId| {
        let name = utf16(name);
        f(&info(scope), name.as_ptr(), name.len(), value);
    })
}

/// Returns the template id, or `-1`
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_create_object_template(session: FfiSession) -> i32 {
    with_session(session, "jsbridge_create_object_template", NO_HANDLE, |entry| {
        entry
            .session
            .create_object_template()
            .map(|template| raw_id(template.raw()))
            .or_sentinel("jsbridge_create_object_template", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_delete_object_template(session: FfiSession, template: i32) -> bool {
    with_session(session, "jsbridge_delete_object_template", false, |entry| {
        let Some(template) = object_template(template) else {
            return false;
        };
        entry
            .session
            .delete_object_template(template)
            .map(|()| true)
            .or_sentinel("jsbridge_delete_object_template", false)
    })
}

/// Install named property callbacks; null `handlers` removes them.
///
/// # Safety
///
/// `handlers` must be null or point to a valid `FfiNamedHandlers`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_register_named_handlers(
    session: FfiSession,
    template: i32,
    handlers: *const FfiNamedHandlers,
) -> bool {
    with_session(session, "jsbridge_register_named_handlers", false, |entry| {
        let Some(template) = object_template(template) else {
            return false;
        };
        // SAFETY: caller guarantees `handlers` is null or valid
        let result = match unsafe { handlers.as_ref() } {
            Some(handlers) => entry.session.register_named_handlers(template, named(handlers)),
            None => entry.session.unregister_named_handlers(template),
        };
        result.map(|()| true).or_sentinel("jsbridge_register_named_handlers", false)
    })
}

/// Install indexed property callbacks; null `handlers` removes them.
///
/// # Safety
///
/// `handlers` must be null or point to a valid `FfiIndexedHandlers`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_register_indexed_handlers(
    session: FfiSession,
    template: i32,
    handlers: *const FfiIndexedHandlers,
) -> bool {
    with_session(session, "jsbridge_register_indexed_handlers", false, |entry| {
        let Some(template) = object_template(template) else {
            return false;
        };
        // SAFETY: caller guarantees `handlers` is null or valid
        let result = match unsafe { handlers.as_ref() } {
            Some(handlers) => entry.session.register_indexed_handlers(template, indexed(handlers)),
            None => entry.session.unregister_indexed_handlers(template),
        };
        result.map(|()| true).or_sentinel("jsbridge_register_indexed_handlers", false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_unregister_named_handlers(session: FfiSession, template: i32) -> bool {
    with_session(session, "jsbridge_unregister_named_handlers", false, |entry| {
        object_template(template).is_some_and(|template| {
            entry
                .session
                .unregister_named_handlers(template)
                .map(|()| true)
                .or_sentinel("jsbridge_unregister_named_handlers", false)
        })
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_unregister_indexed_handlers(session: FfiSession, template: i32) -> bool {
    with_session(session, "jsbridge_unregister_indexed_handlers", false, |entry| {
        object_template(template).is_some_and(|template| {
            entry
                .session
                .unregister_indexed_handlers(template)
                .map(|()| true)
                .or_sentinel("jsbridge_unregister_indexed_handlers", false)
        })
    })
}

/// Make instances callable; null `callback` removes the handler
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_call_handler(
    session: FfiSession,
    template: i32,
    callback: Option<FunctionCallbackFn>,
) -> bool {
    with_session(session, "jsbridge_set_call_handler", false, |entry| {
        let Some(template) = object_template(template) else {
            return false;
        };
        entry
            .session
            .set_call_handler(template, callback.map(function))
            .map(|()| true)
            .or_sentinel("jsbridge_set_call_handler", false)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_create_object_from_template(
    session: FfiSession,
    template: i32,
    managed_object_id: i32,
) -> i32 {
    with_session(session, "jsbridge_create_object_from_template", NO_HANDLE, |entry| {
        let Some(template) = object_template(template) else {
            return NO_HANDLE;
        };
        entry
            .session
            .create_object_from_template(template, managed_object_id)
            .or_sentinel("jsbridge_create_object_from_template", NO_HANDLE)
    })
}

/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_set_template_property(
    session: FfiSession,
    template: i32,
    name: *const u16,
    len: usize,
    value: i32,
    attributes: i32,
) -> bool {
    with_session(session, "jsbridge_set_template_property", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let (Some(template), Some(name)) = (object_template(template), unsafe { text(name, len) }) else {
            return false;
        };
        let attributes = self::attributes(attributes).unwrap_or_default();
        entry
            .session
            .set_template_property(template, &name, value, attributes)
            .map(|()| true)
            .or_sentinel("jsbridge_set_template_property", false)
    })
}

/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_set_template_accessor(
    session: FfiSession,
    template: i32,
    name: *const u16,
    len: usize,
    getter: Option<AccessorGetterFn>,
    setter: Option<AccessorSetterFn>,
    attributes: i32,
) -> bool {
    with_session(session, "jsbridge_set_template_accessor", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let (Some(template), Some(name), Some(getter)) =
            (object_template(template), unsafe { text(name, len) }, getter)
        else {
            return false;
        };
        let attributes = self::attributes(attributes).unwrap_or_default();
        entry
            .session
            .set_template_accessor(
                template,
                &name,
                accessor_getter(getter),
                setter.map(accessor_setter),
                attributes,
            )
            .map(|()| true)
            .or_sentinel("jsbridge_set_template_accessor", false)
    })
}

/// Replace the global object. Returns a handle to the new global.
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_set_global_object_template(session: FfiSession, template: i32) -> i32 {
    with_session(session, "jsbridge_set_global_object_template", NO_HANDLE, |entry| {
        let Some(template) = object_template(template) else {
            return NO_HANDLE;
        };
        entry
            .session
            .set_global_object_template(template)
            .or_sentinel("jsbridge_set_global_object_template", NO_HANDLE)
    })
}

/// Returns the function template id, or `-1`
///
/// # Safety
///
/// `class_name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_function_template(
    session: FfiSession,
    class_name: *const u16,
    len: usize,
    callback: Option<FunctionCallbackFn>,
) -> i32 {
    with_session(session, "jsbridge_create_function_template", NO_HANDLE, |entry| {
        // SAFETY: forwarded caller guarantee
        let Some(class_name) = (unsafe { text(class_name, len) }) else {
            return NO_HANDLE;
        };
        entry
            .session
            .create_function_template(&class_name, callback.map(function))
            .map(|template| raw_id(template.raw()))
            .or_sentinel("jsbridge_create_function_template", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_delete_function_template(session: FfiSession, template: i32) -> bool {
    with_session(session, "jsbridge_delete_function_template", false, |entry| {
        function_template(template).is_some_and(|template| {
            entry
                .session
                .delete_function_template(template)
                .map(|()| true)
                .or_sentinel("jsbridge_delete_function_template", false)
        })
    })
}

/// Object template id for instances created with `new`, or `-1`
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_function_instance_template(session: FfiSession, template: i32) -> i32 {
    with_session(session, "jsbridge_function_instance_template", NO_HANDLE, |entry| {
        let Some(template) = function_template(template) else {
            return NO_HANDLE;
        };
        entry
            .session
            .function_instance_template(template)
            .map(|object| raw_id(object.raw()))
            .or_sentinel("jsbridge_function_instance_template", NO_HANDLE)
    })
}

/// Object template id of the function's prototype, or `-1`
#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_function_prototype_template(session: FfiSession, template: i32) -> i32 {
    with_session(session, "jsbridge_function_prototype_template", NO_HANDLE, |entry| {
        let Some(template) = function_template(template) else {
            return NO_HANDLE;
        };
        entry
            .session
            .function_prototype_template(template)
            .map(|object| raw_id(object.raw()))
            .or_sentinel("jsbridge_function_prototype_template", NO_HANDLE)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn jsbridge_get_function(session: FfiSession, template: i32) -> i32 {
    with_session(session, "jsbridge_get_function", NO_HANDLE, |entry| {
        let Some(template) = function_template(template) else {
            return NO_HANDLE;
        };
        entry
            .session
            .get_function(template)
            .or_sentinel("jsbridge_get_function", NO_HANDLE)
    })
}

/// `new F(args)` tagged with `managed_object_id`
///
/// # Safety
///
/// `args` must be null or valid for `arg_count` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_create_function_instance(
    session: FfiSession,
    template: i32,
    managed_object_id: i32,
    args: *const i32,
    arg_count: usize,
) -> i32 {
    with_session(session, "jsbridge_create_function_instance", NO_HANDLE, |entry| {
        let Some(template) = function_template(template) else {
            return NO_HANDLE;
        };
        // SAFETY: forwarded caller guarantee
        let args = unsafe { ids(args, arg_count) };
        entry
            .session
            .create_function_instance(template, managed_object_id, args)
            .or_sentinel("jsbridge_create_function_instance", NO_HANDLE)
    })
}

/// # Safety
///
/// `name` must be valid for `len` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsbridge_set_function_template_property(
    session: FfiSession,
    template: i32,
    name: *const u16,
    len: usize,
    value: i32,
    attributes: i32,
) -> bool {
    with_session(session, "jsbridge_set_function_template_property", false, |entry| {
        // SAFETY: forwarded caller guarantee
        let (Some(template), Some(name)) = (function_template(template), unsafe { text(name, len) }) else {
            return false;
        };
        let attributes = self::attributes(attributes).unwrap_or_default();
        entry
            .session
            .set_function_template_property(template, &name, value, attributes)
            .map(|()| true)
            .or_sentinel("jsbridge_set_function_template_property", false)
    })
}
