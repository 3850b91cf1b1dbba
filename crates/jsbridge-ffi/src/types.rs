//! `#[repr(C)]` structs and callback signatures of the export surface

use jsbridge_core::{DisposalState, HandleStats, HandleValue, ProxyInfo, SessionConfig, ValueType};

use crate::boundary::{NO_HANDLE, NO_SESSION};

/// Session id as seen by the host (`0` never names a session)
pub type FfiSession = u32;

/// Borrowed UTF-16 text
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiString {
    pub ptr: *const u16,
    pub len: usize,
}

/// Context of a property callback
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiAccessorInfo {
    pub session: FfiSession,
    /// Managed object id of the intercepted object, `-1` if none
    pub managed_object_id: i32,
}

impl Default for FfiAccessorInfo {
    fn default() -> Self {
        Self {
            session: NO_SESSION,
            managed_object_id: -1,
        }
    }
}

/// Returns a handle id, or `-1` to pass the access through
pub type NamedGetterFn = extern "C" fn(name: *const u16, len: usize, info: *const FfiAccessorInfo) -> i32;
/// Returns a handle id, or `-1` to let the assignment through
pub type NamedSetterFn =
    extern "C" fn(name: *const u16, len: usize, value: i32, info: *const FfiAccessorInfo) -> i32;
/// Returns attribute bits, or `-1` to pass through
pub type NamedQueryFn = extern "C" fn(name: *const u16, len: usize, info: *const FfiAccessorInfo) -> i32;
/// Returns `-1` to pass through, `0` for false, anything else for true
pub type NamedDeleterFn = extern "C" fn(name: *const u16, len: usize, info: *const FfiAccessorInfo) -> i32;
/// Returns an array handle of names, or `-1`
pub type EnumeratorFn = extern "C" fn(info: *const FfiAccessorInfo) -> i32;

pub type IndexedGetterFn = extern "C" fn(index: u32, info: *const FfiAccessorInfo) -> i32;
pub type IndexedSetterFn = extern "C" fn(index: u32, value: i32, info: *const FfiAccessorInfo) -> i32;
pub type IndexedQueryFn = extern "C" fn(index: u32, info: *const FfiAccessorInfo) -> i32;
pub type IndexedDeleterFn = extern "C" fn(index: u32, info: *const FfiAccessorInfo) -> i32;

/// Function invocation. Returns a handle id, or `-1` for `undefined`.
pub type FunctionCallbackFn = extern "C" fn(
    session: FfiSession,
    managed_object_id: i32,
    is_construct: bool,
    this: i32,
    args: *const i32,
    arg_count: u32,
) -> i32;

/// Returns a handle id, or `-1` for `undefined`
pub type AccessorGetterFn =
    extern "C" fn(info: *const FfiAccessorInfo, name: *const u16, len: usize) -> i32;
pub type AccessorSetterFn =
    extern "C" fn(info: *const FfiAccessorInfo, name: *const u16, len: usize, value: i32);

/// Asked about a weak proxy whose object became unreachable; `true` disposes it
pub type GcCallbackFn = extern "C" fn(session: FfiSession, info: *const FfiHandleInfo) -> bool;

/// Named property callbacks; null entries pass through
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FfiNamedHandlers {
    pub getter: Option<NamedGetterFn>,
    pub setter: Option<NamedSetterFn>,
    pub query: Option<NamedQueryFn>,
    pub deleter: Option<NamedDeleterFn>,
    pub enumerator: Option<EnumeratorFn>,
}

/// Indexed property callbacks; null entries pass through
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FfiIndexedHandlers {
    pub getter: Option<IndexedGetterFn>,
    pub setter: Option<IndexedSetterFn>,
    pub query: Option<IndexedQueryFn>,
    pub deleter: Option<IndexedDeleterFn>,
    pub enumerator: Option<EnumeratorFn>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiSessionConfig {
    pub initial_handle_capacity: usize,
    pub initial_string_capacity: usize,
    pub idle_collect_on_growth: bool,
    pub duck_typed_type_descriptors: bool,
    pub drain_per_safe_point: usize,
}

impl From<&SessionConfig> for FfiSessionConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            initial_handle_capacity: config.initial_handle_capacity,
            initial_string_capacity: config.initial_string_capacity,
            idle_collect_on_growth: config.idle_collect_on_growth,
            duck_typed_type_descriptors: config.duck_typed_type_descriptors,
            drain_per_safe_point: config.drain_per_safe_point,
        }
    }
}

impl From<&FfiSessionConfig> for SessionConfig {
    fn from(config: &FfiSessionConfig) -> Self {
        SessionConfig::new()
            .initial_handle_capacity(config.initial_handle_capacity)
            .initial_string_capacity(config.initial_string_capacity)
            .idle_collect_on_growth(config.idle_collect_on_growth)
            .duck_typed_type_descriptors(config.duck_typed_type_descriptors)
            .drain_per_safe_point(config.drain_per_safe_point)
    }
}

/// Marshalled value of a handle.
///
/// Only the field matching `value_type` is meaningful. `text` stays valid
/// until the handle is updated again or disposed.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiValue {
    pub value_type: i32,
    pub managed_object_id: i32,
    pub boolean: bool,
    pub int32: i32,
    pub number: f64,
    pub text: *const u16,
    pub text_len: usize,
}

impl Default for FfiValue {
    fn default() -> Self {
        Self {
            value_type: ValueType::Uninitialized.as_i32(),
            managed_object_id: -1,
            boolean: false,
            int32: 0,
            number: 0.0,
            text: std::ptr::null(),
            text_len: 0,
        }
    }
}

impl FfiValue {
    pub(crate) fn new(value_type: ValueType, managed_object_id: i32, value: &HandleValue) -> Self {
        let mut out = Self {
            value_type: value_type.as_i32(),
            managed_object_id,
            ..Self::default()
        };
        match value {
            HandleValue::None => {}
            HandleValue::Bool(b) => out.boolean = *b,
            HandleValue::Int32(n) => {
                out.int32 = *n;
                out.number = f64::from(*n);
            }
            HandleValue::Number(n) => out.number = *n,
            HandleValue::String(text) => {
                out.text = text.as_slice().as_ptr();
                out.text_len = text.len();
            }
        }
        out
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiHandleInfo {
    pub id: i32,
    pub object_id: i32,
    pub value_type: i32,
    /// `0` in use, `1` managed disposing, `2` weak, `3` cached
    pub state: i32,
    pub managed_refs: u32,
    /// `-1` unless the handle wraps a type descriptor
    pub type_descriptor: i32,
}

impl Default for FfiHandleInfo {
    fn default() -> Self {
        Self {
            id: NO_HANDLE,
            object_id: -1,
            value_type: ValueType::Uninitialized.as_i32(),
            state: DisposalState::Cached as i32,
            managed_refs: 0,
            type_descriptor: -1,
        }
    }
}

impl From<&ProxyInfo> for FfiHandleInfo {
    fn from(info: &ProxyInfo) -> Self {
        Self {
            id: info.id,
            object_id: info.object_id,
            value_type: info.value_type.as_i32(),
            state: info.state as i32,
            managed_refs: info.managed_refs,
            type_descriptor: info.type_descriptor.unwrap_or(-1),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FfiStats {
    pub total_slots: usize,
    pub recycled: usize,
    pub in_use: usize,
    pub disposing: usize,
    pub weak: usize,
    pub pending_weak: usize,
    pub pending_strong: usize,
    pub identity_mappings: usize,
    pub pending_releases: usize,
    pub pooled_strings: usize,
}

impl From<&HandleStats> for FfiStats {
    fn from(stats: &HandleStats) -> Self {
        Self {
            total_slots: stats.total_slots,
            recycled: stats.recycled,
            in_use: stats.in_use,
            disposing: stats.disposing,
            weak: stats.weak,
            pending_weak: stats.pending_weak,
            pending_strong: stats.pending_strong,
            identity_mappings: stats.identity_mappings,
            pending_releases: stats.pending_releases,
            pooled_strings: stats.pooled_strings,
        }
    }
}
