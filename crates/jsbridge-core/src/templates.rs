//! Managed callbacks behind object and function templates
//!
//! The managed side describes what it can do with plain capability structs
//! ([`NamedHandlers`], [`IndexedHandlers`], [`FunctionCallback`], accessor
//! closures). This module adapts them to the engine's interceptor, native
//! function and accessor traits:
//!
//! - engine values passed to a callback are resolved to handle ids first,
//!   and the ones created just for the call are disposed afterwards,
//! - a returned handle is consumed: its value is read, it is disposed, and
//!   error-typed handles are rethrown as `Error(message)`,
//! - a panicking callback becomes an engine exception instead of unwinding
//!   through the engine.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use jsbridge_engine::{
    CallInfo, ErrorName, FunctionTemplateId, Intercepted, Isolate, NativeAccessor,
    NativeFunction, ObjectRef, ObjectTemplateId, PropertyAttributes, PropertyInterceptor, Value,
};

use crate::error::BridgeResult;
use crate::proxy::HandleId;
use crate::session::{EngineSession, SessionInner};

/// Answer of a query or deleter callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept<T> {
    /// Let the engine handle the property normally
    PassThrough,
    Value(T),
}

/// Context handed to every managed callback
pub struct CallbackScope<'a> {
    session: &'a EngineSession,
    holder: Value,
    managed_object_id: i32,
}

impl<'a> CallbackScope<'a> {
    pub(crate) fn new(session: &'a EngineSession, holder: Value, managed_object_id: i32) -> Self {
        Self {
            session,
            holder,
            managed_object_id,
        }
    }

    pub fn session(&self) -> &EngineSession {
        self.session
    }

    /// Managed object id of the object the callback runs for (`-1` if none)
    pub fn managed_object_id(&self) -> i32 {
        self.managed_object_id
    }

    /// Handle to the object the callback runs for
    pub fn holder(&self) -> BridgeResult<HandleId> {
        self.session.resolve(self.holder.clone())
    }
}

/// Arguments of a managed function call. All ids are only valid during the call.
#[derive(Debug)]
pub struct FunctionCall<'a> {
    pub is_construct: bool,
    pub this: HandleId,
    pub args: &'a [HandleId],
}

impl FunctionCall<'_> {
    pub fn arg(&self, index: usize) -> Option<HandleId> {
        self.args.get(index).copied()
    }
}

pub type NamedGetter = Arc<dyn Fn(&CallbackScope<'_>, &str) -> Option<HandleId> + Send + Sync>;
pub type NamedSetter =
    Arc<dyn Fn(&CallbackScope<'_>, &str, HandleId) -> Option<HandleId> + Send + Sync>;
pub type NamedQuery =
    Arc<dyn Fn(&CallbackScope<'_>, &str) -> Intercept<PropertyAttributes> + Send + Sync>;
pub type NamedDeleter = Arc<dyn Fn(&CallbackScope<'_>, &str) -> Intercept<bool> + Send + Sync>;
/// Returns a handle to an array of property names
pub type NamedEnumerator = Arc<dyn Fn(&CallbackScope<'_>) -> Option<HandleId> + Send + Sync>;

pub type IndexedGetter = Arc<dyn Fn(&CallbackScope<'_>, u32) -> Option<HandleId> + Send + Sync>;
pub type IndexedSetter =
    Arc<dyn Fn(&CallbackScope<'_>, u32, HandleId) -> Option<HandleId> + Send + Sync>;
pub type IndexedQuery =
    Arc<dyn Fn(&CallbackScope<'_>, u32) -> Intercept<PropertyAttributes> + Send + Sync>;
pub type IndexedDeleter = Arc<dyn Fn(&CallbackScope<'_>, u32) -> Intercept<bool> + Send + Sync>;
/// Returns a handle to an array of indices
pub type IndexedEnumerator = Arc<dyn Fn(&CallbackScope<'_>) -> Option<HandleId> + Send + Sync>;

/// Function invocation. `None` returns `undefined` (or the new object for `new`).
pub type FunctionCallback =
    Arc<dyn Fn(&CallbackScope<'_>, &FunctionCall<'_>) -> Option<HandleId> + Send + Sync>;

pub type AccessorGetter = Arc<dyn Fn(&CallbackScope<'_>, &str) -> Option<HandleId> + Send + Sync>;
pub type AccessorSetter = Arc<dyn Fn(&CallbackScope<'_>, &str, HandleId) + Send + Sync>;

/// Named property capabilities. Missing entries pass through.
#[derive(Clone, Default)]
pub struct NamedHandlers {
    pub getter: Option<NamedGetter>,
    pub setter: Option<NamedSetter>,
    pub query: Option<NamedQuery>,
    pub deleter: Option<NamedDeleter>,
    pub enumerator: Option<NamedEnumerator>,
}

/// Indexed property capabilities. Missing entries pass through.
#[derive(Clone, Default)]
pub struct IndexedHandlers {
    pub getter: Option<IndexedGetter>,
    pub setter: Option<IndexedSetter>,
    pub query: Option<IndexedQuery>,
    pub deleter: Option<IndexedDeleter>,
    pub enumerator: Option<IndexedEnumerator>,
}

/// Session-local handle to an object template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectTemplateHandle(u32);

/// Session-local handle to a function template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionTemplateHandle(u32);

impl ObjectTemplateHandle {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl FunctionTemplateHandle {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Default)]
pub(crate) struct TemplateHandlers {
    pub named: Option<NamedHandlers>,
    pub indexed: Option<IndexedHandlers>,
}

pub(crate) struct BridgeObjectTemplate {
    pub engine: ObjectTemplateId,
    pub handlers: Arc<RwLock<TemplateHandlers>>,
}

pub(crate) struct BridgeFunctionTemplate {
    pub engine: FunctionTemplateId,
    pub instance: Option<ObjectTemplateHandle>,
    pub prototype: Option<ObjectTemplateHandle>,
}

/// Templates registered through one session
#[derive(Default)]
pub(crate) struct TemplateTable {
    objects: Vec<Option<BridgeObjectTemplate>>,
    functions: Vec<Option<BridgeFunctionTemplate>>,
}

impl TemplateTable {
    pub fn add_object(&mut self, template: BridgeObjectTemplate) -> ObjectTemplateHandle {
        self.objects.push(Some(template));
        ObjectTemplateHandle(self.objects.len() as u32 - 1)
    }

    pub fn add_function(&mut self, template: BridgeFunctionTemplate) -> FunctionTemplateHandle {
        self.functions.push(Some(template));
        FunctionTemplateHandle(self.functions.len() as u32 - 1)
    }

    pub fn object(&self, handle: ObjectTemplateHandle) -> Option<&BridgeObjectTemplate> {
        self.objects.get(handle.0 as usize)?.as_ref()
    }

    pub fn function(&self, handle: FunctionTemplateHandle) -> Option<&BridgeFunctionTemplate> {
        self.functions.get(handle.0 as usize)?.as_ref()
    }

    pub fn function_mut(
        &mut self,
        handle: FunctionTemplateHandle,
    ) -> Option<&mut BridgeFunctionTemplate> {
        self.functions.get_mut(handle.0 as usize)?.as_mut()
    }

    pub fn remove_object(&mut self, handle: ObjectTemplateHandle) -> Option<BridgeObjectTemplate> {
        self.objects.get_mut(handle.0 as usize)?.take()
    }

    pub fn remove_function(
        &mut self,
        handle: FunctionTemplateHandle,
    ) -> Option<BridgeFunctionTemplate> {
        self.functions.get_mut(handle.0 as usize)?.take()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.functions.clear();
    }
}

/// Exception text for a callback that cannot be reached
pub(crate) fn callback_gone(name: &str) -> String {
    format!("'{name}' no longer exists - perhaps the GC collected it.")
}

/// Run managed code, turning a panic into a thrown engine error
fn guarded<T>(name: &str, isolate: &Isolate, f: impl FnOnce() -> T) -> Result<T, Value> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        warn!(callback = name, "managed callback panicked");
        isolate.new_error(ErrorName::Error, &callback_gone(name))
    })
}

/// Live session behind a weak back-reference, or the exception to throw
fn upgrade(session: &Weak<SessionInner>, name: &str, isolate: &Isolate) -> Result<EngineSession, Value> {
    session
        .upgrade()
        .map(EngineSession::from_inner)
        .filter(|session| !session.is_disposed())
        .ok_or_else(|| {
            warn!(callback = name, "callback fired for a disposed session");
            isolate.new_error(ErrorName::Error, &callback_gone(name))
        })
}

fn scope_for<'a>(session: &'a EngineSession, isolate: &Isolate, holder: ObjectRef) -> CallbackScope<'a> {
    let managed_object_id = session.lookup_object_id(isolate, holder);
    CallbackScope::new(session, Value::Object(holder), managed_object_id)
}

fn intercepted(result: Result<Value, Value>) -> Intercepted<Value> {
    match result {
        Ok(value) => Intercepted::Value(value),
        Err(thrown) => Intercepted::Throw(thrown),
    }
}

fn passthrough<T>(result: Result<Intercept<T>, Value>) -> Intercepted<T> {
    match result {
        Ok(Intercept::PassThrough) => Intercepted::NotIntercepted,
        Ok(Intercept::Value(value)) => Intercepted::Value(value),
        Err(thrown) => Intercepted::Throw(thrown),
    }
}

/// Interceptor installed on every object template created by a session
pub(crate) struct BridgeInterceptor {
    pub session: Weak<SessionInner>,
    pub handlers: Arc<RwLock<TemplateHandlers>>,
}

impl BridgeInterceptor {
    fn named<T>(&self, pick: impl FnOnce(&NamedHandlers) -> Option<T>) -> Option<T> {
        self.handlers.read().named.as_ref().and_then(pick)
    }

    fn indexed<T>(&self, pick: impl FnOnce(&IndexedHandlers) -> Option<T>) -> Option<T> {
        self.handlers.read().indexed.as_ref().and_then(pick)
    }

    /// Invoke `f` with a scope, then let `finish` interpret the outcome
    fn invoke<T, R>(
        &self,
        name: &str,
        isolate: &Isolate,
        holder: ObjectRef,
        f: impl FnOnce(&CallbackScope<'_>) -> T,
        finish: impl FnOnce(&EngineSession, T) -> Result<R, Value>,
    ) -> Result<R, Value> {
        let session = upgrade(&self.session, name, isolate)?;
        let scope = scope_for(&session, isolate, holder);
        let outcome = guarded(name, isolate, || f(&scope))?;
        finish(&session, outcome)
    }

    fn get(
        &self,
        name: &str,
        isolate: &Isolate,
        holder: ObjectRef,
        f: impl FnOnce(&CallbackScope<'_>) -> Option<HandleId>,
    ) -> Intercepted<Value> {
        let result = self.invoke(name, isolate, holder, f, |session, outcome| {
            Ok(outcome.map(|id| session.consume_result(isolate, id)))
        });
        match result {
            Ok(None) => Intercepted::NotIntercepted,
            Ok(Some(value)) => intercepted(value),
            Err(thrown) => Intercepted::Throw(thrown),
        }
    }

    fn set(
        &self,
        name: &str,
        isolate: &Isolate,
        holder: ObjectRef,
        value: &Value,
        f: impl FnOnce(&CallbackScope<'_>, HandleId) -> Option<HandleId>,
    ) -> Intercepted<Value> {
        let session = match upgrade(&self.session, name, isolate) {
            Ok(session) => session,
            Err(thrown) => return Intercepted::Throw(thrown),
        };
        let argument = match session.resolve_temporary(isolate, value.clone()) {
            Ok(argument) => argument,
            Err(err) => return Intercepted::Throw(isolate.new_error(ErrorName::Error, &err.to_string())),
        };
        let scope = scope_for(&session, isolate, holder);
        let outcome = guarded(name, isolate, || f(&scope, argument.id));

        // the result may be the argument itself: read it before releasing
        let result = match outcome {
            Ok(None) => Intercepted::NotIntercepted,
            Ok(Some(id)) => intercepted(session.consume_result(isolate, id)),
            Err(thrown) => Intercepted::Throw(thrown),
        };
        session.release_temporaries(&[argument]);
        session.drain_transitions();
        result
    }

    fn enumerate<K>(
        &self,
        name: &str,
        isolate: &Isolate,
        holder: ObjectRef,
        f: impl FnOnce(&CallbackScope<'_>) -> Option<HandleId>,
        key: impl Fn(&Value) -> Option<K>,
    ) -> Intercepted<Vec<K>> {
        let result = self.invoke(name, isolate, holder, f, |session, outcome| {
            let Some(id) = outcome else {
                return Ok(None);
            };
            let array = session.consume_result(isolate, id)?;
            let Some(array) = array.as_object() else {
                return Ok(Some(Vec::new()));
            };
            let length = isolate.array_length(array).unwrap_or(0);
            let mut keys = Vec::with_capacity(length as usize);
            for index in 0..length {
                let element = isolate.get_index(array, index).map_err(|e| isolate.rethrow(e))?;
                keys.extend(key(&element));
            }
            Ok(Some(keys))
        });
        match result {
            Ok(None) => Intercepted::NotIntercepted,
            Ok(Some(keys)) => Intercepted::Value(keys),
            Err(thrown) => Intercepted::Throw(thrown),
        }
    }
}

impl PropertyInterceptor for BridgeInterceptor {
    fn get_named(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Intercepted<Value> {
        let Some(getter) = self.named(|h| h.getter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.get("NamedPropertyGetter", isolate, holder, |scope| getter(scope, name))
    }

    fn set_named(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        name: &str,
        value: &Value,
    ) -> Intercepted<Value> {
        let Some(setter) = self.named(|h| h.setter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.set("NamedPropertySetter", isolate, holder, value, |scope, value| {
            setter(scope, name, value)
        })
    }

    fn query_named(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        name: &str,
    ) -> Intercepted<PropertyAttributes> {
        let Some(query) = self.named(|h| h.query.clone()) else {
            return Intercepted::NotIntercepted;
        };
        passthrough(self.invoke(
            "NamedPropertyQuery",
            isolate,
            holder,
            |scope| query(scope, name),
            |_, outcome| Ok(outcome),
        ))
    }

    fn delete_named(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Intercepted<bool> {
        let Some(deleter) = self.named(|h| h.deleter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        passthrough(self.invoke(
            "NamedPropertyDeleter",
            isolate,
            holder,
            |scope| deleter(scope, name),
            |_, outcome| Ok(outcome),
        ))
    }

    fn enumerate_named(&self, isolate: &Isolate, holder: ObjectRef) -> Intercepted<Vec<String>> {
        let Some(enumerator) = self.named(|h| h.enumerator.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.enumerate(
            "NamedPropertyEnumerator",
            isolate,
            holder,
            |scope| enumerator(scope),
            |element| Some(isolate.to_display_string(element)),
        )
    }

    fn get_indexed(&self, isolate: &Isolate, holder: ObjectRef, index: u32) -> Intercepted<Value> {
        let Some(getter) = self.indexed(|h| h.getter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.get("IndexedPropertyGetter", isolate, holder, |scope| getter(scope, index))
    }

    fn set_indexed(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        index: u32,
        value: &Value,
    ) -> Intercepted<Value> {
        let Some(setter) = self.indexed(|h| h.setter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.set("IndexedPropertySetter", isolate, holder, value, |scope, value| {
            setter(scope, index, value)
        })
    }

    fn query_indexed(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        index: u32,
    ) -> Intercepted<PropertyAttributes> {
        let Some(query) = self.indexed(|h| h.query.clone()) else {
            return Intercepted::NotIntercepted;
        };
        passthrough(self.invoke(
            "IndexedPropertyQuery",
            isolate,
            holder,
            |scope| query(scope, index),
            |_, outcome| Ok(outcome),
        ))
    }

    fn delete_indexed(&self, isolate: &Isolate, holder: ObjectRef, index: u32) -> Intercepted<bool> {
        let Some(deleter) = self.indexed(|h| h.deleter.clone()) else {
            return Intercepted::NotIntercepted;
        };
        passthrough(self.invoke(
            "IndexedPropertyDeleter",
            isolate,
            holder,
            |scope| deleter(scope, index),
            |_, outcome| Ok(outcome),
        ))
    }

    fn enumerate_indexed(&self, isolate: &Isolate, holder: ObjectRef) -> Intercepted<Vec<u32>> {
        let Some(enumerator) = self.indexed(|h| h.enumerator.clone()) else {
            return Intercepted::NotIntercepted;
        };
        self.enumerate(
            "IndexedPropertyEnumerator",
            isolate,
            holder,
            |scope| enumerator(scope),
            |element| {
                let n = element.to_number();
                (n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64).then_some(n as u32)
            },
        )
    }
}

/// Native function forwarding to a managed [`FunctionCallback`]
pub(crate) struct BridgeFunction {
    pub session: Weak<SessionInner>,
    pub name: &'static str,
    pub callback: FunctionCallback,
}

impl NativeFunction for BridgeFunction {
    fn call(&self, isolate: &Isolate, info: &CallInfo<'_>) -> Result<Value, Value> {
        let session = upgrade(&self.session, self.name, isolate)?;
        let holder = match &info.this {
            Value::Object(this) => *this,
            _ => info.callee,
        };
        let scope = scope_for(&session, isolate, holder);

        let mut temporaries = Vec::with_capacity(info.args.len() + 1);
        for value in std::iter::once(&info.this).chain(info.args) {
            match session.resolve_temporary(isolate, value.clone()) {
                Ok(temporary) => temporaries.push(temporary),
                Err(err) => {
                    session.release_temporaries(&temporaries);
                    return Err(isolate.new_error(ErrorName::Error, &err.to_string()));
                }
            }
        }

        let ids: Vec<HandleId> = temporaries.iter().map(|t| t.id).collect();
        let call = FunctionCall {
            is_construct: info.is_construct,
            this: ids[0],
            args: &ids[1..],
        };
        let outcome = guarded(self.name, isolate, || (self.callback)(&scope, &call));
        let result = match outcome {
            Ok(Some(id)) => session.consume_result(isolate, id),
            Ok(None) => Ok(Value::Undefined),
            Err(thrown) => Err(thrown),
        };
        session.release_temporaries(&temporaries);
        result
    }
}

/// Accessor forwarding to managed getter/setter closures
pub(crate) struct BridgeAccessor {
    pub session: Weak<SessionInner>,
    pub getter: AccessorGetter,
    pub setter: Option<AccessorSetter>,
}

impl NativeAccessor for BridgeAccessor {
    fn get(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Result<Value, Value> {
        const NAME: &str = "AccessorGetter";
        let session = upgrade(&self.session, NAME, isolate)?;
        let scope = scope_for(&session, isolate, holder);
        match guarded(NAME, isolate, || (self.getter)(&scope, name))? {
            Some(id) => session.consume_result(isolate, id),
            None => Ok(Value::Undefined),
        }
    }

    fn set(&self, isolate: &Isolate, holder: ObjectRef, name: &str, value: &Value) -> Result<(), Value> {
        const NAME: &str = "AccessorSetter";
        let Some(setter) = &self.setter else {
            return Ok(());
        };
        let session = upgrade(&self.session, NAME, isolate)?;
        let argument = session
            .resolve_temporary(isolate, value.clone())
            .map_err(|err| isolate.new_error(ErrorName::Error, &err.to_string()))?;
        let scope = scope_for(&session, isolate, holder);
        let outcome = guarded(NAME, isolate, || setter(&scope, name, argument.id));
        session.release_temporaries(&[argument]);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_gone_text() {
        assert_eq!(
            callback_gone("NamedPropertyGetter"),
            "'NamedPropertyGetter' no longer exists - perhaps the GC collected it."
        );
    }

    #[test]
    fn test_guarded_converts_panic() {
        let isolate = Isolate::new();
        let thrown = guarded("FunctionCallback", &isolate, || -> i32 { panic!("boom") })
            .unwrap_err();
        let message = isolate
            .get_property(thrown.as_object().unwrap(), "message")
            .unwrap();
        assert_eq!(
            message.as_str(),
            Some("'FunctionCallback' no longer exists - perhaps the GC collected it.")
        );
        assert_eq!(guarded("FunctionCallback", &isolate, || 7), Ok(7));
    }

    #[test]
    fn test_template_table_handles() {
        let mut table = TemplateTable::default();
        let first = table.add_function(BridgeFunctionTemplate {
            engine: Isolate::new().new_function_template("A", None),
            instance: None,
            prototype: None,
        });
        assert_eq!(first.raw(), 0);
        assert!(table.function(first).is_some());
        assert!(table.remove_function(first).is_some());
        assert!(table.function(first).is_none());
        assert!(table.function(FunctionTemplateHandle::from_raw(9)).is_none());
    }
}
