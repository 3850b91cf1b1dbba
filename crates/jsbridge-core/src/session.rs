//! Engine sessions
//!
//! An [`EngineSession`] owns one isolate together with the handle table that
//! maps engine values to integer handle ids. All engine access goes through
//! [`EngineLock`]; the table sits behind its own lock and the engine is never
//! called while that lock is held, so managed callbacks fired by the engine
//! can always re-enter the session.
//!
//! Script failures never surface as `Err`: they come back as error-typed
//! handles whose value is the rendered message (see [`crate::diagnostics`]).

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, trace, warn};

use jsbridge_engine::{
    CompiledScript, EngineError, ErrorName, FunctionTemplateId, GcStats, HeapStats, InternalField,
    Isolate, NativeFunction, ObjectRef, ObjectTemplateId, PropertyAttributes,
    TEMPLATE_INTERNAL_FIELDS, TerminationHandle, Value,
};

use crate::config::SessionConfig;
use crate::deferred::DeferredReleases;
use crate::diagnostics;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::lock::EngineLock;
use crate::proxy::{DisposalState, HandleId, HandleValue, NO_OBJECT_ID, ProxyInfo, Released};
use crate::registry::{DisposedSessions, SessionId};
use crate::table::{Classification, HandleStats, HandleTable};
use crate::templates::{
    AccessorGetter, AccessorSetter, BridgeAccessor, BridgeFunction, BridgeFunctionTemplate,
    BridgeInterceptor, BridgeObjectTemplate, FunctionCallback, FunctionTemplateHandle,
    IndexedHandlers, NamedHandlers, ObjectTemplateHandle, TemplateHandlers, TemplateTable,
};
use crate::transitions::{PendingTransition, TransitionQueue};
use crate::value_type::ValueType;

/// Hidden property carrying the managed id of objects without internal fields
pub const MANAGED_OBJECT_ID: &str = "ManagedObjectID";

const TYPE_ID_PROPERTY: &str = "$__TypeID";
const TYPE_VALUE_PROPERTY: &str = "$__Value";

/// Decides the fate of a weak proxy whose object became unreachable.
///
/// Returning `true` disposes the proxy; `false` keeps the object alive and
/// puts the proxy back into `ManagedDisposing`.
pub type GcCallback = Arc<dyn Fn(&ProxyInfo) -> bool + Send + Sync>;

/// What happened to a weak or strong request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Performed right away
    Applied,
    /// Parked until the next safe point
    Queued,
    /// The proxy is not in a state the request applies to
    Ignored,
}

/// Proxy resolved for the duration of a native callback
#[derive(Debug, Clone, Copy)]
pub(crate) struct Temporary {
    pub id: HandleId,
    /// `false` when the value already had a proxy, which must survive the call
    pub created: bool,
}

pub(crate) struct SessionInner {
    id: SessionId,
    config: SessionConfig,
    isolate: ReentrantMutex<Isolate>,
    table: ReentrantMutex<RefCell<HandleTable>>,
    transitions: TransitionQueue,
    releases: DeferredReleases,
    templates: Mutex<TemplateTable>,
    /// Nesting depth of script execution
    executing: AtomicU32,
    terminating: AtomicBool,
    termination: TerminationHandle,
    disposed: AtomicBool,
    gc_callback: RwLock<Option<GcCallback>>,
}

impl SessionInner {
    fn teardown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        DisposedSessions::global().unregister(self.id);
        self.transitions.clear();

        let handles = {
            let table = self.table.lock();
            let mut table = table.borrow_mut();
            table.clear_all()
        };
        match self.isolate.try_lock() {
            Some(isolate) => {
                for handle in &handles {
                    isolate.reset_persistent(*handle);
                }
                self.releases.process_all(&isolate);
            }
            None => self.releases.defer_all(handles),
        }

        self.templates.lock().clear();
        *self.gc_callback.write() = None;
        debug!(session = self.id, "engine session disposed");
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Guard marking a session as executing script.
///
/// Weak/strong requests made while any scope is alive are queued instead of
/// applied. Scopes nest; the termination flag clears when the outermost one
/// ends.
pub struct ExecutionScope<'a> {
    inner: &'a SessionInner,
}

impl Drop for ExecutionScope<'_> {
    fn drop(&mut self) {
        if self.inner.executing.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.terminating.store(false, Ordering::SeqCst);
        }
    }
}

/// One engine instance and the handles given out for its values.
///
/// Cloning is cheap and yields another reference to the same session. The
/// session is torn down when the last reference goes away or on
/// [`EngineSession::shutdown`].
#[derive(Clone)]
pub struct EngineSession {
    inner: Arc<SessionInner>,
}

impl Default for EngineSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .field("executing", &self.is_executing())
            .finish()
    }
}

impl EngineSession {
    pub fn new(config: SessionConfig) -> Self {
        let id = DisposedSessions::next_id();
        let isolate = Isolate::new();
        let termination = isolate.termination_handle();
        let inner = SessionInner {
            id,
            table: ReentrantMutex::new(RefCell::new(HandleTable::new(&config))),
            config,
            isolate: ReentrantMutex::new(isolate),
            transitions: TransitionQueue::new(),
            releases: DeferredReleases::new(),
            templates: Mutex::new(TemplateTable::default()),
            executing: AtomicU32::new(0),
            terminating: AtomicBool::new(false),
            termination,
            disposed: AtomicBool::new(false),
            gc_callback: RwLock::new(None),
        };
        DisposedSessions::global().register(id);
        debug!(session = id, "engine session created");
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Tear the session down now instead of when the last clone drops.
    ///
    /// Every proxy is cleared and its engine handle released; handle ids
    /// still held by the managed side become invalid. Idempotent.
    pub fn shutdown(&self) {
        self.inner.teardown();
    }

    fn ensure_live(&self) -> BridgeResult<()> {
        if self.is_disposed() {
            Err(BridgeError::SessionDisposed(self.inner.id))
        } else {
            Ok(())
        }
    }

    /// Exclusive (reentrant) access to the engine
    pub fn lock(&self) -> BridgeResult<EngineLock<'_>> {
        self.ensure_live()?;
        Ok(EngineLock::acquire(&self.inner.isolate, &self.inner.releases))
    }

    fn try_lock(&self) -> Option<EngineLock<'_>> {
        if self.is_disposed() {
            return None;
        }
        EngineLock::try_acquire(&self.inner.isolate, &self.inner.releases)
    }

    /// Run `f` on the handle table. Must not call into the engine.
    fn with_table<T>(&self, f: impl FnOnce(&mut HandleTable) -> T) -> T {
        let table = self.inner.table.lock();
        let mut table = table.borrow_mut();
        f(&mut table)
    }

    /// Hand a released engine handle to the engine thread
    fn release(&self, released: Option<Released>) -> bool {
        match released {
            Some(released) => {
                if let Some(handle) = released.persistent {
                    self.inner.releases.defer(handle);
                }
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Execution state
    // ------------------------------------------------------------------

    /// Mark the session as executing until the returned guard drops
    pub fn begin_execution(&self) -> ExecutionScope<'_> {
        self.inner.executing.fetch_add(1, Ordering::SeqCst);
        ExecutionScope { inner: &self.inner }
    }

    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::SeqCst) > 0
    }

    /// `true` between a termination request and the end of the outermost execution
    pub fn is_terminating(&self) -> bool {
        self.inner.terminating.load(Ordering::SeqCst)
    }

    /// Ask running script to stop. Safe from any thread; a no-op when idle.
    pub fn terminate_execution(&self) {
        if !self.is_executing() {
            return;
        }
        self.inner.terminating.store(true, Ordering::SeqCst);
        self.inner.termination.terminate();
        debug!(session = self.inner.id, "termination requested");
    }

    fn executing<T>(&self, engine: &Isolate, f: impl FnOnce() -> T) -> T {
        if !self.is_executing() {
            // a request that raced with the end of the previous run
            engine.cancel_terminate();
        }
        let _scope = self.begin_execution();
        f()
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Managed object id stored on an engine object (`-1` if none)
    pub(crate) fn lookup_object_id(&self, isolate: &Isolate, obj: ObjectRef) -> i32 {
        if isolate.internal_field_count(obj) >= TEMPLATE_INTERNAL_FIELDS {
            return match isolate.internal_field(obj, 1) {
                Some(InternalField::External(id)) => i32::try_from(id).unwrap_or(NO_OBJECT_ID),
                Some(InternalField::Value(Value::Int32(id))) => id,
                _ => NO_OBJECT_ID,
            };
        }
        match isolate.private_property(obj, MANAGED_OBJECT_ID) {
            Some(Value::Int32(id)) => id,
            _ => NO_OBJECT_ID,
        }
    }

    fn type_descriptor(&self, isolate: &Isolate, obj: ObjectRef, object_id: i32) -> Option<i32> {
        if let Some(tag) = isolate.type_tag(obj) {
            return Some(tag);
        }
        if !self.inner.config.duck_typed_type_descriptors
            || object_id >= 0
            || isolate.internal_field_count(obj) > 0
        {
            return None;
        }
        // plain data reads only: classification must not run script
        let Some(Value::Int32(type_id)) = isolate.own_data_property(obj, TYPE_ID_PROPERTY) else {
            return None;
        };
        isolate
            .own_data_property(obj, TYPE_VALUE_PROPERTY)
            .map(|_| type_id)
    }

    fn classify(&self, isolate: &Isolate, value: &Value) -> Classification {
        let value_type = ValueType::from(isolate.kind_of(value));
        let Some(obj) = value.as_object().filter(|_| value_type.is_object()) else {
            return Classification::of(value_type);
        };
        let object_id = self.lookup_object_id(isolate, obj);
        Classification {
            value_type,
            object_id,
            type_descriptor: self.type_descriptor(isolate, obj, object_id),
        }
    }

    /// Give weak proxies a chance to free their slots before the table grows
    fn make_room(&self, isolate: &Isolate) {
        if !self.inner.config.idle_collect_on_growth || self.is_executing() || isolate.is_running() {
            return;
        }
        let crowded = self.with_table(|t| !t.has_recycled() && t.weak_count() > 0);
        if crowded {
            trace!(session = self.inner.id, "idle collection before growing handle table");
            isolate.idle_notification();
            self.process_weak_notices(isolate);
        }
    }

    fn install(&self, isolate: &Isolate, value: Value, class: Classification) -> BridgeResult<HandleId> {
        // rooted first: the idle collection must not sweep the new value
        let handle = isolate.new_persistent(value);
        self.make_room(isolate);
        let installed = self.with_table(|t| t.install(Some(handle), None, class));
        if installed.is_err() {
            isolate.reset_persistent(handle);
        }
        installed
    }

    /// New proxy for `value`, bypassing the identity map
    fn install_value(&self, isolate: &Isolate, value: Value) -> BridgeResult<HandleId> {
        let class = self.classify(isolate, &value);
        self.install(isolate, value, class)
    }

    fn resolve_in(&self, isolate: &Isolate, value: Value) -> BridgeResult<Temporary> {
        let class = self.classify(isolate, &value);
        if class.value_type.is_object() && class.object_id >= 0 {
            if let Some(id) = self.with_table(|t| t.proxy_for_object(class.object_id)) {
                return Ok(Temporary { id, created: false });
            }
        }
        let id = self.install(isolate, value, class)?;
        Ok(Temporary { id, created: true })
    }

    /// Handle id for an engine value.
    ///
    /// Objects carrying a managed id that already has a live proxy resolve
    /// to that proxy; everything else gets a new (or recycled) slot.
    pub fn resolve(&self, value: Value) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            self.resolve_in(&engine, value)?.id
        };
        self.drain_transitions();
        Ok(id)
    }

    pub(crate) fn resolve_temporary(&self, isolate: &Isolate, value: Value) -> BridgeResult<Temporary> {
        self.ensure_live()?;
        self.resolve_in(isolate, value)
    }

    pub(crate) fn release_temporaries(&self, temporaries: &[Temporary]) {
        for temporary in temporaries.iter().filter(|t| t.created) {
            self.try_dispose(temporary.id);
        }
    }

    /// Read and dispose a handle returned by a managed callback.
    ///
    /// Error-typed handles turn into a thrown `Error(message)`.
    pub(crate) fn consume_result(&self, isolate: &Isolate, id: HandleId) -> Result<Value, Value> {
        let proxy = self.with_table(|t| t.live(id).map(|p| (p.value_type(), p.handle())));
        let result = match proxy {
            Ok((value_type, handle)) => {
                let value = handle
                    .and_then(|handle| isolate.persistent_value(handle))
                    .unwrap_or_default();
                if value_type.is_error() {
                    Err(isolate.new_error(ErrorName::Error, &isolate.to_display_string(&value)))
                } else {
                    Ok(value)
                }
            }
            Err(err) => Err(isolate.new_error(ErrorName::Error, &err.to_string())),
        };
        self.try_dispose(id);
        result
    }

    fn persistent_of(&self, id: HandleId) -> BridgeResult<Option<jsbridge_engine::Persistent>> {
        self.with_table(|t| t.live(id).map(|proxy| proxy.handle()))
    }

    pub(crate) fn value_in(&self, isolate: &Isolate, id: HandleId) -> BridgeResult<Value> {
        match self.persistent_of(id)? {
            Some(handle) => isolate
                .persistent_value(handle)
                .ok_or(BridgeError::InvalidHandle(id)),
            None => Ok(Value::Undefined),
        }
    }

    fn object_in(&self, isolate: &Isolate, id: HandleId) -> BridgeResult<ObjectRef> {
        self.value_in(isolate, id)?
            .as_object()
            .ok_or(BridgeError::NotAnObject(id))
    }

    fn values_in(&self, isolate: &Isolate, ids: &[HandleId]) -> BridgeResult<Vec<Value>> {
        ids.iter().map(|id| self.value_in(isolate, *id)).collect()
    }

    /// Engine value behind a handle (`undefined` for compiled scripts)
    pub fn value(&self, id: HandleId) -> BridgeResult<Value> {
        let engine = self.lock()?;
        self.value_in(&engine, id)
    }

    fn error_handle(&self, isolate: &Isolate, kind: ValueType, message: String) -> BridgeResult<HandleId> {
        self.install(isolate, Value::string(message), Classification::of(kind))
    }

    fn failure(&self, isolate: &Isolate, err: &EngineError) -> BridgeResult<HandleId> {
        let (kind, message) = diagnostics::describe(err);
        debug!(session = self.inner.id, ?kind, "script failure captured as handle");
        self.error_handle(isolate, kind, message)
    }

    /// Turn an engine result into a handle, capturing failures as error handles
    fn outcome(&self, isolate: &Isolate, result: Result<Value, EngineError>) -> BridgeResult<HandleId> {
        match result {
            Ok(value) => Ok(self.resolve_in(isolate, value)?.id),
            Err(err) => self.failure(isolate, &err),
        }
    }

    fn create(&self, f: impl FnOnce(&Isolate) -> BridgeResult<Value>) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let value = f(&*engine)?;
            self.resolve_in(&engine, value)?.id
        };
        self.drain_transitions();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Value creation
    // ------------------------------------------------------------------

    pub fn create_number(&self, number: f64) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::Number(number)))
    }

    pub fn create_integer(&self, number: i32) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::Int32(number)))
    }

    pub fn create_boolean(&self, value: bool) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::Bool(value)))
    }

    pub fn create_string(&self, text: &str) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::string(text)))
    }

    /// Date from milliseconds since the Unix epoch
    pub fn create_date(&self, time: f64) -> BridgeResult<HandleId> {
        self.create(|engine| Ok(Value::Object(engine.new_date(time))))
    }

    pub fn create_null(&self) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::Null))
    }

    pub fn create_undefined(&self) -> BridgeResult<HandleId> {
        self.create(|_| Ok(Value::Undefined))
    }

    /// Error-typed handle carrying `message`. `kind` must be an error type.
    pub fn create_error(&self, message: &str, kind: ValueType) -> BridgeResult<HandleId> {
        if !kind.is_error() {
            return Err(BridgeError::internal(format!("{kind:?} is not an error type")));
        }
        let engine = self.lock()?;
        self.error_handle(&engine, kind, message.to_string())
    }

    /// New plain object tagged with `managed_id` (`-1` assigns an internal id)
    pub fn create_object(&self, managed_id: i32) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let object = engine.new_object();
            let managed_id = if managed_id == NO_OBJECT_ID {
                self.with_table(|t| t.next_internal_id())
            } else {
                managed_id
            };
            engine.set_private_property(object, MANAGED_OBJECT_ID, Value::Int32(managed_id))?;
            self.install_value(&engine, Value::Object(object))?
        };
        self.drain_transitions();
        Ok(id)
    }

    pub fn create_array(&self, items: &[HandleId]) -> BridgeResult<HandleId> {
        self.create(|engine| {
            let values = self.values_in(engine, items)?;
            Ok(Value::Object(engine.new_array(values)))
        })
    }

    pub fn create_string_array(&self, items: &[&str]) -> BridgeResult<HandleId> {
        self.create(|engine| {
            let values = items.iter().map(|item| Value::string(item)).collect();
            Ok(Value::Object(engine.new_array(values)))
        })
    }

    /// Handle to the global object
    pub fn global(&self) -> BridgeResult<HandleId> {
        self.create(|engine| Ok(Value::Object(engine.global())))
    }

    // ------------------------------------------------------------------
    // Scripts
    // ------------------------------------------------------------------

    /// Compile without running. Returns a script handle, or an error handle.
    pub fn compile(&self, source: &str, source_name: &str) -> BridgeResult<HandleId> {
        let engine = self.lock()?;
        match engine.compile(source, source_name) {
            Ok(script) => self.with_table(|t| {
                t.install(None, Some(script), Classification::of(ValueType::Script))
            }),
            Err(err) => self.failure(&engine, &err),
        }
    }

    fn run_in(&self, engine: &Isolate, script: &CompiledScript) -> BridgeResult<HandleId> {
        let result = self.executing(engine, || engine.run(script));
        self.outcome(engine, result)
    }

    /// Compile and run `source`, returning a handle to the completion value
    pub fn execute(&self, source: &str, source_name: &str) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            match engine.compile(source, source_name) {
                Ok(script) => self.run_in(&engine, &script)?,
                Err(err) => self.failure(&engine, &err)?,
            }
        };
        self.drain_transitions();
        Ok(id)
    }

    /// Run a script handle produced by [`EngineSession::compile`]
    pub fn execute_compiled(&self, script: HandleId) -> BridgeResult<HandleId> {
        let compiled = self.with_table(|t| t.live(script).map(|p| p.script().cloned()))?;
        let compiled = compiled.ok_or(BridgeError::InvalidHandle(script))?;
        let id = {
            let engine = self.lock()?;
            self.run_in(&engine, &compiled)?
        };
        self.drain_transitions();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Attach a managed object id to an existing object handle.
    ///
    /// Template instances store it in their internal fields (together with
    /// the template), plain objects in a hidden property. Returns the id the
    /// proxy ends up with.
    pub fn connect_object(
        &self,
        id: HandleId,
        managed_id: i32,
        template: Option<ObjectTemplateHandle>,
    ) -> BridgeResult<i32> {
        let engine = self.lock()?;
        let object = self.object_in(&engine, id)?;
        let assigned = self.with_table(|t| t.set_managed_id(id, managed_id))?;
        if engine.internal_field_count(object) >= TEMPLATE_INTERNAL_FIELDS {
            if let Some(template) = template {
                engine.set_internal_field(object, 0, InternalField::External(i64::from(template.raw())))?;
            }
            engine.set_internal_field(object, 1, InternalField::External(i64::from(assigned)))?;
        } else {
            engine.set_private_property(object, MANAGED_OBJECT_ID, Value::Int32(assigned))?;
        }
        Ok(assigned)
    }

    /// Prototype of an object, or a `null` handle
    pub fn prototype_of(&self, id: HandleId) -> BridgeResult<HandleId> {
        let engine = self.lock()?;
        let object = self.object_in(&engine, id)?;
        let result = engine
            .prototype_of(object)
            .map(|prototype| prototype.map_or(Value::Null, Value::Object));
        self.outcome(&engine, result)
    }

    /// Call a function.
    ///
    /// With `function_name`, calls that method of `subject` (receiver
    /// defaults to `subject`); without, calls `subject` itself (receiver
    /// defaults to the global object). Exceptions become error handles.
    pub fn call(
        &self,
        subject: HandleId,
        function_name: Option<&str>,
        this: Option<HandleId>,
        args: &[HandleId],
    ) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let subject_value = self.value_in(&engine, subject)?;
            let (function, receiver) = match function_name {
                Some(name) => {
                    let object = subject_value.as_object().ok_or(BridgeError::NotAnObject(subject))?;
                    match engine.get_property(object, name) {
                        Ok(function) => (function, subject_value),
                        Err(err) => return self.failure(&engine, &err),
                    }
                }
                None => (subject_value, Value::Object(engine.global())),
            };
            let receiver = match this {
                Some(this) => self.value_in(&engine, this)?,
                None => receiver,
            };
            let args = self.values_in(&engine, args)?;

            let result = self.executing(&engine, || engine.call(&function, receiver, &args));
            match result {
                Err(EngineError::NotAFunction) => return Err(BridgeError::NotAFunction(subject)),
                result => self.outcome(&engine, result)?,
            }
        };
        self.drain_transitions();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Assign a property. `attributes` forces an own data property with
    /// those attributes; `None` performs a normal assignment.
    pub fn set_property(
        &self,
        id: HandleId,
        name: &str,
        value: HandleId,
        attributes: Option<PropertyAttributes>,
    ) -> BridgeResult<bool> {
        let done = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            let value = self.value_in(&engine, value)?;
            let result = match attributes {
                Some(attributes) => engine.define_property(object, name, value, attributes),
                None => engine.set_property(object, name, value),
            };
            if let Err(err) = &result {
                debug!(session = self.inner.id, property = name, %err, "property assignment failed");
            }
            result.is_ok()
        };
        self.drain_transitions();
        Ok(done)
    }

    pub fn get_property(&self, id: HandleId, name: &str) -> BridgeResult<HandleId> {
        let result = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            let value = engine.get_property(object, name);
            self.outcome(&engine, value)
        };
        self.drain_transitions();
        result
    }

    pub fn delete_property(&self, id: HandleId, name: &str) -> BridgeResult<bool> {
        let deleted = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            engine.delete_property(object, name).unwrap_or(false)
        };
        self.drain_transitions();
        Ok(deleted)
    }

    pub fn set_property_index(&self, id: HandleId, index: u32, value: HandleId) -> BridgeResult<bool> {
        let done = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            let value = self.value_in(&engine, value)?;
            engine.set_index(object, index, value).is_ok()
        };
        self.drain_transitions();
        Ok(done)
    }

    pub fn get_property_index(&self, id: HandleId, index: u32) -> BridgeResult<HandleId> {
        let result = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            let value = engine.get_index(object, index);
            self.outcome(&engine, value)
        };
        self.drain_transitions();
        result
    }

    pub fn delete_property_index(&self, id: HandleId, index: u32) -> BridgeResult<bool> {
        let deleted = {
            let engine = self.lock()?;
            let object = self.object_in(&engine, id)?;
            engine.delete_index(object, index).unwrap_or(false)
        };
        self.drain_transitions();
        Ok(deleted)
    }

    /// Install a managed accessor on an object
    pub fn set_accessor(
        &self,
        id: HandleId,
        name: &str,
        getter: AccessorGetter,
        setter: Option<AccessorSetter>,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let engine = self.lock()?;
        let object = self.object_in(&engine, id)?;
        let accessor = BridgeAccessor {
            session: self.downgrade(),
            getter,
            setter,
        };
        engine.set_accessor(object, name, Arc::new(accessor), attributes)?;
        Ok(())
    }

    fn names(&self, id: HandleId, own: bool) -> BridgeResult<HandleId> {
        let engine = self.lock()?;
        let object = self.object_in(&engine, id)?;
        let names = if own {
            engine.own_property_names(object)
        } else {
            engine.property_names(object)
        };
        let array = names.map(|names| {
            Value::Object(engine.new_array(names.into_iter().map(Value::string).collect()))
        });
        self.outcome(&engine, array)
    }

    /// Array handle with the enumerable property names, prototype chain included
    pub fn property_names(&self, id: HandleId) -> BridgeResult<HandleId> {
        self.names(id, false)
    }

    pub fn own_property_names(&self, id: HandleId) -> BridgeResult<HandleId> {
        self.names(id, true)
    }

    /// Attributes of an own property, `None` when absent
    pub fn property_attributes(&self, id: HandleId, name: &str) -> BridgeResult<Option<PropertyAttributes>> {
        let engine = self.lock()?;
        let object = self.object_in(&engine, id)?;
        Ok(engine.property_attributes(object, name).ok().flatten())
    }

    pub fn array_length(&self, id: HandleId) -> BridgeResult<u32> {
        let engine = self.lock()?;
        let object = self
            .value_in(&engine, id)?
            .as_object()
            .ok_or(BridgeError::NotAnArray(id))?;
        engine.array_length(object).ok_or(BridgeError::NotAnArray(id))
    }

    // ------------------------------------------------------------------
    // Object templates
    // ------------------------------------------------------------------

    fn register_object_template(&self, engine: &Isolate, template: ObjectTemplateId) -> BridgeResult<ObjectTemplateHandle> {
        let handlers = Arc::new(RwLock::new(TemplateHandlers::default()));
        let interceptor = BridgeInterceptor {
            session: self.downgrade(),
            handlers: handlers.clone(),
        };
        engine.set_template_interceptor(template, Some(Arc::new(interceptor)))?;
        Ok(self.inner.templates.lock().add_object(BridgeObjectTemplate {
            engine: template,
            handlers,
        }))
    }

    fn object_template(&self, handle: ObjectTemplateHandle) -> BridgeResult<(ObjectTemplateId, Arc<RwLock<TemplateHandlers>>)> {
        self.inner
            .templates
            .lock()
            .object(handle)
            .map(|template| (template.engine, template.handlers.clone()))
            .ok_or(BridgeError::UnknownTemplate)
    }

    fn function_template(&self, handle: FunctionTemplateHandle) -> BridgeResult<FunctionTemplateId> {
        self.inner
            .templates
            .lock()
            .function(handle)
            .map(|template| template.engine)
            .ok_or(BridgeError::UnknownTemplate)
    }

    fn native(&self, name: &'static str, callback: FunctionCallback) -> Arc<dyn NativeFunction> {
        Arc::new(BridgeFunction {
            session: self.downgrade(),
            name,
            callback,
        })
    }

    pub fn create_object_template(&self) -> BridgeResult<ObjectTemplateHandle> {
        let engine = self.lock()?;
        let template = engine.new_object_template();
        self.register_object_template(&engine, template)
    }

    /// Forget a template. Instances keep working but stop calling back.
    pub fn delete_object_template(&self, handle: ObjectTemplateHandle) -> BridgeResult<()> {
        let engine = self.lock()?;
        let removed = self
            .inner
            .templates
            .lock()
            .remove_object(handle)
            .ok_or(BridgeError::UnknownTemplate)?;
        *removed.handlers.write() = TemplateHandlers::default();
        engine.set_template_call_handler(removed.engine, None)?;
        Ok(())
    }

    pub fn register_named_handlers(&self, handle: ObjectTemplateHandle, handlers: NamedHandlers) -> BridgeResult<()> {
        let (_, current) = self.object_template(handle)?;
        current.write().named = Some(handlers);
        Ok(())
    }

    pub fn unregister_named_handlers(&self, handle: ObjectTemplateHandle) -> BridgeResult<()> {
        let (_, current) = self.object_template(handle)?;
        current.write().named = None;
        Ok(())
    }

    pub fn register_indexed_handlers(&self, handle: ObjectTemplateHandle, handlers: IndexedHandlers) -> BridgeResult<()> {
        let (_, current) = self.object_template(handle)?;
        current.write().indexed = Some(handlers);
        Ok(())
    }

    pub fn unregister_indexed_handlers(&self, handle: ObjectTemplateHandle) -> BridgeResult<()> {
        let (_, current) = self.object_template(handle)?;
        current.write().indexed = None;
        Ok(())
    }

    /// Make instances of the template callable (`None` removes the handler)
    pub fn set_call_handler(&self, handle: ObjectTemplateHandle, callback: Option<FunctionCallback>) -> BridgeResult<()> {
        let engine = self.lock()?;
        let (template, _) = self.object_template(handle)?;
        let native = callback.map(|callback| self.native("CallAsFunction", callback));
        engine.set_template_call_handler(template, native)?;
        Ok(())
    }

    /// Instantiate a template, storing the template and `managed_id` in the
    /// instance's internal fields (`-1` assigns an internal id)
    pub fn create_object_from_template(&self, handle: ObjectTemplateHandle, managed_id: i32) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let (template, _) = self.object_template(handle)?;
            let object = engine.new_instance(template)?;
            let managed_id = if managed_id == NO_OBJECT_ID {
                self.with_table(|t| t.next_internal_id())
            } else {
                managed_id
            };
            engine.set_internal_field(object, 0, InternalField::External(i64::from(handle.raw())))?;
            engine.set_internal_field(object, 1, InternalField::External(i64::from(managed_id)))?;
            self.install_value(&engine, Value::Object(object))?
        };
        self.drain_transitions();
        Ok(id)
    }

    pub fn set_template_property(
        &self,
        handle: ObjectTemplateHandle,
        name: &str,
        value: HandleId,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let engine = self.lock()?;
        let (template, _) = self.object_template(handle)?;
        let value = self.value_in(&engine, value)?;
        engine.set_template_property(template, name, value, attributes)?;
        Ok(())
    }

    pub fn set_template_accessor(
        &self,
        handle: ObjectTemplateHandle,
        name: &str,
        getter: AccessorGetter,
        setter: Option<AccessorSetter>,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let engine = self.lock()?;
        let (template, _) = self.object_template(handle)?;
        let accessor = BridgeAccessor {
            session: self.downgrade(),
            getter,
            setter,
        };
        engine.set_template_accessor(template, name, Arc::new(accessor), attributes)?;
        Ok(())
    }

    /// Replace the global object with an instance of the template
    pub fn set_global_object_template(&self, handle: ObjectTemplateHandle) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let (template, _) = self.object_template(handle)?;
            let global = engine.set_global_template(template)?;
            engine.set_internal_field(global, 0, InternalField::External(i64::from(handle.raw())))?;
            self.resolve_in(&engine, Value::Object(global))?.id
        };
        self.drain_transitions();
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Function templates
    // ------------------------------------------------------------------

    pub fn create_function_template(
        &self,
        class_name: &str,
        callback: Option<FunctionCallback>,
    ) -> BridgeResult<FunctionTemplateHandle> {
        let engine = self.lock()?;
        let native = callback.map(|callback| self.native("FunctionCallback", callback));
        let template = engine.new_function_template(class_name, native);
        Ok(self.inner.templates.lock().add_function(BridgeFunctionTemplate {
            engine: template,
            instance: None,
            prototype: None,
        }))
    }

    /// Forget a function template. Its function stops calling back.
    pub fn delete_function_template(&self, handle: FunctionTemplateHandle) -> BridgeResult<()> {
        let engine = self.lock()?;
        let removed = self
            .inner
            .templates
            .lock()
            .remove_function(handle)
            .ok_or(BridgeError::UnknownTemplate)?;
        engine.set_function_callback(removed.engine, None)?;
        Ok(())
    }

    fn wrapped_template(
        &self,
        handle: FunctionTemplateHandle,
        prototype: bool,
    ) -> BridgeResult<ObjectTemplateHandle> {
        let engine = self.lock()?;
        let template = {
            let templates = self.inner.templates.lock();
            let template = templates.function(handle).ok_or(BridgeError::UnknownTemplate)?;
            let cached = if prototype { template.prototype } else { template.instance };
            if let Some(cached) = cached {
                return Ok(cached);
            }
            template.engine
        };
        let inner = if prototype {
            engine.function_prototype_template(template)?
        } else {
            engine.function_instance_template(template)?
        };
        let wrapped = self.register_object_template(&engine, inner)?;
        if let Some(template) = self.inner.templates.lock().function_mut(handle) {
            if prototype {
                template.prototype = Some(wrapped);
            } else {
                template.instance = Some(wrapped);
            }
        }
        Ok(wrapped)
    }

    /// Template of the objects `new F()` creates
    pub fn function_instance_template(&self, handle: FunctionTemplateHandle) -> BridgeResult<ObjectTemplateHandle> {
        self.wrapped_template(handle, false)
    }

    /// Template of `F.prototype`
    pub fn function_prototype_template(&self, handle: FunctionTemplateHandle) -> BridgeResult<ObjectTemplateHandle> {
        self.wrapped_template(handle, true)
    }

    /// The function object of a template (created once per session)
    pub fn get_function(&self, handle: FunctionTemplateHandle) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let template = self.function_template(handle)?;
            let function = engine.function_from_template(template)?;
            self.resolve_in(&engine, Value::Object(function))?.id
        };
        self.drain_transitions();
        Ok(id)
    }

    /// `new F(args)`, tagging the new instance with `managed_id`
    pub fn create_function_instance(
        &self,
        handle: FunctionTemplateHandle,
        managed_id: i32,
        args: &[HandleId],
    ) -> BridgeResult<HandleId> {
        let id = {
            let engine = self.lock()?;
            let template = self.function_template(handle)?;
            let args = self.values_in(&engine, args)?;
            let result = self.executing(&engine, || engine.new_function_instance(template, &args));
            match result {
                Ok(Value::Object(object)) => {
                    let managed_id = if managed_id == NO_OBJECT_ID {
                        self.with_table(|t| t.next_internal_id())
                    } else {
                        managed_id
                    };
                    if engine.internal_field_count(object) >= TEMPLATE_INTERNAL_FIELDS {
                        engine.set_internal_field(object, 1, InternalField::External(i64::from(managed_id)))?;
                    } else {
                        engine.set_private_property(object, MANAGED_OBJECT_ID, Value::Int32(managed_id))?;
                    }
                    self.install_value(&engine, Value::Object(object))?
                }
                other => self.outcome(&engine, other)?,
            }
        };
        self.drain_transitions();
        Ok(id)
    }

    pub fn set_function_template_property(
        &self,
        handle: FunctionTemplateHandle,
        name: &str,
        value: HandleId,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let engine = self.lock()?;
        let template = self.function_template(handle)?;
        let value = self.value_in(&engine, value)?;
        engine.set_function_template_property(template, name, value, attributes)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Handle lifetime
    // ------------------------------------------------------------------

    /// RAII wrapper holding one managed reference on `id`
    pub fn wrap(&self, id: HandleId) -> BridgeResult<Handle> {
        Handle::new(self, id)
    }

    pub fn handle_info(&self, id: HandleId) -> Option<ProxyInfo> {
        self.with_table(|t| t.get(id).map(|proxy| proxy.info()))
    }

    pub fn value_type(&self, id: HandleId) -> BridgeResult<ValueType> {
        self.with_table(|t| t.live(id).map(|proxy| proxy.value_type()))
    }

    pub fn managed_object_id(&self, id: HandleId) -> BridgeResult<i32> {
        self.with_table(|t| t.live(id).map(|proxy| proxy.object_id()))
    }

    /// Re-key a proxy in the identity map (`-1` assigns an internal id)
    pub fn set_managed_object_id(&self, id: HandleId, object_id: i32) -> BridgeResult<i32> {
        self.with_table(|t| t.set_managed_id(id, object_id))
    }

    pub fn add_managed_ref(&self, id: HandleId) -> BridgeResult<u32> {
        self.with_table(|t| t.add_ref(id))
    }

    pub fn release_managed_ref(&self, id: HandleId) -> BridgeResult<u32> {
        self.with_table(|t| t.release_ref(id))
    }

    /// Take a managed reference and remember which use of the slot it is on
    pub(crate) fn claim(&self, id: HandleId) -> BridgeResult<PendingTransition> {
        self.with_table(|t| {
            let pending = t.pending(id)?;
            t.add_ref_pending(pending)?;
            Ok(pending)
        })
    }

    pub(crate) fn claim_again(&self, pending: PendingTransition) -> BridgeResult<u32> {
        self.with_table(|t| t.add_ref_pending(pending))
    }

    /// Give back a claim, disposing the proxy when it was the last one.
    ///
    /// Claims on a recycled slot touch nothing.
    pub(crate) fn release_claim(&self, pending: PendingTransition) -> bool {
        if self.is_disposed() {
            return false;
        }
        let released = self.with_table(|t| match t.release_ref_pending(pending) {
            Ok(0) => t.try_dispose_pending(pending),
            _ => None,
        });
        self.release(released)
    }

    /// Dispose an in-use proxy nobody else holds.
    ///
    /// Refused (returns `false`) for type descriptors, proxies with two or
    /// more managed references, and proxies already disposing or cached.
    pub fn try_dispose(&self, id: HandleId) -> bool {
        if self.is_disposed() {
            return false;
        }
        let released = self.with_table(|t| t.try_dispose(id));
        self.release(released)
    }

    /// Finish disposal of a `ManagedDisposing` or `WeakFlagged` proxy
    pub fn dispose(&self, id: HandleId) -> bool {
        if self.is_disposed() {
            return false;
        }
        let released = self.with_table(|t| t.dispose(id));
        self.release(released)
    }

    /// Start disposal without releasing the engine value
    pub fn mark_disposing(&self, id: HandleId) -> bool {
        !self.is_disposed() && self.with_table(|t| t.mark_disposing(id))
    }

    fn apply_weak(&self, engine: &Isolate, pending: PendingTransition) -> bool {
        let Some(handle) = self.with_table(|t| t.weak_candidate(pending)) else {
            return false;
        };
        engine.make_weak(handle, pending.token());
        if self.with_table(|t| t.complete_transition(pending, DisposalState::WeakFlagged)) {
            trace!(id = pending.id, "proxy made weak");
            true
        } else {
            engine.clear_weak(handle);
            false
        }
    }

    fn apply_strong(&self, engine: &Isolate, pending: PendingTransition) -> bool {
        let Some(handle) = self.with_table(|t| t.strong_candidate(pending)) else {
            return false;
        };
        engine.clear_weak(handle);
        let done = self.with_table(|t| t.complete_transition(pending, DisposalState::ManagedDisposing));
        if done {
            trace!(id = pending.id, "proxy made strong");
        }
        done
    }

    fn request(&self, pending: PendingTransition, weak: bool) -> TransitionOutcome {
        if !self.is_executing() {
            if let Some(engine) = self.try_lock() {
                let applied = if weak {
                    self.apply_weak(&engine, pending)
                } else {
                    self.apply_strong(&engine, pending)
                };
                return if applied {
                    TransitionOutcome::Applied
                } else {
                    TransitionOutcome::Ignored
                };
            }
        }
        if weak {
            self.inner.transitions.push_weak(pending);
        } else {
            self.inner.transitions.push_strong(pending);
        }
        trace!(id = pending.id, weak, "transition queued");
        TransitionOutcome::Queued
    }

    /// Let the engine's collector decide when a `ManagedDisposing` object
    /// proxy goes away. Queued while script runs or another thread holds
    /// the engine.
    pub fn request_weak(&self, id: HandleId) -> BridgeResult<TransitionOutcome> {
        self.ensure_live()?;
        let pending = self.with_table(|t| t.pending(id))?;
        if self.with_table(|t| t.weak_candidate(pending)).is_none() {
            return Ok(TransitionOutcome::Ignored);
        }
        Ok(self.request(pending, true))
    }

    /// Undo [`EngineSession::request_weak`]
    pub fn request_strong(&self, id: HandleId) -> BridgeResult<TransitionOutcome> {
        self.ensure_live()?;
        let pending = self.with_table(|t| t.pending(id))?;
        if self.inner.transitions.cancel_weak(pending) {
            return Ok(TransitionOutcome::Applied);
        }
        if self.with_table(|t| t.strong_candidate(pending)).is_none() {
            return Ok(TransitionOutcome::Ignored);
        }
        Ok(self.request(pending, false))
    }

    /// Apply queued transitions. A no-op while script runs or another
    /// thread holds the engine.
    pub fn drain_transitions(&self) {
        if self.is_executing() || self.inner.transitions.is_empty() {
            return;
        }
        let Some(engine) = self.try_lock() else {
            return;
        };
        for _ in 0..self.inner.config.drain_per_safe_point {
            let weak = self.inner.transitions.pop_weak();
            let strong = self.inner.transitions.pop_strong();
            if weak.is_none() && strong.is_none() {
                break;
            }
            if let Some(pending) = weak {
                self.apply_weak(&engine, pending);
            }
            if let Some(pending) = strong {
                self.apply_strong(&engine, pending);
            }
        }
    }

    /// Refresh and return the marshalled value snapshot of a handle
    pub fn update_value(&self, id: HandleId) -> BridgeResult<HandleValue> {
        enum Snapshot {
            Plain(HandleValue),
            Text(String),
        }

        let engine = self.lock()?;
        let (pending, value_type, handle) = self.with_table(|t| {
            let pending = t.pending(id)?;
            let proxy = t.live(id)?;
            Ok::<_, BridgeError>((pending, proxy.value_type(), proxy.handle()))
        })?;
        let value = handle
            .and_then(|handle| engine.persistent_value(handle))
            .unwrap_or_default();
        let number = || engine.to_number(&value).unwrap_or(f64::NAN);

        let snapshot = match value_type {
            ValueType::Uninitialized | ValueType::Undefined | ValueType::Null | ValueType::Script => {
                Snapshot::Plain(HandleValue::None)
            }
            ValueType::Bool => Snapshot::Plain(HandleValue::Bool(value.truthy())),
            ValueType::BoolObject => Snapshot::Plain(HandleValue::Bool(number() != 0.0)),
            ValueType::Int32 => Snapshot::Plain(HandleValue::Int32(number() as i32)),
            ValueType::Number | ValueType::NumberObject | ValueType::Date => {
                Snapshot::Plain(HandleValue::Number(number()))
            }
            _ => Snapshot::Text(engine.to_display_string(&value)),
        };

        self.with_table(|t| {
            let value = match snapshot {
                Snapshot::Plain(value) => value,
                Snapshot::Text(text) => HandleValue::String(t.strings_mut().encode(&text)),
            };
            t.set_value(pending, value.clone())?;
            Ok(value)
        })
    }

    pub fn stats(&self) -> HandleStats {
        let mut stats = self.with_table(|t| t.stats());
        stats.pending_weak = self.inner.transitions.pending_weak();
        stats.pending_strong = self.inner.transitions.pending_strong();
        stats.pending_releases = self.inner.releases.len();
        stats
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Install (or with `None`, remove) the callback consulted for weak proxies
    pub fn register_gc_callback(&self, callback: Option<GcCallback>) {
        *self.inner.gc_callback.write() = callback;
    }

    fn keep_alive(&self, info: &ProxyInfo) -> bool {
        let Some(callback) = self.inner.gc_callback.read().clone() else {
            return false;
        };
        match catch_unwind(AssertUnwindSafe(|| callback(info))) {
            Ok(dispose) => !dispose,
            Err(_) => {
                warn!(id = info.id, "gc callback panicked; disposing proxy");
                false
            }
        }
    }

    /// Act on the engine's reports about unreachable weak objects
    fn process_weak_notices(&self, engine: &Isolate) -> usize {
        let mut disposed = 0;
        for token in engine.take_weak_notices() {
            let pending = PendingTransition::from_token(token);
            let Some(info) = self.with_table(|t| t.weak_notice(pending)) else {
                trace!(id = pending.id, "stale weak notice");
                continue;
            };
            if info.object_id >= 0 && self.keep_alive(&info) {
                // the notice already made the engine handle strong again
                self.with_table(|t| t.complete_transition(pending, DisposalState::ManagedDisposing));
                continue;
            }
            if let Some(released) = self.with_table(|t| t.dispose_pending(pending)) {
                if let Some(handle) = released.persistent {
                    engine.reset_persistent(handle);
                }
                disposed += 1;
            }
        }
        if disposed > 0 {
            debug!(session = self.inner.id, disposed, "weak proxies collected");
        }
        disposed
    }

    /// Full engine collection followed by weak notice processing.
    /// `None` when refused because script is running.
    pub fn force_gc(&self) -> BridgeResult<Option<GcStats>> {
        let engine = self.lock()?;
        if self.is_executing() {
            return Ok(None);
        }
        let stats = engine.collect_garbage();
        self.process_weak_notices(&engine);
        Ok(stats)
    }

    /// Opportunistic collection. Returns the number of proxies it disposed.
    pub fn idle_notification(&self) -> BridgeResult<usize> {
        let engine = self.lock()?;
        if self.is_executing() {
            return Ok(0);
        }
        engine.idle_notification();
        Ok(self.process_weak_notices(&engine))
    }

    pub fn heap_stats(&self) -> BridgeResult<HeapStats> {
        Ok(self.lock()?.heap_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> EngineSession {
        EngineSession::new(SessionConfig::default().initial_handle_capacity(8))
    }

    #[test]
    fn test_primitive_handles() {
        let session = session();
        let number = session.create_number(1.5).unwrap();
        let text = session.create_string("hi").unwrap();
        let flag = session.create_boolean(true).unwrap();

        assert_eq!(session.value_type(number).unwrap(), ValueType::Number);
        assert_eq!(session.update_value(number).unwrap(), HandleValue::Number(1.5));
        assert_eq!(session.update_value(text).unwrap().as_text().as_deref(), Some("hi"));
        assert_eq!(session.update_value(flag).unwrap(), HandleValue::Bool(true));
        assert_eq!(session.update_value(session.create_null().unwrap()).unwrap(), HandleValue::None);
    }

    #[test]
    fn test_integral_number_is_int32() {
        let session = session();
        let id = session.create_number(4.0).unwrap();
        assert_eq!(session.value_type(id).unwrap(), ValueType::Int32);
        assert_eq!(session.update_value(id).unwrap(), HandleValue::Int32(4));
    }

    #[test]
    fn test_create_object_assigns_internal_id() {
        let session = session();
        let first = session.create_object(NO_OBJECT_ID).unwrap();
        let second = session.create_object(NO_OBJECT_ID).unwrap();
        let a = session.managed_object_id(first).unwrap();
        let b = session.managed_object_id(second).unwrap();
        assert!(a < -1 && b < -1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_coalesces_managed_ids() {
        let session = session();
        let id = session.create_object(5).unwrap();
        let value = session.value(id).unwrap();
        assert_eq!(session.resolve(value.clone()).unwrap(), id);
        assert_eq!(session.resolve(value).unwrap(), id);
        assert_eq!(session.stats().in_use, 1);
    }

    #[test]
    fn test_execute_error_handles() {
        let session = session();
        let id = session.execute("var = ;", "bad.js").unwrap();
        assert_eq!(session.value_type(id).unwrap(), ValueType::CompilerError);

        let id = session.execute("throw new TypeError('nope')", "throw.js").unwrap();
        assert_eq!(session.value_type(id).unwrap(), ValueType::ExecutionError);
        let text = session.update_value(id).unwrap().as_text().unwrap();
        assert!(text.starts_with("TypeError: nope"));
    }

    #[test]
    fn test_compile_then_execute() {
        let session = session();
        let script = session.compile("40 + 2", "answer.js").unwrap();
        assert_eq!(session.value_type(script).unwrap(), ValueType::Script);
        assert_eq!(session.update_value(script).unwrap(), HandleValue::None);

        let result = session.execute_compiled(script).unwrap();
        assert_eq!(session.update_value(result).unwrap(), HandleValue::Int32(42));

        let number = session.create_number(1.0).unwrap();
        assert!(session.execute_compiled(number).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn test_execution_scope_nests() {
        let session = session();
        {
            let _outer = session.begin_execution();
            {
                let _inner = session.begin_execution();
                session.terminate_execution();
                assert!(session.is_terminating());
            }
            assert!(session.is_executing());
            assert!(session.is_terminating());
        }
        assert!(!session.is_executing());
        assert!(!session.is_terminating());
    }

    #[test]
    fn test_terminate_when_idle_is_noop() {
        let session = session();
        session.terminate_execution();
        assert!(!session.is_terminating());
        let id = session.execute("1", "one.js").unwrap();
        assert_eq!(session.value_type(id).unwrap(), ValueType::Int32);
    }

    #[test]
    fn test_weak_requires_disposing_object() {
        let session = session();
        let number = session.create_number(3.5).unwrap();
        assert_eq!(session.request_weak(number).unwrap(), TransitionOutcome::Ignored);

        let object = session.create_object(1).unwrap();
        assert_eq!(session.request_weak(object).unwrap(), TransitionOutcome::Ignored);
        assert!(session.mark_disposing(object));
        assert_eq!(session.request_weak(object).unwrap(), TransitionOutcome::Applied);
        assert_eq!(session.handle_info(object).unwrap().state, DisposalState::WeakFlagged);
        assert_eq!(session.request_strong(object).unwrap(), TransitionOutcome::Applied);
        assert_eq!(
            session.handle_info(object).unwrap().state,
            DisposalState::ManagedDisposing
        );
    }

    #[test]
    fn test_update_value_on_invalid_handle() {
        let session = session();
        assert!(session.update_value(99).unwrap_err().is_invalid_handle());
        assert!(session.managed_object_id(-5).unwrap_err().is_invalid_handle());
    }

    #[test]
    fn test_array_helpers() {
        let session = session();
        let array = session.create_string_array(&["a", "b", "c"]).unwrap();
        assert_eq!(session.array_length(array).unwrap(), 3);
        let item = session.get_property_index(array, 1).unwrap();
        assert_eq!(session.update_value(item).unwrap().as_text().as_deref(), Some("b"));

        let object = session.create_object(NO_OBJECT_ID).unwrap();
        assert!(matches!(session.array_length(object), Err(BridgeError::NotAnArray(_))));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let session = session();
        let id = session.create_number(1.0).unwrap();
        session.shutdown();
        session.shutdown();
        assert!(session.is_disposed());
        assert!(matches!(session.value(id), Err(BridgeError::SessionDisposed(_))));
        assert!(!session.try_dispose(id));
        assert!(DisposedSessions::global().is_disposed(session.id()));
    }
}
