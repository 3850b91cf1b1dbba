//! Isolate: the single-threaded engine instance
//!
//! Every method takes `&self`. State lives behind short-lived `RefCell`
//! borrows that are released before any native callback runs, so callbacks
//! may re-enter the isolate freely (create values, read properties, run
//! nested scripts). The embedder serializes access to one isolate with its
//! own lock; the isolate itself is `Send` but not `Sync`.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexSet;
use tracing::{debug, trace};

use crate::compiler;
use crate::error::{EngineError, EngineResult};
use crate::heap::{
    ErrorName, FunctionKind, GcStats, Heap, HeapObject, HeapStats, InternalField, ObjectKind,
    Property, PropertySlot,
};
use crate::interpreter::Interpreter;
use crate::ir::{CompiledScript, Pos};
use crate::template::{
    CallInfo, FunctionTemplate, FunctionTemplateId, Intercepted, NativeAccessor, NativeFunction,
    ObjectTemplate, ObjectTemplateId, PropertyInterceptor, TEMPLATE_INTERNAL_FIELDS,
    TemplateAccessor, TemplateProperty, TemplateRegistry,
};
use crate::value::{
    ObjectRef, Persistent, PropertyAttributes, Value, ValueKind, is_int32, number_to_string,
};

/// Dense array storage refuses writes this far past the current length
const MAX_ARRAY_GAP: usize = 1 << 20;

/// Non-local exit of an engine operation
#[derive(Debug)]
pub(crate) enum Abrupt {
    Throw { value: Value, pos: Option<Pos> },
    Terminate,
    Fault(EngineError),
}

pub(crate) type Completion<T> = Result<T, Abrupt>;

impl From<EngineError> for Abrupt {
    fn from(err: EngineError) -> Self {
        Abrupt::Fault(err)
    }
}

/// Property key: canonical array indices are kept numeric
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum PropertyKey {
    Index(u32),
    Name(Arc<str>),
}

impl PropertyKey {
    pub fn parse(name: &str) -> Self {
        let canonical = !name.is_empty()
            && name.len() <= 10
            && name.bytes().all(|b| b.is_ascii_digit())
            && (name == "0" || !name.starts_with('0'));
        match name.parse::<u32>() {
            Ok(index) if canonical && index != u32::MAX => PropertyKey::Index(index),
            _ => PropertyKey::Name(Arc::from(name)),
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        match self {
            PropertyKey::Index(index) => Cow::Owned(index.to_string()),
            PropertyKey::Name(name) => Cow::Borrowed(name),
        }
    }

    fn is_length(&self) -> bool {
        matches!(self, PropertyKey::Name(name) if &**name == "length")
    }
}

/// Clonable, thread-safe handle to request termination of running script
#[derive(Debug, Clone)]
pub struct TerminationHandle {
    flag: Arc<AtomicBool>,
}

impl TerminationHandle {
    /// Request termination. Running script unwinds at its next check.
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_terminating(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

enum Own {
    Data(Value),
    Accessor(Arc<dyn NativeAccessor>),
    Missing(Option<ObjectRef>),
}

enum WritePlan {
    Accessor(Arc<dyn NativeAccessor>),
    ReadOnly,
    Write,
}

enum CallTarget {
    Native(FunctionTemplateId),
    ErrorConstructor(ErrorName),
    Handler(Arc<dyn NativeFunction>),
    NotCallable,
}

struct ErrorBuiltin {
    name: ErrorName,
    constructor: ObjectRef,
    prototype: ObjectRef,
}

/// An engine instance with its own heap, global object and templates
pub struct Isolate {
    heap: RefCell<Heap>,
    templates: RefCell<TemplateRegistry>,
    global: Cell<ObjectRef>,
    errors: Vec<ErrorBuiltin>,
    running: Cell<u32>,
    terminate: Arc<AtomicBool>,
    position: Cell<Option<Pos>>,
    source_name: RefCell<Option<Arc<str>>>,
    join_stack: RefCell<Vec<ObjectRef>>,
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

impl Isolate {
    pub fn new() -> Self {
        let mut heap = Heap::default();
        let global = heap.alloc(HeapObject::new(ObjectKind::Ordinary));

        let errors = ErrorName::ALL
            .iter()
            .map(|&name| {
                let mut prototype = HeapObject::new(ObjectKind::Ordinary);
                prototype.define("name", Value::string(name.as_str()), PropertyAttributes::DONT_ENUM);
                prototype.define("message", Value::string(""), PropertyAttributes::DONT_ENUM);
                let prototype = heap.alloc(prototype);

                let mut constructor =
                    HeapObject::new(ObjectKind::Function(FunctionKind::ErrorConstructor(name)));
                constructor.define(
                    "prototype",
                    Value::Object(prototype),
                    PropertyAttributes::DONT_ENUM | PropertyAttributes::DONT_DELETE,
                );
                constructor.define("name", Value::string(name.as_str()), PropertyAttributes::DONT_ENUM);
                let constructor = heap.alloc(constructor);
                if let Some(object) = heap.get_mut(prototype) {
                    object.define("constructor", Value::Object(constructor), PropertyAttributes::DONT_ENUM);
                }
                ErrorBuiltin {
                    name,
                    constructor,
                    prototype,
                }
            })
            .collect();

        let isolate = Self {
            heap: RefCell::new(heap),
            templates: RefCell::new(TemplateRegistry::default()),
            global: Cell::new(global),
            errors,
            running: Cell::new(0),
            terminate: Arc::new(AtomicBool::new(false)),
            position: Cell::new(None),
            source_name: RefCell::new(None),
            join_stack: RefCell::new(Vec::new()),
        };
        isolate.install_builtins(global);
        debug!("isolate created");
        isolate
    }

    fn install_builtins(&self, global: ObjectRef) {
        let mut heap = self.heap.borrow_mut();
        if let Some(object) = heap.get_mut(global) {
            for builtin in &self.errors {
                object.define(
                    builtin.name.as_str(),
                    Value::Object(builtin.constructor),
                    PropertyAttributes::DONT_ENUM,
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals shared with the interpreter
    // ------------------------------------------------------------------

    pub(crate) fn throw(&self, value: Value) -> Abrupt {
        Abrupt::Throw {
            value,
            pos: self.position.get(),
        }
    }

    pub(crate) fn throw_error(&self, name: ErrorName, message: &str) -> Abrupt {
        let error = self.new_error(name, message);
        self.throw(error)
    }

    pub(crate) fn set_position(&self, pos: Pos) {
        self.position.set(Some(pos));
    }

    pub(crate) fn check_terminate(&self) -> Completion<()> {
        if self.terminate.load(Ordering::SeqCst) {
            Err(Abrupt::Terminate)
        } else {
            Ok(())
        }
    }

    fn complete<T>(&self, result: Completion<T>) -> EngineResult<T> {
        result.map_err(|abrupt| self.abrupt_to_error(abrupt))
    }

    pub(crate) fn abrupt_to_error(&self, abrupt: Abrupt) -> EngineError {
        match abrupt {
            Abrupt::Terminate => EngineError::Terminated,
            Abrupt::Fault(err) => err,
            Abrupt::Throw { value, pos } => {
                let message = self.to_display_string(&value);
                let stack = value.as_object().and_then(|obj| {
                    let heap = self.heap.borrow();
                    let object = heap.get(obj)?;
                    match object.kind {
                        ObjectKind::Error => object.data("stack")?.as_str().map(str::to_string),
                        _ => None,
                    }
                });
                EngineError::Exception {
                    message,
                    line: pos.map(|p| p.line),
                    column: pos.map(|p| p.column),
                    stack,
                    value,
                }
            }
        }
    }

    fn invalid() -> Abrupt {
        Abrupt::Fault(EngineError::InvalidObject)
    }

    fn interceptor(&self, obj: ObjectRef) -> Option<Arc<dyn PropertyInterceptor>> {
        let template = self.heap.borrow().get(obj)?.template?;
        self.templates.borrow().object(template)?.interceptor.clone()
    }

    fn own_lookup(&self, obj: ObjectRef, key: &PropertyKey) -> Completion<Own> {
        let heap = self.heap.borrow();
        let object = heap.get(obj).ok_or_else(Self::invalid)?;
        match (&object.kind, key) {
            (ObjectKind::Array(elements), PropertyKey::Index(index)) => {
                if let Some(value) = elements.get(*index as usize) {
                    return Ok(Own::Data(value.clone()));
                }
            }
            (ObjectKind::Array(elements), key) if key.is_length() => {
                return Ok(Own::Data(Value::number(elements.len() as f64)));
            }
            (ObjectKind::StringObject(s), key) if key.is_length() => {
                return Ok(Own::Data(Value::number(s.encode_utf16().count() as f64)));
            }
            _ => {}
        }
        Ok(match object.properties.get(&*key.name()) {
            Some(Property {
                slot: PropertySlot::Data(value),
                ..
            }) => Own::Data(value.clone()),
            Some(Property {
                slot: PropertySlot::Accessor(accessor),
                ..
            }) => Own::Accessor(accessor.clone()),
            None => Own::Missing(object.prototype),
        })
    }

    /// `[[Get]]` returning `None` when the property does not exist anywhere
    pub(crate) fn lookup(&self, receiver: ObjectRef, key: &PropertyKey) -> Completion<Option<Value>> {
        let mut current = Some(receiver);
        while let Some(obj) = current {
            if let Some(interceptor) = self.interceptor(obj) {
                let outcome = match key {
                    PropertyKey::Index(index) => interceptor.get_indexed(self, obj, *index),
                    PropertyKey::Name(name) => interceptor.get_named(self, obj, name),
                };
                self.check_terminate()?;
                match outcome {
                    Intercepted::Value(value) => return Ok(Some(value)),
                    Intercepted::Throw(value) => return Err(self.throw(value)),
                    Intercepted::NotIntercepted => {}
                }
            }
            match self.own_lookup(obj, key)? {
                Own::Data(value) => return Ok(Some(value)),
                Own::Accessor(accessor) => {
                    let value = accessor
                        .get(self, receiver, &key.name())
                        .map_err(|e| self.throw(e))?;
                    self.check_terminate()?;
                    return Ok(Some(value));
                }
                Own::Missing(prototype) => current = prototype,
            }
        }
        Ok(None)
    }

    pub(crate) fn get(&self, receiver: ObjectRef, key: &PropertyKey) -> Completion<Value> {
        Ok(self.lookup(receiver, key)?.unwrap_or_default())
    }

    fn write_plan(&self, receiver: ObjectRef, key: &PropertyKey) -> Completion<WritePlan> {
        let heap = self.heap.borrow();
        let mut current = Some(receiver);
        while let Some(obj) = current {
            let object = heap.get(obj).ok_or_else(Self::invalid)?;
            if matches!(object.kind, ObjectKind::Array(_))
                && (matches!(key, PropertyKey::Index(_)) || key.is_length())
            {
                return Ok(WritePlan::Write);
            }
            match object.properties.get(&*key.name()) {
                Some(Property {
                    slot: PropertySlot::Accessor(accessor),
                    ..
                }) => return Ok(WritePlan::Accessor(accessor.clone())),
                Some(property) if property.attributes.contains(PropertyAttributes::READ_ONLY) => {
                    return Ok(WritePlan::ReadOnly);
                }
                Some(_) => return Ok(WritePlan::Write),
                None => current = object.prototype,
            }
        }
        Ok(WritePlan::Write)
    }

    /// `[[Set]]` honoring interceptors, accessors and read-only properties
    pub(crate) fn set(&self, receiver: ObjectRef, key: &PropertyKey, value: Value) -> Completion<()> {
        if let Some(interceptor) = self.interceptor(receiver) {
            let outcome = match key {
                PropertyKey::Index(index) => interceptor.set_indexed(self, receiver, *index, &value),
                PropertyKey::Name(name) => interceptor.set_named(self, receiver, name, &value),
            };
            self.check_terminate()?;
            match outcome {
                Intercepted::Value(_) => return Ok(()),
                Intercepted::Throw(thrown) => return Err(self.throw(thrown)),
                Intercepted::NotIntercepted => {}
            }
        }
        match self.write_plan(receiver, key)? {
            WritePlan::Accessor(accessor) => {
                accessor
                    .set(self, receiver, &key.name(), &value)
                    .map_err(|e| self.throw(e))?;
                self.check_terminate()
            }
            WritePlan::ReadOnly => Ok(()),
            WritePlan::Write => self.write_own(receiver, key, value, None),
        }
    }

    fn write_own(
        &self,
        obj: ObjectRef,
        key: &PropertyKey,
        value: Value,
        attributes: Option<PropertyAttributes>,
    ) -> Completion<()> {
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or_else(Self::invalid)?;
        if let ObjectKind::Array(elements) = &mut object.kind {
            match key {
                PropertyKey::Index(index) => {
                    let index = *index as usize;
                    if index >= elements.len() + MAX_ARRAY_GAP {
                        drop(heap);
                        return Err(self.throw_error(ErrorName::RangeError, "Invalid array index"));
                    }
                    if index >= elements.len() {
                        elements.resize(index + 1, Value::Undefined);
                    }
                    elements[index] = value;
                    return Ok(());
                }
                key if key.is_length() => {
                    let length = value.to_number();
                    if length < 0.0 || length.fract() != 0.0 || length > u32::MAX as f64 {
                        drop(heap);
                        return Err(self.throw_error(ErrorName::RangeError, "Invalid array length"));
                    }
                    let length = length as usize;
                    if length > elements.len() + MAX_ARRAY_GAP {
                        drop(heap);
                        return Err(self.throw_error(ErrorName::RangeError, "Invalid array length"));
                    }
                    elements.resize(length, Value::Undefined);
                    return Ok(());
                }
                _ => {}
            }
        }
        let name = key.name();
        match attributes {
            Some(attributes) => object.define(&name, value, attributes),
            None => {
                if let Some(property) = object.properties.get_mut(&*name) {
                    property.slot = PropertySlot::Data(value);
                } else {
                    object.define(&name, value, PropertyAttributes::NONE);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn delete(&self, obj: ObjectRef, key: &PropertyKey) -> Completion<bool> {
        if let Some(interceptor) = self.interceptor(obj) {
            let outcome = match key {
                PropertyKey::Index(index) => interceptor.delete_indexed(self, obj, *index),
                PropertyKey::Name(name) => interceptor.delete_named(self, obj, name),
            };
            self.check_terminate()?;
            match outcome {
                Intercepted::Value(deleted) => return Ok(deleted),
                Intercepted::Throw(thrown) => return Err(self.throw(thrown)),
                Intercepted::NotIntercepted => {}
            }
        }
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or_else(Self::invalid)?;
        if let ObjectKind::Array(elements) = &mut object.kind {
            match key {
                PropertyKey::Index(index) => {
                    if let Some(slot) = elements.get_mut(*index as usize) {
                        *slot = Value::Undefined;
                    }
                    return Ok(true);
                }
                key if key.is_length() => return Ok(false),
                _ => {}
            }
        }
        let name = key.name();
        match object.properties.get(&*name) {
            Some(property) if property.attributes.contains(PropertyAttributes::DONT_DELETE) => {
                Ok(false)
            }
            Some(_) => {
                object.properties.shift_remove(&*name);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    pub(crate) fn query(
        &self,
        receiver: ObjectRef,
        key: &PropertyKey,
    ) -> Completion<Option<PropertyAttributes>> {
        let mut current = Some(receiver);
        while let Some(obj) = current {
            if let Some(interceptor) = self.interceptor(obj) {
                let outcome = match key {
                    PropertyKey::Index(index) => interceptor.query_indexed(self, obj, *index),
                    PropertyKey::Name(name) => interceptor.query_named(self, obj, name),
                };
                self.check_terminate()?;
                match outcome {
                    Intercepted::Value(attributes) => return Ok(Some(attributes)),
                    Intercepted::Throw(thrown) => return Err(self.throw(thrown)),
                    Intercepted::NotIntercepted => {}
                }
            }
            let heap = self.heap.borrow();
            let object = heap.get(obj).ok_or_else(Self::invalid)?;
            if let ObjectKind::Array(elements) = &object.kind {
                match key {
                    PropertyKey::Index(index) if (*index as usize) < elements.len() => {
                        return Ok(Some(PropertyAttributes::NONE));
                    }
                    key if key.is_length() => {
                        return Ok(Some(
                            PropertyAttributes::DONT_ENUM | PropertyAttributes::DONT_DELETE,
                        ));
                    }
                    _ => {}
                }
            }
            if let Some(property) = object.properties.get(&*key.name()) {
                return Ok(Some(property.attributes));
            }
            current = object.prototype;
        }
        Ok(None)
    }

    fn own_keys(&self, obj: ObjectRef, include_hidden: bool) -> Completion<Vec<String>> {
        let mut keys = Vec::new();
        if let Some(interceptor) = self.interceptor(obj) {
            match interceptor.enumerate_indexed(self, obj) {
                Intercepted::Value(indices) => keys.extend(indices.iter().map(u32::to_string)),
                Intercepted::Throw(thrown) => return Err(self.throw(thrown)),
                Intercepted::NotIntercepted => {}
            }
            match interceptor.enumerate_named(self, obj) {
                Intercepted::Value(names) => keys.extend(names),
                Intercepted::Throw(thrown) => return Err(self.throw(thrown)),
                Intercepted::NotIntercepted => {}
            }
            self.check_terminate()?;
        }
        let heap = self.heap.borrow();
        let object = heap.get(obj).ok_or_else(Self::invalid)?;
        if let ObjectKind::Array(elements) = &object.kind {
            keys.extend((0..elements.len()).map(|i| i.to_string()));
        }
        keys.extend(
            object
                .properties
                .iter()
                .filter(|(_, p)| include_hidden || !p.attributes.contains(PropertyAttributes::DONT_ENUM))
                .map(|(name, _)| name.to_string()),
        );
        Ok(keys)
    }

    pub(crate) fn call_object(
        &self,
        callee: ObjectRef,
        this: Value,
        args: &[Value],
        construct: bool,
    ) -> Completion<Value> {
        self.check_terminate()?;
        let target = {
            let heap = self.heap.borrow();
            let object = heap.get(callee).ok_or_else(Self::invalid)?;
            match (&object.kind, object.template) {
                (ObjectKind::Function(FunctionKind::Native(id)), _) => CallTarget::Native(*id),
                (ObjectKind::Function(FunctionKind::ErrorConstructor(name)), _) => {
                    CallTarget::ErrorConstructor(*name)
                }
                (_, Some(template)) => self
                    .templates
                    .borrow()
                    .object(template)
                    .and_then(|t| t.call_handler.clone())
                    .map(CallTarget::Handler)
                    .unwrap_or(CallTarget::NotCallable),
                _ => CallTarget::NotCallable,
            }
        };

        match target {
            CallTarget::Native(id) => {
                let callback = self
                    .templates
                    .borrow()
                    .function(id)
                    .and_then(|t| t.callback.clone());
                let receiver = if construct {
                    Value::Object(self.construct_receiver(callee, id)?)
                } else {
                    this
                };
                let result = match callback {
                    Some(callback) => {
                        let info = CallInfo {
                            callee,
                            this: receiver.clone(),
                            args,
                            is_construct: construct,
                        };
                        callback.call(self, &info).map_err(|e| self.throw(e))?
                    }
                    None => Value::Undefined,
                };
                self.check_terminate()?;
                if construct && !result.is_object() {
                    Ok(receiver)
                } else {
                    Ok(result)
                }
            }
            CallTarget::ErrorConstructor(name) => {
                let message = match args.first() {
                    None | Some(Value::Undefined) => String::new(),
                    Some(value) => self.to_string_internal(value)?.to_string(),
                };
                Ok(self.new_error(name, &message))
            }
            CallTarget::Handler(handler) => {
                let info = CallInfo {
                    callee,
                    this,
                    args,
                    is_construct: construct,
                };
                let result = handler.call(self, &info).map_err(|e| self.throw(e))?;
                self.check_terminate()?;
                Ok(result)
            }
            CallTarget::NotCallable => {
                Err(self.throw_error(ErrorName::TypeError, "object is not a function"))
            }
        }
    }

    fn construct_receiver(&self, callee: ObjectRef, id: FunctionTemplateId) -> Completion<ObjectRef> {
        let instance_template = self
            .templates
            .borrow()
            .function(id)
            .map(|t| t.instance_template)
            .ok_or_else(|| EngineError::Internal("unknown function template".to_string()))?;
        let prototype = self
            .get(callee, &PropertyKey::parse("prototype"))?
            .as_object();
        let instance = self.instantiate(instance_template)?;
        if let Some(object) = self.heap.borrow_mut().get_mut(instance) {
            object.prototype = prototype;
        }
        Ok(instance)
    }

    fn instantiate(&self, id: ObjectTemplateId) -> EngineResult<ObjectRef> {
        let (properties, accessors) = {
            let templates = self.templates.borrow();
            let template = templates
                .object(id)
                .ok_or_else(|| EngineError::Internal("unknown object template".to_string()))?;
            (template.properties.clone(), template.accessors.clone())
        };
        let mut object = HeapObject::new(ObjectKind::Ordinary);
        object.template = Some(id);
        object.internal_fields = vec![InternalField::Empty; TEMPLATE_INTERNAL_FIELDS];
        for property in properties {
            object.define(&property.name, property.value, property.attributes);
        }
        for accessor in accessors {
            object.properties.insert(
                accessor.name,
                Property {
                    slot: PropertySlot::Accessor(accessor.accessor),
                    attributes: accessor.attributes,
                },
            );
        }
        Ok(self.heap.borrow_mut().alloc(object))
    }

    pub(crate) fn is_callable(&self, obj: ObjectRef) -> bool {
        let heap = self.heap.borrow();
        let Some(object) = heap.get(obj) else {
            return false;
        };
        match (&object.kind, object.template) {
            (ObjectKind::Function(_), _) => true,
            (_, Some(template)) => self
                .templates
                .borrow()
                .object(template)
                .is_some_and(|t| t.call_handler.is_some()),
            _ => false,
        }
    }

    pub(crate) fn prototype_chain_contains(&self, obj: ObjectRef, target: ObjectRef) -> bool {
        let heap = self.heap.borrow();
        let mut current = heap.get(obj).and_then(|o| o.prototype);
        while let Some(proto) = current {
            if proto == target {
                return true;
            }
            current = heap.get(proto).and_then(|o| o.prototype);
        }
        false
    }

    /// `ToString`
    pub(crate) fn to_string_internal(&self, value: &Value) -> Completion<Arc<str>> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Object(obj) => self.object_to_string(*obj),
            other => Ok(Arc::from(other.to_string())),
        }
    }

    fn object_to_string(&self, obj: ObjectRef) -> Completion<Arc<str>> {
        enum Shape {
            Array(Vec<Value>),
            Error,
            Function(Arc<str>),
            Text(String),
            Plain,
        }
        let shape = {
            let heap = self.heap.borrow();
            let object = heap.get(obj).ok_or_else(Self::invalid)?;
            match &object.kind {
                ObjectKind::Array(elements) => Shape::Array(elements.clone()),
                ObjectKind::Error => Shape::Error,
                ObjectKind::Function(_) => Shape::Function(
                    object
                        .data("name")
                        .and_then(Value::as_str)
                        .map(Arc::from)
                        .unwrap_or_else(|| Arc::from("")),
                ),
                ObjectKind::Date(time) => Shape::Text(format_date(*time)),
                ObjectKind::RegExp { source, flags } => Shape::Text(format!("/{source}/{flags}")),
                ObjectKind::BoolObject(b) => Shape::Text(b.to_string()),
                ObjectKind::NumberObject(n) => Shape::Text(number_to_string(*n)),
                ObjectKind::StringObject(s) => Shape::Text(s.to_string()),
                ObjectKind::Ordinary => Shape::Plain,
            }
        };
        Ok(match shape {
            Shape::Array(elements) => {
                if self.join_stack.borrow().contains(&obj) {
                    return Ok(Arc::from(""));
                }
                self.join_stack.borrow_mut().push(obj);
                let joined = elements
                    .iter()
                    .map(|element| match element {
                        Value::Undefined | Value::Null => Ok(Arc::from("")),
                        other => self.to_string_internal(other),
                    })
                    .collect::<Completion<Vec<_>>>();
                self.join_stack.borrow_mut().pop();
                Arc::from(joined?.join(","))
            }
            Shape::Error => {
                let name = self.get(obj, &PropertyKey::parse("name"))?;
                let message = self.get(obj, &PropertyKey::parse("message"))?;
                let name = match name {
                    Value::Undefined => Arc::from("Error"),
                    other => self.to_string_internal(&other)?,
                };
                let message = match message {
                    Value::Undefined => Arc::from(""),
                    other => self.to_string_internal(&other)?,
                };
                if message.is_empty() {
                    name
                } else {
                    Arc::from(format!("{name}: {message}"))
                }
            }
            Shape::Function(name) => Arc::from(format!("function {name}() {{ [native code] }}")),
            Shape::Text(text) => Arc::from(text),
            Shape::Plain => Arc::from("[object Object]"),
        })
    }

    /// `ToNumber`
    pub(crate) fn to_number_internal(&self, value: &Value) -> Completion<f64> {
        let Value::Object(obj) = value else {
            return Ok(value.to_number());
        };
        let primitive = {
            let heap = self.heap.borrow();
            match heap.get(*obj).map(|o| &o.kind) {
                Some(ObjectKind::Date(time)) => Some(*time),
                Some(ObjectKind::NumberObject(n)) => Some(*n),
                Some(ObjectKind::BoolObject(b)) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            }
        };
        match primitive {
            Some(n) => Ok(n),
            None => Ok(Value::String(self.to_string_internal(value)?).to_number()),
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Current global object
    pub fn global(&self) -> ObjectRef {
        self.global.get()
    }

    /// Classify a value
    pub fn kind_of(&self, value: &Value) -> ValueKind {
        match value {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int32(_) => ValueKind::Int32,
            Value::Number(n) if is_int32(*n) => ValueKind::Int32,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Null => ValueKind::Null,
            Value::Undefined => ValueKind::Undefined,
            Value::Object(obj) => {
                let heap = self.heap.borrow();
                let Some(object) = heap.get(*obj) else {
                    return ValueKind::Undefined;
                };
                match &object.kind {
                    ObjectKind::BoolObject(_) => ValueKind::BoolObject,
                    ObjectKind::NumberObject(_) => ValueKind::NumberObject,
                    ObjectKind::StringObject(_) => ValueKind::StringObject,
                    ObjectKind::Date(_) => ValueKind::Date,
                    ObjectKind::Array(_) => ValueKind::Array,
                    ObjectKind::RegExp { .. } => ValueKind::RegExp,
                    ObjectKind::Function(_) => ValueKind::Function,
                    ObjectKind::Error => ValueKind::NativeError,
                    ObjectKind::Ordinary => ValueKind::Object,
                }
            }
        }
    }

    pub fn is_live(&self, obj: ObjectRef) -> bool {
        self.heap.borrow().is_live(obj)
    }

    pub fn new_object(&self) -> ObjectRef {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::Ordinary))
    }

    pub fn new_array(&self, elements: Vec<Value>) -> ObjectRef {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::Array(elements)))
    }

    /// Date object from milliseconds since the Unix epoch
    pub fn new_date(&self, time: f64) -> ObjectRef {
        self.heap
            .borrow_mut()
            .alloc(HeapObject::new(ObjectKind::Date(time)))
    }

    pub fn new_regexp(&self, source: &str, flags: &str) -> ObjectRef {
        self.heap.borrow_mut().alloc(HeapObject::new(ObjectKind::RegExp {
            source: Arc::from(source),
            flags: Arc::from(flags),
        }))
    }

    /// Box a primitive (`new Boolean(..)`, `new Number(..)`, `new String(..)`)
    pub fn box_primitive(&self, value: &Value) -> Option<ObjectRef> {
        let kind = match value {
            Value::Bool(b) => ObjectKind::BoolObject(*b),
            Value::Int32(i) => ObjectKind::NumberObject(*i as f64),
            Value::Number(n) => ObjectKind::NumberObject(*n),
            Value::String(s) => ObjectKind::StringObject(s.clone()),
            _ => return None,
        };
        Some(self.heap.borrow_mut().alloc(HeapObject::new(kind)))
    }

    /// Error object; its `stack` records the current script position when one is known
    pub fn new_error(&self, name: ErrorName, message: &str) -> Value {
        let prototype = self
            .errors
            .iter()
            .find(|builtin| builtin.name == name)
            .map(|builtin| builtin.prototype);
        let header = if message.is_empty() {
            name.as_str().to_string()
        } else {
            format!("{}: {message}", name.as_str())
        };
        let stack = match (self.position.get(), self.source_name.borrow().as_deref()) {
            (Some(pos), Some(source)) => {
                format!("{header}\n    at {source}:{}:{}", pos.line, pos.column)
            }
            _ => header,
        };
        let mut object = HeapObject::new(ObjectKind::Error).with_prototype(prototype);
        object.define("message", Value::string(message), PropertyAttributes::DONT_ENUM);
        object.define("stack", Value::string(stack), PropertyAttributes::DONT_ENUM);
        Value::Object(self.heap.borrow_mut().alloc(object))
    }

    /// Convert an error returned by an isolate call back into a throwable value
    pub fn rethrow(&self, err: EngineError) -> Value {
        match err {
            EngineError::Exception { value, .. } => value,
            other => self.new_error(ErrorName::Error, &other.to_string()),
        }
    }

    /// `ToString`, invoking interceptors where the conversion reads properties
    pub fn to_string(&self, value: &Value) -> EngineResult<String> {
        let result = self.to_string_internal(value).map(|s| s.to_string());
        self.complete(result)
    }

    /// `ToString` that never fails
    pub fn to_display_string(&self, value: &Value) -> String {
        match self.to_string_internal(value) {
            Ok(text) => text.to_string(),
            Err(_) => match value {
                Value::Object(_) => "[object]".to_string(),
                other => other.to_string(),
            },
        }
    }

    pub fn to_number(&self, value: &Value) -> EngineResult<f64> {
        let result = self.to_number_internal(value);
        self.complete(result)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub fn get_property(&self, obj: ObjectRef, name: &str) -> EngineResult<Value> {
        let result = self.get(obj, &PropertyKey::parse(name));
        self.complete(result)
    }

    pub fn set_property(&self, obj: ObjectRef, name: &str, value: Value) -> EngineResult<()> {
        let result = self.set(obj, &PropertyKey::parse(name), value);
        self.complete(result)
    }

    /// Define (or redefine) an own data property, bypassing interceptors and setters
    pub fn define_property(
        &self,
        obj: ObjectRef,
        name: &str,
        value: Value,
        attributes: PropertyAttributes,
    ) -> EngineResult<()> {
        let result = self.write_own(obj, &PropertyKey::parse(name), value, Some(attributes));
        self.complete(result)
    }

    pub fn delete_property(&self, obj: ObjectRef, name: &str) -> EngineResult<bool> {
        let result = self.delete(obj, &PropertyKey::parse(name));
        self.complete(result)
    }

    pub fn get_index(&self, obj: ObjectRef, index: u32) -> EngineResult<Value> {
        let result = self.get(obj, &PropertyKey::Index(index));
        self.complete(result)
    }

    pub fn set_index(&self, obj: ObjectRef, index: u32, value: Value) -> EngineResult<()> {
        let result = self.set(obj, &PropertyKey::Index(index), value);
        self.complete(result)
    }

    pub fn delete_index(&self, obj: ObjectRef, index: u32) -> EngineResult<bool> {
        let result = self.delete(obj, &PropertyKey::Index(index));
        self.complete(result)
    }

    /// Attributes of a property, `None` when it does not exist
    pub fn property_attributes(
        &self,
        obj: ObjectRef,
        name: &str,
    ) -> EngineResult<Option<PropertyAttributes>> {
        let result = self.query(obj, &PropertyKey::parse(name));
        self.complete(result)
    }

    /// Own data property, read without running interceptors or accessors
    pub fn own_data_property(&self, obj: ObjectRef, name: &str) -> Option<Value> {
        self.heap.borrow().get(obj)?.data(name).cloned()
    }

    /// Enumerable property names along the prototype chain
    pub fn property_names(&self, obj: ObjectRef) -> EngineResult<Vec<String>> {
        let mut names = IndexSet::new();
        let mut current = Some(obj);
        while let Some(object) = current {
            let keys = self.own_keys(object, false);
            names.extend(self.complete(keys)?);
            current = self.heap.borrow().get(object).and_then(|o| o.prototype);
        }
        Ok(names.into_iter().collect())
    }

    /// Own property names, including non-enumerable ones
    pub fn own_property_names(&self, obj: ObjectRef) -> EngineResult<Vec<String>> {
        let keys = self.own_keys(obj, true);
        let names: IndexSet<String> = self.complete(keys)?.into_iter().collect();
        Ok(names.into_iter().collect())
    }

    pub fn array_length(&self, obj: ObjectRef) -> Option<u32> {
        match &self.heap.borrow().get(obj)?.kind {
            ObjectKind::Array(elements) => Some(elements.len() as u32),
            _ => None,
        }
    }

    pub fn prototype_of(&self, obj: ObjectRef) -> EngineResult<Option<ObjectRef>> {
        self.heap
            .borrow()
            .get(obj)
            .map(|object| object.prototype)
            .ok_or(EngineError::InvalidObject)
    }

    pub fn set_accessor(
        &self,
        obj: ObjectRef,
        name: &str,
        accessor: Arc<dyn NativeAccessor>,
        attributes: PropertyAttributes,
    ) -> EngineResult<()> {
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or(EngineError::InvalidObject)?;
        object.properties.insert(
            Arc::from(name),
            Property {
                slot: PropertySlot::Accessor(accessor),
                attributes,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Embedder side channels
    // ------------------------------------------------------------------

    pub fn internal_field_count(&self, obj: ObjectRef) -> usize {
        self.heap
            .borrow()
            .get(obj)
            .map_or(0, |object| object.internal_fields.len())
    }

    pub fn internal_field(&self, obj: ObjectRef, index: usize) -> Option<InternalField> {
        self.heap
            .borrow()
            .get(obj)?
            .internal_fields
            .get(index)
            .cloned()
    }

    pub fn set_internal_field(
        &self,
        obj: ObjectRef,
        index: usize,
        field: InternalField,
    ) -> EngineResult<()> {
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or(EngineError::InvalidObject)?;
        let slot = object.internal_fields.get_mut(index).ok_or_else(|| {
            EngineError::Internal(format!("internal field {index} out of range"))
        })?;
        *slot = field;
        Ok(())
    }

    /// Hidden property, invisible to scripts and enumeration
    pub fn private_property(&self, obj: ObjectRef, name: &str) -> Option<Value> {
        self.heap.borrow().get(obj)?.private.get(name).cloned()
    }

    pub fn set_private_property(&self, obj: ObjectRef, name: &str, value: Value) -> EngineResult<()> {
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or(EngineError::InvalidObject)?;
        object.private.insert(Arc::from(name), value);
        Ok(())
    }

    /// Embedder-assigned type tag attached at construction time
    pub fn type_tag(&self, obj: ObjectRef) -> Option<i32> {
        self.heap.borrow().get(obj)?.type_tag
    }

    pub fn set_type_tag(&self, obj: ObjectRef, tag: Option<i32>) -> EngineResult<()> {
        let mut heap = self.heap.borrow_mut();
        let object = heap.get_mut(obj).ok_or(EngineError::InvalidObject)?;
        object.type_tag = tag;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub fn call(&self, function: &Value, this: Value, args: &[Value]) -> EngineResult<Value> {
        let Value::Object(callee) = function else {
            return Err(EngineError::NotAFunction);
        };
        if !self.is_callable(*callee) {
            return Err(EngineError::NotAFunction);
        }
        let result = self.call_object(*callee, this, args, false);
        self.complete(result)
    }

    pub fn construct(&self, function: &Value, args: &[Value]) -> EngineResult<Value> {
        let Value::Object(callee) = function else {
            return Err(EngineError::NotAFunction);
        };
        if !self.is_callable(*callee) {
            return Err(EngineError::NotAFunction);
        }
        let result = self.call_object(*callee, Value::Undefined, args, true);
        self.complete(result)
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub fn new_object_template(&self) -> ObjectTemplateId {
        self.templates
            .borrow_mut()
            .add_object(ObjectTemplate::default())
    }

    fn with_object_template<T>(
        &self,
        id: ObjectTemplateId,
        f: impl FnOnce(&mut ObjectTemplate) -> T,
    ) -> EngineResult<T> {
        let mut templates = self.templates.borrow_mut();
        let template = templates
            .object_mut(id)
            .ok_or_else(|| EngineError::Internal("unknown object template".to_string()))?;
        Ok(f(template))
    }

    fn with_function_template<T>(
        &self,
        id: FunctionTemplateId,
        f: impl FnOnce(&mut FunctionTemplate) -> T,
    ) -> EngineResult<T> {
        let mut templates = self.templates.borrow_mut();
        let template = templates
            .function_mut(id)
            .ok_or_else(|| EngineError::Internal("unknown function template".to_string()))?;
        Ok(f(template))
    }

    pub fn set_template_interceptor(
        &self,
        id: ObjectTemplateId,
        interceptor: Option<Arc<dyn PropertyInterceptor>>,
    ) -> EngineResult<()> {
        self.with_object_template(id, |t| t.interceptor = interceptor)
    }

    pub fn set_template_call_handler(
        &self,
        id: ObjectTemplateId,
        handler: Option<Arc<dyn NativeFunction>>,
    ) -> EngineResult<()> {
        self.with_object_template(id, |t| t.call_handler = handler)
    }

    pub fn set_template_property(
        &self,
        id: ObjectTemplateId,
        name: &str,
        value: Value,
        attributes: PropertyAttributes,
    ) -> EngineResult<()> {
        self.with_object_template(id, |t| {
            t.properties.retain(|p| &*p.name != name);
            t.properties.push(TemplateProperty {
                name: Arc::from(name),
                value,
                attributes,
            });
        })
    }

    pub fn set_template_accessor(
        &self,
        id: ObjectTemplateId,
        name: &str,
        accessor: Arc<dyn NativeAccessor>,
        attributes: PropertyAttributes,
    ) -> EngineResult<()> {
        self.with_object_template(id, |t| {
            t.accessors.retain(|a| &*a.name != name);
            t.accessors.push(TemplateAccessor {
                name: Arc::from(name),
                accessor,
                attributes,
            });
        })
    }

    /// New object with the template's fields, properties and interceptor
    pub fn new_instance(&self, id: ObjectTemplateId) -> EngineResult<ObjectRef> {
        self.instantiate(id)
    }

    /// Replace the global object with an instance of `id`
    pub fn set_global_template(&self, id: ObjectTemplateId) -> EngineResult<ObjectRef> {
        let global = self.instantiate(id)?;
        self.install_builtins(global);
        self.global.set(global);
        debug!("global object replaced from template");
        Ok(global)
    }

    pub fn new_function_template(
        &self,
        class_name: &str,
        callback: Option<Arc<dyn NativeFunction>>,
    ) -> FunctionTemplateId {
        let mut templates = self.templates.borrow_mut();
        let instance_template = templates.add_object(ObjectTemplate::default());
        let prototype_template = templates.add_object(ObjectTemplate::default());
        templates.add_function(FunctionTemplate {
            class_name: Arc::from(class_name),
            callback,
            instance_template,
            prototype_template,
            properties: Vec::new(),
            function: None,
        })
    }

    pub fn set_function_callback(
        &self,
        id: FunctionTemplateId,
        callback: Option<Arc<dyn NativeFunction>>,
    ) -> EngineResult<()> {
        self.with_function_template(id, |t| t.callback = callback)
    }

    pub fn function_instance_template(&self, id: FunctionTemplateId) -> EngineResult<ObjectTemplateId> {
        self.with_function_template(id, |t| t.instance_template)
    }

    pub fn function_prototype_template(
        &self,
        id: FunctionTemplateId,
    ) -> EngineResult<ObjectTemplateId> {
        self.with_function_template(id, |t| t.prototype_template)
    }

    pub fn set_function_template_property(
        &self,
        id: FunctionTemplateId,
        name: &str,
        value: Value,
        attributes: PropertyAttributes,
    ) -> EngineResult<()> {
        let function = self.with_function_template(id, |t| {
            t.properties.retain(|p| &*p.name != name);
            t.properties.push(TemplateProperty {
                name: Arc::from(name),
                value: value.clone(),
                attributes,
            });
            t.function
        })?;
        if let Some(function) = function.filter(|f| self.is_live(*f)) {
            self.define_property(function, name, value, attributes)?;
        }
        Ok(())
    }

    /// The template's function object (created once, then cached)
    pub fn function_from_template(&self, id: FunctionTemplateId) -> EngineResult<ObjectRef> {
        let (cached, class_name, properties, prototype_template) = {
            let templates = self.templates.borrow();
            let template = templates
                .function(id)
                .ok_or_else(|| EngineError::Internal("unknown function template".to_string()))?;
            (
                template.function,
                template.class_name.clone(),
                template.properties.clone(),
                template.prototype_template,
            )
        };
        if let Some(function) = cached.filter(|f| self.is_live(*f)) {
            return Ok(function);
        }

        let prototype = self.instantiate(prototype_template)?;
        let mut object = HeapObject::new(ObjectKind::Function(FunctionKind::Native(id)));
        object.define("name", Value::String(class_name), PropertyAttributes::DONT_ENUM);
        object.define(
            "prototype",
            Value::Object(prototype),
            PropertyAttributes::DONT_ENUM | PropertyAttributes::DONT_DELETE,
        );
        for property in properties {
            object.define(&property.name, property.value, property.attributes);
        }
        let function = self.heap.borrow_mut().alloc(object);
        if let Some(proto) = self.heap.borrow_mut().get_mut(prototype) {
            proto.define("constructor", Value::Object(function), PropertyAttributes::DONT_ENUM);
        }
        self.with_function_template(id, |t| t.function = Some(function))?;
        Ok(function)
    }

    /// `new F(...args)` for the template's function
    pub fn new_function_instance(&self, id: FunctionTemplateId, args: &[Value]) -> EngineResult<Value> {
        let function = self.function_from_template(id)?;
        self.construct(&Value::Object(function), args)
    }

    // ------------------------------------------------------------------
    // Persistent handles and collection
    // ------------------------------------------------------------------

    pub fn new_persistent(&self, value: Value) -> Persistent {
        self.heap.borrow_mut().new_persistent(value)
    }

    pub fn persistent_value(&self, handle: Persistent) -> Option<Value> {
        self.heap.borrow().persistent_value(handle)
    }

    pub fn reset_persistent(&self, handle: Persistent) -> bool {
        self.heap.borrow_mut().reset_persistent(handle)
    }

    /// Make a persistent weak; `token` is reported once the target becomes unreachable
    pub fn make_weak(&self, handle: Persistent, token: u64) -> bool {
        self.heap.borrow_mut().make_weak(handle, token)
    }

    pub fn clear_weak(&self, handle: Persistent) -> bool {
        self.heap.borrow_mut().clear_weak(handle)
    }

    pub fn is_weak(&self, handle: Persistent) -> bool {
        self.heap.borrow().is_weak(handle)
    }

    /// Tokens of weak persistents whose targets were revived by the last collections
    pub fn take_weak_notices(&self) -> Vec<u64> {
        self.heap.borrow_mut().take_weak_notices()
    }

    fn roots(&self) -> Vec<Value> {
        let mut roots = vec![Value::Object(self.global.get())];
        for builtin in &self.errors {
            roots.push(Value::Object(builtin.constructor));
            roots.push(Value::Object(builtin.prototype));
        }
        roots.extend(self.templates.borrow().roots());
        roots
    }

    /// Full collection. Refused (returns `None`) while a script is running.
    pub fn collect_garbage(&self) -> Option<GcStats> {
        if self.is_running() {
            trace!("collection refused while script is running");
            return None;
        }
        let roots = self.roots();
        Some(self.heap.borrow_mut().collect(roots))
    }

    /// Opportunistic collection. Returns whether weak notices are waiting.
    pub fn idle_notification(&self) -> bool {
        self.collect_garbage();
        self.heap.borrow().has_weak_notices()
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.borrow().stats()
    }

    // ------------------------------------------------------------------
    // Scripts
    // ------------------------------------------------------------------

    pub fn compile(&self, source: &str, source_name: &str) -> EngineResult<Arc<CompiledScript>> {
        compiler::compile(source, source_name).map(Arc::new)
    }

    /// Run a compiled script; returns the completion value of its last expression statement
    pub fn run(&self, script: &CompiledScript) -> EngineResult<Value> {
        let outermost = self.running.get() == 0;
        self.running.set(self.running.get() + 1);
        let previous_source = self
            .source_name
            .replace(Some(script.source_name.clone()));
        let previous_position = self.position.replace(None);

        let result = Interpreter::new(self).run(&script.body);
        let result = self.complete(result);

        self.running.set(self.running.get() - 1);
        *self.source_name.borrow_mut() = previous_source;
        self.position.set(previous_position);
        if outermost && self.terminate.swap(false, Ordering::SeqCst) {
            debug!(source = %script.source_name, "termination flag cleared after unwind");
        }
        result
    }

    /// Compile and run in one step
    pub fn execute(&self, source: &str, source_name: &str) -> EngineResult<Value> {
        let script = self.compile(source, source_name)?;
        self.run(&script)
    }

    /// `true` while any script is being interpreted
    pub fn is_running(&self) -> bool {
        self.running.get() > 0
    }

    pub fn termination_handle(&self) -> TerminationHandle {
        TerminationHandle {
            flag: self.terminate.clone(),
        }
    }

    pub fn terminate_execution(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn cancel_terminate(&self) {
        self.terminate.store(false, Ordering::SeqCst);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

fn format_date(time: f64) -> String {
    if !time.is_finite() {
        return "Invalid Date".to_string();
    }
    match chrono::DateTime::from_timestamp_millis(time as i64) {
        Some(date) => date
            .format("%a %b %d %Y %H:%M:%S GMT+0000 (Coordinated Universal Time)")
            .to_string(),
        None => "Invalid Date".to_string(),
    }
}
