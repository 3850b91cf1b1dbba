//! Object and function templates
//!
//! Templates describe how host-backed objects are built: how many internal
//! fields they reserve, which interceptor answers their property accesses,
//! which native callback runs when they are called, and which properties and
//! accessors every instance starts with.

use std::sync::Arc;

use crate::isolate::Isolate;
use crate::value::{ObjectRef, PropertyAttributes, Value};

/// Identifier of an object template registered with an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectTemplateId(pub(crate) u32);

/// Identifier of a function template registered with an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionTemplateId(pub(crate) u32);

/// Number of internal fields reserved on every templated object.
///
/// Field 0 belongs to the embedder, field 1 holds the host object id.
pub const TEMPLATE_INTERNAL_FIELDS: usize = 2;

/// Outcome of an interceptor callback
#[derive(Debug, Clone, PartialEq)]
pub enum Intercepted<T> {
    /// Fall through to the ordinary property lookup
    NotIntercepted,
    /// The interceptor handled the access
    Value(T),
    /// The interceptor threw
    Throw(Value),
}

/// Property interception for templated objects.
///
/// Every method defaults to [`Intercepted::NotIntercepted`].
#[allow(unused_variables)]
pub trait PropertyInterceptor: Send + Sync {
    fn get_named(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Intercepted<Value> {
        Intercepted::NotIntercepted
    }

    fn set_named(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        name: &str,
        value: &Value,
    ) -> Intercepted<Value> {
        Intercepted::NotIntercepted
    }

    fn query_named(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        name: &str,
    ) -> Intercepted<PropertyAttributes> {
        Intercepted::NotIntercepted
    }

    fn delete_named(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Intercepted<bool> {
        Intercepted::NotIntercepted
    }

    fn enumerate_named(&self, isolate: &Isolate, holder: ObjectRef) -> Intercepted<Vec<String>> {
        Intercepted::NotIntercepted
    }

    fn get_indexed(&self, isolate: &Isolate, holder: ObjectRef, index: u32) -> Intercepted<Value> {
        Intercepted::NotIntercepted
    }

    fn set_indexed(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        index: u32,
        value: &Value,
    ) -> Intercepted<Value> {
        Intercepted::NotIntercepted
    }

    fn query_indexed(
        &self,
        isolate: &Isolate,
        holder: ObjectRef,
        index: u32,
    ) -> Intercepted<PropertyAttributes> {
        Intercepted::NotIntercepted
    }

    fn delete_indexed(&self, isolate: &Isolate, holder: ObjectRef, index: u32) -> Intercepted<bool> {
        Intercepted::NotIntercepted
    }

    fn enumerate_indexed(&self, isolate: &Isolate, holder: ObjectRef) -> Intercepted<Vec<u32>> {
        Intercepted::NotIntercepted
    }
}

/// Arguments of a native call
#[derive(Debug)]
pub struct CallInfo<'a> {
    /// The function object being invoked
    pub callee: ObjectRef,
    pub this: Value,
    pub args: &'a [Value],
    /// `true` when invoked through `new`
    pub is_construct: bool,
}

impl CallInfo<'_> {
    /// Argument at `index`, `undefined` when absent
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

/// Native function callback. `Err` carries the thrown value.
pub trait NativeFunction: Send + Sync {
    fn call(&self, isolate: &Isolate, info: &CallInfo<'_>) -> Result<Value, Value>;
}

impl<F> NativeFunction for F
where
    F: Fn(&Isolate, &CallInfo<'_>) -> Result<Value, Value> + Send + Sync,
{
    fn call(&self, isolate: &Isolate, info: &CallInfo<'_>) -> Result<Value, Value> {
        self(isolate, info)
    }
}

/// Native getter/setter pair attached to a single property
pub trait NativeAccessor: Send + Sync {
    fn get(&self, isolate: &Isolate, holder: ObjectRef, name: &str) -> Result<Value, Value>;

    /// Defaults to ignoring writes, like a getter-only accessor
    fn set(
        &self,
        _isolate: &Isolate,
        _holder: ObjectRef,
        _name: &str,
        _value: &Value,
    ) -> Result<(), Value> {
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct TemplateProperty {
    pub name: Arc<str>,
    pub value: Value,
    pub attributes: PropertyAttributes,
}

#[derive(Clone)]
pub(crate) struct TemplateAccessor {
    pub name: Arc<str>,
    pub accessor: Arc<dyn NativeAccessor>,
    pub attributes: PropertyAttributes,
}

#[derive(Default)]
pub(crate) struct ObjectTemplate {
    pub interceptor: Option<Arc<dyn PropertyInterceptor>>,
    pub call_handler: Option<Arc<dyn NativeFunction>>,
    pub properties: Vec<TemplateProperty>,
    pub accessors: Vec<TemplateAccessor>,
}

pub(crate) struct FunctionTemplate {
    pub class_name: Arc<str>,
    pub callback: Option<Arc<dyn NativeFunction>>,
    pub instance_template: ObjectTemplateId,
    pub prototype_template: ObjectTemplateId,
    pub properties: Vec<TemplateProperty>,
    /// Function object, created on first request and cached afterwards
    pub function: Option<ObjectRef>,
}

/// All templates of one isolate. Templates live as long as the isolate.
#[derive(Default)]
pub(crate) struct TemplateRegistry {
    objects: Vec<ObjectTemplate>,
    functions: Vec<FunctionTemplate>,
}

impl TemplateRegistry {
    pub fn add_object(&mut self, template: ObjectTemplate) -> ObjectTemplateId {
        self.objects.push(template);
        ObjectTemplateId((self.objects.len() - 1) as u32)
    }

    pub fn add_function(&mut self, template: FunctionTemplate) -> FunctionTemplateId {
        self.functions.push(template);
        FunctionTemplateId((self.functions.len() - 1) as u32)
    }

    pub fn object(&self, id: ObjectTemplateId) -> Option<&ObjectTemplate> {
        self.objects.get(id.0 as usize)
    }

    pub fn object_mut(&mut self, id: ObjectTemplateId) -> Option<&mut ObjectTemplate> {
        self.objects.get_mut(id.0 as usize)
    }

    pub fn function(&self, id: FunctionTemplateId) -> Option<&FunctionTemplate> {
        self.functions.get(id.0 as usize)
    }

    pub fn function_mut(&mut self, id: FunctionTemplateId) -> Option<&mut FunctionTemplate> {
        self.functions.get_mut(id.0 as usize)
    }

    /// Values reachable from template data (GC roots)
    pub fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        let object_values = self
            .objects
            .iter()
            .flat_map(|t| t.properties.iter().map(|p| p.value.clone()));
        let function_values = self.functions.iter().flat_map(|t| {
            t.properties
                .iter()
                .map(|p| p.value.clone())
                .chain(t.function.map(Value::Object))
        });
        object_values.chain(function_values)
    }
}
