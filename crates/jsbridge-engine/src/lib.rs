//! Reference scripting engine for the jsbridge handle bridge.
//!
//! A small, self-contained JavaScript engine that offers the embedder
//! surface the bridge is written against: a generational heap, persistent
//! handles that can be made weak (with revivable notices), object and
//! function templates with property interceptors, internal fields, hidden
//! properties and cooperative termination.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       Isolate                         │
//! │  compile() ──► swc parser ──► IR ──► Interpreter      │
//! │                                         │             │
//! │        ┌──────────────┬─────────────────┘             │
//! │        ▼              ▼                               │
//! │  ┌──────────┐   ┌─────────────┐   ┌───────────────┐   │
//! │  │   Heap   │◄──│  Templates  │   │  Termination  │   │
//! │  │ objects  │   │ interceptors│   │  (AtomicBool) │   │
//! │  │ persist. │   │ native fns  │   └───────────────┘   │
//! │  └──────────┘   └─────────────┘                       │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use jsbridge_engine::{Isolate, Value};
//!
//! let isolate = Isolate::new();
//! let result = isolate.execute("var x = 20; x + 22", "example.js").unwrap();
//! assert_eq!(result, Value::Int32(42));
//! ```
//!
//! # Thread Safety
//!
//! [`Isolate`] is `Send` but not `Sync`: one thread at a time, serialized by
//! the embedder's lock. [`TerminationHandle`] is the only piece meant to be
//! used from other threads while a script runs.

mod compiler;
mod error;
mod heap;
mod interpreter;
mod ir;
mod isolate;
mod template;
mod value;

pub use error::{EngineError, EngineResult};
pub use heap::{ErrorName, GcStats, HeapStats, InternalField};
pub use ir::{CompiledScript, Pos};
pub use isolate::{Isolate, TerminationHandle};
pub use template::{
    CallInfo, FunctionTemplateId, Intercepted, NativeAccessor, NativeFunction, ObjectTemplateId,
    PropertyInterceptor, TEMPLATE_INTERNAL_FIELDS,
};
pub use value::{ObjectRef, Persistent, PropertyAttributes, Value, ValueKind, number_to_string};
