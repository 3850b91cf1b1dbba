//! Handle lifetime and object identity bridge for an embedded JavaScript engine.
//!
//! A managed runtime never sees engine values directly. It holds integer
//! handle ids, each backed by a [`HandleProxy`] in the session's handle
//! table. This crate decides when those proxies (and the engine values they
//! keep alive) go away: explicitly, through reference counts, or by handing
//! the decision to the engine's collector via weak handles.
//!
//! # Architecture
//!
//! ```text
//!  managed side                      EngineSession
//! ┌────────────┐  handle ids  ┌──────────────────────────────────────┐
//! │  Handle    │─────────────►│  HandleTable ─► ObjectIdentityMap    │
//! │  (RAII)    │              │      │          StringCache          │
//! └────────────┘              │      ▼                               │
//!   callbacks ◄───────────────│  TransitionQueue   DeferredReleases  │
//!  (templates)                │      │                  │            │
//!                             │      ▼                  ▼            │
//!                             │  EngineLock ──► jsbridge_engine::Isolate
//!                             └──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use jsbridge_core::{EngineSession, HandleValue};
//!
//! let session = EngineSession::default();
//! let result = session.execute("var answer = 6 * 7; answer", "example.js").unwrap();
//! assert_eq!(session.update_value(result).unwrap(), HandleValue::Int32(42));
//! ```
//!
//! # Thread Safety
//!
//! [`EngineSession`] is `Send + Sync`. Engine access is serialized by a
//! reentrant lock; disposal, weak/strong requests and [`Handle`] drops are
//! safe from any thread and never block on running script.

mod config;
mod deferred;
pub mod diagnostics;
mod error;
mod handle;
mod identity;
mod lock;
mod proxy;
mod registry;
mod session;
mod string_cache;
mod table;
mod templates;
mod transitions;
mod value_type;

pub use config::SessionConfig;
pub use error::{BridgeError, BridgeResult, EngineError, EngineResult};
pub use handle::Handle;
pub use identity::ObjectIdentityMap;
pub use lock::EngineLock;
pub use proxy::{
    DisposalState, HandleId, HandleProxy, HandleValue, IllegalTransition, NO_OBJECT_ID, ProxyInfo,
};
pub use registry::{DisposedSessions, SessionId};
pub use session::{EngineSession, ExecutionScope, GcCallback, MANAGED_OBJECT_ID, TransitionOutcome};
pub use string_cache::{NativeString, StringCache};
pub use table::{HandleStats, HandleTable};
pub use templates::{
    AccessorGetter, AccessorSetter, CallbackScope, FunctionCallback, FunctionCall,
    FunctionTemplateHandle, IndexedDeleter, IndexedEnumerator, IndexedGetter, IndexedHandlers,
    IndexedQuery, IndexedSetter, Intercept, NamedDeleter, NamedEnumerator, NamedGetter,
    NamedHandlers, NamedQuery, NamedSetter, ObjectTemplateHandle,
};
pub use transitions::{PendingTransition, TransitionQueue};
pub use value_type::ValueType;

pub use jsbridge_engine;
pub use jsbridge_engine::{PropertyAttributes, Value};
