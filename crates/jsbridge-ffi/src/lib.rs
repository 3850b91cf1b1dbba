//! Flat C ABI over [`jsbridge_core`].
//!
//! Every export takes primitives, UTF-16 buffers, handle ids and
//! `#[repr(C)]` structs, and returns a primitive. Nothing unwinds across the
//! boundary: panics are caught per export and every error collapses to a
//! sentinel.
//!
//! | Failure | Sentinel |
//! |---------|----------|
//! | session | `0` |
//! | handle / template id | `-1` ([`NO_HANDLE`]) |
//! | managed object id | `-2` ([`NO_OBJECT`]) |
//! | predicate | `false` |
//!
//! Script failures are not API failures: they come back as handles of an
//! error type (`-1` to `-4`), readable with [`jsbridge_update_value`].

mod boundary;
mod engine;
mod handles;
mod objects;
mod templates;
mod types;
mod values;

pub use boundary::{NO_HANDLE, NO_OBJECT, NO_SESSION};
pub use engine::*;
pub use handles::*;
pub use objects::*;
pub use templates::*;
pub use types::*;
pub use values::*;
