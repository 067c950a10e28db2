//! The operation model supplied by callers: selections, fragments and
//! operation headers. The model is opaque to the store (no schema, no
//! validation) and deserializable so fixtures can be written as JSON.

mod fragments;
mod operation;
mod selection;

pub use fragments::*;
pub use operation::*;
pub use selection::*;
