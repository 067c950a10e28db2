//! Reactive, normalized cache for GraphQL operation results.
//!
//! The crate is built around two cooperating pieces:
//!
//! * [`GraphStore`], a content-addressed, field-level store of GraphQL
//!   entities with write, read and watch operations, capable of partial
//!   reads, stale detection across identity changes, and selective change
//!   notification driven by the slots a write actually touched.
//! * [`ObservableOperation`], a hot state machine per operation that
//!   orchestrates executor runs, store writes, store watches, variable
//!   transitions and cancellation, and fans the result out to any number of
//!   subscribers as a stream of [`OperationState`].
//!
//! Everything runs single-threaded and cooperatively: store operations are
//! synchronous atoms, and observer delivery is deferred onto a [`Scheduler`]
//! turn queue driven by the host.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod error;
mod json_ext;
mod observable;
mod operation;
mod scheduler;
mod spec;
mod store;

pub mod graphql;

pub use error::*;
pub use json_ext::*;
pub use observable::*;
pub use operation::*;
pub use scheduler::*;
pub use spec::*;
pub use store::*;

pub mod prelude {
    pub mod graphql {
        pub use crate::graphql::*;
        pub use crate::*;
    }
}
