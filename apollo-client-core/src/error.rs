//! Cache errors.

use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Errors raised by the normalized graph store.
///
/// The two `Missing*` variants are partial reads: a caller holding a
/// selection set the current snapshot cannot satisfy can recover by
/// executing the operation (see [`StoreError::is_partial_read`]).
#[derive(Error, Display, Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoreError {
    /// No scalar value found for field '{field}'.
    MissingScalarValue {
        /// Name of the field whose scalar slot is absent.
        field: String,
    },

    /// No graph reference found for field '{field}'.
    MissingGraphReference {
        /// Name of the field whose reference slot is absent.
        field: String,
    },

    /// cannot write value at path '{path}': {reason}
    WriteShape {
        /// Where in the written data the mismatch was found.
        path: Path,

        /// The shape mismatch.
        reason: String,
    },

    /// unknown fragment '{name}'
    UnknownFragment {
        /// Name of the fragment spread that could not be resolved.
        name: String,
    },

    /// no value provided for variable '{name}'
    UnboundVariable {
        /// Name of the variable referenced by an argument.
        name: String,
    },
}

impl StoreError {
    /// Whether this error is a partial read: the snapshot is simply missing
    /// data for the selection, and a later write can complete it.
    pub fn is_partial_read(&self) -> bool {
        matches!(
            self,
            StoreError::MissingScalarValue { .. } | StoreError::MissingGraphReference { .. }
        )
    }

    fn extension_code(&self) -> &'static str {
        match self {
            StoreError::MissingScalarValue { .. } => "MISSING_SCALAR_VALUE",
            StoreError::MissingGraphReference { .. } => "MISSING_GRAPH_REFERENCE",
            StoreError::WriteShape { .. } => "WRITE_SHAPE",
            StoreError::UnknownFragment { .. } => "UNKNOWN_FRAGMENT",
            StoreError::UnboundVariable { .. } => "UNBOUND_VARIABLE",
        }
    }

    /// Convert the store error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut extensions = match serde_json_bytes::to_value(self) {
            Ok(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };
        extensions
            .entry("code")
            .or_insert_with(|| self.extension_code().into());

        graphql::Error::builder()
            .message(self.to_string())
            .path(path)
            .extensions(extensions)
            .build()
    }
}

/// Errors raised by [`crate::ObservableOperation`].
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum OperationError {
    /// Mutations may not be observed.
    MutationNotObservable,

    /// Cannot start a new execution when another execution is currently running.
    ExecutionInFlight,

    /// {0}
    Store(#[from] StoreError),
}
