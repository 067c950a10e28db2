//! GraphQL boundary types: wire errors and the executor contract.

use std::fmt;
use std::rc::Rc;

use serde::Deserialize;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::observable::Observable;
use crate::spec::Fragments;
use crate::spec::Operation;

/// The error location
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in [`Response::data`].
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

/// Displays (only) the error message.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// An executor request: the operation to run with the fragments and
/// variables in force.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Request {
    /// The operation to execute.
    pub operation: Rc<Operation>,

    /// The fragment definitions in scope for the operation.
    #[builder(default)]
    pub fragments: Rc<Fragments>,

    /// The variables for this execution.
    #[builder(default)]
    pub variables: Object,
}

/// A graphql response emitted by an executor.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Response {
    /// The response data.
    #[serde(default)]
    #[builder(default)]
    pub data: Value,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

/// Produces result streams for operations.
///
/// This is the transport boundary: HTTP, websocket or in-process resolvers
/// all surface here. The returned observable may emit any number of
/// responses before terminating, and its teardown must cancel in-flight
/// work.
pub trait Executor {
    fn execute(&self, request: Request) -> Observable<Response>;
}

impl<F> Executor for F
where
    F: Fn(Request) -> Observable<Response>,
{
    fn execute(&self, request: Request) -> Observable<Response> {
        self(request)
    }
}
