use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::spec::Selection;

/// The kind of a GraphQL operation.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// The operation keyword. Results of an operation are rooted at the
    /// graph entity named after it.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A GraphQL operation, supplied by the caller as an opaque model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Operation {
    /// query, mutation or subscription.
    #[serde(default)]
    #[builder(default)]
    pub kind: OperationKind,

    /// The operation name, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub name: Option<String>,

    /// The root selection set.
    pub selection_set: Vec<Selection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_keywords() {
        assert_eq!(OperationKind::Query.as_str(), "query");
        assert_eq!(OperationKind::Mutation.as_str(), "mutation");
        assert_eq!(OperationKind::Subscription.as_str(), "subscription");
    }

    #[test]
    fn operation_from_json() {
        let operation: Operation = serde_json::from_value(serde_json::json!({
            "kind": "subscription",
            "name": "OnCommentAdded",
            "selectionSet": [{"kind": "Field", "name": "commentAdded"}],
        }))
        .expect("operation deserializes");
        assert_eq!(operation.kind, OperationKind::Subscription);
        assert_eq!(operation.name.as_deref(), Some("OnCommentAdded"));
        assert_eq!(operation.selection_set.len(), 1);
    }
}
