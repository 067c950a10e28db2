use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::error::StoreError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::Fragments;

/// A selection within an operation or fragment selection set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    /// A field selection.
    Field(Field),

    /// A named fragment spread.
    FragmentSpread(FragmentSpread),

    /// An inline fragment selection.
    InlineFragment(InlineFragment),
}

/// A field selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// An optional alias for the field; when present it is the output key.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<ByteString>,

    /// The name of the field.
    pub name: ByteString,

    /// Argument expressions, keyed by argument name.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub arguments: HashMap<String, ArgumentValue>,

    /// The child selections for the field; absent for leaf fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selection_set: Option<Vec<Selection>>,
}

impl Field {
    /// The key under which this field appears in response data.
    pub fn response_key(&self) -> &ByteString {
        self.alias.as_ref().unwrap_or(&self.name)
    }

    /// The canonical field identifier inside an entity node.
    ///
    /// Arguments are variable-substituted and rendered as compact JSON with
    /// recursively sorted keys, so two selections with structurally equal
    /// substituted arguments share a storage key.
    pub fn storage_key(&self, variables: &Object) -> Result<ByteString, StoreError> {
        if self.arguments.is_empty() {
            return Ok(self.name.clone());
        }

        let mut arguments = BTreeMap::new();
        for (name, value) in &self.arguments {
            arguments.insert(name.as_str(), value.substitute(variables)?);
        }

        let mut key = String::from(self.name.as_str());
        key.push('(');
        key.push('{');
        for (index, (name, value)) in arguments.iter().enumerate() {
            if index > 0 {
                key.push(',');
            }
            write_json_string(&mut key, name);
            key.push(':');
            write_canonical(&mut key, value);
        }
        key.push('}');
        key.push(')');
        Ok(key.into())
    }
}

/// A named fragment spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSpread {
    /// The fragment name, resolved against the operation's fragment map.
    pub name: String,
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    /// The required fragment type. The store is untyped, so the condition
    /// is transparent when walking selections.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_condition: Option<String>,

    /// The selections from the fragment.
    pub selection_set: Vec<Selection>,
}

/// An argument expression: a variable reference, a container of further
/// expressions, or a literal value stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    /// A `$name` reference, written `{"variable": "name"}`.
    Variable {
        /// The variable name, without the `$` sigil.
        variable: ByteString,
    },

    /// Element-wise expressions.
    List(Vec<ArgumentValue>),

    /// Field-wise expressions.
    Object(HashMap<String, ArgumentValue>),

    /// A literal value.
    Literal(Value),
}

impl ArgumentValue {
    /// Resolve the expression against the variables in force.
    pub fn substitute(&self, variables: &Object) -> Result<Value, StoreError> {
        match self {
            ArgumentValue::Variable { variable } => variables
                .get(variable.as_str())
                .cloned()
                .ok_or_else(|| StoreError::UnboundVariable {
                    name: variable.as_str().to_string(),
                }),
            ArgumentValue::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| item.substitute(variables))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ArgumentValue::Object(fields) => {
                let mut object = Object::with_capacity(fields.len());
                for (name, value) in fields {
                    object.insert(name.as_str(), value.substitute(variables)?);
                }
                Ok(Value::Object(object))
            }
            ArgumentValue::Literal(value) => Ok(value.clone()),
        }
    }
}

/// Flattens a selection set into its effective field selections, resolving
/// fragment spreads and inline fragments.
pub fn effective_fields<'a>(
    selections: &'a [Selection],
    fragments: &'a Fragments,
) -> Result<Vec<&'a Field>, StoreError> {
    let mut fields = Vec::new();
    collect_fields(selections, fragments, &mut fields)?;
    Ok(fields)
}

fn collect_fields<'a>(
    selections: &'a [Selection],
    fragments: &'a Fragments,
    fields: &mut Vec<&'a Field>,
) -> Result<(), StoreError> {
    for selection in selections {
        match selection {
            Selection::Field(field) => fields.push(field),
            Selection::FragmentSpread(spread) => {
                let fragment =
                    fragments
                        .get(&spread.name)
                        .ok_or_else(|| StoreError::UnknownFragment {
                            name: spread.name.clone(),
                        })?;
                collect_fields(&fragment.selection_set, fragments, fields)?;
            }
            Selection::InlineFragment(inline) => {
                collect_fields(&inline.selection_set, fragments, fields)?;
            }
        }
    }
    Ok(())
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
            out.push('{');
            for (index, (key, value)) in entries.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_json_string(out, key.as_str());
                out.push(':');
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(
            &serde_json::to_string(scalar).expect("scalar values always serialize; qed"),
        ),
    }
}

fn write_json_string(out: &mut String, raw: &str) {
    out.push_str(&serde_json::to_string(raw).expect("strings always serialize; qed"));
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::spec::Fragment;

    fn selection_set(value: serde_json::Value) -> Vec<Selection> {
        serde_json::from_value(value).expect("selection set deserializes")
    }

    fn variables(value: serde_json_bytes::Value) -> Object {
        value.as_object().cloned().expect("variables are an object")
    }

    #[test]
    fn selection_set_from_json() {
        let selections = selection_set(serde_json::json!([
            {
                "kind": "Field",
                "name": "hero",
                "selectionSet": [
                    {"kind": "Field", "alias": "moniker", "name": "name"},
                    {"kind": "FragmentSpread", "name": "heroDetails"},
                    {
                        "kind": "InlineFragment",
                        "typeCondition": "Droid",
                        "selectionSet": [{"kind": "Field", "name": "primaryFunction"}],
                    },
                ],
            },
        ]));
        let Selection::Field(hero) = &selections[0] else {
            panic!("expected a field selection");
        };
        assert_eq!(hero.response_key().as_str(), "hero");
        let children = hero.selection_set.as_deref().expect("hero has children");
        assert_eq!(children.len(), 3);
        let Selection::Field(name) = &children[0] else {
            panic!("expected a field selection");
        };
        assert_eq!(name.response_key().as_str(), "moniker");
        assert_eq!(name.name.as_str(), "name");
    }

    #[test]
    fn storage_key_without_arguments_is_the_field_name() {
        let selections = selection_set(serde_json::json!([
            {"kind": "Field", "name": "hero"},
        ]));
        let Selection::Field(field) = &selections[0] else {
            panic!("expected a field selection");
        };
        let key = field.storage_key(&Object::default()).unwrap();
        assert_eq!(key.as_str(), "hero");
    }

    #[test]
    fn storage_key_sorts_arguments_and_substitutes_variables() {
        let selections = selection_set(serde_json::json!([
            {
                "kind": "Field",
                "name": "search",
                "arguments": {
                    "text": {"variable": "text"},
                    "first": 10,
                },
            },
        ]));
        let Selection::Field(field) = &selections[0] else {
            panic!("expected a field selection");
        };

        let key = field
            .storage_key(&variables(json!({"text": "droid"})))
            .unwrap();
        assert_eq!(key.as_str(), r#"search({"first":10,"text":"droid"})"#);
    }

    #[test]
    fn storage_keys_agree_for_structurally_equal_arguments() {
        let by_variable = selection_set(serde_json::json!([
            {"kind": "Field", "name": "search", "arguments": {"filter": {"variable": "filter"}}},
        ]));
        let by_literal = selection_set(serde_json::json!([
            {"kind": "Field", "name": "search", "arguments": {"filter": {"tag": "droid", "limit": 3}}},
        ]));

        let Selection::Field(by_variable) = &by_variable[0] else {
            panic!("expected a field selection");
        };
        let Selection::Field(by_literal) = &by_literal[0] else {
            panic!("expected a field selection");
        };

        let substituted = by_variable
            .storage_key(&variables(json!({"filter": {"limit": 3, "tag": "droid"}})))
            .unwrap();
        let literal = by_literal.storage_key(&Object::default()).unwrap();
        assert_eq!(substituted, literal);
        assert_eq!(
            substituted.as_str(),
            r#"search({"filter":{"limit":3,"tag":"droid"}})"#,
        );
    }

    #[test]
    fn unbound_variable_fails_the_storage_key() {
        let selections = selection_set(serde_json::json!([
            {"kind": "Field", "name": "search", "arguments": {"text": {"variable": "text"}}},
        ]));
        let Selection::Field(field) = &selections[0] else {
            panic!("expected a field selection");
        };
        let error = field.storage_key(&Object::default()).unwrap_err();
        assert_eq!(
            error,
            StoreError::UnboundVariable {
                name: "text".to_string()
            },
        );
    }

    #[test]
    fn effective_fields_flattens_fragments() {
        let selections = selection_set(serde_json::json!([
            {"kind": "Field", "name": "id"},
            {"kind": "FragmentSpread", "name": "heroDetails"},
            {
                "kind": "InlineFragment",
                "selectionSet": [{"kind": "Field", "name": "appearsIn"}],
            },
        ]));
        let fragments = Fragments::new(
            [(
                "heroDetails".to_string(),
                Fragment {
                    type_condition: Some("Character".to_string()),
                    selection_set: selection_set(serde_json::json!([
                        {"kind": "Field", "name": "name"},
                    ])),
                },
            )]
            .into_iter()
            .collect(),
        );

        let fields = effective_fields(&selections, &fragments).unwrap();
        let names: Vec<_> = fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "appearsIn"]);
    }

    #[test]
    fn unknown_fragment_fails_the_walk() {
        let selections = selection_set(serde_json::json!([
            {"kind": "FragmentSpread", "name": "missing"},
        ]));
        let error = effective_fields(&selections, &Fragments::default()).unwrap_err();
        assert_eq!(
            error,
            StoreError::UnknownFragment {
                name: "missing".to_string()
            },
        );
    }
}
