use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;

use crate::error::StoreError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::effective_fields;
use crate::spec::Fragments;
use crate::spec::Selection;
use crate::store::entity::EntityId;
use crate::store::entity::Reference;
use crate::store::entity::Snapshot;
use crate::store::journal::ReadPlan;
use crate::store::ReadResponse;

/// The identity side-table of a projection: the source entity behind every
/// nested object in the data, so a later read can detect identity
/// divergence without re-walking the snapshot.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum IdNode {
    Entity {
        id: EntityId,
        fields: HashMap<ByteString, Rc<IdNode>>,
    },
    List(Vec<Option<Rc<IdNode>>>),
}

/// A view of a selection over a snapshot: the readable data plus the entity
/// identities behind each nested object.
///
/// Equality compares `data` only. The projection a write returns is equal
/// to what a read of the same selection yields from the post-write
/// snapshot, which is what lets a watcher suppress its redundant first
/// emission.
#[derive(Clone, Debug)]
pub struct Projection {
    data: Value,
    ids: Option<Rc<IdNode>>,
}

impl Projection {
    pub(crate) fn new(data: Value, ids: Option<Rc<IdNode>>) -> Self {
        Projection { data, ids }
    }

    /// Wrap raw response data that did not come from the graph. No
    /// identities are known, so later reads cannot judge staleness against
    /// it.
    pub fn from_raw(data: Value) -> Self {
        Projection { data, ids: None }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub(crate) fn ids(&self) -> Option<&Rc<IdNode>> {
        self.ids.as_ref()
    }
}

impl PartialEq for Projection {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

/// The previously read value and identities at one position of the walk.
#[derive(Clone, Copy)]
struct PreviousView<'a> {
    data: &'a Value,
    ids: &'a Rc<IdNode>,
}

impl<'a> PreviousView<'a> {
    fn field(&self, key: &ByteString) -> Option<PreviousView<'a>> {
        let data = self.data.as_object()?.get(key.as_str())?;
        let ids = match self.ids.as_ref() {
            IdNode::Entity { fields, .. } => fields.get(key)?,
            IdNode::List(_) => return None,
        };
        Some(PreviousView { data, ids })
    }

    fn index(&self, index: usize) -> Option<PreviousView<'a>> {
        let data = self.data.as_array()?.get(index)?;
        let ids = match self.ids.as_ref() {
            IdNode::List(items) => items.get(index)?.as_ref()?,
            IdNode::Entity { .. } => return None,
        };
        Some(PreviousView { data, ids })
    }

    fn entity_id(&self) -> Option<&'a EntityId> {
        match self.ids.as_ref() {
            IdNode::Entity { id, .. } => Some(id),
            IdNode::List(_) => None,
        }
    }
}

struct GraphReader<'a> {
    snapshot: &'a Snapshot,
    variables: &'a Object,
    fragments: &'a Fragments,
    plan: ReadPlan,
}

struct ReadOutcome {
    data: Value,
    ids: Rc<IdNode>,
    stale: bool,
}

/// Read `selections` rooted at `id`, returning the response and the plan of
/// slots consumed. The plan is returned on failure too: it covers every
/// slot visited before the read aborted.
pub(crate) fn read_with_plan(
    snapshot: &Snapshot,
    id: &EntityId,
    selections: &[Selection],
    variables: &Object,
    fragments: &Fragments,
    previous: Option<&Projection>,
) -> (Result<ReadResponse, StoreError>, ReadPlan) {
    let mut reader = GraphReader {
        snapshot,
        variables,
        fragments,
        plan: ReadPlan::default(),
    };
    let previous_view = previous.and_then(|projection| {
        projection.ids().map(|ids| PreviousView {
            data: projection.data(),
            ids,
        })
    });
    let result = reader.read_entity(id, selections, previous_view);
    let plan = reader.plan;
    (
        result.map(|outcome| ReadResponse {
            data: Projection::new(outcome.data, Some(outcome.ids)),
            stale: outcome.stale,
        }),
        plan,
    )
}

impl<'a> GraphReader<'a> {
    fn read_entity(
        &mut self,
        id: &EntityId,
        selections: &[Selection],
        previous: Option<PreviousView<'_>>,
    ) -> Result<ReadOutcome, StoreError> {
        let node = self.snapshot.get(id);
        let fields = effective_fields(selections, self.fragments)?;

        let mut data = Object::with_capacity(fields.len());
        let mut ids = HashMap::new();
        let mut stale = false;

        for field in fields {
            let key = field.storage_key(self.variables)?;
            let response_key = field.response_key().clone();

            match &field.selection_set {
                None => {
                    let value = node
                        .and_then(|node| node.scalars.get(&key))
                        .ok_or_else(|| StoreError::MissingScalarValue {
                            field: field.name.as_str().to_string(),
                        })?;
                    self.plan.record(id, &key);
                    data.insert(response_key, value.clone());
                }
                Some(child_selections) => {
                    let reference = node
                        .and_then(|node| node.references.get(&key))
                        .ok_or_else(|| StoreError::MissingGraphReference {
                            field: field.name.as_str().to_string(),
                        })?
                        .clone();
                    self.plan.record(id, &key);

                    let previous_field =
                        previous.as_ref().and_then(|view| view.field(&response_key));

                    match reference {
                        Reference::Null => {
                            data.insert(response_key, Value::Null);
                        }
                        Reference::One(child_id) => {
                            match previous_field {
                                Some(previous_child)
                                    if previous_child
                                        .entity_id()
                                        .is_some_and(|previous_id| previous_id != &child_id) =>
                                {
                                    // The identity chain diverged here: show
                                    // the previously read subtree unchanged.
                                    stale = true;
                                    data.insert(response_key.clone(), previous_child.data.clone());
                                    ids.insert(response_key, previous_child.ids.clone());
                                }
                                previous_child => {
                                    let outcome = self.read_entity(
                                        &child_id,
                                        child_selections,
                                        previous_child,
                                    )?;
                                    stale |= outcome.stale;
                                    data.insert(response_key.clone(), outcome.data);
                                    ids.insert(response_key, outcome.ids);
                                }
                            }
                        }
                        Reference::Many(items) => {
                            let mut values = Vec::with_capacity(items.len());
                            let mut child_ids = Vec::with_capacity(items.len());
                            for (index, item) in items.iter().enumerate() {
                                match item {
                                    None => {
                                        values.push(Value::Null);
                                        child_ids.push(None);
                                    }
                                    Some(child_id) => {
                                        let previous_element = previous_field
                                            .as_ref()
                                            .and_then(|view| view.index(index));
                                        match previous_element {
                                            Some(previous_child)
                                                if previous_child.entity_id().is_some_and(
                                                    |previous_id| previous_id != child_id,
                                                ) =>
                                            {
                                                stale = true;
                                                values.push(previous_child.data.clone());
                                                child_ids.push(Some(previous_child.ids.clone()));
                                            }
                                            previous_child => {
                                                let outcome = self.read_entity(
                                                    child_id,
                                                    child_selections,
                                                    previous_child,
                                                )?;
                                                stale |= outcome.stale;
                                                values.push(outcome.data);
                                                child_ids.push(Some(outcome.ids));
                                            }
                                        }
                                    }
                                }
                            }
                            data.insert(response_key.clone(), Value::Array(values));
                            ids.insert(response_key, Rc::new(IdNode::List(child_ids)));
                        }
                    }
                }
            }
        }

        Ok(ReadOutcome {
            data: Value::Object(data),
            ids: Rc::new(IdNode::Entity {
                id: id.clone(),
                fields: ids,
            }),
            stale,
        })
    }
}
