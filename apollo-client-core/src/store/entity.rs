use std::collections::HashMap;
use std::rc::Rc;

use serde_json_bytes::ByteString;

use crate::json_ext::Value;

/// An opaque entity identifier. Assigned by the host identity hook, derived
/// from the parent path, or supplied as the root id of a write.
pub type EntityId = ByteString;

/// A reference slot of an entity node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Reference {
    /// The field is present and explicitly null.
    Null,

    /// A single child entity.
    One(EntityId),

    /// A list of child entities. Null elements are preserved.
    Many(Vec<Option<EntityId>>),
}

/// A normalized entity: field-level storage split between scalar values and
/// references into the graph. Keys are storage keys, not response aliases.
/// No type tag is stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct EntityNode {
    pub(crate) scalars: HashMap<ByteString, Value>,
    pub(crate) references: HashMap<ByteString, Reference>,
}

/// An immutable view of the whole graph.
///
/// A write produces a new snapshot sharing unchanged nodes, so a snapshot
/// captured before a re-entrant write keeps reading consistent data.
#[derive(Clone, Debug, Default)]
pub(crate) struct Snapshot {
    entities: Rc<HashMap<EntityId, Rc<EntityNode>>>,
}

impl Snapshot {
    pub(crate) fn from_entities(entities: HashMap<EntityId, Rc<EntityNode>>) -> Self {
        Snapshot {
            entities: Rc::new(entities),
        }
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<&EntityNode> {
        self.entities.get(id).map(Rc::as_ref)
    }

    pub(crate) fn entities(&self) -> &HashMap<EntityId, Rc<EntityNode>> {
        &self.entities
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }
}
