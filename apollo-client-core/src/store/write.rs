use std::collections::HashMap;
use std::rc::Rc;

use serde_json_bytes::ByteString;

use crate::error::StoreError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::spec::effective_fields;
use crate::spec::Fragments;
use crate::spec::Selection;
use crate::store::entity::EntityId;
use crate::store::entity::EntityNode;
use crate::store::entity::Reference;
use crate::store::entity::Snapshot;
use crate::store::journal::ChangeJournal;
use crate::store::DataIdFn;

/// A single atomic write: walks a selection set in lockstep with response
/// data over a draft of the snapshot, recording dirtied slots. Nothing is
/// visible until [`commit`](WriteTransaction::commit); any error abandons
/// the draft.
pub(crate) struct WriteTransaction<'a> {
    entities: HashMap<EntityId, Rc<EntityNode>>,
    journal: ChangeJournal,
    variables: &'a Object,
    fragments: &'a Fragments,
    data_id: Option<&'a DataIdFn>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(
        snapshot: &Snapshot,
        variables: &'a Object,
        fragments: &'a Fragments,
        data_id: Option<&'a DataIdFn>,
    ) -> Self {
        WriteTransaction {
            entities: snapshot.entities().clone(),
            journal: ChangeJournal::default(),
            variables,
            fragments,
            data_id,
        }
    }

    pub(crate) fn commit(self) -> (Snapshot, ChangeJournal) {
        (Snapshot::from_entities(self.entities), self.journal)
    }

    pub(crate) fn write_entity(
        &mut self,
        id: &EntityId,
        selections: &[Selection],
        data: &Value,
        path: &Path,
    ) -> Result<(), StoreError> {
        let object = data.as_object().ok_or_else(|| StoreError::WriteShape {
            path: path.clone(),
            reason: "expected an object".to_string(),
        })?;

        for field in effective_fields(selections, self.fragments)? {
            let key = field.storage_key(self.variables)?;
            let response_key = field.response_key();
            let field_path = path.join(Path::from(response_key.as_str()));
            let value =
                object
                    .get(response_key.as_str())
                    .ok_or_else(|| StoreError::WriteShape {
                        path: field_path.clone(),
                        reason: format!("no value provided for field '{}'", field.name.as_str()),
                    })?;

            match &field.selection_set {
                None => self.put_scalar(id, &key, value),
                Some(child_selections) => match value {
                    Value::Null => self.put_reference(id, &key, Reference::Null),
                    Value::Object(child) => {
                        let child_id = self.child_id(child, id, &key, None);
                        self.put_reference(id, &key, Reference::One(child_id.clone()));
                        self.write_entity(&child_id, child_selections, value, &field_path)?;
                    }
                    Value::Array(items) => {
                        let mut references = Vec::with_capacity(items.len());
                        let mut children = Vec::new();
                        for (index, item) in items.iter().enumerate() {
                            match item {
                                Value::Null => references.push(None),
                                Value::Object(child) => {
                                    let child_id = self.child_id(child, id, &key, Some(index));
                                    references.push(Some(child_id.clone()));
                                    children.push((
                                        child_id,
                                        item,
                                        field_path.join(Path::from(index.to_string())),
                                    ));
                                }
                                _ => {
                                    return Err(StoreError::WriteShape {
                                        path: field_path
                                            .join(Path::from(index.to_string())),
                                        reason: format!(
                                            "field '{}' selects children but the element is not an object or null",
                                            field.name.as_str(),
                                        ),
                                    })
                                }
                            }
                        }
                        self.put_reference(id, &key, Reference::Many(references));
                        for (child_id, child_value, child_path) in children {
                            self.write_entity(&child_id, child_selections, child_value, &child_path)?;
                        }
                    }
                    _ => {
                        return Err(StoreError::WriteShape {
                            path: field_path,
                            reason: format!(
                                "field '{}' selects children but the value is not an object, list, or null",
                                field.name.as_str(),
                            ),
                        })
                    }
                },
            }
        }
        Ok(())
    }

    fn node_mut(&mut self, id: &EntityId) -> &mut EntityNode {
        Rc::make_mut(self.entities.entry(id.clone()).or_default())
    }

    fn put_scalar(&mut self, id: &EntityId, key: &ByteString, value: &Value) {
        let node = self.node_mut(id);
        if node.scalars.get(key) == Some(value) {
            return;
        }
        node.scalars.insert(key.clone(), value.clone());
        self.journal.record(id, key);
    }

    fn put_reference(&mut self, id: &EntityId, key: &ByteString, reference: Reference) {
        let node = self.node_mut(id);
        if node.references.get(key) == Some(&reference) {
            return;
        }
        node.references.insert(key.clone(), reference);
        self.journal.record(id, key);
    }

    fn child_id(
        &self,
        object: &Object,
        parent: &EntityId,
        key: &ByteString,
        index: Option<usize>,
    ) -> EntityId {
        if let Some(id) = self.data_id.and_then(|hook| hook(object)) {
            return id.into();
        }
        match index {
            Some(index) => format!("{}.{}.{}", parent.as_str(), key.as_str(), index).into(),
            None => format!("{}.{}", parent.as_str(), key.as_str()).into(),
        }
    }
}
