use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::spec::Selection;

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// The type the fragment applies to. The store is untyped, so the
    /// condition is carried but transparent when walking selections.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_condition: Option<String>,

    /// The selections from the fragment.
    pub selection_set: Vec<Selection>,
}

/// The fragment definitions in scope for an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fragments {
    map: HashMap<String, Fragment>,
}

impl Fragments {
    pub fn new(map: HashMap<String, Fragment>) -> Self {
        Fragments { map }
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&Fragment> {
        self.map.get(key.as_ref())
    }
}
