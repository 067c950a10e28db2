//! JSON types shared across the cache.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A path element that is composed of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

/// A path into a JSON result document.
///
/// This can be composed of strings and numbers
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.len() + other.len());
        new.extend(self.iter().cloned());
        new.extend(other.iter().cloned());
        Path(new)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{}", index)?,
                PathElement::Key(key) => write!(f, "{}", key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_from_str() {
        let path = Path::from("obj/arr/1/prop1");
        assert_eq!(
            path,
            Path(vec![
                PathElement::Key("obj".to_string()),
                PathElement::Key("arr".to_string()),
                PathElement::Index(1),
                PathElement::Key("prop1".to_string()),
            ]),
        );
    }

    #[test]
    fn test_path_display() {
        let path = Path::from("obj/arr/1/prop1");
        assert_eq!(path.to_string(), "/obj/arr/1/prop1");
        assert_eq!(Path::empty().to_string(), "");
    }

    #[test]
    fn test_path_join() {
        let path = Path::from("obj").join(Path::from("3"));
        assert_eq!(path.to_string(), "/obj/3");
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_path_serialization() {
        let path = Path::from("obj/3/prop");
        let serialized = serde_json::to_string(&path).expect("path serializes");
        assert_eq!(serialized, r#"["obj",3,"prop"]"#);
        let roundtrip: Path = serde_json::from_str(&serialized).expect("path deserializes");
        assert_eq!(roundtrip, path);
    }
}
