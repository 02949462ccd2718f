/// a single OSM key/value annotation, owned by its node, way or relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Tag {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// value of the first tag carrying `key`, in document order.
pub fn first_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

/// value of the last tag carrying `key`. the map classifier follows the
/// original importer here, where a repeated key overwrites earlier values.
pub fn last_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .rev()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

pub fn has_value(tags: &[Tag], key: &str, value: &str) -> bool {
    tags.iter().any(|t| t.key == key && t.value == value)
}
