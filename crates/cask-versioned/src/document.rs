//! Document shapes and field helpers.
//!
//! Live documents carry a string `_id` and an integer `_version`. Shadow
//! entries replace `_id` with `{_id, _version}` so every revision has its
//! own key; the terminal entry written on removal carries
//! `_version: "deleted:<n>"` where `n` is the last live version.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{VersionedError, VersionedResult};

/// A JSON object document.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "_id";
pub const VERSION_FIELD: &str = "_version";

const DELETED_PREFIX: &str = "deleted:";

/// The document's string id.
pub fn document_id(doc: &Document) -> VersionedResult<&str> {
    match doc.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        Some(other) => Err(VersionedError::InvalidDocument(format!(
            "{ID_FIELD} must be a non-empty string, got {other}"
        ))),
        None => Err(VersionedError::InvalidDocument(format!("missing {ID_FIELD}"))),
    }
}

/// The document's integer version, if it has one.
pub fn document_version(doc: &Document) -> VersionedResult<Option<u64>> {
    match doc.get(VERSION_FIELD) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            VersionedError::InvalidDocument(format!(
                "{VERSION_FIELD} must be a non-negative integer, got {value}"
            ))
        }),
    }
}

/// Version of a persisted document, which must have one.
pub(crate) fn persisted_version(doc: &Document) -> VersionedResult<u64> {
    document_version(doc)?.ok_or_else(|| {
        VersionedError::InvalidDocument(format!("persisted document has no {VERSION_FIELD}"))
    })
}

pub(crate) fn deleted_marker(last_version: u64) -> Value {
    Value::String(format!("{DELETED_PREFIX}{last_version}"))
}

/// Key of a shadow entry.
pub fn shadow_key(id: &str, version: u64) -> Value {
    let mut key = Map::new();
    key.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    key.insert(VERSION_FIELD.to_string(), Value::from(version));
    Value::Object(key)
}

/// Build a document from any serializable struct.
pub fn to_document<T: Serialize>(value: &T) -> VersionedResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(VersionedError::InvalidDocument(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Deserialize a document into a struct.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> VersionedResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// One past revision of a document.
#[derive(Clone, Debug, PartialEq)]
pub struct Revision {
    /// Version the revision was stored under.
    pub version: u64,
    /// Whether this is the terminal entry written on removal.
    pub deleted: bool,
    /// The revision with its plain string `_id` restored.
    pub document: Document,
}

impl Revision {
    /// Decode a raw shadow entry stored under `version`.
    pub(crate) fn from_shadow(id: &str, version: u64, mut document: Document) -> Self {
        let deleted = matches!(
            document.get(VERSION_FIELD),
            Some(Value::String(marker)) if marker.starts_with(DELETED_PREFIX)
        );
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        Self {
            version,
            deleted,
            document,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn id_must_be_a_non_empty_string() {
        assert_eq!(document_id(&doc(json!({"_id": "a"}))).unwrap(), "a");
        assert!(document_id(&doc(json!({}))).is_err());
        assert!(document_id(&doc(json!({"_id": ""}))).is_err());
        assert!(document_id(&doc(json!({"_id": 7}))).is_err());
    }

    #[test]
    fn version_must_be_an_integer() {
        assert_eq!(document_version(&doc(json!({"_version": 3}))).unwrap(), Some(3));
        assert_eq!(document_version(&doc(json!({}))).unwrap(), None);
        assert!(document_version(&doc(json!({"_version": "deleted:2"}))).is_err());
        assert!(document_version(&doc(json!({"_version": -1}))).is_err());
    }

    #[test]
    fn shadow_key_shape() {
        assert_eq!(shadow_key("f", 2), json!({"_id": "f", "_version": 2}));
    }

    #[test]
    fn revision_detects_deletion_marker() {
        let marker = doc(json!({"_id": shadow_key("f", 3), "_version": "deleted:2", "by": "ann"}));
        let revision = Revision::from_shadow("f", 3, marker);
        assert!(revision.deleted);
        assert_eq!(revision.document["_id"], "f");
        assert_eq!(revision.document["by"], "ann");

        let plain = Revision::from_shadow("f", 1, doc(json!({"_version": 1})));
        assert!(!plain.deleted);
    }

    #[test]
    fn struct_conversion() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct File {
            #[serde(rename = "_id")]
            id: String,
            path: String,
        }
        let file = File {
            id: "f1".into(),
            path: "/a.txt".into(),
        };
        let d = to_document(&file).unwrap();
        assert_eq!(d["path"], "/a.txt");
        assert_eq!(from_document::<File>(d).unwrap(), file);
        assert!(to_document(&5).is_err());
    }
}
