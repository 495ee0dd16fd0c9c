//! Encoding of the driver map stored in the node annotation.
//!
//! The annotation value is a flat JSON object, e.g.
//! `{"driverA":"nodeX","driverB":"nodeY"}`, shared by every CSI driver on the
//! node. Entries belonging to other drivers must survive every edit, so a value
//! that does not parse is an error and is never read as an empty map.

use std::collections::BTreeMap;

use crate::error::AnnotationError;
use crate::types::DriverMap;

/// Decode an annotation value. Absent, empty and JSON `null` values decode to
/// an empty map.
pub fn decode(raw: Option<&str>) -> Result<DriverMap, AnnotationError> {
    match raw {
        None | Some("") => Ok(DriverMap::new()),
        Some(raw) => serde_json::from_str::<Option<DriverMap>>(raw)
            .map(Option::unwrap_or_default)
            .map_err(|source| AnnotationError::Corrupt {
                raw: raw.to_owned(),
                source,
            }),
    }
}

/// Encode a driver map as its annotation value.
pub fn encode(map: &DriverMap) -> Result<String, AnnotationError> {
    serde_json::to_string(map).map_err(AnnotationError::Encode)
}

/// Map `name` to `id`. Returns `false` when the exact entry already exists.
pub fn upsert(map: &mut DriverMap, name: &str, id: &str) -> bool {
    if map.get(name).is_some_and(|existing| existing == id) {
        return false;
    }
    map.insert(name.to_owned(), id.to_owned());
    true
}

/// Drop the entry for `name`. Returns `false` when there was none.
pub fn remove(map: &mut DriverMap, name: &str) -> bool {
    map.remove(name).is_some()
}

/// Clone `annotations` and set `key` to `value` on the copy.
///
/// An empty key leaves the copy unmodified.
pub fn clone_with_annotation(
    annotations: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> BTreeMap<String, String> {
    let mut cloned = annotations.cloned().unwrap_or_default();
    if !key.is_empty() {
        cloned.insert(key.to_owned(), value.to_owned());
    }
    cloned
}

/// One logical change to the driver map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEdit {
    /// Add or update `name -> node_id`.
    Upsert { name: String, node_id: String },
    /// Remove `name`.
    Remove { name: String },
}

impl DriverEdit {
    pub fn upsert(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::Upsert {
            name: name.into(),
            node_id: node_id.into(),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self::Remove { name: name.into() }
    }

    /// The driver whose entry this edit touches.
    pub fn driver(&self) -> &str {
        match self {
            Self::Upsert { name, .. } | Self::Remove { name } => name,
        }
    }

    /// Apply the edit in place, returning whether the map changed.
    pub fn apply(&self, map: &mut DriverMap) -> bool {
        match self {
            Self::Upsert { name, node_id } => upsert(map, name, node_id),
            Self::Remove { name } => remove(map, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> DriverMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn decode_absent_and_empty() {
        assert!(decode(None).unwrap().is_empty());
        assert!(decode(Some("")).unwrap().is_empty());
        assert!(decode(Some("{}")).unwrap().is_empty());
    }

    #[test]
    fn decode_null_as_empty() {
        assert!(decode(Some("null")).unwrap().is_empty());
        assert!(decode(Some(" null ")).unwrap().is_empty());
        assert!(decode(Some("[null]")).is_err());
    }

    #[test]
    fn decode_rejects_corrupt_value() {
        let err = decode(Some("not valid structure")).unwrap_err();
        match err {
            AnnotationError::Corrupt { raw, .. } => assert_eq!(raw, "not valid structure"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_nested_values() {
        assert!(matches!(
            decode(Some(r#"{"driverA":{"id":"nodeX"}}"#)),
            Err(AnnotationError::Corrupt { .. })
        ));
        assert!(matches!(
            decode(Some(r#"["driverA"]"#)),
            Err(AnnotationError::Corrupt { .. })
        ));
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let original = map(&[
            ("driverA", "nodeX"),
            ("driverB", "nodeY"),
            ("odd \"name\"", "id with spaces"),
        ]);
        let encoded = encode(&original).unwrap();
        assert_eq!(decode(Some(&encoded)).unwrap(), original);
    }

    #[test]
    fn upsert_merges_with_co_tenants() {
        let mut m = map(&[("driverA", "nodeX")]);
        assert!(upsert(&mut m, "driverB", "nodeY"));
        assert_eq!(m, map(&[("driverA", "nodeX"), ("driverB", "nodeY")]));
    }

    #[test]
    fn upsert_matching_entry_is_noop() {
        let mut m = map(&[("driverA", "nodeX")]);
        assert!(!upsert(&mut m, "driverA", "nodeX"));
        assert_eq!(m, map(&[("driverA", "nodeX")]));
    }

    #[test]
    fn upsert_replaces_different_id() {
        let mut m = map(&[("driverA", "nodeX")]);
        assert!(upsert(&mut m, "driverA", "nodeZ"));
        assert_eq!(m, map(&[("driverA", "nodeZ")]));
    }

    #[test]
    fn remove_keeps_co_tenants() {
        let mut m = map(&[("driverA", "nodeX"), ("driverB", "nodeY")]);
        assert!(remove(&mut m, "driverA"));
        assert_eq!(m, map(&[("driverB", "nodeY")]));
        assert!(!remove(&mut m, "driverA"));
    }

    #[test]
    fn clone_with_annotation_does_not_touch_source() {
        let source = map(&[("other", "value")]);
        let cloned = clone_with_annotation(Some(&source), "key", "v");
        assert_eq!(cloned, map(&[("other", "value"), ("key", "v")]));
        assert_eq!(source, map(&[("other", "value")]));

        let untouched = clone_with_annotation(Some(&source), "", "v");
        assert_eq!(untouched, source);

        assert_eq!(clone_with_annotation(None, "key", "v"), map(&[("key", "v")]));
    }

    #[test]
    fn edit_dispatch() {
        let mut m = DriverMap::new();
        let add = DriverEdit::upsert("driverA", "nodeX");
        assert_eq!(add.driver(), "driverA");
        assert!(add.apply(&mut m));
        assert!(!add.apply(&mut m));
        assert!(DriverEdit::remove("driverA").apply(&mut m));
        assert!(m.is_empty());
    }
}
