//! Domain types shared by the ingestion and query paths.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declared type of a model field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    HtmlStrict,
    HtmlPermissive,
    Text,
    Relation,
    GenericRelation,
    Number,
    NumberArray,
    Other(String),
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        match s {
            "string" => FieldType::String,
            "HTMLStrict" => FieldType::HtmlStrict,
            "HTMLPermissive" => FieldType::HtmlPermissive,
            "text" => FieldType::Text,
            "relation" => FieldType::Relation,
            "generic-relation" => FieldType::GenericRelation,
            "number" => FieldType::Number,
            "number[]" => FieldType::NumberArray,
            other => FieldType::Other(other.to_string()),
        }
    }
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        FieldType::from(s.as_str())
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::HtmlStrict => "HTMLStrict",
            FieldType::HtmlPermissive => "HTMLPermissive",
            FieldType::Text => "text",
            FieldType::Relation => "relation",
            FieldType::GenericRelation => "generic-relation",
            FieldType::Number => "number",
            FieldType::NumberArray => "number[]",
            FieldType::Other(s) => s,
        }
    }

    /// How values of this type are indexed, or `None` when the type is not
    /// indexable at all.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldType::HtmlStrict | FieldType::HtmlPermissive => Some(FieldKind::Html),
            FieldType::String | FieldType::Text => Some(FieldKind::Text),
            FieldType::GenericRelation => Some(FieldKind::Opaque),
            FieldType::Relation | FieldType::Number | FieldType::NumberArray => {
                Some(FieldKind::Numeric)
            }
            FieldType::Other(_) => None,
        }
    }

    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            FieldType::String | FieldType::Text | FieldType::HtmlStrict | FieldType::HtmlPermissive
        )
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analyzer and value-type selection for an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    /// Tokenized with the language analyzer.
    Text,
    /// Markup stripped and character references decoded, then as `Text`.
    Html,
    /// Indexed as a single untokenized term.
    Opaque,
    /// Indexed as one or more 64-bit integers.
    Numeric,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Html => "html",
            FieldKind::Opaque => "opaque",
            FieldKind::Numeric => "numeric",
        }
    }
}

/// Relation metadata the access boundary sends along with follow-up fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRelation {
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub fields: IndexMap<String, Option<CollectionRelation>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
    pub searchable: bool,
    pub relation: Option<CollectionRelation>,
    /// Position of the field in the model description.
    pub order: u32,
}

impl FieldDescriptor {
    pub fn new(field_type: impl Into<FieldType>, searchable: bool) -> Self {
        Self { field_type: field_type.into(), searchable, relation: None, order: 0 }
    }
}

pub type CollectionFields = IndexMap<String, FieldDescriptor>;

/// Collection name -> field name -> descriptor, in model declaration order.
///
/// One immutable copy is held by every index generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionDescriptor {
    collections: IndexMap<String, CollectionFields>,
}

impl CollectionDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: impl Into<String>, fields: CollectionFields) {
        self.collections.insert(collection.into(), fields);
    }

    /// Builder-style helper, mostly for tests and tools.
    pub fn with_collection<I, N>(mut self, collection: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (N, FieldDescriptor)>,
        N: Into<String>,
    {
        let mut map = CollectionFields::new();
        for (order, (name, mut descriptor)) in fields.into_iter().enumerate() {
            descriptor.order = u32::try_from(order).unwrap_or(u32::MAX);
            map.insert(name.into(), descriptor);
        }
        self.insert(collection, map);
        self
    }

    pub fn get(&self, collection: &str) -> Option<&CollectionFields> {
        self.collections.get(collection)
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CollectionFields)> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Field names with their relation descriptors, per collection.
    pub fn request_fields(&self) -> RequestFields {
        self.collections
            .iter()
            .map(|(name, fields)| {
                let fields = fields
                    .iter()
                    .map(|(field, descriptor)| (field.clone(), descriptor.relation.clone()))
                    .collect();
                (name.clone(), fields)
            })
            .collect()
    }
}

/// Field name -> relation descriptor, for one collection.
pub type FieldRelations = IndexMap<String, Option<CollectionRelation>>;

pub type RequestFields = IndexMap<String, FieldRelations>;

/// `"<collection>/<id>"`.
pub fn fqid(collection: &str, id: u64) -> String {
    format!("{collection}/{id}")
}

/// Splits a fully-qualified id into collection and numeric id.
pub fn parse_fqid(fqid: &str) -> Option<(&str, u64)> {
    let (collection, id) = fqid.split_once('/')?;
    if collection.is_empty() {
        return None;
    }
    Some((collection, id.parse().ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "added",
            ChangeKind::Changed => "changed",
            ChangeKind::Removed => "removed",
        })
    }
}

/// Mutation of a single entity; payload-bearing variants carry the raw entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(Vec<u8>),
    Changed(Vec<u8>),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: u64,
    pub change: Change,
}

impl ChangeEvent {
    /// Validates that `payload` is present exactly for `added`/`changed`.
    pub fn new(
        kind: ChangeKind,
        collection: impl Into<String>,
        id: u64,
        payload: Option<Vec<u8>>,
    ) -> Result<Self> {
        let collection = collection.into();
        let change = match (kind, payload) {
            (ChangeKind::Added, Some(p)) => Change::Added(p),
            (ChangeKind::Changed, Some(p)) => Change::Changed(p),
            (ChangeKind::Removed, _) => Change::Removed,
            (kind, None) => {
                return Err(Error::InvalidEvent {
                    collection,
                    id,
                    reason: format!("{kind} event without payload"),
                })
            }
        };
        Ok(Self { collection, id, change })
    }

    pub fn added(collection: impl Into<String>, id: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self { collection: collection.into(), id, change: Change::Added(payload.into()) }
    }

    pub fn changed(collection: impl Into<String>, id: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self { collection: collection.into(), id, change: Change::Changed(payload.into()) }
    }

    pub fn removed(collection: impl Into<String>, id: u64) -> Self {
        Self { collection: collection.into(), id, change: Change::Removed }
    }

    pub fn kind(&self) -> ChangeKind {
        match self.change {
            Change::Added(_) => ChangeKind::Added,
            Change::Changed(_) => ChangeKind::Changed,
            Change::Removed => ChangeKind::Removed,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match &self.change {
            Change::Added(p) | Change::Changed(p) => Some(p),
            Change::Removed => None,
        }
    }

    pub fn fqid(&self) -> String {
        fqid(&self.collection, self.id)
    }
}

/// One search hit, keyed externally by its fully-qualified id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Answer {
    pub score: f32,
    /// Field name -> matched (analyzed) terms, sorted.
    pub matched_words: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_round_trips_model_spelling() {
        for s in ["string", "HTMLStrict", "HTMLPermissive", "text", "relation", "generic-relation", "number", "number[]"] {
            assert_eq!(FieldType::from(s).as_str(), s);
        }
        assert_eq!(FieldType::from("timestamp"), FieldType::Other("timestamp".into()));
    }

    #[test]
    fn field_kinds_follow_type() {
        assert_eq!(FieldType::HtmlPermissive.kind(), Some(FieldKind::Html));
        assert_eq!(FieldType::Text.kind(), Some(FieldKind::Text));
        assert_eq!(FieldType::GenericRelation.kind(), Some(FieldKind::Opaque));
        assert_eq!(FieldType::NumberArray.kind(), Some(FieldKind::Numeric));
        assert_eq!(FieldType::Other("boolean".into()).kind(), None);
    }

    #[test]
    fn change_event_requires_payload_for_added_and_changed() {
        assert!(ChangeEvent::new(ChangeKind::Added, "motion", 1, None).is_err());
        assert!(ChangeEvent::new(ChangeKind::Changed, "motion", 1, None).is_err());
        let removed = ChangeEvent::new(ChangeKind::Removed, "motion", 1, Some(b"{}".to_vec())).expect("removed");
        assert_eq!(removed.payload(), None);
        assert_eq!(removed.fqid(), "motion/1");
    }

    #[test]
    fn parse_fqid_rejects_garbage() {
        assert_eq!(parse_fqid("motion/12"), Some(("motion", 12)));
        assert_eq!(parse_fqid("motion"), None);
        assert_eq!(parse_fqid("/12"), None);
        assert_eq!(parse_fqid("motion/x"), None);
    }

    #[test]
    fn request_fields_keep_relations_in_order() {
        let mut relation_field = FieldDescriptor::new("relation", false);
        relation_field.relation = Some(CollectionRelation {
            relation_type: "relation".into(),
            collection: Some("meeting".into()),
            fields: IndexMap::new(),
        });
        let descriptor = CollectionDescriptor::new().with_collection(
            "motion",
            [("title", FieldDescriptor::new("string", true)), ("meeting_id", relation_field)],
        );
        let fields = descriptor.request_fields();
        let motion = &fields["motion"];
        assert_eq!(motion.keys().collect::<Vec<_>>(), vec!["title", "meeting_id"]);
        assert!(motion["title"].is_none());
        assert_eq!(motion["meeting_id"].as_ref().and_then(|r| r.collection.as_deref()), Some("meeting"));
    }

    #[test]
    fn answer_serializes_with_pascal_case_keys() {
        let answer = Answer { score: 1.5, matched_words: BTreeMap::from([("title".to_string(), vec!["agenda".to_string()])]) };
        let json = serde_json::to_value(&answer).expect("json");
        assert_eq!(json["Score"], 1.5);
        assert_eq!(json["MatchedWords"]["title"][0], "agenda");
    }
}
