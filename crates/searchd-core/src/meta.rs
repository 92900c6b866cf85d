//! Model description and search-filter loading.
//!
//! The model file maps collection -> field -> type, where a field is either a
//! bare type string or an object with a `type` key. The search filter narrows
//! that down to the fields the index and the access boundary care about.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::{CollectionDescriptor, CollectionFields, CollectionRelation, FieldDescriptor, FieldType};

const META_KEY: &str = "_meta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelField {
    pub field_type: FieldType,
    pub order: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCollection {
    pub fields: IndexMap<String, ModelField>,
    pub order: u32,
}

/// Parsed model description, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Models {
    collections: IndexMap<String, ModelCollection>,
}

/// Declaration order counter threaded through one loading pass.
#[derive(Debug, Default)]
struct Sequence(u32);

impl Sequence {
    fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }
}

fn key_str<'a>(key: &'a Value, context: &str) -> Result<&'a str> {
    key.as_str()
        .ok_or_else(|| Error::InvalidModel(format!("{context}: non-string key {key:?}")))
}

impl Models {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let root: Mapping = serde_yaml::from_str(text).map_err(|source| Error::Yaml { what: "models", source })?;

        let mut collection_seq = Sequence::default();
        let mut field_seq = Sequence::default();
        let mut collections = IndexMap::new();
        for (key, value) in &root {
            let name = key_str(key, "models")?;
            if name == META_KEY {
                continue;
            }
            let Value::Mapping(fields) = value else {
                return Err(Error::InvalidModel(format!("collection {name} is not a mapping")));
            };
            let mut collection = ModelCollection { fields: IndexMap::new(), order: collection_seq.next() };
            for (fkey, fvalue) in fields {
                let field = key_str(fkey, name)?;
                let field_type = member_type(fvalue)
                    .ok_or_else(|| Error::InvalidModel(format!("{name}.{field}: member object without type")))?;
                collection
                    .fields
                    .insert(field.to_string(), ModelField { field_type: FieldType::from(field_type), order: field_seq.next() });
            }
            collections.insert(name.to_string(), collection);
        }
        Ok(Self { collections })
    }

    pub fn get(&self, collection: &str) -> Option<&ModelCollection> {
        self.collections.get(collection)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Keeps fields for which `keep` returns a descriptor; drops empty collections.
    fn retain<F>(&self, mut keep: F) -> CollectionDescriptor
    where
        F: FnMut(&str, &str, &ModelField) -> Option<FieldDescriptor>,
    {
        let mut descriptor = CollectionDescriptor::new();
        for (name, collection) in &self.collections {
            let fields: CollectionFields = collection
                .fields
                .iter()
                .filter_map(|(field, model)| keep(name, field, model).map(|d| (field.clone(), d)))
                .collect();
            if fields.is_empty() {
                trace!(collection = %name, "dropping collection without retained fields");
                continue;
            }
            descriptor.insert(name.clone(), fields);
        }
        descriptor
    }

    /// Applies a search filter: `searchable` fields are indexed, `additional`
    /// ones are kept for the access boundary only, everything else is removed.
    pub fn retain_filtered(&self, filters: &SearchFilters) -> CollectionDescriptor {
        self.retain(|collection, field, model| {
            let filter = filters.get(collection)?;
            let searchable = if filter.additional.iter().any(|f| f == field) {
                false
            } else if filter.searchable.iter().any(|f| f == field) {
                true
            } else {
                trace!(%collection, %field, "removing filtered field");
                return None;
            };
            Some(FieldDescriptor {
                field_type: model.field_type.clone(),
                searchable,
                relation: filter.relations.get(field).cloned(),
                order: model.order,
            })
        })
    }

    /// Keeps every string-typed field as searchable.
    pub fn retain_strings(&self) -> CollectionDescriptor {
        self.retain(|collection, field, model| {
            if !model.field_type.is_string_like() {
                trace!(%collection, %field, field_type = %model.field_type, "removing non-string field");
                return None;
            }
            Some(FieldDescriptor {
                field_type: model.field_type.clone(),
                searchable: true,
                relation: None,
                order: model.order,
            })
        })
    }

    /// Filter covering string fields and `meeting_id`, with `id` and
    /// `sequential_number` carried as additional fields.
    pub fn default_filters(&self) -> SearchFilters {
        let mut filters = SearchFilters::default();
        for (name, collection) in &self.collections {
            let mut filter = CollectionFilter::default();
            for (field, model) in &collection.fields {
                match field.as_str() {
                    "id" | "sequential_number" => filter.additional.push(field.clone()),
                    "meeting_id" => filter.searchable.push(field.clone()),
                    _ if model.field_type.is_string_like() => filter.searchable.push(field.clone()),
                    _ => {}
                }
            }
            if !filter.searchable.is_empty() {
                filters.collections.insert(name.clone(), filter);
            }
        }
        filters
    }
}

fn member_type(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Mapping(m) => m.get("type").and_then(Value::as_str),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionFilter {
    pub searchable: Vec<String>,
    pub additional: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub relations: IndexMap<String, CollectionRelation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFilters {
    pub collections: IndexMap<String, CollectionFilter>,
}

impl SearchFilters {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut root: Mapping =
            serde_yaml::from_str(text).map_err(|source| Error::Yaml { what: "search filter", source })?;
        root.remove(META_KEY);
        serde_yaml::from_value(Value::Mapping(root)).map_err(|source| Error::Yaml { what: "search filter", source })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|source| Error::Yaml { what: "search filter", source })
    }

    pub fn get(&self, collection: &str) -> Option<&CollectionFilter> {
        self.collections.get(collection)
    }
}

/// Loads the model file and narrows it with the filter file, or to string
/// fields when no filter path is given.
pub fn load_collections(models: &Path, search: Option<&Path>) -> Result<CollectionDescriptor> {
    let models = Models::load(models)?;
    match search {
        Some(path) => Ok(models.retain_filtered(&SearchFilters::load(path)?)),
        None => Ok(models.retain_strings()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODELS: &str = r#"
_meta:
  id_field: &id_field
    type: number
motion:
  id: number
  title:
    type: string
    required: true
  text: HTMLStrict
  meeting_id: relation
  tags: number[]
topic:
  id: number
  weight: number
"#;

    #[test]
    fn models_skip_meta_and_keep_order() {
        let models = Models::from_yaml(MODELS).expect("parse");
        assert_eq!(models.len(), 2);
        let motion = models.get("motion").expect("motion");
        assert_eq!(motion.fields.keys().collect::<Vec<_>>(), vec!["id", "title", "text", "meeting_id", "tags"]);
        assert_eq!(motion.fields["title"].field_type, FieldType::String);
        assert!(motion.fields["id"].order < motion.fields["tags"].order);
        assert!(models.get("topic").expect("topic").order > motion.order);
    }

    #[test]
    fn member_object_without_type_is_rejected() {
        let err = Models::from_yaml("motion:\n  title:\n    required: true\n").unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
    }

    #[test]
    fn retain_strings_drops_non_string_collections() {
        let descriptor = Models::from_yaml(MODELS).expect("parse").retain_strings();
        assert!(!descriptor.contains("topic"));
        let motion = descriptor.get("motion").expect("motion");
        assert_eq!(motion.keys().collect::<Vec<_>>(), vec!["title", "text"]);
        assert!(motion.values().all(|d| d.searchable));
    }

    #[test]
    fn filter_marks_additional_and_attaches_relations() {
        let filters = SearchFilters::from_yaml(
            r#"
motion:
  searchable: [title, meeting_id]
  additional: [id]
  relations:
    meeting_id:
      type: relation
      collection: meeting
      fields:
        name: null
"#,
        )
        .expect("filters");
        let descriptor = Models::from_yaml(MODELS).expect("parse").retain_filtered(&filters);
        let motion = descriptor.get("motion").expect("motion");
        assert_eq!(motion.keys().collect::<Vec<_>>(), vec!["id", "title", "meeting_id"]);
        assert!(!motion["id"].searchable);
        assert!(motion["title"].searchable);
        let relation = motion["meeting_id"].relation.as_ref().expect("relation");
        assert_eq!(relation.collection.as_deref(), Some("meeting"));
        assert!(relation.fields.contains_key("name"));
        assert!(!descriptor.contains("topic"));
    }

    #[test]
    fn default_filters_round_trip_through_yaml() {
        let filters = Models::from_yaml(MODELS).expect("parse").default_filters();
        let motion = filters.get("motion").expect("motion");
        assert_eq!(motion.searchable, vec!["title", "text", "meeting_id"]);
        assert_eq!(motion.additional, vec!["id"]);
        assert!(filters.get("topic").is_none());

        let reparsed = SearchFilters::from_yaml(&filters.to_yaml().expect("yaml")).expect("reparse");
        assert_eq!(reparsed, filters);
    }
}
