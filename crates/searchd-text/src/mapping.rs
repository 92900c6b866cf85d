//! Index mapping derived from a collection descriptor.
//!
//! Every searchable field with a supported type gets one tantivy field per
//! (name, kind). Fields sharing a name across collections share the tantivy
//! field; when the kinds differ the field name is suffixed with the kind.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tantivy::schema::{
	Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, INDEXED, STORED, STRING,
};
use tantivy::TantivyDocument;
use tracing::warn;

use searchd_core::{fqid, CollectionDescriptor, CollectionFields, FieldKind};

use crate::analyzer::{HTML_ANALYZER, TEXT_ANALYZER};
use crate::document::{project_payload, FieldValue};

/// Collection name of every document.
pub const TYPE_FIELD: &str = "_type";
/// Fully-qualified id of every document.
pub const ID_FIELD: &str = "_fqid";

#[derive(Debug, Clone)]
pub struct IndexMapping {
	schema: Schema,
	type_field: Field,
	id_field: Field,
	fields: BTreeMap<String, BTreeMap<FieldKind, Field>>,
	sources: HashMap<Field, String>,
	default_fields: Vec<Field>,
}

fn text_options(analyzer: &str) -> TextOptions {
	let indexing = TextFieldIndexing::default()
		.set_tokenizer(analyzer)
		.set_index_option(IndexRecordOption::WithFreqsAndPositions);
	TextOptions::default().set_indexing_options(indexing)
}

impl IndexMapping {
	/// Deterministic for a given descriptor.
	pub fn new(collections: &CollectionDescriptor) -> Self {
		let mut kinds: BTreeMap<String, BTreeSet<FieldKind>> = BTreeMap::new();
		for (collection, fields) in collections.iter() {
			for (name, descriptor) in fields.iter().filter(|(_, d)| d.searchable) {
				match descriptor.field_type.kind() {
					Some(kind) => {
						kinds.entry(name.clone()).or_default().insert(kind);
					}
					None => warn!(
						%collection,
						field = %name,
						field_type = %descriptor.field_type,
						"unsupported field type, not indexed"
					),
				}
			}
		}

		let mut builder = Schema::builder();
		let type_field = builder.add_text_field(TYPE_FIELD, STRING | STORED);
		let id_field = builder.add_text_field(ID_FIELD, STRING | STORED);
		let mut fields: BTreeMap<String, BTreeMap<FieldKind, Field>> = BTreeMap::new();
		let mut sources = HashMap::new();
		let mut default_fields = Vec::new();
		for (name, field_kinds) in &kinds {
			let shared = field_kinds.len() == 1;
			for &kind in field_kinds {
				let field_name = if shared { name.clone() } else { format!("{name}#{}", kind.as_str()) };
				let field = match kind {
					FieldKind::Text => builder.add_text_field(&field_name, text_options(TEXT_ANALYZER)),
					FieldKind::Html => builder.add_text_field(&field_name, text_options(HTML_ANALYZER)),
					FieldKind::Opaque => builder.add_text_field(&field_name, STRING),
					FieldKind::Numeric => builder.add_i64_field(&field_name, INDEXED),
				};
				if matches!(kind, FieldKind::Text | FieldKind::Html) {
					default_fields.push(field);
				}
				fields.entry(name.clone()).or_default().insert(kind, field);
				sources.insert(field, name.clone());
			}
		}

		Self { schema: builder.build(), type_field, id_field, fields, sources, default_fields }
	}

	pub fn schema(&self) -> &Schema {
		&self.schema
	}

	pub fn id_field(&self) -> Field {
		self.id_field
	}

	pub fn type_field(&self) -> Field {
		self.type_field
	}

	pub fn field(&self, name: &str, kind: FieldKind) -> Option<Field> {
		self.fields.get(name)?.get(&kind).copied()
	}

	/// Model field name behind a tantivy field.
	pub fn source_name(&self, field: Field) -> Option<&str> {
		self.sources.get(&field).map(String::as_str)
	}

	/// Tokenized fields searched by free-text queries.
	pub fn default_fields(&self) -> &[Field] {
		&self.default_fields
	}

	/// Builds the document for one entity of `collection`.
	pub fn document(&self, collection: &str, fields: &CollectionFields, id: u64, payload: &[u8]) -> TantivyDocument {
		let fqid = fqid(collection, id);
		let mut doc = TantivyDocument::default();
		doc.add_text(self.type_field, collection);
		doc.add_text(self.id_field, &fqid);
		for projected in project_payload(fields, payload, &fqid) {
			let Some(field) = self.field(projected.name, projected.kind) else {
				continue;
			};
			match projected.value {
				FieldValue::Text(s) | FieldValue::Opaque(s) => doc.add_text(field, &s),
				FieldValue::Number(n) => doc.add_i64(field, n),
				FieldValue::NumberArray(ns) => {
					for n in ns {
						doc.add_i64(field, n);
					}
				}
			}
		}
		doc
	}
}
