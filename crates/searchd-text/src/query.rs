//! Query construction: free text plus an optional meeting scope.

use tantivy::query::{BooleanQuery, ConstScoreQuery, EmptyQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, Term};
use tracing::debug;

use searchd_core::FieldKind;

use crate::error::{Result, SearchError};
use crate::mapping::IndexMapping;

pub const MEETING_ID: &str = "meeting_id";
pub const MEETING_IDS: &str = "meeting_ids";
pub const OWNER_ID: &str = "owner_id";

/// Parses `question` against every tokenized field. Syntax the parser cannot
/// make sense of is dropped rather than rejected.
pub fn parse_text(index: &Index, mapping: &IndexMapping, question: &str) -> Result<Box<dyn Query>> {
    let question = question.trim();
    if question.is_empty() {
        return Err(SearchError::InvalidQuery("empty query".into()));
    }
    if mapping.default_fields().is_empty() {
        return Err(SearchError::InvalidQuery("index has no searchable text fields".into()));
    }
    let parser = QueryParser::for_index(index, mapping.default_fields().to_vec());
    let (query, errors) = parser.parse_query_lenient(question);
    if !errors.is_empty() {
        debug!(question, errors = ?errors, "lenient parse dropped query parts");
    }
    Ok(query)
}

/// Entities belonging to, contained by or owned by `meeting_id`. Predicates
/// on fields the mapping lacks are left out; with none left nothing matches.
pub fn scope(mapping: &IndexMapping, meeting_id: i64) -> Box<dyn Query> {
    let mut predicates: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    for name in [MEETING_ID, MEETING_IDS] {
        if let Some(field) = mapping.field(name, FieldKind::Numeric) {
            let term = Term::from_field_i64(field, meeting_id);
            predicates.push((Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>));
        }
    }
    if let Some(field) = mapping.field(OWNER_ID, FieldKind::Opaque) {
        let term = Term::from_field_text(field, &format!("meeting/{meeting_id}"));
        predicates.push((Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>));
    }
    if predicates.is_empty() {
        return Box::new(EmptyQuery);
    }
    Box::new(BooleanQuery::new(predicates))
}

/// Conjoins `text` with the scope of `meeting_id`; scoring comes from the text only.
pub fn scoped(mapping: &IndexMapping, text: Box<dyn Query>, meeting_id: Option<i64>) -> Box<dyn Query> {
    match meeting_id {
        Some(id) => Box::new(BooleanQuery::new(vec![
            (Occur::Must, text),
            (Occur::Must, Box::new(ConstScoreQuery::new(scope(mapping, id), 0.0)) as Box<dyn Query>),
        ])),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchd_core::{CollectionDescriptor, FieldDescriptor};

    fn mapping(fields: &[(&str, &str)]) -> IndexMapping {
        let descriptor = CollectionDescriptor::new()
            .with_collection("motion", fields.iter().map(|(n, t)| (*n, FieldDescriptor::new(*t, true))));
        IndexMapping::new(&descriptor)
    }

    fn index_for(mapping: &IndexMapping) -> Index {
        let index = Index::create_in_ram(mapping.schema().clone());
        crate::analyzer::register(&index);
        index
    }

    #[test]
    fn only_empty_questions_are_invalid() {
        let mapping = mapping(&[("title", "string")]);
        let index = index_for(&mapping);
        assert!(matches!(parse_text(&index, &mapping, "   "), Err(SearchError::InvalidQuery(_))));
        for question in ["agenda", "Antrag: Haushalt", "Haushalt)", "\"Haushalt", "nosuchfield:agenda"] {
            assert!(parse_text(&index, &mapping, question).is_ok(), "{question:?}");
        }
    }

    #[test]
    fn no_text_fields_is_invalid() {
        let mapping = mapping(&[("meeting_id", "relation")]);
        let index = index_for(&mapping);
        assert!(matches!(parse_text(&index, &mapping, "agenda"), Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn scope_uses_available_predicates() {
        let mapping = mapping(&[("title", "string"), ("meeting_id", "relation"), ("owner_id", "generic-relation")]);
        let mut terms = Vec::new();
        scope(&mapping, 4).query_terms(&mut |term, _| terms.push(term.clone()));
        assert_eq!(terms.len(), 2);
    }

    #[test]
    fn scope_without_scope_fields_matches_nothing() {
        let mapping = mapping(&[("title", "string")]);
        let mut terms = Vec::new();
        scope(&mapping, 4).query_terms(&mut |term, _| terms.push(term.clone()));
        assert!(terms.is_empty());
    }
}
