//! searchd-text
//!
//! Tantivy-backed full-text index fed from a change source. `index` owns the
//! lifecycle of index generations, `search` admits and runs queries against
//! the live one, and `refresh` keeps it current in the background.

pub mod analyzer;
pub mod document;
pub mod error;
pub mod generation;
pub mod index;
pub mod mapping;
pub mod query;
pub mod refresh;
pub mod search;

pub use error::{Result, SearchError};
pub use generation::{Generation, Hit, IndexOp};
pub use index::{IndexOptions, IndexState, TextIndex};
pub use mapping::IndexMapping;
pub use refresh::Refresher;
pub use search::{collect_answers, Admission, Answers, QueryOptions, QueryServer};
