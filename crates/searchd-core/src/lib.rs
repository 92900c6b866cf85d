#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod error;
pub mod meta;
pub mod types;

pub use config::{expand_path, resolve_with_base, Settings};
pub use error::{Error, ErrorKind, Result};
pub use types::{
    fqid, parse_fqid, Answer, Change, ChangeEvent, ChangeKind, CollectionDescriptor, CollectionFields,
    CollectionRelation, FieldDescriptor, FieldKind, FieldRelations, FieldType, RequestFields,
};
