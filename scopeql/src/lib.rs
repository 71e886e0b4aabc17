//! # scopeql
//!
//! A small filter language for scoping change subscriptions to a tenant and, optionally, a narrower
//! sub-resource. Filters are parsed with a pest grammar, evaluated against the scope fields carried by
//! change events, and rendered back to text so they can be shipped to the change-notification backend.
//!
//! ```rust
//! use scopeql::{parser::parse_selection, selection::filter::evaluate_predicate};
//! use std::collections::BTreeMap;
//!
//! let predicate = parse_selection("tenant_id = '42' AND farmer_id IS NOT NULL").unwrap();
//! let mut record = BTreeMap::new();
//! record.insert("tenant_id".to_string(), "42".to_string());
//! record.insert("farmer_id".to_string(), "7".to_string());
//! assert!(evaluate_predicate(&record, &predicate).unwrap());
//! ```

pub mod ast;
pub mod error;
pub mod grammar;
pub mod parser;
pub mod selection;

pub use error::ParseError;
pub use parser::parse_selection;
pub use selection::filter::{evaluate_predicate, Filterable};
