//! Query intent: fields, specifications, derived queries, windows and updates.
//!
//! # Responsibility
//! - Describe *what* to read or mutate, independently of storage.
//! - Validate query intent before any SQL is prepared.
//!
//! # See also
//! - `engine` for execution against SQLite.

pub mod derived;
pub mod example;
pub mod field;
pub mod page;
pub mod spec;
pub(crate) mod sql;
pub mod update;

pub use derived::{DerivedQuery, DerivedQueryBuilder};
pub use example::{Example, ExampleMatcher, MemberProbe, Probe, StringMatcher};
pub use field::{EntityField, FieldKind, FieldSource, Value};
pub use page::{Direction, Order, Page, PageRequest, Slice, Sort};
pub use spec::{Arity, Condition, Operand, Operator, Specification};
pub use update::{AssignValue, Assignment, BulkUpdate};
