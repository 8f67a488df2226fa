//! Data models for murmur.
//!
//! This module contains the backend-independent types every adapter speaks:
//! scalar values, records, the filter DSL and query options.

pub mod filter;
mod options;
mod record;
pub mod schema;
pub mod value;

pub use filter::{Branch, COMPLEX_KEY, Complex, Condition, Filter, LOGIC_KEY, LikePattern, Logic};
pub use options::{CountResult, GroupedCount, QueryOptions, UpdateData, UpdateFn};
pub use record::{OBJECT_ID, Record};
pub use value::Value;

/// Comment table name.
pub const COMMENT_TABLE: &str = "Comment";

/// Page counter table name.
pub const COUNTER_TABLE: &str = "Counter";

/// User table name.
pub const USERS_TABLE: &str = "Users";

/// Every table the comment service stores.
pub const TABLES: [&str; 3] = [COMMENT_TABLE, COUNTER_TABLE, USERS_TABLE];

/// Timestamp fields the service writes on every table.
pub const TIMESTAMP_FIELDS: [&str; 3] = ["insertedAt", "createdAt", "updatedAt"];
