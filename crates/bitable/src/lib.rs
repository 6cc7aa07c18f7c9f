//! Typed client for the low-code record backend ("bitable"), plus the
//! schema cache and the schema-aware field formatter.

pub mod client;
pub mod formatter;
pub mod http;
pub mod schema;
pub mod testing;

pub use client::{
    BitableClient, Conjunction, FieldMeta, FieldType, FilterOp, ScanParams, SearchCondition,
    SearchPage, TableInfo, WriteResult,
};
pub use formatter::{format_record, format_value, FormatStatus, FormattedField};
pub use http::HttpBitableClient;
pub use schema::SchemaCache;
