//! Scriptable in-memory [`BitableClient`] for tests.
//!
//! Responses are queued per operation name; each call pops the next
//! scripted response (the last one repeats). Writes are recorded so tests
//! can assert exactly-once semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use cf_domain::record::{FieldValue, Record};
use cf_domain::{Error, Result};

use crate::client::{
    BitableClient, Conjunction, FieldMeta, FieldType, ScanParams, SearchCondition, SearchPage,
    TableInfo, WriteResult,
};

/// A scripted response for one search call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Page(SearchPage),
    FilterNotSupported,
    RecordNotFound,
    PermissionDenied,
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub op: &'static str,
    pub table_id: String,
    pub record_id: Option<String>,
    pub fields: BTreeMap<String, Value>,
    pub idempotency_key: Option<String>,
}

#[derive(Default)]
pub struct MockBitableClient {
    pub tables: Vec<TableInfo>,
    pub fields: HashMap<String, Vec<FieldMeta>>,
    scripts: Mutex<HashMap<&'static str, VecDeque<Scripted>>>,
    records: Mutex<HashMap<String, Record>>,
    /// Record ids whose writes fail with `RecordNotFound`.
    failing_records: Mutex<std::collections::HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<RecordedWrite>>,
}

impl MockBitableClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(mut self, tables: &[(&str, &str)]) -> Self {
        self.tables = tables
            .iter()
            .map(|(id, name)| TableInfo {
                table_id: id.to_string(),
                name: name.to_string(),
            })
            .collect();
        self
    }

    pub fn with_fields(mut self, table_id: &str, fields: &[(&str, FieldType)]) -> Self {
        self.fields.insert(
            table_id.to_owned(),
            fields
                .iter()
                .map(|(n, t)| FieldMeta {
                    name: n.to_string(),
                    field_type: *t,
                })
                .collect(),
        );
        self
    }

    /// Queue a response for an operation (`search`, `search_keyword`, …).
    pub fn script(&self, op: &'static str, response: Scripted) {
        self.scripts.lock().entry(op).or_default().push_back(response);
    }

    /// Register a record served by `record_get`.
    pub fn put_record(&self, record: Record) {
        self.records.lock().insert(record.record_id.clone(), record);
    }

    /// Make every write against `record_id` fail with `RecordNotFound`.
    pub fn fail_writes_for(&self, record_id: &str) {
        self.failing_records.lock().insert(record_id.to_owned());
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == op).count()
    }

    fn next(&self, op: &'static str) -> Result<SearchPage> {
        self.calls.lock().push(op.to_owned());
        let mut scripts = self.scripts.lock();
        let queue = scripts.entry(op).or_default();
        let scripted = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match scripted {
            Some(Scripted::Page(page)) => Ok(page),
            Some(Scripted::FilterNotSupported) => {
                Err(Error::FilterNotSupported(op.to_owned()))
            }
            Some(Scripted::RecordNotFound) => Err(Error::RecordNotFound(op.to_owned())),
            Some(Scripted::PermissionDenied) => Err(Error::PermissionDenied(op.to_owned())),
            Some(Scripted::RateLimited) => Err(Error::RateLimited(op.to_owned())),
            None => Ok(SearchPage::default()),
        }
    }
}

/// Build a record with text fields, for scripting search pages.
pub fn record_with_fields(record_id: &str, fields: &[(&str, &str)]) -> Record {
    let mut record = Record {
        record_id: record_id.to_owned(),
        record_url: format!("https://example.com/{record_id}"),
        ..Default::default()
    };
    for (name, value) in fields {
        record
            .fields
            .insert(name.to_string(), FieldValue::Text(value.to_string()));
        record.fields_text.insert(name.to_string(), value.to_string());
    }
    record
}

/// Wrap records into a one-page result.
pub fn page_of(records: Vec<Record>) -> SearchPage {
    SearchPage {
        total: records.len() as u64,
        records,
        has_more: false,
        page_token: None,
        schema: Vec::new(),
    }
}

#[async_trait]
impl BitableClient for MockBitableClient {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.calls.lock().push("list_tables".into());
        Ok(self.tables.clone())
    }

    async fn list_fields(&self, table_id: &str) -> Result<Vec<FieldMeta>> {
        self.calls.lock().push("list_fields".into());
        Ok(self.fields.get(table_id).cloned().unwrap_or_default())
    }

    async fn search(&self, _table_id: &str, _params: &ScanParams) -> Result<SearchPage> {
        self.next("search")
    }

    async fn search_exact(&self, _table_id: &str, _field: &str, _value: &str) -> Result<SearchPage> {
        self.next("search_exact")
    }

    async fn search_keyword(
        &self,
        _table_id: &str,
        _keyword: &str,
        _fields: &[String],
    ) -> Result<SearchPage> {
        self.next("search_keyword")
    }

    async fn search_person(
        &self,
        _table_id: &str,
        _field: &str,
        _open_id: Option<&str>,
        _user_name: Option<&str>,
    ) -> Result<SearchPage> {
        self.next("search_person")
    }

    async fn search_date_range(
        &self,
        _table_id: &str,
        _field: &str,
        _from: Option<&str>,
        _to: Option<&str>,
        _time_from: Option<&str>,
        _time_to: Option<&str>,
    ) -> Result<SearchPage> {
        self.next("search_date_range")
    }

    async fn search_advanced(
        &self,
        _table_id: &str,
        _conditions: &[SearchCondition],
        _conjunction: Conjunction,
    ) -> Result<SearchPage> {
        self.next("search_advanced")
    }

    async fn record_get(&self, _table_id: &str, record_id: &str) -> Result<Record> {
        self.calls.lock().push("record_get".into());
        self.records
            .lock()
            .get(record_id)
            .cloned()
            .ok_or_else(|| Error::RecordNotFound(record_id.to_owned()))
    }

    async fn record_create(
        &self,
        table_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult> {
        self.calls.lock().push("record_create".into());
        let record_id = format!("rec_new_{}", self.writes.lock().len() + 1);
        self.writes.lock().push(RecordedWrite {
            op: "create",
            table_id: table_id.to_owned(),
            record_id: Some(record_id.clone()),
            fields: fields.clone(),
            idempotency_key: idempotency_key.map(str::to_owned),
        });
        Ok(WriteResult {
            record_url: format!("https://example.com/{record_id}"),
            record_id,
        })
    }

    async fn record_update(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult> {
        self.calls.lock().push("record_update".into());
        if self.failing_records.lock().contains(record_id) {
            return Err(Error::RecordNotFound(record_id.to_owned()));
        }
        self.writes.lock().push(RecordedWrite {
            op: "update",
            table_id: table_id.to_owned(),
            record_id: Some(record_id.to_owned()),
            fields: fields.clone(),
            idempotency_key: idempotency_key.map(str::to_owned),
        });
        Ok(WriteResult {
            record_id: record_id.to_owned(),
            record_url: format!("https://example.com/{record_id}"),
        })
    }

    async fn record_delete(
        &self,
        table_id: &str,
        record_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        self.calls.lock().push("record_delete".into());
        if self.failing_records.lock().contains(record_id) {
            return Err(Error::RecordNotFound(record_id.to_owned()));
        }
        self.writes.lock().push(RecordedWrite {
            op: "delete",
            table_id: table_id.to_owned(),
            record_id: Some(record_id.to_owned()),
            fields: BTreeMap::new(),
            idempotency_key: idempotency_key.map(str::to_owned),
        });
        Ok(())
    }
}
