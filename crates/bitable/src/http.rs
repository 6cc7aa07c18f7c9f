//! HTTP implementation of [`BitableClient`].
//!
//! Wraps a `reqwest::Client` against the backend's REST surface. Table and
//! field listings are cached for the configured schema TTL; search and
//! write calls always go to the wire. Backend rejections are mapped onto
//! the distinct error variants downstream fallback policies key on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};

use cf_cache::{Clock, TtlCache};
use cf_domain::config::BitableConfig;
use cf_domain::record::Record;
use cf_domain::{Error, Result};

use crate::client::{
    BitableClient, Conjunction, FieldMeta, FieldType, FilterOp, ScanParams, SearchCondition,
    SearchPage, TableInfo, WriteResult,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// REST client for the bitable backend. Created once and shared; the
/// underlying `reqwest::Client` keeps a connection pool.
pub struct HttpBitableClient {
    http: Client,
    base_url: String,
    app_token: String,
    bearer_token: Option<String>,
    table_cache: TtlCache<String, Arc<Vec<TableInfo>>>,
    field_cache: TtlCache<String, Arc<Vec<FieldMeta>>>,
    page_size: u32,
}

impl HttpBitableClient {
    pub fn new(cfg: &BitableConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let bearer_token = std::env::var(&cfg.token_env).ok().filter(|t| !t.is_empty());
        if bearer_token.is_none() {
            tracing::warn!(env = %cfg.token_env, "no backend token configured");
        }

        let ttl = Duration::from_secs(cfg.schema_cache_ttl_secs);
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            app_token: cfg.app_token.clone(),
            bearer_token,
            table_cache: TtlCache::new(16, ttl, clock.clone()),
            field_cache: TtlCache::new(64, ttl, clock),
            page_size: cfg.page_size,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}/apps/{}{}", self.base_url, self.app_token, path)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn check(&self, resp: Response, context: &str) -> Result<Value> {
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }

        let message = body
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("backend error")
            .to_owned();

        Err(match status {
            StatusCode::NOT_FOUND => Error::RecordNotFound(format!("{context}: {message}")),
            StatusCode::FORBIDDEN => Error::PermissionDenied(format!("{context}: {message}")),
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(format!("{context}: {message}")),
            StatusCode::BAD_REQUEST => {
                // The backend reports filter/field problems as 400 with a
                // discriminating message.
                if message.contains("FilterNotSupported") || message.contains("filter") {
                    Error::FilterNotSupported(format!("{context}: {message}"))
                } else if message.contains("FieldNameNotFound") || message.contains("field") {
                    Error::FieldNotFound(format!("{context}: {message}"))
                } else {
                    Error::Bitable(format!("{context}: {message}"))
                }
            }
            _ => Error::Bitable(format!("{context}: {status} {message}")),
        })
    }

    async fn send(&self, rb: RequestBuilder, context: &str) -> Result<Value> {
        let resp = self.decorate(rb).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{context}: {e}"))
            } else if e.is_connect() {
                Error::Connection(format!("{context}: {e}"))
            } else {
                Error::Http(format!("{context}: {e}"))
            }
        })?;
        self.check(resp, context).await
    }

    fn parse_page(&self, body: &Value) -> SearchPage {
        let records = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_record).collect())
            .unwrap_or_default();
        let schema = body
            .get("schema")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(parse_field_meta).collect())
            .unwrap_or_default();
        SearchPage {
            records,
            has_more: body
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            page_token: body
                .get("page_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_owned),
            total: body.get("total").and_then(Value::as_u64).unwrap_or(0),
            schema,
        }
    }

    async fn run_filter_search(&self, table_id: &str, filter: Value, context: &str) -> Result<SearchPage> {
        let body = self
            .send(
                self.http
                    .post(self.url(&format!("/tables/{table_id}/records/search")))
                    .json(&json!({
                        "filter": filter,
                        "page_size": self.page_size,
                    })),
                context,
            )
            .await?;
        Ok(self.parse_page(&body))
    }
}

fn parse_record(item: &Value) -> Record {
    let mut record = Record {
        record_id: item
            .get("record_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        record_url: item
            .get("record_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        ..Default::default()
    };
    if let Some(fields) = item.get("fields").and_then(Value::as_object) {
        for (name, raw) in fields {
            record
                .fields
                .insert(name.clone(), cf_domain::record::FieldValue::from_json(raw));
        }
    }
    record
}

fn parse_field_meta(item: &Value) -> Option<FieldMeta> {
    let name = item.get("field_name").and_then(Value::as_str)?;
    let field_type = match item.get("type").and_then(Value::as_u64).unwrap_or(0) {
        1 => FieldType::Text,
        2 => FieldType::Number,
        3 => FieldType::SingleSelect,
        4 => FieldType::MultiSelect,
        5 => FieldType::Date,
        7 => FieldType::Checkbox,
        11 => FieldType::Person,
        15 => FieldType::Url,
        20 => FieldType::Formula,
        _ => FieldType::Unknown,
    };
    Some(FieldMeta {
        name: name.to_owned(),
        field_type,
    })
}

fn condition_json(c: &SearchCondition) -> Value {
    let op = match c.op {
        FilterOp::Is => "is",
        FilterOp::Contains => "contains",
        FilterOp::IsGreater => "isGreater",
        FilterOp::IsLess => "isLess",
        FilterOp::IsEmpty => "isEmpty",
        FilterOp::IsNotEmpty => "isNotEmpty",
    };
    json!({
        "field_name": c.field,
        "operator": op,
        "value": c.value,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl BitableClient for HttpBitableClient {
    fn invalidate_metadata(&self) {
        self.table_cache.delete(&self.app_token);
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        if let Some(cached) = self.table_cache.get(&self.app_token) {
            return Ok((*cached).clone());
        }
        let body = self
            .send(self.http.get(self.url("/tables")), "list_tables")
            .await?;
        let tables: Vec<TableInfo> = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| {
                        Some(TableInfo {
                            table_id: t.get("table_id")?.as_str()?.to_owned(),
                            name: t.get("name")?.as_str()?.to_owned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.table_cache
            .set(self.app_token.clone(), Arc::new(tables.clone()));
        Ok(tables)
    }

    async fn list_fields(&self, table_id: &str) -> Result<Vec<FieldMeta>> {
        if let Some(cached) = self.field_cache.get(&table_id.to_owned()) {
            return Ok((*cached).clone());
        }
        let body = self
            .send(
                self.http
                    .get(self.url(&format!("/tables/{table_id}/fields"))),
                "list_fields",
            )
            .await?;
        let fields: Vec<FieldMeta> = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_field_meta).collect())
            .unwrap_or_default();
        self.field_cache
            .set(table_id.to_owned(), Arc::new(fields.clone()));
        Ok(fields)
    }

    async fn search(&self, table_id: &str, params: &ScanParams) -> Result<SearchPage> {
        let mut payload = json!({
            "page_size": if params.page_size > 0 { params.page_size } else { self.page_size },
        });
        if let Some(view) = &params.view_id {
            payload["view_id"] = json!(view);
        }
        if params.ignore_default_view {
            payload["ignore_view"] = json!(true);
        }
        if let Some(token) = &params.page_token {
            payload["page_token"] = json!(token);
        }
        let body = self
            .send(
                self.http
                    .post(self.url(&format!("/tables/{table_id}/records/search")))
                    .json(&payload),
                "search",
            )
            .await?;
        Ok(self.parse_page(&body))
    }

    async fn search_exact(&self, table_id: &str, field: &str, value: &str) -> Result<SearchPage> {
        // Equality degrades to `contains` for text-like fields so partial
        // case numbers still hit.
        let fields = self.list_fields(table_id).await?;
        let op = match fields.iter().find(|f| f.name == field) {
            Some(meta) if meta.field_type.is_text_like() => FilterOp::Contains,
            Some(_) => FilterOp::Is,
            None => return Err(Error::FieldNotFound(field.to_owned())),
        };
        self.run_filter_search(
            table_id,
            json!({
                "conjunction": "and",
                "conditions": [condition_json(&SearchCondition::new(field, op, json!(value)))],
            }),
            "search_exact",
        )
        .await
    }

    async fn search_keyword(
        &self,
        table_id: &str,
        keyword: &str,
        fields: &[String],
    ) -> Result<SearchPage> {
        let conditions: Vec<Value> = fields
            .iter()
            .map(|f| {
                condition_json(&SearchCondition::new(
                    f.clone(),
                    FilterOp::Contains,
                    json!(keyword),
                ))
            })
            .collect();
        self.run_filter_search(
            table_id,
            json!({ "conjunction": "or", "conditions": conditions }),
            "search_keyword",
        )
        .await
    }

    async fn search_person(
        &self,
        table_id: &str,
        field: &str,
        open_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<SearchPage> {
        let value = match (open_id, user_name) {
            (Some(id), _) if !id.is_empty() => json!([id]),
            (_, Some(name)) if !name.is_empty() => json!(name),
            _ => return Err(Error::Other("search_person needs an id or a name".into())),
        };
        self.run_filter_search(
            table_id,
            json!({
                "conjunction": "and",
                "conditions": [condition_json(&SearchCondition::new(field, FilterOp::Is, value))],
            }),
            "search_person",
        )
        .await
    }

    async fn search_date_range(
        &self,
        table_id: &str,
        field: &str,
        from: Option<&str>,
        to: Option<&str>,
        time_from: Option<&str>,
        time_to: Option<&str>,
    ) -> Result<SearchPage> {
        let mut conditions = Vec::new();
        if let Some(from) = from {
            let bound = match time_from {
                Some(t) => format!("{from} {t}"),
                None => from.to_owned(),
            };
            conditions.push(condition_json(&SearchCondition::new(
                field,
                FilterOp::IsGreater,
                json!(bound),
            )));
        }
        if let Some(to) = to {
            let bound = match time_to {
                Some(t) => format!("{to} {t}"),
                None => to.to_owned(),
            };
            conditions.push(condition_json(&SearchCondition::new(
                field,
                FilterOp::IsLess,
                json!(bound),
            )));
        }
        if conditions.is_empty() {
            return Err(Error::Other("search_date_range needs a bound".into()));
        }
        self.run_filter_search(
            table_id,
            json!({ "conjunction": "and", "conditions": conditions }),
            "search_date_range",
        )
        .await
    }

    async fn search_advanced(
        &self,
        table_id: &str,
        conditions: &[SearchCondition],
        conjunction: Conjunction,
    ) -> Result<SearchPage> {
        let conj = match conjunction {
            Conjunction::And => "and",
            Conjunction::Or => "or",
        };
        let conditions: Vec<Value> = conditions.iter().map(condition_json).collect();
        self.run_filter_search(
            table_id,
            json!({ "conjunction": conj, "conditions": conditions }),
            "search_advanced",
        )
        .await
    }

    async fn record_get(&self, table_id: &str, record_id: &str) -> Result<Record> {
        let body = self
            .send(
                self.http
                    .get(self.url(&format!("/tables/{table_id}/records/{record_id}"))),
                "record_get",
            )
            .await?;
        let item = body
            .get("record")
            .ok_or_else(|| Error::RecordNotFound(record_id.to_owned()))?;
        Ok(parse_record(item))
    }

    async fn record_create(
        &self,
        table_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult> {
        let mut rb = self
            .http
            .post(self.url(&format!("/tables/{table_id}/records")))
            .json(&json!({ "fields": fields }));
        if let Some(key) = idempotency_key {
            rb = rb.header("X-Idempotency-Key", key);
        }
        let body = self.send(rb, "record_create").await?;
        Ok(WriteResult {
            record_id: body
                .pointer("/record/record_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            record_url: body
                .pointer("/record/record_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }

    async fn record_update(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &BTreeMap<String, Value>,
        idempotency_key: Option<&str>,
    ) -> Result<WriteResult> {
        let mut rb = self
            .http
            .put(self.url(&format!("/tables/{table_id}/records/{record_id}")))
            .json(&json!({ "fields": fields }));
        if let Some(key) = idempotency_key {
            rb = rb.header("X-Idempotency-Key", key);
        }
        let body = self.send(rb, "record_update").await?;
        Ok(WriteResult {
            record_id: record_id.to_owned(),
            record_url: body
                .pointer("/record/record_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }

    async fn record_delete(
        &self,
        table_id: &str,
        record_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let mut rb = self
            .http
            .delete(self.url(&format!("/tables/{table_id}/records/{record_id}")));
        if let Some(key) = idempotency_key {
            rb = rb.header("X-Idempotency-Key", key);
        }
        self.send(rb, "record_delete").await?;
        Ok(())
    }
}
