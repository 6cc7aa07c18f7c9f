//! Schema-aware field formatter.
//!
//! Pure coercion of a decoded [`FieldValue`] into display text. Every call
//! emits a `field_format_total{type,status}` counter.

use chrono::TimeZone;

use cf_domain::metric::MetricEvent;
use cf_domain::record::{FieldValue, Record, DATE_MS_THRESHOLD};
use cf_domain::AGENT_TZ;

use crate::client::FieldType;
use crate::schema::TableSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStatus {
    Ok,
    MissingMeta,
    Malformed,
}

impl FormatStatus {
    fn label(&self) -> &'static str {
        match self {
            FormatStatus::Ok => "ok",
            FormatStatus::MissingMeta => "missing_meta",
            FormatStatus::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormattedField {
    pub text: String,
    pub field_type: String,
    pub status: FormatStatus,
}

/// Format one field value using its schema type when known.
pub fn format_value(value: &FieldValue, meta: Option<FieldType>) -> FormattedField {
    let (text, status) = render(value, meta);
    let field_type = meta
        .map(|t| t.label().to_owned())
        .unwrap_or_else(|| variant_label(value).to_owned());

    MetricEvent::FieldFormatTotal {
        field_type: field_type.clone(),
        status: status.label(),
    }
    .emit();

    FormattedField {
        text,
        field_type,
        status,
    }
}

fn render(value: &FieldValue, meta: Option<FieldType>) -> (String, FormatStatus) {
    let status = if meta.is_some() {
        FormatStatus::Ok
    } else {
        FormatStatus::MissingMeta
    };
    match value {
        FieldValue::Null => (String::new(), status),
        FieldValue::Text(s) => (s.trim().to_owned(), status),
        FieldValue::Bool(b) => ((if *b { "是" } else { "否" }).to_owned(), status),
        FieldValue::Number(n) => (format_number(*n), status),
        FieldValue::DateMs(ms) => match format_date_ms(*ms) {
            Some(text) => (text, status),
            None => (ms.to_string(), FormatStatus::Malformed),
        },
        FieldValue::Options(opts) => (opts.join("、"), status),
        FieldValue::Persons(ps) => (
            ps.iter()
                .map(|p| p.name.as_str())
                .filter(|n| !n.is_empty())
                .collect::<Vec<_>>()
                .join("、"),
            status,
        ),
        FieldValue::Rich(segs) => (
            segs.iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .concat()
                .trim()
                .to_owned(),
            status,
        ),
    }
}

fn format_number(n: f64) -> String {
    // Dates can arrive as plain numbers when schema said Date but the
    // value sat below the ms threshold; render integers without a tail.
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn format_date_ms(ms: i64) -> Option<String> {
    if ms <= DATE_MS_THRESHOLD {
        return None;
    }
    let dt = AGENT_TZ.timestamp_millis_opt(ms).single()?;
    Some(dt.format("%Y-%m-%d %H:%M").to_string())
}

fn variant_label(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Text(_) => "text",
        FieldValue::Number(_) => "number",
        FieldValue::Bool(_) => "checkbox",
        FieldValue::DateMs(_) => "date",
        FieldValue::Options(_) => "multi_select",
        FieldValue::Persons(_) => "person",
        FieldValue::Rich(_) => "rich_text",
        FieldValue::Null => "null",
    }
}

/// Run the formatter over every field of a record, filling `fields_text`.
pub fn format_record(record: &mut Record, schema: Option<&TableSchema>) {
    let rendered: Vec<(String, String)> = record
        .fields
        .iter()
        .map(|(name, value)| {
            let meta = schema.and_then(|s| s.get(name)).copied();
            (name.clone(), format_value(value, meta).text)
        })
        .collect();
    for (name, text) in rendered {
        record.fields_text.insert(name, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::record::{Person, RichSegment};

    #[test]
    fn timestamps_render_in_utc8() {
        // 2024-09-10 01:30 UTC == 09:30 +08:00.
        let f = format_value(&FieldValue::DateMs(1_725_931_800_000), Some(FieldType::Date));
        assert_eq!(f.text, "2024-09-10 09:30");
        assert_eq!(f.status, FormatStatus::Ok);
    }

    #[test]
    fn persons_join_display_names() {
        let v = FieldValue::Persons(vec![
            Person {
                id: "ou_1".into(),
                name: "张三".into(),
            },
            Person {
                id: "ou_2".into(),
                name: "李四".into(),
            },
        ]);
        assert_eq!(format_value(&v, Some(FieldType::Person)).text, "张三、李四");
    }

    #[test]
    fn rich_text_unwraps_inner_text() {
        let v = FieldValue::Rich(vec![
            RichSegment {
                text: "(2024)粤0101".into(),
            },
            RichSegment {
                text: "民初100号".into(),
            },
        ]);
        assert_eq!(format_value(&v, Some(FieldType::Text)).text, "(2024)粤0101民初100号");
    }

    #[test]
    fn missing_meta_is_flagged_not_fatal() {
        let f = format_value(&FieldValue::Text("未结".into()), None);
        assert_eq!(f.text, "未结");
        assert_eq!(f.status, FormatStatus::MissingMeta);
    }

    #[test]
    fn integers_render_without_decimal_tail() {
        assert_eq!(
            format_value(&FieldValue::Number(120000.0), Some(FieldType::Number)).text,
            "120000"
        );
        assert_eq!(
            format_value(&FieldValue::Number(0.5), Some(FieldType::Number)).text,
            "0.5"
        );
    }

    #[test]
    fn record_formatting_fills_fields_text() {
        let mut record = Record {
            record_id: "rec1".into(),
            ..Default::default()
        };
        record
            .fields
            .insert("案号".into(), FieldValue::Text("(2024)粤0101民初100号".into()));
        record
            .fields
            .insert("开庭日期".into(), FieldValue::DateMs(1_725_931_800_000));
        format_record(&mut record, None);
        assert_eq!(record.text("案号"), "(2024)粤0101民初100号");
        assert_eq!(record.text("开庭日期"), "2024-09-10 09:30");
    }
}
