//! Raw input values → typed property payloads.
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde_json::Value;

use crate::error::CoercionError;
use crate::model::{DateValue, FileRef, PropertyKind, PropertyValue, SelectOption};

/// Coerces raw values for one target database. Remembers select options it
/// had to invent so later records see them as existing.
#[derive(Debug, Default)]
pub struct Coercer {
    create_missing_select_options: bool,
    added: Vec<(String, Vec<SelectOption>)>,
}

impl Coercer {
    pub fn new(create_missing_select_options: bool) -> Self {
        Self {
            create_missing_select_options,
            added: Vec::new(),
        }
    }

    /// Coerce every field of one record. All-or-nothing: options invented for
    /// a record that then fails are forgotten.
    pub fn coerce_record<'a, F>(
        &mut self,
        fields: &[(String, Value)],
        kind_of: F,
    ) -> Result<Vec<(String, PropertyValue)>, CoercionError>
    where
        F: Fn(&str) -> Option<&'a PropertyKind>,
    {
        let snapshot = self.added.clone();
        let mut out = Vec::with_capacity(fields.len());
        for (name, raw) in fields {
            let Some(kind) = kind_of(name) else {
                self.added = snapshot;
                return Err(CoercionError::new(
                    name.as_str(),
                    "a property defined on the target database",
                    "unknown property",
                ));
            };
            match self.coerce(name, raw, kind) {
                Ok(value) => out.push((name.clone(), value)),
                Err(err) => {
                    self.added = snapshot;
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    pub fn coerce(
        &mut self,
        property: &str,
        raw: &Value,
        kind: &PropertyKind,
    ) -> Result<PropertyValue, CoercionError> {
        match kind {
            PropertyKind::Title => text(property, raw).map(PropertyValue::Title),
            PropertyKind::RichText => text(property, raw).map(PropertyValue::RichText),
            PropertyKind::Url => text(property, raw).map(PropertyValue::Url),
            PropertyKind::Email => text(property, raw).map(PropertyValue::Email),
            PropertyKind::PhoneNumber => text(property, raw).map(PropertyValue::PhoneNumber),
            PropertyKind::Number { .. } => raw
                .as_f64()
                .map(PropertyValue::Number)
                .ok_or_else(|| CoercionError::new(property, "a number", describe(raw))),
            PropertyKind::Checkbox => raw
                .as_bool()
                .map(PropertyValue::Checkbox)
                .ok_or_else(|| CoercionError::new(property, "a boolean", describe(raw))),
            PropertyKind::Select { options } => {
                let name = raw
                    .as_str()
                    .ok_or_else(|| CoercionError::new(property, "a string", describe(raw)))?;
                self.resolve_option(property, options, name)?;
                Ok(PropertyValue::Select(name.to_string()))
            }
            PropertyKind::MultiSelect { options } => {
                let names = string_list(property, raw)?;
                for name in &names {
                    self.resolve_option(property, options, name)?;
                }
                Ok(PropertyValue::MultiSelect(names))
            }
            PropertyKind::Date => date(property, raw).map(PropertyValue::Date),
            PropertyKind::Files => files(property, raw).map(PropertyValue::Files),
            PropertyKind::Relation { .. } => Err(CoercionError::new(
                property,
                "a non-relation property (relation values are not supported)",
                describe(raw),
            )),
            PropertyKind::Other { remote_type } => Err(CoercionError::new(
                property,
                "a supported property type",
                format!("unsupported property type '{remote_type}'"),
            )),
        }
    }

    /// Options invented so far, per property, in encounter order.
    pub fn added_options(&self) -> &[(String, Vec<SelectOption>)] {
        &self.added
    }

    fn resolve_option(
        &mut self,
        property: &str,
        options: &[SelectOption],
        name: &str,
    ) -> Result<(), CoercionError> {
        if options.iter().any(|o| o.name == name) {
            return Ok(());
        }
        let slot = self.added.iter().position(|(p, _)| p == property);
        if let Some(idx) = slot {
            if self.added[idx].1.iter().any(|o| o.name == name) {
                return Ok(());
            }
        }
        if !self.create_missing_select_options {
            let known: Vec<&str> = options.iter().map(|o| o.name.as_str()).collect();
            return Err(CoercionError::new(
                property,
                format!("one of [{}]", known.join(", ")),
                format!("'{name}'"),
            ));
        }
        match slot {
            Some(idx) => self.added[idx].1.push(SelectOption::named(name)),
            None => self
                .added
                .push((property.to_string(), vec![SelectOption::named(name)])),
        }
        Ok(())
    }
}

fn text(property: &str, raw: &Value) -> Result<String, CoercionError> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(CoercionError::new(property, "a string", describe(raw))),
    }
}

fn string_list(property: &str, raw: &Value) -> Result<Vec<String>, CoercionError> {
    match raw {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CoercionError::new(property, "a list of strings", describe(raw))
                })
            })
            .collect(),
        _ => Err(CoercionError::new(property, "a list of strings", describe(raw))),
    }
}

fn date(property: &str, raw: &Value) -> Result<DateValue, CoercionError> {
    let expected = "an ISO date string or a {start, end} map";
    let parse = |v: &Value| -> Result<String, CoercionError> {
        v.as_str()
            .and_then(normalize_date)
            .ok_or_else(|| CoercionError::new(property, expected, describe(v)))
    };
    match raw {
        Value::String(_) => Ok(DateValue {
            start: parse(raw)?,
            end: None,
        }),
        Value::Object(map) => {
            let start = map
                .get("start")
                .ok_or_else(|| CoercionError::new(property, expected, "map without 'start'"))?;
            let end = match map.get("end") {
                None | Some(Value::Null) => None,
                Some(v) => Some(parse(v)?),
            };
            Ok(DateValue {
                start: parse(start)?,
                end,
            })
        }
        _ => Err(CoercionError::new(property, expected, describe(raw))),
    }
}

fn files(property: &str, raw: &Value) -> Result<Vec<FileRef>, CoercionError> {
    let expected = "a URL or a list of {url, name?}";
    let one = |v: &Value| -> Result<FileRef, CoercionError> {
        match v {
            Value::String(url) => Ok(FileRef {
                url: url.clone(),
                name: url.clone(),
            }),
            Value::Object(map) => {
                let url = map
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoercionError::new(property, expected, "map without 'url'"))?;
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(url);
                Ok(FileRef {
                    url: url.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(CoercionError::new(property, expected, describe(v))),
        }
    };
    match raw {
        Value::String(_) => Ok(vec![one(raw)?]),
        Value::Array(items) => items.iter().map(one).collect(),
        _ => Err(CoercionError::new(property, expected, describe(raw))),
    }
}

/// Canonical form for date strings so values read back from the remote
/// compare equal to the ones we wrote.
pub fn normalize_date(input: &str) -> Option<String> {
    let s = input.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    // without an offset the value is taken as UTC, which is how it reads back
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, false))
}

fn describe(raw: &Value) -> String {
    match raw {
        Value::Null => "null".into(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(_) => "a list".into(),
        Value::Object(_) => "a map".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select(names: &[&str]) -> PropertyKind {
        PropertyKind::Select {
            options: names.iter().map(|n| SelectOption::named(*n)).collect(),
        }
    }

    #[test]
    fn select_matches_case_sensitively() {
        let mut c = Coercer::new(false);
        let kind = select(&["Active", "Prospect"]);
        assert_eq!(
            c.coerce("Status", &json!("Active"), &kind).unwrap(),
            PropertyValue::Select("Active".into())
        );
        let err = c.coerce("Status", &json!("active"), &kind).unwrap_err();
        assert_eq!(err.property, "Status");
        assert!(err.expected.contains("Active, Prospect"));
    }

    #[test]
    fn missing_options_are_appended_in_encounter_order() {
        let mut c = Coercer::new(true);
        let kind = PropertyKind::MultiSelect {
            options: vec![SelectOption::named("a")],
        };
        c.coerce("Tags", &json!(["c", "a", "b"]), &kind).unwrap();
        c.coerce("Tags", &json!("c"), &kind).unwrap();
        let added = c.added_options();
        assert_eq!(added.len(), 1);
        let names: Vec<&str> = added[0].1.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn failed_record_forgets_its_invented_options() {
        let mut c = Coercer::new(true);
        let status = select(&["Active"]);
        let flag = PropertyKind::Checkbox;
        let fields = vec![
            ("Status".to_string(), json!("New")),
            ("Vip".to_string(), json!("yes")),
        ];
        let err = c
            .coerce_record(&fields, |name| match name {
                "Status" => Some(&status),
                "Vip" => Some(&flag),
                _ => None,
            })
            .unwrap_err();
        assert_eq!(err.property, "Vip");
        assert!(c.added_options().is_empty());
    }

    #[test]
    fn unknown_property_is_a_coercion_error() {
        let mut c = Coercer::new(false);
        let fields = vec![("Nope".to_string(), json!("x"))];
        let err = c.coerce_record(&fields, |_| None).unwrap_err();
        assert_eq!(err.property, "Nope");
    }

    #[test]
    fn number_requires_numeric_value() {
        let mut c = Coercer::new(false);
        let kind = PropertyKind::Number {
            format: Some("dollar".into()),
        };
        assert_eq!(
            c.coerce("Price", &json!(12.5), &kind).unwrap(),
            PropertyValue::Number(12.5)
        );
        assert!(c.coerce("Price", &json!("12.5"), &kind).is_err());
    }

    #[test]
    fn checkbox_requires_boolean() {
        let mut c = Coercer::new(false);
        assert!(c.coerce("Done", &json!("true"), &PropertyKind::Checkbox).is_err());
        assert_eq!(
            c.coerce("Done", &json!(true), &PropertyKind::Checkbox).unwrap(),
            PropertyValue::Checkbox(true)
        );
    }

    #[test]
    fn dates_accept_strings_and_ranges() {
        let mut c = Coercer::new(false);
        assert_eq!(
            c.coerce("Due", &json!("2024-03-01"), &PropertyKind::Date).unwrap(),
            PropertyValue::Date(DateValue {
                start: "2024-03-01".into(),
                end: None
            })
        );
        let v = c
            .coerce(
                "Span",
                &json!({"start": "2024-03-01T10:00:00Z", "end": "2024-03-02T10:00:00.000+00:00"}),
                &PropertyKind::Date,
            )
            .unwrap();
        assert_eq!(
            v,
            PropertyValue::Date(DateValue {
                start: "2024-03-01T10:00:00+00:00".into(),
                end: Some("2024-03-02T10:00:00+00:00".into()),
            })
        );
        assert!(c.coerce("Due", &json!("March 1st"), &PropertyKind::Date).is_err());
    }

    #[test]
    fn datetimes_without_offset_are_read_as_utc() {
        assert_eq!(
            normalize_date("2024-01-02T10:00:00").as_deref(),
            Some("2024-01-02T10:00:00+00:00")
        );
        assert_eq!(
            normalize_date("2024-01-02T10:00").as_deref(),
            Some("2024-01-02T10:00:00+00:00")
        );
        assert_eq!(
            normalize_date("2024-01-02T10:00:00"),
            normalize_date("2024-01-02T10:00:00.000+00:00")
        );
    }

    #[test]
    fn files_accept_url_or_list() {
        let mut c = Coercer::new(false);
        let v = c
            .coerce(
                "Docs",
                &json!(["https://a/x.pdf", {"url": "https://a/y.pdf", "name": "Y"}]),
                &PropertyKind::Files,
            )
            .unwrap();
        assert_eq!(
            v,
            PropertyValue::Files(vec![
                FileRef {
                    url: "https://a/x.pdf".into(),
                    name: "https://a/x.pdf".into()
                },
                FileRef {
                    url: "https://a/y.pdf".into(),
                    name: "Y".into()
                },
            ])
        );
    }

    #[test]
    fn relation_values_are_rejected_explicitly() {
        let mut c = Coercer::new(false);
        let kind = PropertyKind::Relation {
            database_id: "db".into(),
            synced_property_name: None,
        };
        let err = c.coerce("Customer", &json!("cust-1"), &kind).unwrap_err();
        assert!(err.expected.contains("not supported"));
    }
}
