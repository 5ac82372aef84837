//! Single-select checks against the live table schema.

use gradesync_core::{Fields, Result, SyncError, UnknownSelectValues};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};

/// Option preferred as the coercion target when a field defines it.
pub const FALLBACK_OPTION: &str = "Other";

/// What to do with values a select field does not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectPolicy {
    /// Stop the run before anything is written
    #[default]
    Abort,
    /// Rewrite unknown values to a fallback option
    Coerce,
}

impl SelectPolicy {
    pub fn from_flag(allow_fallback: bool) -> Self {
        if allow_fallback {
            SelectPolicy::Coerce
        } else {
            SelectPolicy::Abort
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectReport {
    /// Unknown values seen, per field
    pub unknown: BTreeMap<String, Vec<String>>,
    /// Row values rewritten under [`SelectPolicy::Coerce`]
    pub coerced: usize,
}

/// "Other" when offered, else the first option.
pub fn fallback_option(choices: &[String]) -> Option<&str> {
    choices
        .iter()
        .find(|c| c.as_str() == FALLBACK_OPTION)
        .or_else(|| choices.first())
        .map(String::as_str)
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_allowed(value: &Value, allowed: &HashSet<&str>) -> bool {
    matches!(value, Value::String(s) if allowed.contains(s.as_str()))
}

/// Distinct non-empty values per select field that its options do not list.
pub fn unknown_select_values(
    rows: &[Fields],
    options: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut unknown = BTreeMap::new();
    for (field, choices) in options {
        let allowed: HashSet<&str> = choices.iter().map(String::as_str).collect();
        let values: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| row.get(field))
            .filter(|v| !is_allowed(v, &allowed))
            .filter_map(display_value)
            .collect();
        if !values.is_empty() {
            unknown.insert(field.clone(), values.into_iter().collect());
        }
    }
    unknown
}

/// Check every select field of `rows` against `options`.
///
/// Under [`SelectPolicy::Abort`] any unknown value is a
/// [`SyncError::SchemaViolation`]. Under [`SelectPolicy::Coerce`] every
/// present, non-null value outside a field's options is replaced by
/// [`fallback_option`]; fields without options are left alone.
pub fn validate_selects(
    table: &str,
    rows: &mut [Fields],
    options: &BTreeMap<String, Vec<String>>,
    policy: SelectPolicy,
) -> Result<SelectReport> {
    if rows.is_empty() || options.is_empty() {
        return Ok(SelectReport::default());
    }

    let unknown = unknown_select_values(rows, options);
    if unknown.is_empty() {
        info!("{}: single select values OK", table);
        return Ok(SelectReport::default());
    }

    if policy == SelectPolicy::Abort {
        return Err(SyncError::SchemaViolation {
            table: table.to_string(),
            unknown: UnknownSelectValues(unknown),
        });
    }

    warn!("{}: coercing unknown single-select values", table);
    let mut coerced = 0;
    for (field, choices) in options {
        let Some(fallback) = fallback_option(choices) else {
            continue;
        };
        let allowed: HashSet<&str> = choices.iter().map(String::as_str).collect();
        let mut rewritten: BTreeMap<String, usize> = BTreeMap::new();
        for row in rows.iter_mut() {
            let Some(value) = row.get_mut(field) else {
                continue;
            };
            if value.is_null() || is_allowed(value, &allowed) {
                continue;
            }
            let shown = display_value(value).unwrap_or_default();
            *rewritten.entry(shown).or_default() += 1;
            *value = Value::String(fallback.to_string());
        }
        for (from, count) in &rewritten {
            warn!(
                "{}: field '{}': {} value(s) {:?} coerced to {:?}",
                table, field, count, from, fallback
            );
            coerced += count;
        }
    }

    Ok(SelectReport { unknown, coerced })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[Value]) -> Vec<Fields> {
        values
            .iter()
            .map(|v| {
                let mut f = Fields::new();
                f.insert("Status".into(), v.clone());
                f.insert("Name".into(), json!("x"));
                f
            })
            .collect()
    }

    fn status_options(choices: &[&str]) -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([(
            "Status".to_string(),
            choices.iter().map(|c| c.to_string()).collect(),
        )])
    }

    #[test]
    fn unknown_value_aborts_by_default() {
        let mut rows = rows(&[json!("A"), json!("C"), json!("C"), json!(null), json!("")]);
        let err = validate_selects("Details", &mut rows, &status_options(&["A", "B"]), SelectPolicy::Abort)
            .unwrap_err();
        match err {
            SyncError::SchemaViolation { table, unknown } => {
                assert_eq!(table, "Details");
                assert_eq!(unknown.0["Status"], vec!["C"]);
            }
            other => panic!("unexpected error {other}"),
        }
        // nothing was rewritten
        assert_eq!(rows[1]["Status"], json!("C"));
    }

    #[test]
    fn coercion_prefers_other() {
        let mut rows = rows(&[json!("C"), json!("B")]);
        let report = validate_selects(
            "Details",
            &mut rows,
            &status_options(&["A", "B", "Other"]),
            SelectPolicy::Coerce,
        )
        .unwrap();
        assert_eq!(report.coerced, 1);
        assert_eq!(rows[0]["Status"], json!("Other"));
        assert_eq!(rows[1]["Status"], json!("B"));
    }

    #[test]
    fn coercion_falls_back_to_first_option() {
        let mut rows = rows(&[json!("C")]);
        validate_selects("Details", &mut rows, &status_options(&["A", "B"]), SelectPolicy::Coerce)
            .unwrap();
        assert_eq!(rows[0]["Status"], json!("A"));
    }

    #[test]
    fn coercion_is_total() {
        let options = BTreeMap::from([
            ("Status".to_string(), vec!["A".to_string(), "B".to_string()]),
            ("Empty".to_string(), Vec::new()),
        ]);
        let mut rows = rows(&[json!("C"), json!(""), json!(7), json!("A"), json!(true)]);
        for row in rows.iter_mut() {
            row.insert("Empty".into(), json!("anything"));
        }
        validate_selects("Details", &mut rows, &options, SelectPolicy::Coerce).unwrap();

        for row in &rows {
            let status = row["Status"].as_str().unwrap();
            assert!(["A", "B"].contains(&status));
            // a field without options is never touched
            assert_eq!(row["Empty"], json!("anything"));
        }
    }

    #[test]
    fn clean_rows_pass_untouched() {
        let mut rows = rows(&[json!("A"), json!(null)]);
        let report =
            validate_selects("Details", &mut rows, &status_options(&["A"]), SelectPolicy::Abort).unwrap();
        assert_eq!(report, SelectReport::default());
    }

    #[test]
    fn non_string_values_are_unknown() {
        let unknown = unknown_select_values(&rows(&[json!(3)]), &status_options(&["3"]));
        assert_eq!(unknown["Status"], vec!["3"]);
    }
}
