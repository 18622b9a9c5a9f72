/// Minimal tabular data model for retrieved observation/prediction/threshold
/// data.
///
/// Retrieved documents and tables are flattened into frames of rows with
/// named columns. The evaluator only needs three relational operations —
/// concatenation, inner joins with collision suffixing, and group-by — so
/// the model stays deliberately small rather than pulling in a dataframe
/// library.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// A single cell value.
///
/// `Day` is a calendar day-of-year key ("M/D", no zero padding) used to
/// match threshold series against timestamped rows.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Day(String),
    Null,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Day(day) => Some(day),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Stable string rendering used for join and grouping keys.
    pub fn key_string(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", *value as i64)
                } else {
                    format!("{}", value)
                }
            }
            FieldValue::Timestamp(at) => at.to_rfc3339(),
            FieldValue::Day(day) => day.clone(),
            FieldValue::Null => String::new(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_string())
    }
}

impl From<&serde_json::Value> for FieldValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(flag) => FieldValue::Text(flag.to_string()),
            serde_json::Value::Number(number) => {
                FieldValue::Number(number.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(text) => FieldValue::Text(text.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Datatype coercion
// ---------------------------------------------------------------------------

/// Parse a timestamp in the handful of layouts the data sources use.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();

    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(at.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    None
}

/// Render a day-of-year key from a timestamp: "M/D" without zero padding.
pub fn day_key(at: &DateTime<Utc>) -> String {
    use chrono::Datelike;
    format!("{}/{}", at.month(), at.day())
}

/// Combine one or more raw values into a single value of the requested
/// datatype. Multiple inputs are only meaningful for `day` (month + day
/// columns combined into one key).
pub fn combine_to_datatype(values: &[FieldValue], datatype: &str) -> Result<FieldValue, String> {
    let datatype = datatype.trim().to_lowercase();
    match datatype.as_str() {
        "day" => to_day(values),
        _ => {
            let value = values
                .first()
                .ok_or_else(|| "no values supplied for conversion".to_string())?;
            coerce(value.clone(), &datatype)
        }
    }
}

fn to_day(values: &[FieldValue]) -> Result<FieldValue, String> {
    match values {
        [single] => match single {
            FieldValue::Timestamp(at) => Ok(FieldValue::Day(day_key(at))),
            FieldValue::Day(day) => Ok(FieldValue::Day(day.clone())),
            FieldValue::Text(text) => {
                if let Some(at) = parse_timestamp(text) {
                    Ok(FieldValue::Day(day_key(&at)))
                } else if text.contains('/') {
                    // Already an "M/D" key; renormalize to strip zero padding.
                    let mut parts = text.splitn(2, '/');
                    let month: u32 = parts
                        .next()
                        .and_then(|p| p.trim().parse().ok())
                        .ok_or_else(|| format!("'{}' is not a day key", text))?;
                    let day: u32 = parts
                        .next()
                        .and_then(|p| p.trim().parse().ok())
                        .ok_or_else(|| format!("'{}' is not a day key", text))?;
                    Ok(FieldValue::Day(format!("{}/{}", month, day)))
                } else {
                    Err(format!("'{}' cannot be converted to a day", text))
                }
            }
            other => Err(format!("'{}' cannot be converted to a day", other)),
        },
        [month, day] => {
            let month = month
                .as_number()
                .ok_or_else(|| format!("'{}' is not a month number", month))?;
            let day = day
                .as_number()
                .ok_or_else(|| format!("'{}' is not a day number", day))?;
            Ok(FieldValue::Day(format!(
                "{}/{}",
                month as u32, day as u32
            )))
        }
        other => Err(format!(
            "cannot build a day value from {} fields",
            other.len()
        )),
    }
}

/// Coerce a single value to the requested datatype.
pub fn coerce(value: FieldValue, datatype: &str) -> Result<FieldValue, String> {
    match datatype.trim().to_lowercase().as_str() {
        "" | "string" | "str" | "text" => Ok(match value {
            FieldValue::Text(text) => FieldValue::Text(text),
            other => FieldValue::Text(other.key_string()),
        }),
        "float" | "int" | "integer" | "number" => value
            .as_number()
            .map(FieldValue::Number)
            .ok_or_else(|| format!("'{}' is not numeric", value)),
        "datetime" | "date" => match value {
            FieldValue::Timestamp(at) => Ok(FieldValue::Timestamp(at)),
            FieldValue::Text(text) => parse_timestamp(&text)
                .map(FieldValue::Timestamp)
                .ok_or_else(|| format!("'{}' is not a datetime", text)),
            other => Err(format!("'{}' is not a datetime", other)),
        },
        "day" => to_day(std::slice::from_ref(&value)),
        unknown => Err(format!("'{}' is not a supported datatype", unknown)),
    }
}

// ---------------------------------------------------------------------------
// Rows and frames
// ---------------------------------------------------------------------------

/// One row of named cell values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(value) = self.values.remove(from) {
            self.values.insert(to.to_string(), value);
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<FieldValue> {
        self.values.remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }
}

/// A sequence of rows sharing (mostly) the same columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    rows: Vec<Row>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    /// Concatenate another frame onto this one.
    pub fn extend(&mut self, other: Frame) {
        self.rows.extend(other.rows);
    }

    /// The union of column names across all rows.
    pub fn columns(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for row in &self.rows {
            for column in row.columns() {
                seen.insert(column.to_string());
            }
        }
        seen.into_iter().collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|row| row.contains(column))
    }

    pub fn column_values(&self, column: &str) -> Vec<FieldValue> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(FieldValue::Null))
            .collect()
    }

    /// Inner join on the given key columns. The joined rows keep the left
    /// side's key column names; colliding non-key columns are disambiguated
    /// with the supplied suffixes instead of silently overwriting.
    pub fn inner_join(
        &self,
        right: &Frame,
        left_keys: &[&str],
        right_keys: &[&str],
        left_suffix: &str,
        right_suffix: &str,
    ) -> Frame {
        assert_eq!(
            left_keys.len(),
            right_keys.len(),
            "join key lists must be the same length"
        );

        // Non-key columns present on both sides get suffixed.
        let right_key_set: std::collections::BTreeSet<&str> = right_keys.iter().copied().collect();
        let left_key_set: std::collections::BTreeSet<&str> = left_keys.iter().copied().collect();
        let shared: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| !left_key_set.contains(c.as_str()))
            .filter(|c| {
                right
                    .columns()
                    .iter()
                    .any(|rc| rc == c && !right_key_set.contains(rc.as_str()))
            })
            .collect();

        let mut index: BTreeMap<Vec<String>, Vec<&Row>> = BTreeMap::new();
        for row in &right.rows {
            if let Some(key) = join_key(row, right_keys) {
                index.entry(key).or_default().push(row);
            }
        }

        let mut joined = Frame::new();
        for left_row in &self.rows {
            let Some(key) = join_key(left_row, left_keys) else {
                continue;
            };
            let Some(matches) = index.get(&key) else {
                continue;
            };
            for right_row in matches {
                let mut merged = left_row.clone();
                for column in &shared {
                    merged.rename(column, &format!("{}{}", column, left_suffix));
                }
                for (column, value) in &right_row.values {
                    if right_key_set.contains(column.as_str()) {
                        continue;
                    }
                    if shared.iter().any(|c| c == column) {
                        merged.set(format!("{}{}", column, right_suffix), value.clone());
                    } else {
                        merged.set(column.clone(), value.clone());
                    }
                }
                joined.push(merged);
            }
        }

        joined
    }

    /// Group rows by the key columns, preserving first-seen group order.
    pub fn group_by(&self, keys: &[&str]) -> Vec<(Vec<String>, Frame)> {
        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: BTreeMap<Vec<String>, Frame> = BTreeMap::new();

        for row in &self.rows {
            let Some(key) = join_key(row, keys) else {
                continue;
            };
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(row.clone());
        }

        order
            .into_iter()
            .map(|key| {
                let frame = groups.remove(&key).unwrap_or_default();
                (key, frame)
            })
            .collect()
    }
}

fn join_key(row: &Row, keys: &[&str]) -> Option<Vec<String>> {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let value = row.get(key)?;
        if value.is_null() {
            return None;
        }
        parts.push(value.key_string());
    }
    Some(parts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> Row {
        let mut row = Row::new();
        for (column, value) in pairs {
            row.set(*column, value.clone());
        }
        row
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    #[test]
    fn test_inner_join_suffixes_colliding_columns() {
        let mut observations = Frame::new();
        observations.push(row(&[
            ("site", text("0214")),
            ("value", FieldValue::Number(12.0)),
            ("unit", text("ft^3/s")),
        ]));

        let mut predictions = Frame::new();
        predictions.push(row(&[
            ("site", text("0214")),
            ("value", FieldValue::Number(0.4)),
            ("unit", text("m^3/s")),
        ]));

        let joined = observations.inner_join(
            &predictions,
            &["site"],
            &["site"],
            "_observation",
            "_prediction",
        );

        assert_eq!(joined.len(), 1);
        let merged = &joined.rows()[0];
        assert_eq!(merged.get("site"), Some(&text("0214")));
        assert_eq!(
            merged.get("value_observation"),
            Some(&FieldValue::Number(12.0))
        );
        assert_eq!(
            merged.get("value_prediction"),
            Some(&FieldValue::Number(0.4))
        );
        assert_eq!(merged.get("unit_observation"), Some(&text("ft^3/s")));
        assert_eq!(merged.get("unit_prediction"), Some(&text("m^3/s")));
        assert!(
            merged.get("value").is_none(),
            "colliding column must never survive unsuffixed"
        );
    }

    #[test]
    fn test_inner_join_drops_unmatched_rows() {
        let mut left = Frame::new();
        left.push(row(&[("site", text("a"))]));
        left.push(row(&[("site", text("b"))]));

        let mut right = Frame::new();
        right.push(row(&[("site", text("b")), ("extra", text("x"))]));

        let joined = left.inner_join(&right, &["site"], &["site"], "_l", "_r");
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.rows()[0].get("site"), Some(&text("b")));
        assert_eq!(joined.rows()[0].get("extra"), Some(&text("x")));
    }

    #[test]
    fn test_join_keeps_left_key_name_when_names_differ() {
        let mut left = Frame::new();
        left.push(row(&[("observed_location", text("a"))]));

        let mut right = Frame::new();
        right.push(row(&[("location", text("a")), ("value", text("1"))]));

        let joined = left.inner_join(
            &right,
            &["observed_location"],
            &["location"],
            "_l",
            "_r",
        );
        assert_eq!(joined.len(), 1);
        assert!(joined.rows()[0].contains("observed_location"));
        assert!(!joined.rows()[0].contains("location"));
    }

    #[test]
    fn test_group_by_preserves_first_seen_order() {
        let mut frame = Frame::new();
        frame.push(row(&[("site", text("kingston")), ("value", text("1"))]));
        frame.push(row(&[("site", text("henry")), ("value", text("2"))]));
        frame.push(row(&[("site", text("kingston")), ("value", text("3"))]));

        let groups = frame.group_by(&["site"]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec!["kingston".to_string()]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, vec!["henry".to_string()]);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_day_from_month_and_day_columns() {
        let combined = combine_to_datatype(
            &[FieldValue::Number(4.0), FieldValue::Number(15.0)],
            "day",
        )
        .expect("month+day should combine");
        assert_eq!(combined, FieldValue::Day("4/15".to_string()));
    }

    #[test]
    fn test_day_from_timestamp() {
        let at = parse_timestamp("2024-04-15T12:30:00Z").expect("should parse");
        let combined = combine_to_datatype(&[FieldValue::Timestamp(at)], "day")
            .expect("timestamp should convert");
        assert_eq!(combined, FieldValue::Day("4/15".to_string()));
    }

    #[test]
    fn test_day_key_strips_zero_padding() {
        let combined = combine_to_datatype(&[text("04/05")], "day").expect("should renormalize");
        assert_eq!(combined, FieldValue::Day("4/5".to_string()));
    }

    #[test]
    fn test_numeric_string_coercion() {
        let coerced = coerce(text("42.5"), "float").expect("numeric string should coerce");
        assert_eq!(coerced, FieldValue::Number(42.5));
        assert!(coerce(text("not-a-number"), "float").is_err());
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        assert!(parse_timestamp("2024-05-01T12:00:00.000-05:00").is_some());
        assert!(parse_timestamp("2024-05-01 12:00").is_some());
        assert!(parse_timestamp("2024-05-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
