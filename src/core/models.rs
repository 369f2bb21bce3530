//! 进程记录数据模型
//!
//! A [`ProcessRecord`] is one observed process-creation fact seen from three
//! perspectives, using ASIM (Advanced Security Information Model) field names:
//!
//! ```text
//!     grandparent.exe (PID: 100)        # ParentProcess*
//!             |
//!     parent.exe (PID: 200)             # ActingProcess*
//!             |
//!     current_process.exe (PID: 300)    # TargetProcess*
//! ```

use crate::error::{errors::validation_error, ProcessTreeError, ProcessTreeResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Process id used when an ancestor is unknown
pub const MISSING_PROCESS_ID: i64 = -1;
/// Filename used when an ancestor is unknown
pub const MISSING_FILE_NAME: &str = "MISSING";
/// Creation time used when an ancestor is unknown
pub const MISSING_CREATION_TIME: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;
/// Identifier of the synthetic root node every tree owns
pub const ROOT_IDENTIFIER: &str = "<root>";

/// 数值超过该值时按毫秒解释
const MILLIS_THRESHOLD: f64 = 2e10;

/// Wire names of the three fields that make up one perspective.
struct FieldNames {
    id: &'static str,
    filename: &'static str,
    creation_time: &'static str,
}

const TARGET_FIELDS: FieldNames = FieldNames {
    id: "TargetProcessId",
    filename: "TargetProcessFilename",
    creation_time: "TargetProcessCreationTime",
};

const ACTING_FIELDS: FieldNames = FieldNames {
    id: "ActingProcessId",
    filename: "ActingProcessFilename",
    creation_time: "ActingProcessCreationTime",
};

const PARENT_FIELDS: FieldNames = FieldNames {
    id: "ParentProcessId",
    filename: "ParentProcessFilename",
    creation_time: "ParentProcessCreationTime",
};

/// One process instance: id, image filename and creation time.
///
/// The (id, creation time) pair is what makes a process unique, because the
/// operating system recycles ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub process_id: i64,
    pub filename: String,
    pub creation_time: DateTime<Utc>,
}

impl ProcessIdentity {
    pub fn new(process_id: i64, filename: impl Into<String>, creation_time: DateTime<Utc>) -> Self {
        Self {
            process_id,
            filename: filename.into(),
            creation_time,
        }
    }

    /// The sentinel identity standing for "no ancestor known"
    pub fn missing() -> Self {
        Self::new(MISSING_PROCESS_ID, MISSING_FILE_NAME, MISSING_CREATION_TIME)
    }

    pub fn is_missing(&self) -> bool {
        self.process_id == MISSING_PROCESS_ID
    }

    /// `"{id}|{creation time}"`
    pub fn identifier(&self) -> String {
        format!("{}|{}", self.process_id, format_timestamp(&self.creation_time))
    }

    /// `"{filename} ({id})"`
    pub fn tag(&self) -> String {
        format!("{} ({})", self.filename, self.process_id)
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// A process-creation event: the target process and, when known, its direct
/// parent (acting process) and grandparent (parent process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    target: ProcessIdentity,
    acting: ProcessIdentity,
    parent: ProcessIdentity,
}

impl ProcessRecord {
    /// A record with unknown ancestry
    pub fn new(
        target_process_id: i64,
        target_process_filename: impl Into<String>,
        target_process_creation_time: DateTime<Utc>,
    ) -> Self {
        Self::from_identity(ProcessIdentity::new(
            target_process_id,
            target_process_filename,
            target_process_creation_time,
        ))
    }

    pub fn from_identity(target: ProcessIdentity) -> Self {
        Self {
            target,
            acting: ProcessIdentity::missing(),
            parent: ProcessIdentity::missing(),
        }
    }

    pub fn with_acting(mut self, acting: ProcessIdentity) -> Self {
        self.acting = acting;
        self
    }

    pub fn with_parent(mut self, parent: ProcessIdentity) -> Self {
        self.parent = parent;
        self
    }

    /// Build a record from a loosely-typed mapping.
    ///
    /// Keys are matched ignoring ASCII case, `_`, `-` and spaces, so
    /// `TargetProcessId`, `target_process_id` and `TARGET-PROCESS-ID` all hit
    /// the same field. Unknown keys are ignored.
    pub fn from_map(map: &Map<String, Value>) -> ProcessTreeResult<Self> {
        let lookup = FieldLookup::new(map);

        let target = ProcessIdentity {
            process_id: coerce_process_id(TARGET_FIELDS.id, lookup.require(TARGET_FIELDS.id)?)?,
            filename: coerce_filename(
                TARGET_FIELDS.filename,
                lookup.require(TARGET_FIELDS.filename)?,
            )?,
            creation_time: coerce_timestamp(
                TARGET_FIELDS.creation_time,
                lookup.require(TARGET_FIELDS.creation_time)?,
            )?,
        };

        Ok(Self {
            target,
            acting: lookup.ancestor(&ACTING_FIELDS)?,
            parent: lookup.ancestor(&PARENT_FIELDS)?,
        })
    }

    pub fn target(&self) -> &ProcessIdentity {
        &self.target
    }

    pub fn acting(&self) -> &ProcessIdentity {
        &self.acting
    }

    pub fn parent(&self) -> &ProcessIdentity {
        &self.parent
    }

    pub fn target_process_id(&self) -> i64 {
        self.target.process_id
    }

    pub fn acting_process_id(&self) -> i64 {
        self.acting.process_id
    }

    pub fn parent_process_id(&self) -> i64 {
        self.parent.process_id
    }

    /// False for placeholder records, whose direct parent is unknown
    pub fn has_known_ancestry(&self) -> bool {
        !self.acting.is_missing()
    }

    pub fn identifier(&self) -> String {
        self.target.identifier()
    }

    /// Identifier of the acting process, or [`ROOT_IDENTIFIER`] when it is unknown
    pub fn parent_identifier(&self) -> String {
        if self.acting.is_missing() {
            return ROOT_IDENTIFIER.to_string();
        }
        self.acting.identifier()
    }

    pub fn tag(&self) -> String {
        self.target.tag()
    }

    /// The grandparent as a record of its own, ancestry unknown
    pub fn grandparent_record(&self) -> ProcessRecord {
        ProcessRecord::from_identity(self.parent.clone())
    }

    /// The acting process as a record of its own, parented by the grandparent.
    ///
    /// When both ancestors resolve to the same identity (reboot records
    /// carry id 0 with no name or time for both) the grandparent is dropped,
    /// since a process cannot be its own parent.
    pub fn acting_record(&self) -> ProcessRecord {
        let acting = ProcessRecord::from_identity(self.acting.clone());
        if self.acting.identifier() == self.parent.identifier() {
            return acting;
        }
        acting.with_acting(self.parent.clone())
    }
}

impl TryFrom<&Map<String, Value>> for ProcessRecord {
    type Error = ProcessTreeError;

    fn try_from(map: &Map<String, Value>) -> Result<Self, Self::Error> {
        ProcessRecord::from_map(map)
    }
}

impl TryFrom<&Value> for ProcessRecord {
    type Error = ProcessTreeError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => ProcessRecord::from_map(map),
            other => Err(validation_error(
                "<record>",
                format!("expected an object, got {}", json_type_name(other)),
                None,
            )),
        }
    }
}

/// Flat PascalCase view used on the wire
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireRecord<'a> {
    target_process_id: i64,
    target_process_filename: &'a str,
    target_process_creation_time: &'a DateTime<Utc>,
    acting_process_id: i64,
    acting_process_filename: &'a str,
    acting_process_creation_time: &'a DateTime<Utc>,
    parent_process_id: i64,
    parent_process_filename: &'a str,
    parent_process_creation_time: &'a DateTime<Utc>,
}

impl Serialize for ProcessRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRecord {
            target_process_id: self.target.process_id,
            target_process_filename: &self.target.filename,
            target_process_creation_time: &self.target.creation_time,
            acting_process_id: self.acting.process_id,
            acting_process_filename: &self.acting.filename,
            acting_process_creation_time: &self.acting.creation_time,
            parent_process_id: self.parent.process_id,
            parent_process_filename: &self.parent.filename,
            parent_process_creation_time: &self.parent.creation_time,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProcessRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        ProcessRecord::from_map(&map).map_err(de::Error::custom)
    }
}

/// Canonical rendering of creation times inside identifiers
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a timestamp with the same rules used for record fields
pub fn parse_timestamp(text: &str) -> ProcessTreeResult<DateTime<Utc>> {
    coerce_timestamp("timestamp", &Value::String(text.to_string()))
}

/// Case and separator insensitive view over an input mapping
struct FieldLookup<'a> {
    fields: HashMap<String, &'a Value>,
}

impl<'a> FieldLookup<'a> {
    fn new(map: &'a Map<String, Value>) -> Self {
        let mut fields = HashMap::with_capacity(map.len());
        for (key, value) in map {
            fields.entry(normalize_key(key)).or_insert(value);
        }
        Self { fields }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(&normalize_key(field)).copied()
    }

    fn require(&self, field: &str) -> ProcessTreeResult<&'a Value> {
        match self.get(field) {
            None => Err(validation_error(field, "field required", None)),
            Some(Value::Null) => Err(validation_error(field, "field required, got null", None)),
            Some(value) => Ok(value),
        }
    }

    /// Read an optional ancestor triple.
    ///
    /// An absent or null id means the ancestor is unknown. A present id with a
    /// null filename or unusable time (seen after a reboot, with id 0) is kept
    /// as a real but low-information ancestor.
    fn ancestor(&self, names: &FieldNames) -> ProcessTreeResult<ProcessIdentity> {
        let process_id = match self.get(names.id) {
            None | Some(Value::Null) => return Ok(ProcessIdentity::missing()),
            Some(value) => coerce_process_id(names.id, value)?,
        };

        let filename = match self.get(names.filename) {
            None => MISSING_FILE_NAME.to_string(),
            Some(Value::String(filename)) => filename.clone(),
            Some(other) => {
                tracing::debug!(
                    field = names.filename,
                    process_id,
                    value = %other,
                    "ancestor filename unusable, keeping ancestor with empty name"
                );
                String::new()
            }
        };

        let creation_time = match self.get(names.creation_time) {
            None => MISSING_CREATION_TIME,
            Some(value) => coerce_timestamp(names.creation_time, value).unwrap_or_else(|_| {
                tracing::debug!(
                    field = names.creation_time,
                    process_id,
                    value = %value,
                    "ancestor creation time unusable, falling back to epoch"
                );
                MISSING_CREATION_TIME
            }),
        };

        Ok(ProcessIdentity {
            process_id,
            filename,
            creation_time,
        })
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn coerce_process_id(field: &str, value: &Value) -> ProcessTreeResult<i64> {
    let invalid = || {
        validation_error(
            field,
            format!("expected an integer, got {}", json_type_name(value)),
            Some(value.to_string()),
        )
    };

    match value {
        Value::Number(number) => {
            if let Some(id) = number.as_i64() {
                return Ok(id);
            }
            match number.as_f64() {
                Some(float)
                    if float.fract() == 0.0
                        && float >= i64::MIN as f64
                        && float <= i64::MAX as f64 =>
                {
                    Ok(float as i64)
                }
                _ => Err(invalid()),
            }
        }
        Value::String(text) => text.trim().parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn coerce_filename(field: &str, value: &Value) -> ProcessTreeResult<String> {
    match value {
        Value::String(filename) => Ok(filename.clone()),
        other => Err(validation_error(
            field,
            format!("expected a string, got {}", json_type_name(other)),
            Some(other.to_string()),
        )),
    }
}

fn coerce_timestamp(field: &str, value: &Value) -> ProcessTreeResult<DateTime<Utc>> {
    let parsed = match value {
        Value::Number(number) => number
            .as_i64()
            .and_then(timestamp_from_int)
            .or_else(|| number.as_f64().and_then(timestamp_from_float)),
        Value::String(text) => parse_timestamp_str(text.trim()),
        _ => None,
    };

    parsed.ok_or_else(|| {
        validation_error(
            field,
            format!("expected a datetime, got {}", json_type_name(value)),
            Some(value.to_string()),
        )
    })
}

fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(seconds) = text.parse::<i64>() {
        return timestamp_from_int(seconds);
    }
    text.parse::<f64>().ok().and_then(timestamp_from_float)
}

fn timestamp_from_int(value: i64) -> Option<DateTime<Utc>> {
    if (value as f64).abs() > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

fn timestamp_from_float(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let seconds = if value.abs() > MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).expect("valid timestamp")
    }

    #[test]
    fn identity_helpers_follow_documented_formats() {
        let record = ProcessRecord::new(5, "child.exe", ts(100))
            .with_acting(ProcessIdentity::new(3, "shell.exe", ts(50)));

        assert_eq!(record.identifier(), "5|1970-01-01T00:01:40Z");
        assert_eq!(record.parent_identifier(), "3|1970-01-01T00:00:50Z");
        assert_eq!(record.tag(), "child.exe (5)");
        assert!(record.has_known_ancestry());
    }

    #[test]
    fn missing_acting_process_points_at_root() {
        let record = ProcessRecord::new(5, "child.exe", ts(100));
        assert_eq!(record.parent_identifier(), ROOT_IDENTIFIER);
        assert!(!record.has_known_ancestry());
        assert_eq!(record.acting(), &ProcessIdentity::missing());
        assert_eq!(record.parent().filename, MISSING_FILE_NAME);
        assert_eq!(record.parent().creation_time, MISSING_CREATION_TIME);
    }

    #[test]
    fn from_map_accepts_mixed_key_conventions_and_ignores_extras() {
        let record = ProcessRecord::from_map(&map(json!({
            "TargetProcessId": 5,
            "target_process_filename": "child.exe",
            "TARGET-PROCESS-CREATION-TIME": "2024-03-01T10:00:00Z",
            "actingprocessid": 3,
            "ActingProcessFilename": "shell.exe",
            "ActingProcessCreationTime": "2024-03-01T09:00:00Z",
            "DeviceName": "workstation-7",
            "ReportId": 991
        })))
        .expect("record should validate");

        assert_eq!(record.target_process_id(), 5);
        assert_eq!(record.target().filename, "child.exe");
        assert_eq!(record.identifier(), "5|2024-03-01T10:00:00Z");
        assert_eq!(record.parent_identifier(), "3|2024-03-01T09:00:00Z");
        assert!(record.parent().is_missing());
    }

    #[test_case("TargetProcessId" ; "missing target id")]
    #[test_case("TargetProcessFilename" ; "missing target filename")]
    #[test_case("TargetProcessCreationTime" ; "missing target time")]
    fn from_map_reports_missing_required_field(field: &str) {
        let mut input = map(json!({
            "TargetProcessId": 5,
            "TargetProcessFilename": "child.exe",
            "TargetProcessCreationTime": 100
        }));
        input.remove(field);

        let err = ProcessRecord::from_map(&input).expect_err("must fail");
        assert_eq!(err.field(), Some(field));
    }

    #[test_case(json!("five"), "TargetProcessId" ; "non numeric id")]
    #[test_case(json!(5.5), "TargetProcessId" ; "fractional id")]
    #[test_case(json!(null), "TargetProcessId" ; "null id")]
    fn from_map_rejects_untypeable_target_id(id: Value, field: &str) {
        let input = map(json!({
            "TargetProcessId": id,
            "TargetProcessFilename": "child.exe",
            "TargetProcessCreationTime": 100
        }));
        let err = ProcessRecord::from_map(&input).expect_err("must fail");
        assert_eq!(err.field(), Some(field));
    }

    #[test]
    fn from_map_rejects_non_string_filename() {
        let input = map(json!({
            "TargetProcessId": 5,
            "TargetProcessFilename": 42,
            "TargetProcessCreationTime": 100
        }));
        let err = ProcessRecord::from_map(&input).expect_err("must fail");
        assert_eq!(err.field(), Some("TargetProcessFilename"));
    }

    #[test_case(json!(100), "1970-01-01T00:01:40Z" ; "integer seconds")]
    #[test_case(json!(100.5), "1970-01-01T00:01:40.500Z" ; "float seconds")]
    #[test_case(json!(1_709_287_200_000_i64), "2024-03-01T10:00:00Z" ; "integer millis")]
    #[test_case(json!("1700000000"), "2023-11-14T22:13:20Z" ; "numeric string")]
    #[test_case(json!("2024-03-01 10:00:00"), "2024-03-01T10:00:00Z" ; "naive space separated")]
    #[test_case(json!("2024-03-01T10:00:00.250"), "2024-03-01T10:00:00.250Z" ; "naive fractional")]
    #[test_case(json!("2024-03-01T12:00:00+02:00"), "2024-03-01T10:00:00Z" ; "offset normalized")]
    #[test_case(json!("2024-03-01"), "2024-03-01T00:00:00Z" ; "date only")]
    fn timestamps_are_coerced(value: Value, rendered: &str) {
        let parsed = coerce_timestamp("TargetProcessCreationTime", &value).expect("coerces");
        assert_eq!(format_timestamp(&parsed), rendered);
    }

    #[test]
    fn numeric_id_strings_and_whole_floats_are_accepted() {
        assert_eq!(coerce_process_id("x", &json!("  42 ")).ok(), Some(42));
        assert_eq!(coerce_process_id("x", &json!(42.0)).ok(), Some(42));
        assert!(coerce_process_id("x", &json!(true)).is_err());
    }

    #[test]
    fn reboot_ancestor_is_kept_not_treated_as_missing() {
        let record = ProcessRecord::from_map(&map(json!({
            "TargetProcessId": 4,
            "TargetProcessFilename": "System",
            "TargetProcessCreationTime": 10,
            "ActingProcessId": 0,
            "ActingProcessFilename": null,
            "ActingProcessCreationTime": "not-a-date"
        })))
        .expect("reboot record should validate");

        assert!(record.has_known_ancestry());
        assert_eq!(record.acting_process_id(), 0);
        assert_eq!(record.acting().filename, "");
        assert_eq!(record.parent_identifier(), "0|1970-01-01T00:00:00Z");
    }

    #[test]
    fn null_ancestor_id_means_unknown() {
        let record = ProcessRecord::from_map(&map(json!({
            "TargetProcessId": 4,
            "TargetProcessFilename": "a.exe",
            "TargetProcessCreationTime": 10,
            "ParentProcessId": null,
            "ParentProcessFilename": "ignored.exe"
        })))
        .expect("validates");
        assert!(record.parent().is_missing());
        assert_eq!(record.parent().filename, MISSING_FILE_NAME);
    }

    #[test]
    fn non_integer_ancestor_id_is_rejected() {
        let err = ProcessRecord::from_map(&map(json!({
            "TargetProcessId": 4,
            "TargetProcessFilename": "a.exe",
            "TargetProcessCreationTime": 10,
            "ParentProcessId": "pid-one"
        })))
        .expect_err("must fail");
        assert_eq!(err.field(), Some("ParentProcessId"));
    }

    #[test]
    fn stub_records_shift_perspectives() {
        let record = ProcessRecord::new(5, "child.exe", ts(100))
            .with_acting(ProcessIdentity::new(3, "shell.exe", ts(50)))
            .with_parent(ProcessIdentity::new(1, "init.exe", ts(10)));

        let grandparent = record.grandparent_record();
        assert_eq!(grandparent.identifier(), "1|1970-01-01T00:00:10Z");
        assert!(!grandparent.has_known_ancestry());

        let acting = record.acting_record();
        assert_eq!(acting.identifier(), "3|1970-01-01T00:00:50Z");
        assert_eq!(acting.parent_identifier(), grandparent.identifier());
        assert!(acting.parent().is_missing());
    }

    #[test]
    fn acting_record_never_parents_itself() {
        let reboot = ProcessIdentity::new(0, "", MISSING_CREATION_TIME);
        let record = ProcessRecord::new(4, "System", ts(10))
            .with_acting(reboot.clone())
            .with_parent(reboot);

        let acting = record.acting_record();
        assert_eq!(acting.identifier(), "0|1970-01-01T00:00:00Z");
        assert!(!acting.has_known_ancestry());
        assert_eq!(acting.parent_identifier(), ROOT_IDENTIFIER);
        assert_eq!(record.grandparent_record().identifier(), acting.identifier());
    }

    #[test]
    fn serde_round_trip_uses_pascal_case() {
        let record = ProcessRecord::new(5, "child.exe", ts(100))
            .with_acting(ProcessIdentity::new(3, "shell.exe", ts(50)));

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["TargetProcessId"], json!(5));
        assert_eq!(value["ActingProcessFilename"], json!("shell.exe"));
        assert_eq!(value["ParentProcessId"], json!(MISSING_PROCESS_ID));

        let restored: ProcessRecord = serde_json::from_value(value).expect("deserialize");
        assert_eq!(restored, record);
    }

    #[test]
    fn non_object_values_are_rejected() {
        let err = ProcessRecord::try_from(&json!([1, 2, 3])).expect_err("must fail");
        assert_eq!(err.field(), Some("<record>"));
    }
}
