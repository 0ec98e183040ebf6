//! Request bodies for the action endpoint and their validation.
//!
//! The dashboard posts form data straight through `JSON.stringify`, so numbers
//! often arrive as strings and optional fields as `""`. The deserializers in
//! [`lenient`] absorb that before validation turns the raw bodies into typed
//! inputs for the store.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::MachineStatus;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PostRequest {
    AddMachine {
        #[serde(default)]
        data: NewMachine,
    },
    AddHistory {
        #[serde(default)]
        data: NewHistory,
    },
    StartMaintenance {
        #[serde(default)]
        data: StartMaintenance,
    },
    BatchAddMachines {
        #[serde(default)]
        data: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PutRequest {
    UpdateField {
        #[serde(default, deserialize_with = "lenient::opt_text")]
        tag: Option<String>,
        #[serde(default, deserialize_with = "lenient::opt_text")]
        field: Option<String>,
        #[serde(default)]
        value: Value,
    },
    AddMaintStep {
        #[serde(default)]
        data: NewStep,
    },
    EndMaintenance {
        #[serde(default)]
        data: EndMaintenance,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeleteRequest {
    DeleteMachine {
        #[serde(default, deserialize_with = "lenient::opt_text")]
        tag: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Parses a request body, turning every decoding failure into a 400.
pub fn parse_body<T: DeserializeOwned>(body: &[u8], method: &str) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::validation(format!("Missing {} action.", method)));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::validation(format!("Invalid JSON body: {}", e)))?;
    if value.get("action").and_then(Value::as_str).is_none() {
        return Err(AppError::validation(format!("Missing {} action.", method)));
    }
    serde_json::from_value(value)
        .map_err(|e| AppError::validation(format!("Invalid {} request: {}", method, e)))
}

#[derive(Debug, Default, Deserialize)]
pub struct NewMachine {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub capacity: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub status: Option<String>,
}

/// A validated machine ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInput {
    pub tag: String,
    pub name: String,
    pub description: Option<String>,
    pub usage_hours: i64,
    pub status: MachineStatus,
}

impl NewMachine {
    pub fn validate(self) -> AppResult<MachineInput> {
        let (Some(tag), Some(name)) = (self.id, self.name) else {
            return Err(AppError::validation("Machine ID and name are required."));
        };
        let usage_hours = match self.quantity {
            Some(hours) => check_hours(hours)?,
            None => 1,
        };
        let status = match self.status {
            Some(s) => s.parse().map_err(AppError::Validation)?,
            None => MachineStatus::Ok,
        };
        Ok(MachineInput {
            tag,
            name,
            description: self.capacity,
            usage_hours,
            status,
        })
    }
}

fn check_hours(hours: i64) -> AppResult<i64> {
    if hours < 0 {
        return Err(AppError::validation("Usage hours must be zero or greater."));
    }
    Ok(hours)
}

/// One row of a spreadsheet import. Only `id` and `name` decide whether a row
/// is kept; the other cells are coerced to something storable.
#[derive(Debug, Default, Deserialize)]
struct BatchRow {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    capacity: Option<String>,
    #[serde(default)]
    quantity: Value,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    status: Option<String>,
}

impl BatchRow {
    fn into_input(self) -> Option<MachineInput> {
        let (tag, name) = (self.id?, self.name?);
        let usage_hours = match &self.quantity {
            Value::Null => 1,
            raw => match lenient::truncated(raw).filter(|hours| *hours >= 0) {
                Some(hours) => hours,
                None => {
                    tracing::warn!(%tag, quantity = %raw, "unreadable usage hours, using 1");
                    1
                }
            },
        };
        let status = match self.status {
            Some(raw) => raw.parse::<MachineStatus>().unwrap_or_else(|_| {
                tracing::warn!(%tag, status = %raw, "unknown status, using OK");
                MachineStatus::Ok
            }),
            None => MachineStatus::Ok,
        };
        Some(MachineInput {
            tag,
            name,
            description: self.capacity,
            usage_hours,
            status,
        })
    }
}

/// Splits a batch payload into rows worth importing. Rows without a tag or a
/// name are dropped and reported as skipped.
pub fn batch_rows(data: Value) -> AppResult<(Vec<MachineInput>, usize)> {
    let rows = match data {
        Value::Array(rows) if !rows.is_empty() => rows,
        _ => return Err(AppError::validation("No valid machine data provided.")),
    };

    let mut valid = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        let parsed = serde_json::from_value::<BatchRow>(row)
            .ok()
            .and_then(BatchRow::into_input);
        match parsed {
            Some(machine) => valid.push(machine),
            None => {
                tracing::debug!(row = index, "skipping batch row without tag or name");
                skipped += 1;
            }
        }
    }
    Ok((valid, skipped))
}

/// The next planned maintenance for a machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleInput {
    pub date: String,
    pub note: Option<String>,
}

/// Every field `update_field` may touch. Field names are resolved once, at the
/// edge; the store only ever sees one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Name(String),
    Description(Option<String>),
    UsageHours(i64),
    Status(MachineStatus),
    /// `None` clears the schedule.
    Schedule(Option<ScheduleInput>),
}

impl FieldUpdate {
    pub fn parse(field: &str, value: Value) -> AppResult<Self> {
        match field {
            "name" => {
                let name = lenient::text(&value)
                    .ok_or_else(|| AppError::validation("Machine name cannot be empty."))?;
                Ok(Self::Name(name))
            }
            "description" | "capacity" | "manufacturer" => Ok(Self::Description(lenient::text(&value))),
            "usage_hours" | "quantity" => {
                let hours = lenient::int(&value)
                    .ok_or_else(|| AppError::validation("Usage hours must be a whole number."))?;
                Ok(Self::UsageHours(check_hours(hours)?))
            }
            "status" => {
                let raw = lenient::text(&value)
                    .ok_or_else(|| AppError::validation("Status cannot be empty."))?;
                Ok(Self::Status(raw.parse().map_err(AppError::Validation)?))
            }
            "schedule" | "nextMaint" => Ok(Self::Schedule(parse_schedule(value)?)),
            other => Err(AppError::validation(format!(
                "Field '{}' is not allowed to be updated.",
                other
            ))),
        }
    }

    /// Field name as reported in logs and messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Description(_) => "description",
            Self::UsageHours(_) => "usage_hours",
            Self::Status(_) => "status",
            Self::Schedule(_) => "schedule",
        }
    }
}

/// The dashboard sends the schedule as a JSON-encoded string, `null`, or the
/// literal string `"null"`. Objects are accepted too.
fn parse_schedule(value: Value) -> AppResult<Option<ScheduleInput>> {
    let object = match value {
        Value::Null => return Ok(None),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "null" {
                return Ok(None);
            }
            serde_json::from_str::<Value>(s)
                .map_err(|e| AppError::validation(format!("Invalid schedule value: {}", e)))?
        }
        other => other,
    };

    let map = match object {
        Value::Object(map) => map,
        Value::Null => return Ok(None),
        _ => return Err(AppError::validation("Schedule must be an object with a date.")),
    };

    let Some(date) = map.get("date").and_then(lenient::text) else {
        return Ok(None);
    };
    Ok(Some(ScheduleInput {
        date: check_date(&date)?,
        note: map.get("desc").and_then(lenient::text),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct NewHistory {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub description: Option<String>,
}

impl NewHistory {
    pub fn validate(self) -> AppResult<(String, String)> {
        match (self.tag, self.description) {
            (Some(tag), Some(description)) => Ok((tag, description)),
            _ => Err(AppError::validation(
                "Machine tag and history description are required.",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartMaintenance {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub tag: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::opt_text")]
    pub service_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub desc: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub start_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub tecnico: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceInput {
    pub tag: String,
    pub service_type: String,
    pub description: Option<String>,
    pub start_date: String,
    pub technician: Option<String>,
}

impl StartMaintenance {
    pub fn validate(self) -> AppResult<MaintenanceInput> {
        let (Some(tag), Some(service_type)) = (self.tag, self.service_type) else {
            return Err(AppError::validation("Machine tag and maintenance type are required."));
        };
        let start_date = match self.start_date {
            Some(date) => check_date(&date)?,
            None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        };
        Ok(MaintenanceInput {
            tag,
            service_type,
            description: self.desc,
            start_date,
            technician: self.tecnico,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NewStep {
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub maint_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub description: Option<String>,
}

impl NewStep {
    pub fn validate(self) -> AppResult<(i64, String)> {
        match (self.maint_id, self.description) {
            (Some(id), Some(description)) => Ok((id, description)),
            _ => Err(AppError::validation(
                "Maintenance ID and step description are required.",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EndMaintenance {
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub tag: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_int")]
    pub maint_id: Option<i64>,
    #[serde(default)]
    pub cost: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseInput {
    pub tag: String,
    pub maintenance_id: i64,
    pub end_date: String,
    pub cost: Option<f64>,
}

impl EndMaintenance {
    pub fn validate(self) -> AppResult<CloseInput> {
        let (Some(tag), Some(end_date), Some(maintenance_id)) = (self.tag, self.end_date, self.maint_id)
        else {
            return Err(AppError::validation(
                "Machine tag, end date and maintenance ID are required.",
            ));
        };
        Ok(CloseInput {
            tag,
            maintenance_id,
            end_date: check_date(&end_date)?,
            cost: parse_cost(&self.cost),
        })
    }
}

/// Reads a cost typed with either decimal separator. Anything negative,
/// non-finite or unreadable means "no cost recorded".
pub fn parse_cost(raw: &Value) -> Option<f64> {
    let cost = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    (cost.is_finite() && cost >= 0.0).then_some(cost)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time. Returns the trimmed input.
pub fn check_date(raw: &str) -> AppResult<String> {
    let raw = raw.trim();
    let is_date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
        || ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(raw, fmt).is_ok());
    if !is_date {
        return Err(AppError::validation(format!(
            "Invalid date '{}'. Expected YYYY-MM-DD.",
            raw
        )));
    }
    Ok(raw.to_string())
}

pub mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Non-empty trimmed text from a string or a scalar.
    pub fn text(value: &Value) -> Option<String> {
        let s = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    /// Whole number from a JSON number or a numeric string.
    pub fn int(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).and_then(in_range)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Like [`int`], but drops any fractional part: `"12.5"` reads as 12.
    pub fn truncated(value: &Value) -> Option<i64> {
        let f = match value {
            Value::Number(n) => return n.as_i64().or_else(|| n.as_f64().and_then(|f| in_range(f.trunc()))),
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        in_range(f.trunc())
    }

    fn in_range(f: f64) -> Option<i64> {
        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
        (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(de)?;
        Ok(text(&value))
    }

    pub fn opt_int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(de)?;
        match value {
            Value::Null => Ok(None),
            Value::String(ref s) if s.trim().is_empty() => Ok(None),
            other => int(&other)
                .map(Some)
                .ok_or_else(|| {
                    <D::Error as serde::de::Error>::custom(format!("expected a whole number, got {}", other))
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cost_accepts_both_decimal_separators() {
        assert_eq!(parse_cost(&json!("150,99")), Some(150.99));
        assert_eq!(parse_cost(&json!("150.99")), Some(150.99));
        assert_eq!(parse_cost(&json!(120.5)), Some(120.5));
        assert_eq!(parse_cost(&json!(" 0 ")), Some(0.0));
    }

    #[test]
    fn bad_costs_become_unset() {
        assert_eq!(parse_cost(&json!("-5")), None);
        assert_eq!(parse_cost(&json!(-1)), None);
        assert_eq!(parse_cost(&json!("abc")), None);
        assert_eq!(parse_cost(&json!("")), None);
        assert_eq!(parse_cost(&json!("NaN")), None);
        assert_eq!(parse_cost(&Value::Null), None);
    }

    #[test]
    fn unknown_action_is_its_own_variant() {
        let req: PostRequest = parse_body(br#"{"action":"launch_rockets"}"#, "POST").unwrap();
        assert!(matches!(req, PostRequest::Unknown));
    }

    #[test]
    fn missing_action_is_rejected() {
        let err = parse_body::<PutRequest>(br#"{"tag":"A"}"#, "PUT").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = parse_body::<PutRequest>(b"", "PUT").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = parse_body::<PutRequest>(b"{not json", "PUT").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn form_values_arrive_as_strings() {
        let req: PutRequest = parse_body(
            br#"{"action":"add_maint_step","data":{"maint_id":"12","description":" swapped belt "}}"#,
            "PUT",
        )
        .unwrap();
        let PutRequest::AddMaintStep { data } = req else {
            panic!("wrong variant");
        };
        assert_eq!(data.validate().unwrap(), (12, "swapped belt".to_string()));
    }

    #[test]
    fn new_machine_defaults() {
        let machine = NewMachine {
            id: Some("DWM-001".into()),
            name: Some("Forklift".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(machine.usage_hours, 1);
        assert_eq!(machine.status, MachineStatus::Ok);
        assert_eq!(machine.description, None);
    }

    #[test]
    fn new_machine_requires_tag_and_name() {
        let err = NewMachine {
            id: Some("DWM-001".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn field_names_resolve_to_variants() {
        assert_eq!(
            FieldUpdate::parse("quantity", json!("250")).unwrap(),
            FieldUpdate::UsageHours(250)
        );
        assert_eq!(
            FieldUpdate::parse("capacity", json!("5 t")).unwrap(),
            FieldUpdate::Description(Some("5 t".into()))
        );
        assert_eq!(
            FieldUpdate::parse("status", json!("EM MANUTENÇÃO")).unwrap(),
            FieldUpdate::Status(MachineStatus::InMaintenance)
        );
        assert!(FieldUpdate::parse("tag", json!("X")).is_err());
        assert!(FieldUpdate::parse("usage_hours", json!(-3)).is_err());
        assert!(FieldUpdate::parse("name", json!("  ")).is_err());
    }

    #[test]
    fn schedule_value_shapes() {
        let encoded = json!(r#"{"date":"2024-03-01","desc":"oil change"}"#);
        assert_eq!(
            FieldUpdate::parse("nextMaint", encoded).unwrap(),
            FieldUpdate::Schedule(Some(ScheduleInput {
                date: "2024-03-01".into(),
                note: Some("oil change".into()),
            }))
        );
        assert_eq!(
            FieldUpdate::parse("schedule", json!({"date": "2024-03-01"})).unwrap(),
            FieldUpdate::Schedule(Some(ScheduleInput {
                date: "2024-03-01".into(),
                note: None,
            }))
        );
        assert_eq!(FieldUpdate::parse("nextMaint", json!("null")).unwrap(), FieldUpdate::Schedule(None));
        assert_eq!(FieldUpdate::parse("nextMaint", Value::Null).unwrap(), FieldUpdate::Schedule(None));
        assert_eq!(
            FieldUpdate::parse("nextMaint", json!({"desc": "no date"})).unwrap(),
            FieldUpdate::Schedule(None)
        );
        assert!(FieldUpdate::parse("nextMaint", json!({"date": "next week"})).is_err());
    }

    #[test]
    fn batch_skips_incomplete_rows() {
        let (rows, skipped) = batch_rows(json!([
            {"id": "A-1", "name": "Lathe"},
            {"id": "", "name": "No tag"},
            {"id": "A-2"},
            {"id": "A-3", "name": "Press", "quantity": "40", "status": "INOPERANTE"},
        ]))
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(skipped, 2);
        assert_eq!(rows[1].usage_hours, 40);
        assert_eq!(rows[1].status, MachineStatus::Inoperative);
    }

    #[test]
    fn batch_coerces_odd_cells_in_complete_rows() {
        let (rows, skipped) = batch_rows(json!([
            {"id": "C-1", "name": "Grinder", "quantity": "12.5"},
            {"id": "C-2", "name": "Welder", "quantity": "abc"},
            {"id": "C-3", "name": "Router", "status": "Operando"},
            {"id": "C-4", "name": "Planer", "quantity": -4},
            {"id": "C-5", "name": "Shaper", "quantity": 7.9},
            "not a row",
        ]))
        .unwrap();
        assert_eq!(skipped, 1);
        let hours: Vec<i64> = rows.iter().map(|r| r.usage_hours).collect();
        assert_eq!(hours, vec![12, 1, 1, 1, 7]);
        assert!(rows.iter().all(|r| r.status == MachineStatus::Ok));
    }

    #[test]
    fn whole_numbers_stay_in_range() {
        assert_eq!(lenient::int(&json!(40.0)), Some(40));
        assert_eq!(lenient::int(&json!(1e30)), None);
        assert_eq!(lenient::int(&json!(-1e30)), None);
        assert!(FieldUpdate::parse("usage_hours", json!(1e30)).is_err());
        assert_eq!(lenient::truncated(&json!("1e30")), None);
        assert_eq!(lenient::truncated(&json!(" 3.99 ")), Some(3));
    }

    #[test]
    fn batch_requires_a_non_empty_array() {
        assert!(batch_rows(json!([])).is_err());
        assert!(batch_rows(json!({"id": "A-1"})).is_err());
        assert!(batch_rows(Value::Null).is_err());
    }

    #[test]
    fn dates_are_checked() {
        assert_eq!(check_date(" 2024-01-01 ").unwrap(), "2024-01-01");
        assert!(check_date("2024-01-01T08:30").is_ok());
        assert!(check_date("01/01/2024").is_err());
        assert!(check_date("2024-02-30").is_err());
    }

    #[test]
    fn end_maintenance_requires_ids() {
        let err = EndMaintenance {
            tag: Some("A".into()),
            end_date: Some("2024-01-01".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
