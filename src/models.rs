use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operational status of a machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    #[default]
    Ok,
    InOperation,
    InMaintenance,
    Inoperative,
    AwaitingParts,
    HoursExceeded,
}

impl MachineStatus {
    pub const ALL: [MachineStatus; 6] = [
        Self::Ok,
        Self::InOperation,
        Self::InMaintenance,
        Self::Inoperative,
        Self::AwaitingParts,
        Self::HoursExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InOperation => "IN_OPERATION",
            Self::InMaintenance => "IN_MAINTENANCE",
            Self::Inoperative => "INOPERATIVE",
            Self::AwaitingParts => "AWAITING_PARTS",
            Self::HoursExceeded => "HOURS_EXCEEDED",
        }
    }

    /// Label the dashboard shows and historically sent back.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InOperation => "EM OPERAÇÃO",
            Self::InMaintenance => "EM MANUTENÇÃO",
            Self::Inoperative => "INOPERANTE",
            Self::AwaitingParts => "ESPERANDO PEÇAS",
            Self::HoursExceeded => "HORAS EXCEDENTES",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = String;

    /// Accepts the status codes (any case, spaces or underscores) and the
    /// dashboard labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed.to_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == code || status.label() == trimmed.to_uppercase())
            .ok_or_else(|| {
                format!(
                    "Invalid status '{}'. Must be one of: {}",
                    trimmed,
                    Self::ALL.map(|st| st.as_str()).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MachineRow {
    pub id: i64,
    pub tag: String,
    pub name: String,
    pub description: Option<String>,
    pub usage_hours: i64,
    pub status: MachineStatus,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub machine_id: i64,
    pub created_at: i64,
    pub description: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub machine_id: i64,
    pub scheduled_date: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MaintenanceRow {
    pub id: i64,
    pub machine_id: i64,
    pub start_date: String,
    pub end_date: Option<String>,
    pub service_type: String,
    pub description: Option<String>,
    pub technician: Option<String>,
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepRow {
    pub maintenance_id: i64,
    pub created_at: i64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineView {
    pub id: String,
    pub name: String,
    pub capacity: String,
    pub quantity: i64,
    pub status: MachineStatus,
    pub maintenance: Vec<MaintenanceView>,
    pub history: Vec<HistoryView>,
    #[serde(rename = "nextMaint")]
    pub next_maint: Option<ScheduleView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceView {
    pub id: i64,
    pub start_date: String,
    pub end_date: Option<String>,
    #[serde(rename = "type")]
    pub service_type: String,
    pub desc: Option<String>,
    pub tecnico: Option<String>,
    pub cost: Option<f64>,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepView {
    pub date: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryView {
    pub date: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleView {
    pub date: String,
    pub desc: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
            data,
        }
    }
}

impl ApiResponse<NoPayload> {
    pub fn message(message: impl Into<String>) -> Self {
        Self::success(message, NoPayload {})
    }
}

#[derive(Debug, Serialize)]
pub struct NoPayload {}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MachineListResponse {
    pub machines: Vec<MachineView>,
}

#[derive(Debug, Serialize)]
pub struct MaintenanceStarted {
    pub maint_id: i64,
}

#[derive(Debug, Serialize)]
pub struct StepAdded {
    pub new_step: StepView,
}

#[derive(Debug, Serialize)]
pub struct BatchImported {
    pub count: usize,
}

/// `dd/mm/YYYY HH:MM:SS`, the format the dashboard renders verbatim.
pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_default()
        .format("%d/%m/%Y %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accepts_codes_and_labels() {
        assert_eq!("OK".parse::<MachineStatus>(), Ok(MachineStatus::Ok));
        assert_eq!("in_maintenance".parse::<MachineStatus>(), Ok(MachineStatus::InMaintenance));
        assert_eq!("awaiting parts".parse::<MachineStatus>(), Ok(MachineStatus::AwaitingParts));
        assert_eq!("EM OPERAÇÃO".parse::<MachineStatus>(), Ok(MachineStatus::InOperation));
        assert_eq!("Inoperante".parse::<MachineStatus>(), Ok(MachineStatus::Inoperative));
        assert_eq!("HORAS EXCEDENTES".parse::<MachineStatus>(), Ok(MachineStatus::HoursExceeded));
    }

    #[test]
    fn status_rejects_unknown_values() {
        let err = "BROKEN".parse::<MachineStatus>().unwrap_err();
        assert!(err.contains("BROKEN"));
        assert!(err.contains("AWAITING_PARTS"));
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_string(&MachineStatus::HoursExceeded).unwrap();
        assert_eq!(json, "\"HOURS_EXCEEDED\"");
    }

    #[test]
    fn timestamps_use_dashboard_format() {
        // 2024-01-01 12:30:05 UTC
        assert_eq!(format_timestamp(1_704_112_205), "01/01/2024 12:30:05");
    }

    #[test]
    fn envelope_flattens_payload() {
        let body = ApiResponse::success("Maintenance started.", MaintenanceStarted { maint_id: 7 });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["maint_id"], 7);

        let plain = serde_json::to_value(ApiResponse::message("ok")).unwrap();
        assert_eq!(plain, serde_json::json!({"status": "success", "message": "ok"}));
    }
}
