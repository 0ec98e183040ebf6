//! All reads and writes against the maintenance schema.

use std::collections::HashMap;

use sqlx::Row;

use crate::database::{current_timestamp, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::*;
use crate::payload::{CloseInput, FieldUpdate, MachineInput, MaintenanceInput};

/// Text of the placeholder history entry for machines with no history yet.
pub const LOADED_FROM_STORE: &str = "Loaded from database.";

#[derive(Debug, Clone)]
pub struct MaintStore {
    pool: DbPool,
}

impl MaintStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn machine_id(&self, tag: &str) -> AppResult<i64> {
        sqlx::query("SELECT id FROM machines WHERE tag = ?")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("id"))
            .ok_or_else(|| AppError::not_found(format!("Machine '{}' not found.", tag)))
    }

    pub async fn create_machine(&self, machine: &MachineInput) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO machines (tag, name, description, usage_hours, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&machine.tag)
        .bind(&machine.name)
        .bind(&machine.description)
        .bind(machine.usage_hours)
        .bind(machine.status)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::conflict(format!("Machine '{}' already exists.", machine.tag))
            }
            other => other.into(),
        })?;
        Ok(result.last_insert_rowid())
    }

    /// Upserts every machine keyed by tag inside one transaction.
    pub async fn import_machines(&self, machines: &[MachineInput]) -> AppResult<usize> {
        let mut tx = self.pool.begin().await?;
        for machine in machines {
            sqlx::query(
                r#"
                INSERT INTO machines (tag, name, description, usage_hours, status)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(tag) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    usage_hours = excluded.usage_hours,
                    status = excluded.status
                "#,
            )
            .bind(&machine.tag)
            .bind(&machine.name)
            .bind(&machine.description)
            .bind(machine.usage_hours)
            .bind(machine.status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(machines.len())
    }

    pub async fn update_field(&self, tag: &str, update: FieldUpdate) -> AppResult<()> {
        let query = match update {
            FieldUpdate::Schedule(schedule) => {
                let machine_id = self.machine_id(tag).await?;
                let mut tx = self.pool.begin().await?;
                sqlx::query("DELETE FROM schedules WHERE machine_id = ?")
                    .bind(machine_id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(schedule) = schedule {
                    sqlx::query(
                        "INSERT INTO schedules (machine_id, scheduled_date, note) VALUES (?, ?, ?)",
                    )
                    .bind(machine_id)
                    .bind(&schedule.date)
                    .bind(&schedule.note)
                    .execute(&mut *tx)
                    .await?;
                }
                tx.commit().await?;
                return Ok(());
            }
            FieldUpdate::Name(name) => {
                sqlx::query("UPDATE machines SET name = ? WHERE tag = ?").bind(name)
            }
            FieldUpdate::Description(description) => {
                sqlx::query("UPDATE machines SET description = ? WHERE tag = ?").bind(description)
            }
            FieldUpdate::UsageHours(hours) => {
                sqlx::query("UPDATE machines SET usage_hours = ? WHERE tag = ?").bind(hours)
            }
            FieldUpdate::Status(status) => {
                sqlx::query("UPDATE machines SET status = ? WHERE tag = ?").bind(status)
            }
        };

        let result = query.bind(tag).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Machine '{}' not found.", tag)));
        }
        Ok(())
    }

    /// Removes the machine; schedule, events, steps and history go with it.
    pub async fn delete_machine(&self, tag: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM machines WHERE tag = ?")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Machine '{}' not found.", tag)));
        }
        Ok(())
    }

    pub async fn add_history(&self, tag: &str, description: &str) -> AppResult<()> {
        let machine_id = self.machine_id(tag).await?;
        sqlx::query("INSERT INTO history (machine_id, description, created_at) VALUES (?, ?, ?)")
            .bind(machine_id)
            .bind(description)
            .bind(current_timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Opens a maintenance event and returns its id.
    pub async fn start_maintenance(&self, input: &MaintenanceInput) -> AppResult<i64> {
        let machine_id = self.machine_id(&input.tag).await?;
        let result = sqlx::query(
            r#"
            INSERT INTO maintenance_events (machine_id, start_date, service_type, description, technician)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(machine_id)
        .bind(&input.start_date)
        .bind(&input.service_type)
        .bind(&input.description)
        .bind(&input.technician)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::conflict(format!(
                "Machine '{}' already has an open maintenance event.",
                input.tag
            )),
            other => other.into(),
        })?;
        Ok(result.last_insert_rowid())
    }

    pub async fn add_step(&self, maintenance_id: i64, description: &str) -> AppResult<StepView> {
        let exists = sqlx::query("SELECT id FROM maintenance_events WHERE id = ?")
            .bind(maintenance_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(AppError::not_found(format!(
                "Maintenance event {} not found.",
                maintenance_id
            )));
        }

        let created_at = current_timestamp();
        sqlx::query(
            "INSERT INTO maintenance_steps (maintenance_id, description, created_at) VALUES (?, ?, ?)",
        )
        .bind(maintenance_id)
        .bind(description)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(StepView {
            date: format_timestamp(created_at),
            description: description.to_string(),
        })
    }

    /// Closes an open event. The UPDATE only matches while the end date is
    /// still null; when it matches nothing a second read picks the message.
    pub async fn end_maintenance(&self, input: &CloseInput) -> AppResult<()> {
        let machine_id = self.machine_id(&input.tag).await?;
        let result = sqlx::query(
            r#"
            UPDATE maintenance_events SET end_date = ?, total_cost = ?
            WHERE id = ? AND machine_id = ? AND end_date IS NULL
            "#,
        )
        .bind(&input.end_date)
        .bind(input.cost)
        .bind(input.maintenance_id)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let closed_on: Option<Option<String>> = sqlx::query(
            "SELECT end_date FROM maintenance_events WHERE id = ? AND machine_id = ?",
        )
        .bind(input.maintenance_id)
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.get("end_date"));

        Err(match closed_on {
            Some(Some(date)) => AppError::validation(format!(
                "Maintenance event {} was already closed on {}.",
                input.maintenance_id, date
            )),
            _ => AppError::not_found(format!(
                "No active maintenance event {} found for machine '{}'.",
                input.maintenance_id, input.tag
            )),
        })
    }

    /// Every machine with its events, steps, history and schedule, built from
    /// one query per table.
    pub async fn list_machines(&self) -> AppResult<Vec<MachineView>> {
        let machines = sqlx::query_as::<_, MachineRow>(
            "SELECT id, tag, name, description, usage_hours, status FROM machines ORDER BY tag",
        )
        .fetch_all(&self.pool)
        .await?;

        let history = sqlx::query_as::<_, HistoryRow>(
            "SELECT machine_id, created_at, description FROM history ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let schedules = sqlx::query_as::<_, ScheduleRow>(
            "SELECT machine_id, scheduled_date, note FROM schedules",
        )
        .fetch_all(&self.pool)
        .await?;

        let events = sqlx::query_as::<_, MaintenanceRow>(
            r#"
            SELECT id, machine_id, start_date, end_date, service_type, description, technician, total_cost
            FROM maintenance_events
            ORDER BY start_date DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let steps = sqlx::query_as::<_, StepRow>(
            "SELECT maintenance_id, created_at, description FROM maintenance_steps ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(assemble(machines, history, schedules, events, steps, current_timestamp()))
    }
}

fn group_by<T, K, F>(rows: Vec<T>, mut key: F) -> HashMap<i64, Vec<K>>
where
    F: FnMut(T) -> (i64, K),
{
    let mut grouped: HashMap<i64, Vec<K>> = HashMap::new();
    for row in rows {
        let (owner, item) = key(row);
        grouped.entry(owner).or_default().push(item);
    }
    grouped
}

/// Nests the flat rows under their machines. Row order inside each group is
/// whatever the queries returned.
fn assemble(
    machines: Vec<MachineRow>,
    history: Vec<HistoryRow>,
    schedules: Vec<ScheduleRow>,
    events: Vec<MaintenanceRow>,
    steps: Vec<StepRow>,
    now: i64,
) -> Vec<MachineView> {
    let mut steps = group_by(steps, |s| {
        (
            s.maintenance_id,
            StepView {
                date: format_timestamp(s.created_at),
                description: s.description,
            },
        )
    });
    let mut history = group_by(history, |h| {
        (
            h.machine_id,
            HistoryView {
                date: format_timestamp(h.created_at),
                text: h.description,
            },
        )
    });
    let mut schedules: HashMap<i64, ScheduleView> = schedules
        .into_iter()
        .map(|s| {
            (
                s.machine_id,
                ScheduleView {
                    date: s.scheduled_date,
                    desc: s.note,
                },
            )
        })
        .collect();
    let mut events = group_by(events, |e| {
        (
            e.machine_id,
            MaintenanceView {
                steps: steps.remove(&e.id).unwrap_or_default(),
                id: e.id,
                start_date: e.start_date,
                end_date: e.end_date,
                service_type: e.service_type,
                desc: e.description,
                tecnico: e.technician,
                cost: e.total_cost,
            },
        )
    });

    machines
        .into_iter()
        .map(|m| MachineView {
            maintenance: events.remove(&m.id).unwrap_or_default(),
            history: history.remove(&m.id).unwrap_or_else(|| {
                vec![HistoryView {
                    date: format_timestamp(now),
                    text: LOADED_FROM_STORE.to_string(),
                }]
            }),
            next_maint: schedules.remove(&m.id),
            id: m.tag,
            name: m.name,
            capacity: m.description.unwrap_or_else(|| "N/A".to_string()),
            quantity: m.usage_hours,
            status: m.status,
        })
        .collect()
}
