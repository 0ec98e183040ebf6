use axum::{body::Bytes, extract::State, response::Json};

use crate::{
    error::{AppError, AppResult},
    models::*,
    payload::*,
    store::MaintStore,
};

// GET {api_path}
pub async fn list_machines(
    State(store): State<MaintStore>,
) -> AppResult<Json<ApiResponse<MachineListResponse>>> {
    let machines = store.list_machines().await?;
    tracing::debug!(count = machines.len(), "machines listed");
    Ok(Json(ApiResponse {
        status: "success",
        message: None,
        data: MachineListResponse { machines },
    }))
}

// POST {api_path}
pub async fn post_action(
    State(store): State<MaintStore>,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let response = match parse_body::<PostRequest>(&body, "POST")? {
        PostRequest::AddMachine { data } => {
            let machine = data.validate()?;
            store.create_machine(&machine).await?;
            tracing::info!(tag = %machine.tag, "machine added");
            to_json(ApiResponse::message("Machine added successfully."))
        }
        PostRequest::AddHistory { data } => {
            let (tag, description) = data.validate()?;
            store.add_history(&tag, &description).await?;
            tracing::info!(%tag, "history entry added");
            to_json(ApiResponse::message("History entry added."))
        }
        PostRequest::StartMaintenance { data } => {
            let input = data.validate()?;
            let maint_id = store.start_maintenance(&input).await?;
            tracing::info!(tag = %input.tag, maint_id, "maintenance started");
            to_json(ApiResponse::success(
                "Maintenance started.",
                MaintenanceStarted { maint_id },
            ))
        }
        PostRequest::BatchAddMachines { data } => {
            let (rows, skipped) = batch_rows(data)?;
            let count = store.import_machines(&rows).await?;
            tracing::info!(count, skipped, "batch import committed");
            to_json(ApiResponse::success(
                format!("{} machines imported/updated successfully.", count),
                BatchImported { count },
            ))
        }
        PostRequest::Unknown => return Err(AppError::validation("Unknown POST action.")),
    };
    Ok(Json(response))
}

// PUT {api_path}
pub async fn put_action(
    State(store): State<MaintStore>,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let response = match parse_body::<PutRequest>(&body, "PUT")? {
        PutRequest::UpdateField { tag, field, value } => {
            let (Some(tag), Some(field)) = (tag, field) else {
                return Err(AppError::validation("Machine tag and field are required."));
            };
            let update = FieldUpdate::parse(&field, value)?;
            let field_name = update.name();
            let message = match update {
                FieldUpdate::Schedule(_) => "Schedule updated.",
                _ => "Field updated.",
            };
            store.update_field(&tag, update).await?;
            tracing::info!(%tag, field = field_name, "machine field updated");
            to_json(ApiResponse::message(message))
        }
        PutRequest::AddMaintStep { data } => {
            let (maint_id, description) = data.validate()?;
            let new_step = store.add_step(maint_id, &description).await?;
            tracing::info!(maint_id, "maintenance step added");
            to_json(ApiResponse::success("Step added.", StepAdded { new_step }))
        }
        PutRequest::EndMaintenance { data } => {
            let input = data.validate()?;
            store.end_maintenance(&input).await?;
            tracing::info!(
                tag = %input.tag,
                maint_id = input.maintenance_id,
                cost = ?input.cost,
                "maintenance closed"
            );
            to_json(ApiResponse::message("Maintenance finished."))
        }
        PutRequest::Unknown => return Err(AppError::validation("Unknown PUT action.")),
    };
    Ok(Json(response))
}

// DELETE {api_path}
pub async fn delete_action(
    State(store): State<MaintStore>,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    match parse_body::<DeleteRequest>(&body, "DELETE")? {
        DeleteRequest::DeleteMachine { tag } => {
            let tag = tag.ok_or_else(|| AppError::validation("Machine tag is required."))?;
            store.delete_machine(&tag).await?;
            tracing::info!(%tag, "machine deleted");
            Ok(Json(to_json(ApiResponse::message("Machine deleted."))))
        }
        DeleteRequest::Unknown => Err(AppError::validation("Unknown DELETE action.")),
    }
}

// Any other verb on {api_path}
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

// GET /health
pub async fn health(State(store): State<MaintStore>) -> AppResult<Json<ApiResponse<NoPayload>>> {
    store.ping().await?;
    Ok(Json(ApiResponse {
        status: "success",
        message: None,
        data: NoPayload {},
    }))
}

/// Each action answers with a different payload; erase them to one type so
/// the dispatch arms line up.
fn to_json<T: serde::Serialize>(response: ApiResponse<T>) -> serde_json::Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        serde_json::json!({ "status": "success" })
    })
}
