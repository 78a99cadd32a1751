use crate::ipc::error::ok;
use crate::ipc::helpers::{cell_id, no_workspace, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::matrix::cell::CellId;
use crate::matrix::progress::progress;
use crate::matrix::GradeMatrix;
use crate::store::SqliteStore;
use serde_json::{json, Value};

fn student_progress(matrix: &GradeMatrix, student_id: &str) -> Option<f64> {
    let data = matrix.data().ok()?;
    let row = data.row(student_id)?;
    Some(progress(&data.structure, row, matrix.active_sessions()))
}

fn cell_json(matrix: &GradeMatrix, cell: &CellId) -> Result<Value, HandlerErr> {
    Ok(json!({
        "cell": matrix.cell_view(cell)?,
        "progress": student_progress(matrix, &cell.student_id),
    }))
}

fn cells_begin_edit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let cell = cell_id(&req.params)?;
    state.matrix.begin_edit(&cell)?;
    cell_json(&state.matrix, &cell)
}

fn cells_cancel(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let cell = cell_id(&req.params)?;
    state.matrix.cancel_edit(&cell)?;
    cell_json(&state.matrix, &cell)
}

fn cells_bulk_edit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let ec_id = required_str(&req.params, "ecId")?;
    let Some(enabled) = req.params.get("enabled").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("enabled must be boolean"));
    };
    state.matrix.set_bulk_edit(ec_id, enabled)?;
    Ok(json!({ "ecId": ec_id, "enabled": enabled, "bulkEdit": state.matrix.bulk_edit_columns() }))
}

/// Validate, apply locally, persist. A store failure reloads the matrix
/// and comes back as `commit_failed`.
fn cells_commit(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let cell = cell_id(&req.params)?;
    let input = match req.params.get("input") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) => String::new(),
        _ => return Err(HandlerErr::bad_params("missing input")),
    };
    let conn = state.db.as_ref().ok_or_else(no_workspace)?;
    let store = SqliteStore::new(conn);
    let intent = state.matrix.commit(&store, &cell, &input)?;
    Ok(json!({
        "intent": intent,
        "cell": state.matrix.cell_view(&cell)?,
        "progress": student_progress(&state.matrix, &cell.student_id),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "cells.beginEdit" => cells_begin_edit(state, req),
        "cells.cancel" => cells_cancel(state, req),
        "cells.bulkEdit" => cells_bulk_edit(state, req),
        "cells.commit" => cells_commit(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
