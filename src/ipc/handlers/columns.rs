use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::matrix::column_order::ReorderOutcome;
use crate::matrix::GradeMatrix;
use rusqlite::Connection;
use serde_json::{json, Value};

fn order_key(structure_id: &str) -> String {
    format!("grid.columnOrder.{}", structure_id)
}

/// Applies the saved UE order for the loaded structure, if any.
pub fn restore_saved_order(conn: &Connection, matrix: &mut GradeMatrix) -> anyhow::Result<()> {
    let structure_id = match matrix.data() {
        Ok(d) => d.structure.id.clone(),
        Err(_) => return Ok(()),
    };
    let saved: Vec<String> = db::settings_get_json(conn, &order_key(&structure_id))?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    if !saved.is_empty() {
        matrix.restore_column_order(&saved)?;
    }
    Ok(())
}

pub fn order_json(matrix: &GradeMatrix) -> Value {
    let Ok(data) = matrix.data() else {
        return json!([]);
    };
    let ues: Vec<Value> = matrix
        .column_order()
        .ids()
        .iter()
        .filter_map(|id| data.structure.ue(id))
        .map(|ue| {
            json!({
                "ueId": ue.id,
                "code": ue.code,
                "credit": ue.credit,
                "ecs": ue.ecs,
            })
        })
        .collect();
    Value::from(ues)
}

fn columns_order(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let data = state.matrix.data()?;
    Ok(json!({
        "structureId": data.structure.id,
        "order": state.matrix.column_order().ids(),
        "columns": order_json(&state.matrix),
    }))
}

fn columns_reorder(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let source_id = required_str(&req.params, "sourceId")?;
    let target_id = required_str(&req.params, "targetId")?;
    let outcome = state.matrix.reorder_columns(source_id, target_id)?;
    if outcome == ReorderOutcome::Moved {
        let conn = db_conn(state)?;
        let structure_id = state.matrix.data()?.structure.id.clone();
        db::settings_set_json(
            conn,
            &order_key(&structure_id),
            &json!(state.matrix.column_order().ids()),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        })?;
    }
    let outcome = match outcome {
        ReorderOutcome::Moved => "moved",
        ReorderOutcome::Unchanged => "unchanged",
        ReorderOutcome::UnknownId => "unknown_id",
    };
    Ok(json!({
        "outcome": outcome,
        "order": state.matrix.column_order().ids(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "columns.order" => columns_order(state, req),
        "columns.reorder" => columns_reorder(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
