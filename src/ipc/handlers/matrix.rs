use crate::ipc::error::ok;
use crate::ipc::handlers::columns::{order_json, restore_saved_order};
use crate::ipc::handlers::setup::grid_settings;
use crate::ipc::helpers::{
    cell_id, no_workspace, optional_str, parse_grid_query, parse_sessions, required_str,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::matrix::grid::LoadOutcome;
use crate::matrix::model::SessionKey;
use crate::matrix::{GradeMatrix, MatrixQuery};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};

fn settings_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

/// Column order comes from settings on every applied load.
pub fn after_load(conn: &Connection, matrix: &mut GradeMatrix, outcome: LoadOutcome) {
    if outcome == LoadOutcome::Applied {
        if let Err(e) = restore_saved_order(conn, matrix) {
            tracing::warn!(error = %e, "saved column order ignored");
        }
    }
}

pub fn summary_json(matrix: &GradeMatrix) -> Value {
    let sessions: Vec<_> = matrix.active_sessions().iter().map(|s| s.meta()).collect();
    match matrix.data() {
        Ok(data) => json!({
            "state": matrix.state().name(),
            "generation": matrix.generation(),
            "structureId": data.structure.id,
            "year": data.structure.year,
            "institutionId": data.structure.institution_id,
            "programId": data.structure.program_id,
            "semesterId": data.structure.semester_id,
            "sessions": sessions,
            "columns": order_json(matrix),
            "studentCount": data.rows.len(),
            "bulkEdit": matrix.bulk_edit_columns(),
            "inFlight": matrix.in_flight_count(),
        }),
        Err(_) => json!({
            "state": matrix.state().name(),
            "generation": matrix.generation(),
            "sessions": sessions,
        }),
    }
}

fn matrix_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(no_workspace)?;
    let sessions = match req.params.get("sessions") {
        Some(v) if !v.is_null() => parse_sessions(v)?,
        _ => grid_settings(conn).map_err(settings_err)?.default_sessions,
    };
    let query = MatrixQuery {
        year: required_str(&req.params, "year")?.to_string(),
        institution_id: optional_str(&req.params, "institutionId").map(str::to_string),
        program_id: required_str(&req.params, "programId")?.to_string(),
        semester_id: required_str(&req.params, "semesterId")?.to_string(),
        sessions,
    };

    let store = SqliteStore::new(conn);
    let outcome = state.matrix.load(&store, query)?;
    after_load(conn, &mut state.matrix, outcome);
    Ok(summary_json(&state.matrix))
}

fn matrix_reload(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref().ok_or_else(no_workspace)?;
    let store = SqliteStore::new(conn);
    let outcome = state.matrix.reload(&store)?;
    after_load(conn, &mut state.matrix, outcome);
    Ok(summary_json(&state.matrix))
}

fn matrix_sessions_set(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let Some(raw) = req.params.get("sessions") else {
        return Err(HandlerErr::bad_params("missing sessions"));
    };
    let sessions: Vec<SessionKey> = parse_sessions(raw)?;
    let conn = state.db.as_ref().ok_or_else(no_workspace)?;
    let store = SqliteStore::new(conn);
    let outcome = state.matrix.change_sessions(&store, &sessions)?;
    after_load(conn, &mut state.matrix, outcome);
    Ok(summary_json(&state.matrix))
}

fn matrix_view(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let default_completion = match state.db.as_ref() {
        Some(conn) => grid_settings(conn).map_err(settings_err)?.default_completion,
        None => Default::default(),
    };
    let query = parse_grid_query(req.params.get("query"), default_completion)?;
    let matrix = &state.matrix;
    let data = matrix.data()?;
    let derived = matrix.derived(&query)?;

    let mut rows = Vec::with_capacity(derived.len());
    for d in &derived {
        let row = &data.rows[d.index];
        let cells = matrix.row_cells(&row.id)?;
        rows.push(json!({
            "studentId": row.id,
            "nom": row.nom,
            "prenoms": row.prenoms,
            "matricule": row.matricule,
            "photoUrl": row.photo_url,
            "progress": d.progress,
            "ueResults": row.ue_results,
            "moyennes": row.semester_averages,
            "credits": row.semester_credits,
            "decisions": row.semester_decisions,
            "cells": cells,
        }));
    }

    Ok(json!({
        "matrix": summary_json(matrix),
        "total": data.rows.len(),
        "count": rows.len(),
        "rows": rows,
    }))
}

fn matrix_cell(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let cell = cell_id(&req.params)?;
    let view = state.matrix.cell_view(&cell)?;
    Ok(json!(view))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "matrix.open" => matrix_open(state, req),
        "matrix.reload" => matrix_reload(state, req),
        "matrix.sessions.set" => matrix_sessions_set(state, req),
        "matrix.view" => matrix_view(state, req),
        "matrix.cell" => matrix_cell(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
