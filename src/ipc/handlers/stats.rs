use crate::ipc::error::ok;
use crate::ipc::handlers::setup::grid_settings;
use crate::ipc::helpers::{parse_column, parse_grid_query, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::matrix::column::ColumnRef;
use crate::matrix::stats::{compute_stats, distribution};
use serde_json::{json, Value};

fn stats_column(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let raw = required_str(&req.params, "column")?;
    let column = parse_column(raw)?;
    let settings = match state.db.as_ref() {
        Some(conn) => Some(grid_settings(conn).map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?),
        None => None,
    };
    let bins = settings.as_ref().map(|s| s.histogram_bins).unwrap_or(10);
    let default_completion = settings.map(|s| s.default_completion).unwrap_or_default();

    // Without a query the whole loaded population is described.
    let query = match req.params.get("query") {
        Some(q) if !q.is_null() => Some(parse_grid_query(Some(q), default_completion)?),
        _ => None,
    };
    let values = state.matrix.column_values(&column, query.as_ref())?;
    // Bins span the 0..20 grade scale; progress and credits are not on it.
    let on_grade_scale = matches!(
        column,
        ColumnRef::Note { .. } | ColumnRef::UeAverage { .. } | ColumnRef::Average { .. }
    );
    let bins = if on_grade_scale {
        distribution(&values, bins)
    } else {
        Vec::new()
    };
    Ok(json!({
        "column": column.to_string(),
        "numeric": column.is_numeric(),
        "stats": compute_stats(&values),
        "distribution": bins,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.column" => stats_column(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
