use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::matrix::cell::CellId;
use crate::matrix::column::ColumnRef;
use crate::matrix::model::SessionKey;
use crate::matrix::pipeline::{CompletionMode, FilterOp, GridQuery, NumericFilter, SortDir};
use crate::matrix::MatrixError;
use crate::store::StoreError;
use rusqlite::Connection;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<MatrixError> for HandlerErr {
    fn from(e: MatrixError) -> Self {
        let details = match &e {
            MatrixError::CellLocked { cell, reason } => Some(json!({
                "cell": cell,
                "reason": reason,
            })),
            MatrixError::NotEditing(cell) => Some(json!({ "cell": cell })),
            MatrixError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            MatrixError::CommitFailed { reloaded, .. } => Some(json!({
                "reloaded": reloaded,
                "warning": "save failed, reloaded",
            })),
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let details = match &e {
            StoreError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            _ => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(no_workspace)
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub fn parse_session(raw: &str) -> Result<SessionKey, HandlerErr> {
    SessionKey::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "session must be one of: normal, rattrapage".to_string(),
        details: Some(json!({ "session": raw })),
    })
}

pub fn required_session(params: &Value, key: &str) -> Result<SessionKey, HandlerErr> {
    parse_session(required_str(params, key)?)
}

pub fn parse_sessions(v: &Value) -> Result<Vec<SessionKey>, HandlerErr> {
    let Some(items) = v.as_array() else {
        return Err(HandlerErr::bad_params("sessions must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(raw) = item.as_str() else {
            return Err(HandlerErr::bad_params("sessions must be strings"));
        };
        out.push(parse_session(raw)?);
    }
    if out.is_empty() {
        return Err(HandlerErr::bad_params("at least one session must stay active"));
    }
    Ok(out)
}

pub fn cell_id(params: &Value) -> Result<CellId, HandlerErr> {
    Ok(CellId::new(
        required_str(params, "studentId")?,
        required_str(params, "ecId")?,
        required_session(params, "session")?,
    ))
}

pub fn parse_column(raw: &str) -> Result<ColumnRef, HandlerErr> {
    raw.parse::<ColumnRef>().map_err(|e| HandlerErr {
        code: "bad_params",
        message: format!("unknown column key: {}", e.0),
        details: Some(json!({ "column": raw })),
    })
}

/// `{ search?, completion?, filters?: { <columnKey>: { op, value } }, sort?: { column, direction? } }`
pub fn parse_grid_query(
    v: Option<&Value>,
    default_completion: CompletionMode,
) -> Result<GridQuery, HandlerErr> {
    let mut q = GridQuery {
        completion: default_completion,
        ..GridQuery::default()
    };
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Ok(q);
    };
    if !v.is_object() {
        return Err(HandlerErr::bad_params("query must be an object"));
    }

    if let Some(s) = v.get("search").and_then(|s| s.as_str()) {
        q.search = s.to_string();
    }
    if let Some(c) = v.get("completion").and_then(|c| c.as_str()) {
        q.completion = CompletionMode::parse(c).ok_or_else(|| {
            HandlerErr::bad_params("completion must be one of: all, complete, incomplete")
        })?;
    }
    if let Some(filters) = v.get("filters") {
        let Some(map) = filters.as_object() else {
            return Err(HandlerErr::bad_params("filters must be an object"));
        };
        for (key, f) in map {
            let column = parse_column(key)?;
            if !column.is_numeric() {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: format!("filter {}: column is not numeric", key),
                    details: Some(json!({ "column": key })),
                });
            }
            if f.is_null() {
                q.set_filter(column, None);
                continue;
            }
            let op = f
                .get("op")
                .and_then(|o| o.as_str())
                .and_then(FilterOp::parse)
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!(
                        "filter {}: op must be one of gt, lt, eq, gte, lte",
                        key
                    ))
                })?;
            let value = f
                .get("value")
                .and_then(|x| x.as_f64())
                .ok_or_else(|| HandlerErr::bad_params(format!("filter {}: value must be a number", key)))?;
            q.set_filter(column, Some(NumericFilter { op, value }));
        }
    }
    if let Some(sort) = v.get("sort").filter(|s| !s.is_null()) {
        let column = parse_column(
            sort.get("column")
                .and_then(|c| c.as_str())
                .ok_or_else(|| HandlerErr::bad_params("sort.column is required"))?,
        )?;
        let dir = match sort.get("direction").and_then(|d| d.as_str()) {
            None => SortDir::Asc,
            Some(d) if d.eq_ignore_ascii_case("asc") => SortDir::Asc,
            Some(d) if d.eq_ignore_ascii_case("desc") => SortDir::Desc,
            Some(_) => return Err(HandlerErr::bad_params("sort.direction must be asc or desc")),
        };
        q.set_sort(column, dir);
    }
    Ok(q)
}
