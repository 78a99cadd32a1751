use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{GradeStore, SqliteStore};
use serde_json::{json, Value};

fn students_profile(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let student_id = required_str(&req.params, "studentId")?;
    let conn = db_conn(state)?;
    let profile = SqliteStore::new(conn).student_profile(student_id)?;
    Ok(json!(profile))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.profile" => students_profile(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
