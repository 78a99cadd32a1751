use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::matrix::model::{GradeStructure, StudentRow};
use crate::store::{self, SemesterResultInput, UeResultInput};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

fn parse_param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
        code: "bad_params",
        message: format!("invalid {}: {}", key, e),
        details: None,
    })
}

fn parse_optional_list<T: DeserializeOwned>(params: &Value, key: &str) -> Result<Vec<T>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => parse_param(params, key),
    }
}

fn structure_import(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let structure: GradeStructure = parse_param(&req.params, "structure")?;
    let students: Vec<StudentRow> = parse_optional_list(&req.params, "students")?;
    let (structure_id, summary) = store::import_structure(conn, &structure, &students)?;
    Ok(json!({
        "structureId": structure_id,
        "summary": summary,
    }))
}

fn results_upsert(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let structure_id = required_str(&req.params, "structureId")?;
    let ue_results: Vec<UeResultInput> = parse_optional_list(&req.params, "ueResults")?;
    let semester_results: Vec<SemesterResultInput> =
        parse_optional_list(&req.params, "semesterResults")?;
    let (ue, semester) =
        store::upsert_results(conn, structure_id, &ue_results, &semester_results)?;
    Ok(json!({ "ueResults": ue, "semesterResults": semester }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "structure.import" => structure_import(state, req),
        "results.upsert" => results_upsert(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
