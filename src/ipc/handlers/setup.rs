use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::matrix::model::{normalize_sessions, SessionKey};
use crate::matrix::pipeline::CompletionMode;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grid,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grid" => Some(Self::Grid),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grid => "setup.grid",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grid => json!({
            "defaultSessions": ["normal", "rattrapage"],
            "defaultCompletion": "all",
            "histogramBins": 10
        }),
    }
}

/// Typed view of the `grid` section, read by the matrix handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSettings {
    pub default_sessions: Vec<SessionKey>,
    pub default_completion: CompletionMode,
    pub histogram_bins: usize,
}

impl GridSettings {
    fn from_value(v: &Value) -> Self {
        let default_sessions = v
            .get("defaultSessions")
            .and_then(|a| a.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|s| s.as_str().and_then(SessionKey::parse))
                    .collect::<Vec<_>>()
            })
            .map(|s| normalize_sessions(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| SessionKey::ALL.to_vec());
        let default_completion = v
            .get("defaultCompletion")
            .and_then(|c| c.as_str())
            .and_then(CompletionMode::parse)
            .unwrap_or_default();
        let histogram_bins = v
            .get("histogramBins")
            .and_then(|b| b.as_u64())
            .map(|b| b as usize)
            .unwrap_or(10);
        Self {
            default_sessions,
            default_completion,
            histogram_bins,
        }
    }
}

pub fn grid_settings(conn: &rusqlite::Connection) -> anyhow::Result<GridSettings> {
    Ok(GridSettings::from_value(&load_section(conn, SetupSection::Grid)?))
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_session_list(v: &Value, key: &str) -> Result<Vec<SessionKey>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array", key))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = item
            .as_str()
            .and_then(SessionKey::parse)
            .ok_or_else(|| format!("{} entries must be one of: normal, rattrapage", key))?;
        out.push(s);
    }
    let out = normalize_sessions(&out);
    if out.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grid => match k.as_str() {
                "defaultSessions" => {
                    let sessions = parse_session_list(v, k)?;
                    obj.insert(
                        k.clone(),
                        Value::from(
                            sessions
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>(),
                        ),
                    );
                }
                "defaultCompletion" => {
                    let mode = v
                        .as_str()
                        .and_then(CompletionMode::parse)
                        .ok_or_else(|| {
                            "defaultCompletion must be one of: all, complete, incomplete"
                                .to_string()
                        })?;
                    obj.insert(k.clone(), json!(mode));
                }
                "histogramBins" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 20)?));
                }
                _ => return Err(format!("unknown grid field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grid = match load_section(conn, SetupSection::Grid) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "grid": grid }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
