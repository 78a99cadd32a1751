use super::model::{GradeStructure, SessionKey, StudentRow};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// The UE is already validated in the normal session.
    UeValidated,
    /// Some EC of the UE has no normal-session grade yet.
    FirstSessionIncomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", content = "reason", rename_all = "camelCase")]
pub enum CellAccess {
    Editable,
    Locked(LockReason),
    Hidden,
}

impl CellAccess {
    pub fn is_editable(self) -> bool {
        matches!(self, CellAccess::Editable)
    }
}

fn first_session_complete(structure: &GradeStructure, student: &StudentRow, ue_id: &str) -> bool {
    let Some(ue) = structure.ue(ue_id) else {
        return false;
    };
    ue.ecs
        .iter()
        .all(|ec| student.grade(&ec.id, SessionKey::Normal).is_some())
}

pub fn lock_reason(
    structure: &GradeStructure,
    student: &StudentRow,
    ue_id: &str,
    session: SessionKey,
) -> Option<LockReason> {
    if session == SessionKey::Normal {
        return None;
    }
    let validated = student
        .ue_result(ue_id, SessionKey::Normal)
        .map(|r| r.valide)
        .unwrap_or(false);
    if validated {
        return Some(LockReason::UeValidated);
    }
    if !first_session_complete(structure, student, ue_id) {
        return Some(LockReason::FirstSessionIncomplete);
    }
    None
}

/// Retake cells stay closed until the UE needs a retake and its
/// first-session grades are all in. Lock state is per UE, so `_ec_id` only
/// names the cell.
pub fn is_locked(
    structure: &GradeStructure,
    student: &StudentRow,
    ue_id: &str,
    _ec_id: &str,
    session: SessionKey,
) -> bool {
    lock_reason(structure, student, ue_id, session).is_some()
}

pub fn cell_access(
    structure: &GradeStructure,
    student: &StudentRow,
    ue_id: &str,
    session: SessionKey,
    active_sessions: &[SessionKey],
) -> CellAccess {
    if !active_sessions.contains(&session) {
        return CellAccess::Hidden;
    }
    match lock_reason(structure, student, ue_id, session) {
        Some(reason) => CellAccess::Locked(reason),
        None => CellAccess::Editable,
    }
}
