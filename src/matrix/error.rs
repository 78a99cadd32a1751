use super::cell::{CellId, GradeInputError};
use super::locking::LockReason;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatrixError {
    // ===== local, never reach the store =====
    #[error("invalid grade: {0}")]
    Validation(GradeInputError),

    #[error("cell is locked ({reason:?})")]
    CellLocked { cell: CellId, reason: LockReason },

    #[error("session {0} is not active")]
    SessionInactive(&'static str),

    #[error("cell is not in edit mode")]
    NotEditing(CellId),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("no grade matrix loaded")]
    NoMatrix,

    #[error("at least one session must stay active")]
    EmptySessionSet,

    // ===== collaborator failures =====
    #[error("load failed: {0}")]
    Load(String),

    #[error("save failed: {reason}")]
    CommitFailed { reason: String, reloaded: bool },
}

impl MatrixError {
    /// Stable code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            MatrixError::Validation(_) => "invalid_grade",
            MatrixError::CellLocked { .. } => "cell_locked",
            MatrixError::SessionInactive(_) => "session_inactive",
            MatrixError::NotEditing(_) => "not_editing",
            MatrixError::NotFound { .. } => "not_found",
            MatrixError::NoMatrix => "no_matrix",
            MatrixError::EmptySessionSet => "bad_params",
            MatrixError::Load(_) => "load_failed",
            MatrixError::CommitFailed { .. } => "commit_failed",
        }
    }
}

impl From<GradeInputError> for MatrixError {
    fn from(e: GradeInputError) -> Self {
        MatrixError::Validation(e)
    }
}
