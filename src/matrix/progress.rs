use super::locking::is_locked;
use super::model::{GradeStructure, SessionKey, StudentRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Completion {
    pub filled: usize,
    pub total: usize,
}

impl Completion {
    pub fn percent(self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        100.0 * self.filled as f64 / self.total as f64
    }
}

/// Counts the cells a student can still be graded on. Locked cells are
/// left out of both counts.
pub fn completion(
    structure: &GradeStructure,
    student: &StudentRow,
    active_sessions: &[SessionKey],
) -> Completion {
    let mut out = Completion::default();
    for ue in &structure.ues {
        for ec in &ue.ecs {
            for session in active_sessions {
                if is_locked(structure, student, &ue.id, &ec.id, *session) {
                    continue;
                }
                out.total += 1;
                if student.grade(&ec.id, *session).is_some() {
                    out.filled += 1;
                }
            }
        }
    }
    out
}

pub fn progress(
    structure: &GradeStructure,
    student: &StudentRow,
    active_sessions: &[SessionKey],
) -> f64 {
    completion(structure, student, active_sessions).percent()
}
