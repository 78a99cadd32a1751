use super::cell::{display_value, parse_grade_input, CellId, CellPhase};
use super::column::{ColumnRef, ResolveCtx};
use super::column_order::{ColumnOrder, ReorderOutcome};
use super::error::MatrixError;
use super::locking::{cell_access, CellAccess};
use super::model::{normalize_sessions, MatrixData, SessionKey, StudentRow};
use super::pipeline::{derive_rows, DerivedRow, GridQuery};
use crate::store::{GradeStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// What the host asks to see. Changing any field means a full reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixQuery {
    pub year: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    pub program_id: String,
    pub semester_id: String,
    pub sessions: Vec<SessionKey>,
}

/// An accepted edit, already applied locally, waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditIntent {
    pub commit_id: u64,
    pub generation: u64,
    pub student_id: String,
    pub ec_id: String,
    pub session: SessionKey,
    pub value: Option<f64>,
    pub year: String,
    pub institution_id: Option<String>,
    pub program_id: String,
    pub semester_id: String,
}

impl EditIntent {
    pub fn cell(&self) -> CellId {
        CellId::new(&self.student_id, &self.ec_id, self.session)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Empty,
    Loading,
    Ready(MatrixData),
    /// Prior data is dropped on failure; a half-matching structure is worse than none.
    Failed(String),
}

impl LoadState {
    pub fn name(&self) -> &'static str {
        match self {
            LoadState::Empty => "empty",
            LoadState::Loading => "loading",
            LoadState::Ready(_) => "ready",
            LoadState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was started before this one finished.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    #[serde(flatten)]
    pub cell: CellId,
    pub ue_id: String,
    pub value: Option<f64>,
    pub display: String,
    #[serde(flatten)]
    pub access: CellAccess,
    #[serde(flatten)]
    pub phase: CellPhase,
    pub bulk: bool,
}

#[derive(Debug)]
pub struct GradeMatrix {
    query: Option<MatrixQuery>,
    generation: u64,
    state: LoadState,
    active_sessions: Vec<SessionKey>,
    column_order: ColumnOrder,
    bulk_edit: HashSet<String>,
    phases: HashMap<CellId, CellPhase>,
    in_flight: HashMap<u64, CellId>,
    next_commit_id: u64,
}

impl Default for GradeMatrix {
    fn default() -> Self {
        Self {
            query: None,
            generation: 0,
            state: LoadState::Empty,
            active_sessions: SessionKey::ALL.to_vec(),
            column_order: ColumnOrder::default(),
            bulk_edit: HashSet::new(),
            phases: HashMap::new(),
            in_flight: HashMap::new(),
            next_commit_id: 1,
        }
    }
}

impl GradeMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn data(&self) -> Result<&MatrixData, MatrixError> {
        match &self.state {
            LoadState::Ready(data) => Ok(data),
            _ => Err(MatrixError::NoMatrix),
        }
    }

    pub fn active_sessions(&self) -> &[SessionKey] {
        &self.active_sessions
    }

    pub fn column_order(&self) -> &ColumnOrder {
        &self.column_order
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    // ===== load lifecycle =====

    /// Starts a load. Any earlier ticket becomes stale and edit buffers are dropped.
    pub fn begin_load(&mut self, query: MatrixQuery) -> Result<LoadTicket, MatrixError> {
        let sessions = normalize_sessions(&query.sessions);
        if sessions.is_empty() {
            return Err(MatrixError::EmptySessionSet);
        }
        let query = MatrixQuery { sessions, ..query };
        if self.query.as_ref() != Some(&query) {
            self.bulk_edit.clear();
        }
        self.generation += 1;
        self.active_sessions = query.sessions.clone();
        self.query = Some(query);
        self.state = LoadState::Loading;
        self.phases.clear();
        Ok(LoadTicket {
            generation: self.generation,
        })
    }

    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<MatrixData, StoreError>,
    ) -> Result<LoadOutcome, MatrixError> {
        if ticket.generation != self.generation {
            info!(
                stale = ticket.generation,
                current = self.generation,
                "discarding stale matrix load"
            );
            return Ok(LoadOutcome::Discarded);
        }
        let data = match result.map_err(|e| e.to_string()).and_then(|d| {
            d.validate()?;
            Ok(d)
        }) {
            Ok(d) => d,
            Err(message) => {
                warn!(error = %message, "matrix load failed");
                self.state = LoadState::Failed(message.clone());
                self.column_order = ColumnOrder::default();
                return Err(MatrixError::Load(message));
            }
        };
        info!(
            generation = self.generation,
            ues = data.structure.ues.len(),
            ecs = data.structure.ec_count(),
            students = data.rows.len(),
            "matrix loaded"
        );
        // A reload of the same structure keeps the user's column order.
        let order = ColumnOrder::reconciled(&data.structure, self.column_order.ids());
        self.column_order = order;
        self.state = LoadState::Ready(data);
        Ok(LoadOutcome::Applied)
    }

    pub fn load(
        &mut self,
        store: &dyn GradeStore,
        query: MatrixQuery,
    ) -> Result<LoadOutcome, MatrixError> {
        let ticket = self.begin_load(query)?;
        let Some(q) = self.query.clone() else {
            return Err(MatrixError::NoMatrix);
        };
        let result = store.load_matrix(&q);
        self.finish_load(ticket, result)
    }

    pub fn reload(&mut self, store: &dyn GradeStore) -> Result<LoadOutcome, MatrixError> {
        let Some(q) = self.query.clone() else {
            return Err(MatrixError::NoMatrix);
        };
        self.load(store, q)
    }

    /// Session toggles are a query change: the grid is reloaded for the new set.
    pub fn change_sessions(
        &mut self,
        store: &dyn GradeStore,
        sessions: &[SessionKey],
    ) -> Result<LoadOutcome, MatrixError> {
        let Some(q) = self.query.clone() else {
            return Err(MatrixError::NoMatrix);
        };
        if normalize_sessions(sessions).is_empty() {
            return Err(MatrixError::EmptySessionSet);
        }
        self.load(
            store,
            MatrixQuery {
                sessions: sessions.to_vec(),
                ..q
            },
        )
    }

    // ===== column order =====

    pub fn restore_column_order(&mut self, saved: &[String]) -> Result<(), MatrixError> {
        let data = self.data()?;
        self.column_order = ColumnOrder::reconciled(&data.structure, saved);
        Ok(())
    }

    pub fn reorder_columns(
        &mut self,
        source_id: &str,
        target_id: &str,
    ) -> Result<ReorderOutcome, MatrixError> {
        self.data()?;
        Ok(self.column_order.reorder(source_id, target_id))
    }

    // ===== cells =====

    fn locate(&self, cell: &CellId) -> Result<(&MatrixData, &StudentRow, String), MatrixError> {
        let data = self.data()?;
        let row = data.row(&cell.student_id).ok_or_else(|| MatrixError::NotFound {
            entity: "student",
            id: cell.student_id.clone(),
        })?;
        let ue = data
            .structure
            .ue_of_ec(&cell.ec_id)
            .ok_or_else(|| MatrixError::NotFound {
                entity: "ec",
                id: cell.ec_id.clone(),
            })?;
        Ok((data, row, ue.id.clone()))
    }

    fn access(&self, cell: &CellId) -> Result<CellAccess, MatrixError> {
        let (data, row, ue_id) = self.locate(cell)?;
        Ok(cell_access(
            &data.structure,
            row,
            &ue_id,
            cell.session,
            &self.active_sessions,
        ))
    }

    fn require_editable(&self, cell: &CellId) -> Result<(), MatrixError> {
        match self.access(cell)? {
            CellAccess::Editable => Ok(()),
            CellAccess::Hidden => Err(MatrixError::SessionInactive(cell.session.as_str())),
            CellAccess::Locked(reason) => Err(MatrixError::CellLocked {
                cell: cell.clone(),
                reason,
            }),
        }
    }

    fn phase_of(&self, cell: &CellId, access: CellAccess) -> CellPhase {
        if matches!(access, CellAccess::Locked(_)) {
            return CellPhase::Display;
        }
        if let Some(p) = self.phases.get(cell) {
            return p.clone();
        }
        if access.is_editable() && self.bulk_edit.contains(&cell.ec_id) {
            return CellPhase::Editing {
                draft: String::new(),
                invalid: false,
            };
        }
        CellPhase::Display
    }

    pub fn cell_view(&self, cell: &CellId) -> Result<CellView, MatrixError> {
        let (data, row, ue_id) = self.locate(cell)?;
        let access = cell_access(
            &data.structure,
            row,
            &ue_id,
            cell.session,
            &self.active_sessions,
        );
        let value = row.grade(&cell.ec_id, cell.session);
        Ok(CellView {
            cell: cell.clone(),
            ue_id,
            value,
            display: display_value(value),
            access,
            phase: self.phase_of(cell, access),
            bulk: self.bulk_edit.contains(&cell.ec_id),
        })
    }

    /// Active-session cells of one student, UE groups in column order.
    pub fn row_cells(&self, student_id: &str) -> Result<Vec<CellView>, MatrixError> {
        let data = self.data()?;
        let mut out = Vec::new();
        for ue_id in self.column_order.ids() {
            let Some(ue) = data.structure.ue(ue_id) else {
                continue;
            };
            for ec in &ue.ecs {
                for session in &self.active_sessions {
                    out.push(self.cell_view(&CellId::new(student_id, &ec.id, *session))?);
                }
            }
        }
        Ok(out)
    }

    pub fn begin_edit(&mut self, cell: &CellId) -> Result<CellPhase, MatrixError> {
        self.require_editable(cell)?;
        let (_, row, _) = self.locate(cell)?;
        let draft = row
            .grade(&cell.ec_id, cell.session)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let phase = CellPhase::Editing {
            draft,
            invalid: false,
        };
        self.phases.insert(cell.clone(), phase.clone());
        Ok(phase)
    }

    pub fn cancel_edit(&mut self, cell: &CellId) -> Result<(), MatrixError> {
        self.locate(cell)?;
        if matches!(self.phases.get(cell), Some(CellPhase::Editing { .. })) {
            self.restore_phase(cell);
        }
        Ok(())
    }

    pub fn set_bulk_edit(&mut self, ec_id: &str, enabled: bool) -> Result<(), MatrixError> {
        let data = self.data()?;
        if data.structure.ue_of_ec(ec_id).is_none() {
            return Err(MatrixError::NotFound {
                entity: "ec",
                id: ec_id.to_string(),
            });
        }
        if enabled {
            self.bulk_edit.insert(ec_id.to_string());
        } else {
            self.bulk_edit.remove(ec_id);
            self.phases
                .retain(|c, p| !(c.ec_id == ec_id && matches!(p, CellPhase::Editing { .. })));
        }
        Ok(())
    }

    pub fn bulk_edit_columns(&self) -> Vec<String> {
        let mut v: Vec<String> = self.bulk_edit.iter().cloned().collect();
        v.sort();
        v
    }

    fn restore_phase(&mut self, cell: &CellId) {
        let pending = self.in_flight.values().filter(|c| *c == cell).count();
        if pending > 0 {
            self.phases
                .insert(cell.clone(), CellPhase::Committing { in_flight: pending });
        } else {
            self.phases.remove(cell);
        }
    }

    /// Validates the typed input and, if accepted, applies it locally and
    /// hands back the intent to persist. Rejected input leaves stored state
    /// alone and keeps the cell in edit mode, flagged invalid.
    pub fn submit(&mut self, cell: &CellId, raw_input: &str) -> Result<EditIntent, MatrixError> {
        self.require_editable(cell)?;
        let editing = matches!(self.phases.get(cell), Some(CellPhase::Editing { .. }))
            || self.bulk_edit.contains(&cell.ec_id);
        if !editing {
            return Err(MatrixError::NotEditing(cell.clone()));
        }

        let value = match parse_grade_input(raw_input) {
            Ok(v) => v,
            Err(e) => {
                debug!(input = raw_input, error = %e, "grade input rejected");
                self.phases.insert(
                    cell.clone(),
                    CellPhase::Editing {
                        draft: raw_input.to_string(),
                        invalid: true,
                    },
                );
                return Err(MatrixError::Validation(e));
            }
        };

        let Some(query) = self.query.clone() else {
            return Err(MatrixError::NoMatrix);
        };
        let LoadState::Ready(data) = &mut self.state else {
            return Err(MatrixError::NoMatrix);
        };
        let Some(row) = data.row_mut(&cell.student_id) else {
            return Err(MatrixError::NotFound {
                entity: "student",
                id: cell.student_id.clone(),
            });
        };
        row.set_grade(&cell.ec_id, cell.session, value);

        let commit_id = self.next_commit_id;
        self.next_commit_id += 1;
        self.in_flight.insert(commit_id, cell.clone());
        self.restore_phase(cell);

        Ok(EditIntent {
            commit_id,
            generation: self.generation,
            student_id: cell.student_id.clone(),
            ec_id: cell.ec_id.clone(),
            session: cell.session,
            value,
            year: query.year,
            institution_id: query.institution_id,
            program_id: query.program_id,
            semester_id: query.semester_id,
        })
    }

    /// Settles a commit. On failure the whole matrix is re-fetched; the
    /// optimistic value is not undone locally.
    pub fn resolve_commit(
        &mut self,
        store: &dyn GradeStore,
        intent: &EditIntent,
        outcome: Result<(), StoreError>,
    ) -> Result<(), MatrixError> {
        let cell = intent.cell();
        self.in_flight.remove(&intent.commit_id);

        match outcome {
            Ok(()) => {
                if !matches!(self.phases.get(&cell), Some(CellPhase::Editing { .. })) {
                    self.restore_phase(&cell);
                }
                debug!(commit_id = intent.commit_id, "grade committed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    commit_id = intent.commit_id,
                    student_id = %intent.student_id,
                    ec_id = %intent.ec_id,
                    session = intent.session.as_str(),
                    error = %e,
                    "grade commit failed, reloading"
                );
                self.phases.insert(cell, CellPhase::RollingBack);
                let reloaded = match self.reload(store) {
                    Ok(_) => true,
                    Err(reload_err) => {
                        warn!(error = %reload_err, "reload after failed commit also failed");
                        false
                    }
                };
                Err(MatrixError::CommitFailed {
                    reason: e.to_string(),
                    reloaded,
                })
            }
        }
    }

    /// Submit, persist and settle in one step.
    pub fn commit(
        &mut self,
        store: &dyn GradeStore,
        cell: &CellId,
        raw_input: &str,
    ) -> Result<EditIntent, MatrixError> {
        let intent = self.submit(cell, raw_input)?;
        let outcome = store.commit_cell(&intent);
        self.resolve_commit(store, &intent, outcome)?;
        Ok(intent)
    }

    // ===== derived views =====

    pub fn derived(&self, query: &GridQuery) -> Result<Vec<DerivedRow>, MatrixError> {
        let data = self.data()?;
        Ok(derive_rows(
            &data.structure,
            &data.rows,
            &self.active_sessions,
            query,
        ))
    }

    /// Numeric values of a column, over the rows a query keeps (all rows when none).
    pub fn column_values(
        &self,
        column: &ColumnRef,
        query: Option<&GridQuery>,
    ) -> Result<Vec<f64>, MatrixError> {
        let data = self.data()?;
        if let Some((entity, id)) = column.missing_ref(&data.structure) {
            return Err(MatrixError::NotFound { entity, id });
        }
        let ctx = ResolveCtx {
            structure: &data.structure,
            active_sessions: &self.active_sessions,
        };
        let rows: Vec<&StudentRow> = match query {
            Some(q) => self
                .derived(q)?
                .into_iter()
                .map(|d| &data.rows[d.index])
                .collect(),
            None => data.rows.iter().collect(),
        };
        Ok(rows
            .into_iter()
            .filter_map(|r| column.resolve_number(ctx, r))
            .collect())
    }
}
