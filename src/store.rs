use crate::matrix::cell::validate_grade;
use crate::matrix::grid::{EditIntent, MatrixQuery};
use crate::matrix::model::{
    Ec, GradeStructure, MatrixData, SessionKey, StudentRow, Ue, UeResult,
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::Invalid(_) => "bad_params",
            StoreError::Database(_) => "db_query_failed",
        }
    }
}

/// Where grades come from and go to. The engine never sees SQL.
pub trait GradeStore {
    fn load_matrix(&self, query: &MatrixQuery) -> Result<MatrixData, StoreError>;
    fn commit_cell(&self, intent: &EditIntent) -> Result<(), StoreError>;
    fn student_profile(&self, student_id: &str) -> Result<StudentProfile, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSummary {
    pub moyenne: Option<f64>,
    pub credits: Option<f64>,
    pub decision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSummary {
    pub structure_id: String,
    pub year: String,
    pub institution_id: Option<String>,
    pub program_id: String,
    pub semester_id: String,
    pub grades_entered: i64,
    pub results: BTreeMap<SessionKey, SemesterSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub matricule: String,
    pub nom: String,
    pub prenoms: String,
    pub photo_url: Option<String>,
    pub enrollments: Vec<EnrollmentSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UeResultInput {
    pub student_id: String,
    pub ue_id: String,
    pub session: SessionKey,
    #[serde(default)]
    pub moyenne: Option<f64>,
    #[serde(default)]
    pub valide: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterResultInput {
    pub student_id: String,
    pub session: SessionKey,
    #[serde(default)]
    pub moyenne: Option<f64>,
    #[serde(default)]
    pub credits: Option<f64>,
    #[serde(default)]
    pub decision: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub ues: usize,
    pub ecs: usize,
    pub students: usize,
    pub grades: usize,
    pub ue_results: usize,
    pub semester_results: usize,
}

fn parse_session(raw: &str) -> Result<SessionKey, StoreError> {
    SessionKey::parse(raw).ok_or_else(|| StoreError::Invalid(format!("unknown session key {}", raw)))
}

fn institution_key(institution_id: Option<&str>) -> &str {
    institution_id.unwrap_or("")
}

fn institution_from_db(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

pub fn find_structure_id(
    conn: &Connection,
    year: &str,
    institution_id: Option<&str>,
    program_id: &str,
    semester_id: &str,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM structures
             WHERE year = ? AND institution_id = ? AND program_id = ? AND semester_id = ?",
            (year, institution_key(institution_id), program_id, semester_id),
            |r| r.get(0),
        )
        .optional()?)
}

fn load_structure(conn: &Connection, structure_id: &str) -> Result<GradeStructure, StoreError> {
    let head: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT year, institution_id, program_id, semester_id FROM structures WHERE id = ?",
            [structure_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((year, institution_id, program_id, semester_id)) = head else {
        return Err(StoreError::NotFound {
            entity: "structure",
            id: structure_id.to_string(),
        });
    };

    let mut ue_stmt = conn.prepare(
        "SELECT id, code, credit FROM ues WHERE structure_id = ? ORDER BY sort_order",
    )?;
    let mut ues: Vec<Ue> = ue_stmt
        .query_map([structure_id], |r| {
            Ok(Ue {
                id: r.get(0)?,
                code: r.get(1)?,
                credit: r.get(2)?,
                ecs: Vec::new(),
            })
        })?
        .collect::<Result<_, _>>()?;

    let mut ec_stmt =
        conn.prepare("SELECT id, code, intitule FROM ecs WHERE ue_id = ? ORDER BY sort_order")?;
    for ue in ues.iter_mut() {
        ue.ecs = ec_stmt
            .query_map([&ue.id], |r| {
                Ok(Ec {
                    id: r.get(0)?,
                    code: r.get(1)?,
                    intitule: r.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
    }

    Ok(GradeStructure {
        id: structure_id.to_string(),
        year,
        institution_id: institution_from_db(institution_id),
        program_id,
        semester_id,
        ues,
    })
}

fn load_rows(conn: &Connection, structure_id: &str) -> Result<Vec<StudentRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.matricule, s.nom, s.prenoms, s.photo_url
         FROM enrollments e JOIN students s ON s.id = e.student_id
         WHERE e.structure_id = ?
         ORDER BY e.sort_order",
    )?;
    let mut rows: Vec<StudentRow> = stmt
        .query_map([structure_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                matricule: r.get(1)?,
                nom: r.get(2)?,
                prenoms: r.get(3)?,
                photo_url: r.get(4)?,
                notes: HashMap::new(),
                ue_results: HashMap::new(),
                semester_averages: HashMap::new(),
                semester_credits: HashMap::new(),
                semester_decisions: HashMap::new(),
            })
        })?
        .collect::<Result<_, _>>()?;
    let index: HashMap<String, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    let mut grades = conn.prepare(
        "SELECT g.student_id, g.ec_id, g.session_key, g.value
         FROM grades g
         JOIN ecs c ON c.id = g.ec_id
         JOIN ues u ON u.id = c.ue_id
         WHERE u.structure_id = ?",
    )?;
    let grade_rows = grades.query_map([structure_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<f64>>(3)?,
        ))
    })?;
    for g in grade_rows {
        let (student_id, ec_id, session, value) = g?;
        let Some(&i) = index.get(&student_id) else {
            continue;
        };
        rows[i].set_grade(&ec_id, parse_session(&session)?, value);
    }

    let mut ue_results = conn.prepare(
        "SELECT r.student_id, r.ue_id, r.session_key, r.moyenne, r.valide
         FROM ue_results r JOIN ues u ON u.id = r.ue_id
         WHERE u.structure_id = ?",
    )?;
    let result_rows = ue_results.query_map([structure_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, Option<f64>>(3)?,
            r.get::<_, i64>(4)?,
        ))
    })?;
    for res in result_rows {
        let (student_id, ue_id, session, moyenne, valide) = res?;
        let Some(&i) = index.get(&student_id) else {
            continue;
        };
        rows[i].ue_results.entry(ue_id).or_default().insert(
            parse_session(&session)?,
            UeResult {
                moyenne,
                valide: valide != 0,
            },
        );
    }

    let mut semester = conn.prepare(
        "SELECT student_id, session_key, moyenne, credits, decision
         FROM semester_results WHERE structure_id = ?",
    )?;
    let semester_rows = semester.query_map([structure_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<f64>>(2)?,
            r.get::<_, Option<f64>>(3)?,
            r.get::<_, Option<String>>(4)?,
        ))
    })?;
    for res in semester_rows {
        let (student_id, session, moyenne, credits, decision) = res?;
        let Some(&i) = index.get(&student_id) else {
            continue;
        };
        let session = parse_session(&session)?;
        let row = &mut rows[i];
        row.semester_averages.insert(session, moyenne);
        row.semester_credits.insert(session, credits);
        row.semester_decisions.insert(session, decision);
    }

    Ok(rows)
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl GradeStore for SqliteStore<'_> {
    fn load_matrix(&self, query: &MatrixQuery) -> Result<MatrixData, StoreError> {
        let Some(structure_id) = find_structure_id(
            self.conn,
            &query.year,
            query.institution_id.as_deref(),
            &query.program_id,
            &query.semester_id,
        )?
        else {
            return Err(StoreError::NotFound {
                entity: "structure",
                id: format!(
                    "{}/{}/{}",
                    query.year, query.program_id, query.semester_id
                ),
            });
        };
        let structure = load_structure(self.conn, &structure_id)?;
        let rows = load_rows(self.conn, &structure_id)?;
        debug!(structure_id = %structure_id, rows = rows.len(), "matrix read from sqlite");
        Ok(MatrixData { structure, rows })
    }

    fn commit_cell(&self, intent: &EditIntent) -> Result<(), StoreError> {
        if let Some(v) = intent.value {
            validate_grade(v).map_err(|e| StoreError::Invalid(e.to_string()))?;
        }

        let Some(structure_id) = find_structure_id(
            self.conn,
            &intent.year,
            intent.institution_id.as_deref(),
            &intent.program_id,
            &intent.semester_id,
        )?
        else {
            return Err(StoreError::NotFound {
                entity: "structure",
                id: format!(
                    "{}/{}/{}",
                    intent.year, intent.program_id, intent.semester_id
                ),
            });
        };

        let ec_structure: Option<String> = self
            .conn
            .query_row(
                "SELECT u.structure_id FROM ecs c JOIN ues u ON u.id = c.ue_id WHERE c.id = ?",
                [&intent.ec_id],
                |r| r.get(0),
            )
            .optional()?;
        if ec_structure.as_deref() != Some(structure_id.as_str()) {
            return Err(StoreError::NotFound {
                entity: "ec",
                id: intent.ec_id.clone(),
            });
        }

        let enrolled: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM enrollments WHERE structure_id = ? AND student_id = ?",
                (&structure_id, &intent.student_id),
                |r| r.get(0),
            )
            .optional()?;
        if enrolled.is_none() {
            return Err(StoreError::NotFound {
                entity: "student",
                id: intent.student_id.clone(),
            });
        }

        let grade_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO grades(id, student_id, ec_id, session_key, value, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, ec_id, session_key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (
                &grade_id,
                &intent.student_id,
                &intent.ec_id,
                intent.session.as_str(),
                intent.value,
                &now,
            ),
        )?;
        info!(
            commit_id = intent.commit_id,
            student_id = %intent.student_id,
            ec_id = %intent.ec_id,
            session = intent.session.as_str(),
            "grade stored"
        );
        Ok(())
    }

    fn student_profile(&self, student_id: &str) -> Result<StudentProfile, StoreError> {
        let head: Option<(String, String, String, Option<String>)> = self
            .conn
            .query_row(
                "SELECT matricule, nom, prenoms, photo_url FROM students WHERE id = ?",
                [student_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((matricule, nom, prenoms, photo_url)) = head else {
            return Err(StoreError::NotFound {
                entity: "student",
                id: student_id.to_string(),
            });
        };

        let mut stmt = self.conn.prepare(
            "SELECT st.id, st.year, st.institution_id, st.program_id, st.semester_id,
                    (SELECT COUNT(*) FROM grades g
                       JOIN ecs c ON c.id = g.ec_id
                       JOIN ues u ON u.id = c.ue_id
                      WHERE u.structure_id = st.id
                        AND g.student_id = e.student_id
                        AND g.value IS NOT NULL)
             FROM enrollments e JOIN structures st ON st.id = e.structure_id
             WHERE e.student_id = ?
             ORDER BY st.year, st.program_id, st.semester_id",
        )?;
        let mut enrollments: Vec<EnrollmentSummary> = stmt
            .query_map([student_id], |r| {
                Ok(EnrollmentSummary {
                    structure_id: r.get(0)?,
                    year: r.get(1)?,
                    institution_id: institution_from_db(r.get(2)?),
                    program_id: r.get(3)?,
                    semester_id: r.get(4)?,
                    grades_entered: r.get(5)?,
                    results: BTreeMap::new(),
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut results = self.conn.prepare(
            "SELECT session_key, moyenne, credits, decision
             FROM semester_results WHERE structure_id = ? AND student_id = ?",
        )?;
        for e in enrollments.iter_mut() {
            let rows = results.query_map((&e.structure_id, student_id), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    SemesterSummary {
                        moyenne: r.get(1)?,
                        credits: r.get(2)?,
                        decision: r.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (session, summary) = row?;
                e.results.insert(parse_session(&session)?, summary);
            }
        }

        Ok(StudentProfile {
            id: student_id.to_string(),
            matricule,
            nom,
            prenoms,
            photo_url,
            enrollments,
        })
    }
}

/// Seeds or replaces a structure and the snapshot of its students. UEs and
/// ECs missing from the new structure are dropped with their grades; the
/// listed students' grades and results for this structure are replaced.
pub fn import_structure(
    conn: &Connection,
    structure: &GradeStructure,
    students: &[StudentRow],
) -> Result<(String, ImportSummary), StoreError> {
    structure.validate().map_err(StoreError::Invalid)?;
    let mut seen = HashSet::new();
    for s in students {
        if !seen.insert(s.id.as_str()) {
            return Err(StoreError::Invalid(format!("duplicate student {}", s.id)));
        }
        s.check_against(structure).map_err(StoreError::Invalid)?;
    }

    let tx = conn.unchecked_transaction()?;

    let existing = find_structure_id(
        &tx,
        &structure.year,
        structure.institution_id.as_deref(),
        &structure.program_id,
        &structure.semester_id,
    )?;
    let structure_id = match existing {
        Some(id) => id,
        None => {
            let id = if structure.id.trim().is_empty() {
                Uuid::new_v4().to_string()
            } else {
                structure.id.clone()
            };
            let taken: Option<i64> = tx
                .query_row("SELECT 1 FROM structures WHERE id = ?", [&id], |r| r.get(0))
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::Invalid(format!(
                    "structure id {} already used by another year/program/semester",
                    id
                )));
            }
            tx.execute(
                "INSERT INTO structures(id, year, institution_id, program_id, semester_id)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &id,
                    &structure.year,
                    institution_key(structure.institution_id.as_deref()),
                    &structure.program_id,
                    &structure.semester_id,
                ),
            )?;
            id
        }
    };
    tx.execute(
        "UPDATE structures SET imported_at = ? WHERE id = ?",
        (chrono::Utc::now().to_rfc3339(), &structure_id),
    )?;

    // UE/EC ids are global; refuse to steal them from another structure.
    for ue in &structure.ues {
        let owner: Option<String> = tx
            .query_row("SELECT structure_id FROM ues WHERE id = ?", [&ue.id], |r| r.get(0))
            .optional()?;
        if owner.as_deref().is_some_and(|o| o != structure_id) {
            return Err(StoreError::Invalid(format!("ue {} belongs to another structure", ue.id)));
        }
        for ec in &ue.ecs {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT u.structure_id FROM ecs c JOIN ues u ON u.id = c.ue_id WHERE c.id = ?",
                    [&ec.id],
                    |r| r.get(0),
                )
                .optional()?;
            if owner.as_deref().is_some_and(|o| o != structure_id) {
                return Err(StoreError::Invalid(format!(
                    "ec {} belongs to another structure",
                    ec.id
                )));
            }
        }
    }

    for (ue_idx, ue) in structure.ues.iter().enumerate() {
        tx.execute(
            "INSERT INTO ues(id, structure_id, code, credit, sort_order) VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               credit = excluded.credit,
               sort_order = excluded.sort_order",
            (&ue.id, &structure_id, &ue.code, ue.credit, ue_idx as i64),
        )?;
        for (ec_idx, ec) in ue.ecs.iter().enumerate() {
            tx.execute(
                "INSERT INTO ecs(id, ue_id, code, intitule, sort_order) VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   ue_id = excluded.ue_id,
                   code = excluded.code,
                   intitule = excluded.intitule,
                   sort_order = excluded.sort_order",
                (&ec.id, &ue.id, &ec.code, &ec.intitule, ec_idx as i64),
            )?;
        }
    }

    // Drop what vanished from the structure, children first.
    let keep_ues: HashSet<&str> = structure.ues.iter().map(|u| u.id.as_str()).collect();
    let keep_ecs: HashSet<&str> = structure
        .ues
        .iter()
        .flat_map(|u| u.ecs.iter().map(|e| e.id.as_str()))
        .collect();
    let old_ecs: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT c.id FROM ecs c JOIN ues u ON u.id = c.ue_id WHERE u.structure_id = ?",
        )?;
        let ids = stmt
            .query_map([&structure_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        ids
    };
    for ec_id in old_ecs.iter().filter(|id| !keep_ecs.contains(id.as_str())) {
        tx.execute("DELETE FROM grades WHERE ec_id = ?", [ec_id])?;
        tx.execute("DELETE FROM ecs WHERE id = ?", [ec_id])?;
    }
    let old_ues: Vec<String> = {
        let mut stmt = tx.prepare("SELECT id FROM ues WHERE structure_id = ?")?;
        let ids = stmt
            .query_map([&structure_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        ids
    };
    for ue_id in old_ues.iter().filter(|id| !keep_ues.contains(id.as_str())) {
        tx.execute("DELETE FROM ue_results WHERE ue_id = ?", [ue_id])?;
        tx.execute("DELETE FROM ues WHERE id = ?", [ue_id])?;
    }

    tx.execute("DELETE FROM enrollments WHERE structure_id = ?", [&structure_id])?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut summary = ImportSummary {
        ues: structure.ues.len(),
        ecs: structure.ec_count(),
        students: students.len(),
        grades: 0,
        ue_results: 0,
        semester_results: 0,
    };
    for (idx, s) in students.iter().enumerate() {
        tx.execute(
            "INSERT INTO students(id, matricule, nom, prenoms, photo_url, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               matricule = excluded.matricule,
               nom = excluded.nom,
               prenoms = excluded.prenoms,
               photo_url = excluded.photo_url,
               updated_at = excluded.updated_at",
            (&s.id, &s.matricule, &s.nom, &s.prenoms, &s.photo_url, &now),
        )?;
        tx.execute(
            "INSERT INTO enrollments(structure_id, student_id, sort_order) VALUES(?, ?, ?)",
            (&structure_id, &s.id, idx as i64),
        )?;

        tx.execute(
            "DELETE FROM grades WHERE student_id = ? AND ec_id IN (
                SELECT c.id FROM ecs c JOIN ues u ON u.id = c.ue_id WHERE u.structure_id = ?)",
            (&s.id, &structure_id),
        )?;
        for (ec_id, sessions) in &s.notes {
            for (session, value) in sessions {
                tx.execute(
                    "INSERT INTO grades(id, student_id, ec_id, session_key, value, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &s.id,
                        ec_id,
                        session.as_str(),
                        value,
                        &now,
                    ),
                )?;
                summary.grades += 1;
            }
        }

        tx.execute(
            "DELETE FROM ue_results WHERE student_id = ? AND ue_id IN (
                SELECT id FROM ues WHERE structure_id = ?)",
            (&s.id, &structure_id),
        )?;
        for (ue_id, sessions) in &s.ue_results {
            for (session, r) in sessions {
                write_ue_result(&tx, &s.id, ue_id, *session, r)?;
                summary.ue_results += 1;
            }
        }

        tx.execute(
            "DELETE FROM semester_results WHERE structure_id = ? AND student_id = ?",
            (&structure_id, &s.id),
        )?;
        for session in SessionKey::ALL {
            let moyenne = s.semester_averages.get(&session).copied().flatten();
            let credits = s.semester_credits.get(&session).copied().flatten();
            let decision = s.semester_decisions.get(&session).cloned().flatten();
            if moyenne.is_none() && credits.is_none() && decision.is_none() {
                continue;
            }
            write_semester_result(
                &tx,
                &structure_id,
                &s.id,
                session,
                moyenne,
                credits,
                decision.as_deref(),
            )?;
            summary.semester_results += 1;
        }
    }

    tx.commit()?;
    info!(
        structure_id = %structure_id,
        ues = summary.ues,
        ecs = summary.ecs,
        students = summary.students,
        grades = summary.grades,
        "structure imported"
    );
    Ok((structure_id, summary))
}

fn write_ue_result(
    conn: &Connection,
    student_id: &str,
    ue_id: &str,
    session: SessionKey,
    r: &UeResult,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ue_results(student_id, ue_id, session_key, moyenne, valide)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, ue_id, session_key) DO UPDATE SET
           moyenne = excluded.moyenne,
           valide = excluded.valide",
        (student_id, ue_id, session.as_str(), r.moyenne, r.valide as i64),
    )?;
    Ok(())
}

fn write_semester_result(
    conn: &Connection,
    structure_id: &str,
    student_id: &str,
    session: SessionKey,
    moyenne: Option<f64>,
    credits: Option<f64>,
    decision: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO semester_results(structure_id, student_id, session_key, moyenne, credits, decision)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(structure_id, student_id, session_key) DO UPDATE SET
           moyenne = excluded.moyenne,
           credits = excluded.credits,
           decision = excluded.decision",
        (structure_id, student_id, session.as_str(), moyenne, credits, decision),
    )?;
    Ok(())
}

/// Aggregates computed elsewhere (UE validation, semester decisions).
pub fn upsert_results(
    conn: &Connection,
    structure_id: &str,
    ue_results: &[UeResultInput],
    semester_results: &[SemesterResultInput],
) -> Result<(usize, usize), StoreError> {
    let structure = load_structure(conn, structure_id)?;
    let enrolled: HashSet<String> = {
        let mut stmt =
            conn.prepare("SELECT student_id FROM enrollments WHERE structure_id = ?")?;
        let ids = stmt
            .query_map([structure_id], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        ids
    };
    let check_student = |id: &str| -> Result<(), StoreError> {
        if enrolled.contains(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                entity: "student",
                id: id.to_string(),
            })
        }
    };

    let tx = conn.unchecked_transaction()?;
    for r in ue_results {
        check_student(&r.student_id)?;
        if structure.ue(&r.ue_id).is_none() {
            return Err(StoreError::NotFound {
                entity: "ue",
                id: r.ue_id.clone(),
            });
        }
        write_ue_result(
            &tx,
            &r.student_id,
            &r.ue_id,
            r.session,
            &UeResult {
                moyenne: r.moyenne,
                valide: r.valide,
            },
        )?;
    }
    for r in semester_results {
        check_student(&r.student_id)?;
        write_semester_result(
            &tx,
            structure_id,
            &r.student_id,
            r.session,
            r.moyenne,
            r.credits,
            r.decision.as_deref(),
        )?;
    }
    tx.commit()?;
    Ok((ue_results.len(), semester_results.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::matrix::model::fixtures::{structure, student, validated};

    fn temp_conn(tag: &str) -> Connection {
        let ws = std::env::temp_dir().join(format!("notesd-store-{}-{}", tag, Uuid::new_v4()));
        db::open_db(&ws).expect("open db")
    }

    fn query() -> MatrixQuery {
        MatrixQuery {
            year: "2024-2025".into(),
            institution_id: None,
            program_id: "L1".into(),
            semester_id: "S1".into(),
            sessions: SessionKey::ALL.to_vec(),
        }
    }

    fn seeded(tag: &str) -> Connection {
        let conn = temp_conn(tag);
        let mut s1 = student("s1", "Rakoto");
        s1.set_grade("a1", SessionKey::Normal, Some(12.0));
        s1.set_grade("a2", SessionKey::Normal, None);
        validated(&mut s1, "ue-b", SessionKey::Normal, true);
        s1.semester_decisions
            .insert(SessionKey::Normal, Some("AJ".to_string()));
        let s2 = student("s2", "Andria");
        import_structure(&conn, &structure(), &[s1, s2]).expect("import");
        conn
    }

    fn intent(student_id: &str, ec_id: &str, value: Option<f64>) -> EditIntent {
        EditIntent {
            commit_id: 1,
            generation: 1,
            student_id: student_id.into(),
            ec_id: ec_id.into(),
            session: SessionKey::Normal,
            value,
            year: "2024-2025".into(),
            institution_id: None,
            program_id: "L1".into(),
            semester_id: "S1".into(),
        }
    }

    #[test]
    fn import_then_load_roundtrips_rows_in_order() {
        let conn = seeded("load");
        let store = SqliteStore::new(&conn);
        let data = store.load_matrix(&query()).expect("load");
        assert_eq!(data.structure.ues.len(), 2);
        assert_eq!(data.structure.ues[0].ecs[1].id, "a2");
        let ids: Vec<&str> = data.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        let s1 = &data.rows[0];
        assert_eq!(s1.grade("a1", SessionKey::Normal), Some(12.0));
        assert!(s1.notes["a2"].contains_key(&SessionKey::Normal));
        assert!(s1.ue_result("ue-b", SessionKey::Normal).unwrap().valide);
        assert_eq!(
            s1.semester_decisions.get(&SessionKey::Normal),
            Some(&Some("AJ".to_string()))
        );
        assert!(data.validate().is_ok());
    }

    #[test]
    fn unknown_query_is_not_found() {
        let conn = seeded("missing");
        let store = SqliteStore::new(&conn);
        let mut q = query();
        q.semester_id = "S2".into();
        assert!(matches!(
            store.load_matrix(&q),
            Err(StoreError::NotFound { entity: "structure", .. })
        ));
    }

    #[test]
    fn commit_upserts_and_rechecks_bounds() {
        let conn = seeded("commit");
        let store = SqliteStore::new(&conn);
        store.commit_cell(&intent("s2", "b1", Some(9.5))).expect("commit");
        store.commit_cell(&intent("s2", "b1", Some(11.0))).expect("recommit");
        let data = store.load_matrix(&query()).expect("load");
        assert_eq!(data.row("s2").unwrap().grade("b1", SessionKey::Normal), Some(11.0));

        assert!(matches!(
            store.commit_cell(&intent("s2", "b1", Some(20.5))),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.commit_cell(&intent("s2", "gone", Some(10.0))),
            Err(StoreError::NotFound { entity: "ec", .. })
        ));
        assert!(matches!(
            store.commit_cell(&intent("ghost", "b1", Some(10.0))),
            Err(StoreError::NotFound { entity: "student", .. })
        ));
    }

    #[test]
    fn reimport_drops_vanished_ecs_and_their_grades() {
        let conn = seeded("reimport");
        let mut s = structure();
        s.ues[0].ecs.pop();
        let mut s1 = student("s1", "Rakoto");
        s1.set_grade("a1", SessionKey::Normal, Some(13.0));
        let (_, summary) = import_structure(&conn, &s, &[s1]).expect("reimport");
        assert_eq!(summary.ecs, 2);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM grades WHERE ec_id = 'a2'", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
        let data = SqliteStore::new(&conn).load_matrix(&query()).expect("load");
        assert_eq!(data.rows.len(), 1);
        assert_eq!(data.rows[0].grade("a1", SessionKey::Normal), Some(13.0));
    }

    #[test]
    fn import_rejects_notes_for_unknown_ec() {
        let conn = temp_conn("reject");
        let mut s1 = student("s1", "Rakoto");
        s1.set_grade("zz", SessionKey::Normal, Some(10.0));
        assert!(matches!(
            import_structure(&conn, &structure(), &[s1]),
            Err(StoreError::Invalid(_))
        ));
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM structures", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }

    #[test]
    fn results_upsert_checks_membership() {
        let conn = seeded("results");
        let ue = vec![UeResultInput {
            student_id: "s2".into(),
            ue_id: "ue-a".into(),
            session: SessionKey::Normal,
            moyenne: Some(11.0),
            valide: true,
        }];
        assert_eq!(upsert_results(&conn, "st", &ue, &[]), Ok((1, 0)));
        let data = SqliteStore::new(&conn).load_matrix(&query()).expect("load");
        assert!(data.row("s2").unwrap().ue_result("ue-a", SessionKey::Normal).unwrap().valide);

        let bad = vec![SemesterResultInput {
            student_id: "nobody".into(),
            session: SessionKey::Normal,
            moyenne: None,
            credits: None,
            decision: Some("VAL".into()),
        }];
        assert!(matches!(
            upsert_results(&conn, "st", &[], &bad),
            Err(StoreError::NotFound { entity: "student", .. })
        ));
    }

    #[test]
    fn profile_lists_enrollments() {
        let conn = seeded("profile");
        let p = SqliteStore::new(&conn).student_profile("s1").expect("profile");
        assert_eq!(p.matricule, "M-s1");
        assert_eq!(p.enrollments.len(), 1);
        assert_eq!(p.enrollments[0].grades_entered, 1);
        assert_eq!(
            p.enrollments[0].results[&SessionKey::Normal].decision.as_deref(),
            Some("AJ")
        );
        assert!(matches!(
            SqliteStore::new(&conn).student_profile("nobody"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
