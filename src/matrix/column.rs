use super::model::{GradeStructure, SessionKey, StudentRow};
use super::progress::progress;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A filterable/sortable column of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnRef {
    Name,
    Matricule,
    Progress,
    Note { ec_id: String, session: SessionKey },
    UeAverage { ue_id: String, session: SessionKey },
    Average { session: SessionKey },
    Credits { session: SessionKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Number(f64),
}

impl ColumnValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ColumnValue::Number(v) => Some(*v),
            ColumnValue::Text(_) => None,
        }
    }
}

/// Everything a column value may depend on besides the row itself.
#[derive(Debug, Clone, Copy)]
pub struct ResolveCtx<'a> {
    pub structure: &'a GradeStructure,
    pub active_sessions: &'a [SessionKey],
}

impl ColumnRef {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnRef::Name | ColumnRef::Matricule)
    }

    /// Single source of truth for what a column holds for a student. Filters,
    /// sorting and column statistics all go through here.
    pub fn resolve(&self, ctx: ResolveCtx<'_>, row: &StudentRow) -> Option<ColumnValue> {
        match self {
            ColumnRef::Name => Some(ColumnValue::Text(row.display_name())),
            ColumnRef::Matricule => Some(ColumnValue::Text(row.matricule.clone())),
            ColumnRef::Progress => Some(ColumnValue::Number(progress(
                ctx.structure,
                row,
                ctx.active_sessions,
            ))),
            ColumnRef::Note { ec_id, session } => {
                row.grade(ec_id, *session).map(ColumnValue::Number)
            }
            ColumnRef::UeAverage { ue_id, session } => row
                .ue_result(ue_id, *session)
                .and_then(|r| r.moyenne)
                .map(ColumnValue::Number),
            ColumnRef::Average { session } => row
                .semester_averages
                .get(session)
                .copied()
                .flatten()
                .map(ColumnValue::Number),
            ColumnRef::Credits { session } => row
                .semester_credits
                .get(session)
                .copied()
                .flatten()
                .map(ColumnValue::Number),
        }
    }

    /// The EC or UE a column names when the structure has no such id.
    pub fn missing_ref(&self, structure: &GradeStructure) -> Option<(&'static str, String)> {
        match self {
            ColumnRef::Note { ec_id, .. } if structure.ue_of_ec(ec_id).is_none() => {
                Some(("ec", ec_id.clone()))
            }
            ColumnRef::UeAverage { ue_id, .. } if structure.ue(ue_id).is_none() => {
                Some(("ue", ue_id.clone()))
            }
            _ => None,
        }
    }

    pub fn resolve_number(&self, ctx: ResolveCtx<'_>, row: &StudentRow) -> Option<f64> {
        self.resolve(ctx, row)
            .and_then(|v| v.as_number())
            .filter(|v| v.is_finite())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown column key: {0}")]
pub struct ColumnKeyError(pub String);

fn split_id_session(rest: &str, raw: &str) -> Result<(String, SessionKey), ColumnKeyError> {
    let (id, session) = rest
        .rsplit_once('-')
        .ok_or_else(|| ColumnKeyError(raw.to_string()))?;
    let session = SessionKey::parse(session).ok_or_else(|| ColumnKeyError(raw.to_string()))?;
    if id.is_empty() {
        return Err(ColumnKeyError(raw.to_string()));
    }
    Ok((id.to_string(), session))
}

/// Wire keys as the grid header emits them: `NOTE-<ecId>-<session>`,
/// `MOYUE-<ueId>-<session>`, `MOY-<session>`, `CRED-<session>`, `NAME`,
/// `MATRICULE`, `PROGRESS`. Ids may contain `-`; the session is the last segment.
impl FromStr for ColumnRef {
    type Err = ColumnKeyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim();
        let bad = || ColumnKeyError(raw.to_string());
        match key.to_ascii_uppercase().as_str() {
            "NAME" | "NOM" => return Ok(ColumnRef::Name),
            "MATRICULE" => return Ok(ColumnRef::Matricule),
            "PROGRESS" => return Ok(ColumnRef::Progress),
            _ => {}
        }
        if let Some(rest) = key.strip_prefix("NOTE-") {
            let (ec_id, session) = split_id_session(rest, raw)?;
            return Ok(ColumnRef::Note { ec_id, session });
        }
        if let Some(rest) = key.strip_prefix("MOYUE-") {
            let (ue_id, session) = split_id_session(rest, raw)?;
            return Ok(ColumnRef::UeAverage { ue_id, session });
        }
        if let Some(rest) = key.strip_prefix("MOY-") {
            let session = SessionKey::parse(rest).ok_or_else(bad)?;
            return Ok(ColumnRef::Average { session });
        }
        if let Some(rest) = key.strip_prefix("CRED-") {
            let session = SessionKey::parse(rest).ok_or_else(bad)?;
            return Ok(ColumnRef::Credits { session });
        }
        Err(bad())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Name => write!(f, "NAME"),
            ColumnRef::Matricule => write!(f, "MATRICULE"),
            ColumnRef::Progress => write!(f, "PROGRESS"),
            ColumnRef::Note { ec_id, session } => write!(f, "NOTE-{}-{}", ec_id, session.as_str()),
            ColumnRef::UeAverage { ue_id, session } => {
                write!(f, "MOYUE-{}-{}", ue_id, session.as_str())
            }
            ColumnRef::Average { session } => write!(f, "MOY-{}", session.as_str()),
            ColumnRef::Credits { session } => write!(f, "CRED-{}", session.as_str()),
        }
    }
}
