use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Exam sitting. The set is fixed; which sittings are shown is a view concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKey {
    Normal,
    #[serde(alias = "retake")]
    Rattrapage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: SessionKey,
    pub short_label: &'static str,
    pub long_label: &'static str,
    pub color: &'static str,
    pub priority: u8,
}

impl SessionKey {
    pub const ALL: [SessionKey; 2] = [SessionKey::Normal, SessionKey::Rattrapage];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKey::Normal => "normal",
            SessionKey::Rattrapage => "rattrapage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(SessionKey::Normal),
            "rattrapage" | "retake" => Some(SessionKey::Rattrapage),
            _ => None,
        }
    }

    pub fn meta(self) -> Session {
        match self {
            SessionKey::Normal => Session {
                key: self,
                short_label: "SN",
                long_label: "Session normale",
                color: "#2563eb",
                priority: 1,
            },
            SessionKey::Rattrapage => Session {
                key: self,
                short_label: "SR",
                long_label: "Session de rattrapage",
                color: "#d97706",
                priority: 2,
            },
        }
    }
}

/// Orders by priority and drops duplicates. Callers reject the empty result.
pub fn normalize_sessions(sessions: &[SessionKey]) -> Vec<SessionKey> {
    let mut out: Vec<SessionKey> = Vec::with_capacity(sessions.len());
    for s in sessions {
        if !out.contains(s) {
            out.push(*s);
        }
    }
    out.sort_by_key(|s| s.meta().priority);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub intitule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ue {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub credit: f64,
    #[serde(default)]
    pub ecs: Vec<Ec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStructure {
    #[serde(default)]
    pub id: String,
    pub year: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    pub program_id: String,
    pub semester_id: String,
    #[serde(default)]
    pub ues: Vec<Ue>,
}

impl GradeStructure {
    pub fn ue(&self, ue_id: &str) -> Option<&Ue> {
        self.ues.iter().find(|u| u.id == ue_id)
    }

    /// UE owning the EC. Structures are validated on load so the owner is unique.
    pub fn ue_of_ec(&self, ec_id: &str) -> Option<&Ue> {
        self.ues
            .iter()
            .find(|u| u.ecs.iter().any(|e| e.id == ec_id))
    }

    pub fn ec_count(&self) -> usize {
        self.ues.iter().map(|u| u.ecs.len()).sum()
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut ue_ids: HashSet<&str> = HashSet::new();
        let mut ec_ids: HashSet<&str> = HashSet::new();
        for ue in &self.ues {
            if ue.id.trim().is_empty() {
                return Err("UE id must not be empty".to_string());
            }
            if !ue_ids.insert(ue.id.as_str()) {
                return Err(format!("duplicate UE id {}", ue.id));
            }
            for ec in &ue.ecs {
                if ec.id.trim().is_empty() {
                    return Err(format!("EC id must not be empty (UE {})", ue.id));
                }
                if !ec_ids.insert(ec.id.as_str()) {
                    return Err(format!("EC {} belongs to more than one UE", ec.id));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UeResult {
    #[serde(default)]
    pub moyenne: Option<f64>,
    #[serde(default)]
    pub valide: bool,
}

pub type SessionGrades = HashMap<SessionKey, Option<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRow {
    #[serde(rename = "etudiant_id")]
    pub id: String,
    pub nom: String,
    #[serde(default)]
    pub prenoms: String,
    #[serde(default)]
    pub matricule: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub notes: HashMap<String, SessionGrades>,
    #[serde(rename = "resultats_ue", default)]
    pub ue_results: HashMap<String, HashMap<SessionKey, UeResult>>,
    #[serde(rename = "moyennes_semestre", default)]
    pub semester_averages: HashMap<SessionKey, Option<f64>>,
    #[serde(rename = "credits_semestre", default)]
    pub semester_credits: HashMap<SessionKey, Option<f64>>,
    #[serde(rename = "resultats_semestre", default)]
    pub semester_decisions: HashMap<SessionKey, Option<String>>,
}

impl StudentRow {
    pub fn grade(&self, ec_id: &str, session: SessionKey) -> Option<f64> {
        self.notes
            .get(ec_id)
            .and_then(|by_session| by_session.get(&session))
            .copied()
            .flatten()
    }

    pub fn set_grade(&mut self, ec_id: &str, session: SessionKey, value: Option<f64>) {
        self.notes
            .entry(ec_id.to_string())
            .or_default()
            .insert(session, value);
    }

    pub fn ue_result(&self, ue_id: &str, session: SessionKey) -> Option<&UeResult> {
        self.ue_results
            .get(ue_id)
            .and_then(|by_session| by_session.get(&session))
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.nom, self.prenoms).trim().to_string()
    }

    /// Every note and UE result must point into the structure.
    pub fn check_against(&self, structure: &GradeStructure) -> Result<(), String> {
        for ec_id in self.notes.keys() {
            if structure.ue_of_ec(ec_id).is_none() {
                return Err(format!(
                    "student {} has notes for unknown EC {}",
                    self.id, ec_id
                ));
            }
        }
        for ue_id in self.ue_results.keys() {
            if structure.ue(ue_id).is_none() {
                return Err(format!(
                    "student {} has results for unknown UE {}",
                    self.id, ue_id
                ));
            }
        }
        for by_session in self.notes.values() {
            for v in by_session.values().flatten() {
                if !v.is_finite() || !(0.0..=20.0).contains(v) {
                    return Err(format!("student {} has out-of-range grade {}", self.id, v));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    pub structure: GradeStructure,
    pub rows: Vec<StudentRow>,
}

impl MatrixData {
    pub fn validate(&self) -> Result<(), String> {
        self.structure.validate()?;
        let mut seen: HashSet<&str> = HashSet::new();
        for row in &self.rows {
            if !seen.insert(row.id.as_str()) {
                return Err(format!("duplicate student {}", row.id));
            }
            row.check_against(&self.structure)?;
        }
        Ok(())
    }

    pub fn row(&self, student_id: &str) -> Option<&StudentRow> {
        self.rows.iter().find(|r| r.id == student_id)
    }

    pub fn row_mut(&mut self, student_id: &str) -> Option<&mut StudentRow> {
        self.rows.iter_mut().find(|r| r.id == student_id)
    }
}
