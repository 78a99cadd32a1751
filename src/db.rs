use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "notesd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // institution_id is '' when the structure is not tied to an institution,
    // so the natural key stays unique.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS structures(
            id TEXT PRIMARY KEY,
            year TEXT NOT NULL,
            institution_id TEXT NOT NULL DEFAULT '',
            program_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            imported_at TEXT,
            UNIQUE(year, institution_id, program_id, semester_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ues(
            id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            code TEXT NOT NULL,
            credit REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES structures(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ues_structure ON ues(structure_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ecs(
            id TEXT PRIMARY KEY,
            ue_id TEXT NOT NULL,
            code TEXT NOT NULL,
            intitule TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(ue_id) REFERENCES ues(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ecs_ue ON ecs(ue_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            matricule TEXT NOT NULL,
            nom TEXT NOT NULL,
            prenoms TEXT NOT NULL,
            photo_url TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            structure_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(structure_id, student_id),
            FOREIGN KEY(structure_id) REFERENCES structures(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    // value NULL = explicitly cleared; no row = never graded.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            ec_id TEXT NOT NULL,
            session_key TEXT NOT NULL,
            value REAL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(ec_id) REFERENCES ecs(id),
            UNIQUE(student_id, ec_id, session_key),
            CHECK(value IS NULL OR (value >= 0 AND value <= 20))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_ec ON grades(ec_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ue_results(
            student_id TEXT NOT NULL,
            ue_id TEXT NOT NULL,
            session_key TEXT NOT NULL,
            moyenne REAL,
            valide INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(student_id, ue_id, session_key),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(ue_id) REFERENCES ues(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_results(
            structure_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            session_key TEXT NOT NULL,
            moyenne REAL,
            credits REAL,
            decision TEXT,
            PRIMARY KEY(structure_id, student_id, session_key),
            FOREIGN KEY(structure_id) REFERENCES structures(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text).with_context(|| format!("setting {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
