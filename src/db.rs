use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS instruments(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    // Activities live and die with their instrument.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            instrument_id TEXT NOT NULL,
            period TEXT NOT NULL,
            name TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            instrument_key TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(instrument_id) REFERENCES instruments(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_instrument ON activities(instrument_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_outcomes(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            weight REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS criteria(
            id TEXT PRIMARY KEY,
            outcome_id TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            weight REAL NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(outcome_id) REFERENCES learning_outcomes(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criteria_outcome ON criteria(outcome_id, sort_order)",
        [],
    )?;

    // activity_ids is a JSON array. Ids are not foreign keys: an association
    // may outlive the activity it points at.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS criterion_associations(
            id TEXT PRIMARY KEY,
            criterion_id TEXT NOT NULL,
            unit_of_work TEXT NOT NULL,
            activity_ids TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(criterion_id) REFERENCES criteria(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_criterion_associations_criterion
         ON criterion_associations(criterion_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS services(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            trimester TEXT NOT NULL,
            date TEXT,
            locked INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS service_evaluations(
            service_id TEXT PRIMARY KEY,
            individual_json TEXT NOT NULL,
            groups_json TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(service_id) REFERENCES services(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS practical_exams(
            student_id TEXT NOT NULL,
            exam_period TEXT NOT NULL,
            cells_json TEXT NOT NULL,
            final_score REAL,
            updated_at TEXT,
            PRIMARY KEY(student_id, exam_period),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_grades(
            student_id TEXT NOT NULL,
            period TEXT NOT NULL,
            instrument_key TEXT NOT NULL,
            value REAL,
            updated_at TEXT,
            PRIMARY KEY(student_id, period, instrument_key),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
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
        None => Ok(None),
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("settings '{}' holds invalid JSON", key))?;
            Ok(Some(value))
        }
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

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn settings_round_trip_and_delete() {
        let ws = temp_workspace("gradebook-settings");
        let conn = open_db(&ws).expect("open db");
        assert_eq!(settings_get_json(&conn, "k").expect("get"), None);

        settings_set_json(&conn, "k", &json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &json!({ "a": 2 })).expect("overwrite");
        assert_eq!(
            settings_get_json(&conn, "k").expect("get"),
            Some(json!({ "a": 2 }))
        );

        settings_delete(&conn, "k").expect("delete");
        assert_eq!(settings_get_json(&conn, "k").expect("get"), None);
    }

    #[test]
    fn deleting_an_instrument_removes_its_activities() {
        let ws = temp_workspace("gradebook-cascade");
        let conn = open_db(&ws).expect("open db");
        conn.execute(
            "INSERT INTO instruments(id, name, weight, sort_order) VALUES('i1','Obs',40,0)",
            [],
        )
        .expect("instrument");
        conn.execute(
            "INSERT INTO activities(id, instrument_id, period, name, source_kind, instrument_key, sort_order)
             VALUES('a1','i1','t1','Act','manual','examen1',0)",
            [],
        )
        .expect("activity");
        conn.execute("DELETE FROM instruments WHERE id = 'i1'", [])
            .expect("delete instrument");
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM activities", [], |r| r.get(0))
            .expect("count");
        assert_eq!(left, 0);
    }
}
