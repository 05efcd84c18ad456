use std::path::Path;
use std::sync::Arc;

use campus_common::{Error, Result};
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::migrations::CAMPUS_SCHEMA_V1;

/// Hard cap on rows returned by any read.
const MAX_ROWS: usize = 500;

/// Business tables. Both readers are confined to these.
const READABLE_ENTITIES: &[&str] = &[
    "students",
    "teachers",
    "classes",
    "activities",
    "enrollment_leads",
];

const FORBIDDEN_SQL: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "pragma",
    "replace", "vacuum",
];

pub type SharedCampusStore = Arc<Mutex<CampusStore>>;

/// Column names plus one JSON object per row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub truncated: bool,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Headline figures injected into the assistant's system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrganizationStatus {
    pub total_students: i64,
    pub active_students: i64,
    pub total_teachers: i64,
    pub active_teachers: i64,
    pub total_classes: i64,
    pub total_capacity: i64,
    pub upcoming_activities: i64,
    pub open_leads: i64,
}

impl OrganizationStatus {
    /// Active students over total class capacity, in percent.
    pub fn occupancy_percent(&self) -> f64 {
        if self.total_capacity <= 0 {
            return 0.0;
        }
        (self.active_students as f64 / self.total_capacity as f64) * 100.0
    }
}

/// Read access to the campus business tables.
pub struct CampusStore {
    conn: Connection,
}

impl CampusStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening campus store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn into_shared(self) -> SharedCampusStore {
        Arc::new(Mutex::new(self))
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(CAMPUS_SCHEMA_V1.sql)
            .map_err(|e| {
                Error::Database(format!("{} migration failed: {e}", CAMPUS_SCHEMA_V1.name))
            })?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a caller-supplied `SELECT` with positional parameters.
    ///
    /// Anything that is not a single read-only statement is rejected before
    /// it reaches SQLite. While the statement is prepared an authorizer
    /// denies reads of any table outside the business tables, so
    /// subqueries, joins and CTEs cannot reach other data in the file.
    pub fn query_readonly(&self, sql: &str, params: &[serde_json::Value]) -> Result<QueryRows> {
        let sql = validate_select(sql)?;
        self.conn.authorizer(Some(business_tables_only));
        let prepared = self.conn.prepare(sql);
        self.conn
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        let mut stmt =
            prepared.map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        if !stmt.readonly() {
            return Err(Error::Database(
                "only read-only statements are allowed".to_string(),
            ));
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let bound: Vec<SqlValue> = params.iter().map(json_to_sql).collect();

        let mut rows = stmt
            .query(params_from_iter(bound.iter()))
            .map_err(|e| Error::Database(format!("query failed: {e}")))?;

        let mut out = QueryRows {
            columns: columns.clone(),
            ..Default::default()
        };
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
        {
            if out.rows.len() >= MAX_ROWS {
                out.truncated = true;
                break;
            }
            let mut object = serde_json::Map::new();
            for (idx, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| Error::Database(format!("failed to read column: {e}")))?;
                object.insert(name.clone(), sql_to_json(value));
            }
            out.rows.push(serde_json::Value::Object(object));
        }

        debug!("read-only query returned {} row(s)", out.rows.len());
        Ok(out)
    }

    /// List rows of one entity without any filtering.
    pub fn list_entity(&self, entity: &str, limit: usize) -> Result<QueryRows> {
        let entity = entity.trim().to_ascii_lowercase();
        if !READABLE_ENTITIES.contains(&entity.as_str()) {
            return Err(Error::Database(format!("unknown entity '{entity}'")));
        }
        let limit = limit.clamp(1, MAX_ROWS);
        self.query_readonly(&format!("SELECT * FROM {entity} LIMIT {limit}"), &[])
    }

    pub fn organization_status(&self) -> Result<OrganizationStatus> {
        let count = |sql: &str| -> Result<i64> {
            self.conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map_err(|e| Error::Database(format!("status query failed: {e}")))
        };

        Ok(OrganizationStatus {
            total_students: count("SELECT count(*) FROM students")?,
            active_students: count("SELECT count(*) FROM students WHERE status = 'active'")?,
            total_teachers: count("SELECT count(*) FROM teachers")?,
            active_teachers: count("SELECT count(*) FROM teachers WHERE status = 'active'")?,
            total_classes: count("SELECT count(*) FROM classes")?,
            total_capacity: count("SELECT COALESCE(SUM(capacity), 0) FROM classes")?,
            upcoming_activities: count(
                "SELECT count(*) FROM activities WHERE status IN ('published', 'draft')",
            )?,
            open_leads: count("SELECT count(*) FROM enrollment_leads WHERE status != 'closed'")?,
        })
    }

    /// Insert a small demo data set. Used by `serve --demo` and tests.
    pub fn seed_demo(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "INSERT INTO classes (id, name, grade, capacity) VALUES
                    (1, '小一班', 'small', 25),
                    (2, '中一班', 'middle', 30),
                    (3, '大一班', 'large', 30);
                 INSERT INTO students (name, gender, age, class_id, status) VALUES
                    ('王小明', 'male', 4, 1, 'active'),
                    ('李小红', 'female', 4, 1, 'active'),
                    ('张伟', 'male', 5, 2, 'active'),
                    ('刘芳', 'female', 5, 2, 'active'),
                    ('陈杰', 'male', 6, 3, 'graduated');
                 INSERT INTO teachers (name, subject, class_id, status) VALUES
                    ('赵老师', 'art', 1, 'active'),
                    ('钱老师', 'music', 2, 'active'),
                    ('孙老师', 'sports', 3, 'active'),
                    ('周老师', 'english', NULL, 'resigned');
                 INSERT INTO activities (title, activity_type, start_time, capacity, status) VALUES
                    ('春季亲子运动会', 'sports', '2026-04-12T09:00:00', 80, 'published'),
                    ('绘画展', 'art', '2026-05-01T14:00:00', 40, 'draft');
                 INSERT INTO enrollment_leads (parent_name, child_age, source, status) VALUES
                    ('吴女士', 3, 'wechat', 'new'),
                    ('郑先生', 4, 'referral', 'closed');",
            )
            .map_err(|e| Error::Database(format!("failed to seed demo data: {e}")))?;
        info!("seeded demo campus data");
        Ok(())
    }
}

fn business_tables_only(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Select | AuthAction::Function { .. } | AuthAction::Recursive => {
            Authorization::Allow
        }
        AuthAction::Read { table_name, .. }
            if READABLE_ENTITIES.contains(&table_name.to_ascii_lowercase().as_str()) =>
        {
            Authorization::Allow
        }
        _ => Authorization::Deny,
    }
}

/// Blank out quoted spans so keyword and separator checks only see SQL
/// structure. Doubled quotes inside a literal toggle out and back in.
fn strip_quoted(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut closing: Option<char> = None;
    for c in sql.chars() {
        match closing {
            Some(end) => {
                if c == end {
                    closing = None;
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
            None => {
                closing = match c {
                    '\'' => Some('\''),
                    '"' => Some('"'),
                    '`' => Some('`'),
                    '[' => Some(']'),
                    _ => None,
                };
                out.push(c);
            }
        }
    }
    out
}

fn validate_select(sql: &str) -> Result<&str> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(Error::Database("empty query".to_string()));
    }

    let lowered = strip_quoted(trimmed).to_ascii_lowercase();
    if lowered.contains(';') {
        return Err(Error::Database(
            "multiple statements are not allowed".to_string(),
        ));
    }
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(Error::Database(
            "only SELECT queries are allowed".to_string(),
        ));
    }

    let forbidden = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .find(|word| FORBIDDEN_SQL.contains(word));
    if let Some(word) = forbidden {
        return Err(Error::Database(format!(
            "keyword '{word}' is not allowed in read-only queries"
        )));
    }

    Ok(trimmed)
}

fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> CampusStore {
        let store = CampusStore::in_memory().expect("in-memory store should open");
        store.seed_demo().expect("seed should succeed");
        store
    }

    #[test]
    fn select_with_params_returns_rows() {
        let store = seeded();
        let rows = store
            .query_readonly(
                "SELECT name FROM students WHERE gender = ?1 ORDER BY name",
                &[json!("male")],
            )
            .unwrap();
        assert_eq!(rows.columns, vec!["name".to_string()]);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn aggregate_query_counts_active_teachers() {
        let store = seeded();
        let rows = store
            .query_readonly(
                "SELECT count(*) AS total FROM teachers WHERE status = 'active'",
                &[],
            )
            .unwrap();
        assert_eq!(rows.rows[0]["total"], json!(3));
    }

    #[test]
    fn rejects_writes() {
        let store = seeded();
        for sql in [
            "DELETE FROM students",
            "SELECT 1; DROP TABLE students",
            "UPDATE students SET name = 'x'",
            "WITH x AS (SELECT 1) DELETE FROM students",
        ] {
            assert!(store.query_readonly(sql, &[]).is_err(), "accepted: {sql}");
        }
    }

    #[test]
    fn keywords_inside_literals_are_data() {
        let store = seeded();
        let rows = store
            .query_readonly(
                "SELECT name FROM students WHERE name LIKE '%create%' OR name = 'a;b'",
                &[],
            )
            .unwrap();
        assert!(rows.is_empty());
        assert!(store
            .query_readonly("SELECT name FROM students WHERE name = 'x'; DROP TABLE students", &[])
            .is_err());
    }

    #[test]
    fn tables_outside_the_business_set_are_refused() {
        let store = seeded();
        store
            .connection()
            .execute_batch("CREATE TABLE private_notes (body TEXT); INSERT INTO private_notes VALUES ('secret');")
            .unwrap();
        for sql in [
            "SELECT body FROM private_notes",
            "SELECT name FROM sqlite_master",
            "SELECT s.name FROM students s JOIN private_notes p ON 1 = 1",
            "WITH n AS (SELECT body FROM private_notes) SELECT * FROM n",
            "SELECT (SELECT body FROM private_notes) AS leaked",
        ] {
            assert!(store.query_readonly(sql, &[]).is_err(), "accepted: {sql}");
        }
        assert!(store.query_readonly("SELECT count(*) FROM students", &[]).is_ok());
    }

    #[test]
    fn trailing_semicolon_is_tolerated() {
        let store = seeded();
        assert!(store.query_readonly("SELECT 1;", &[]).is_ok());
    }

    #[test]
    fn list_entity_rejects_unknown_tables() {
        let store = seeded();
        assert!(store.list_entity("sqlite_master", 10).is_err());
        let rows = store.list_entity("Classes", 10).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn organization_status_counts() {
        let store = seeded();
        let status = store.organization_status().unwrap();
        assert_eq!(status.total_students, 5);
        assert_eq!(status.active_students, 4);
        assert_eq!(status.active_teachers, 3);
        assert_eq!(status.total_capacity, 85);
        assert_eq!(status.open_leads, 1);
        assert!(status.occupancy_percent() > 4.0);
    }

    #[test]
    fn empty_store_has_zero_occupancy() {
        let store = CampusStore::in_memory().unwrap();
        let status = store.organization_status().unwrap();
        assert_eq!(status, OrganizationStatus::default());
        assert_eq!(status.occupancy_percent(), 0.0);
    }

    #[test]
    fn open_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CampusStore::open(&dir.path().join("campus.db")).unwrap();
        store.seed_demo().unwrap();
        assert_eq!(store.list_entity("students", 2).unwrap().len(), 2);
    }
}
