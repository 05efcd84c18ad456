/// A named block of idempotent DDL.
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const CAMPUS_SCHEMA_V1: Migration = Migration {
    name: "campus_schema_v1",
    sql: "CREATE TABLE IF NOT EXISTS classes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT,
            capacity INTEGER NOT NULL DEFAULT 30
        );

        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            gender TEXT,
            age INTEGER,
            class_id INTEGER REFERENCES classes(id),
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS teachers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT,
            class_id INTEGER REFERENCES classes(id),
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            activity_type TEXT,
            start_time TEXT,
            capacity INTEGER,
            status TEXT NOT NULL DEFAULT 'draft'
        );

        CREATE TABLE IF NOT EXISTS enrollment_leads (
            id INTEGER PRIMARY KEY,
            parent_name TEXT NOT NULL,
            child_age INTEGER,
            source TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id);
        CREATE INDEX IF NOT EXISTS idx_teachers_status ON teachers(status);",
};

pub const MEMORY_SCHEMA_V1: Migration = Migration {
    name: "memory_schema_v1",
    sql: "CREATE TABLE IF NOT EXISTS memory_entries (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conversation_id TEXT,
            content TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'turn',
            metadata TEXT DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memory_user_created_at
            ON memory_entries(user_id, created_at);",
};
