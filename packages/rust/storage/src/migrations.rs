//! SQL migration definitions for the docflow database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: folders, documents, document_summaries",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS folders (
    id         TEXT PRIMARY KEY,
    owner_id   TEXT NOT NULL,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_folders_owner ON folders(owner_id);

-- storage_key is set exactly when the document is READY
CREATE TABLE IF NOT EXISTS documents (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    name        TEXT NOT NULL,
    storage_key TEXT,
    size_bytes  INTEGER NOT NULL,
    folder_id   TEXT REFERENCES folders(id) ON DELETE SET NULL,
    status      TEXT NOT NULL
                CHECK (status IN ('UPLOADING', 'PROCESSING', 'READY', 'FAILED')),
    created_at  TEXT NOT NULL,
    CHECK ((status = 'READY') = (storage_key IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id, status, created_at);
CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder_id);

CREATE TABLE IF NOT EXISTS document_summaries (
    document_id TEXT PRIMARY KEY REFERENCES documents(id) ON DELETE CASCADE,
    summary     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Durable step log: workflow_instances, workflow_steps",
            sql: r#"
CREATE TABLE IF NOT EXISTS workflow_instances (
    id          TEXT PRIMARY KEY,
    workflow    TEXT NOT NULL CHECK (workflow IN ('ingest', 'summarize')),
    document_id TEXT NOT NULL,
    input       BLOB,
    input_json  TEXT NOT NULL,
    status      TEXT NOT NULL
                CHECK (status IN ('PENDING', 'RUNNING', 'COMPLETED', 'FAILED')),
    error       TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflow_instances_status ON workflow_instances(status);
CREATE INDEX IF NOT EXISTS idx_workflow_instances_document ON workflow_instances(document_id);

CREATE TABLE IF NOT EXISTS workflow_steps (
    instance_id TEXT NOT NULL REFERENCES workflow_instances(id) ON DELETE CASCADE,
    step_name   TEXT NOT NULL,
    result      BLOB NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (instance_id, step_name)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Document shares",
            sql: r#"
-- One row per (document, user); sharing again replaces the expiry
CREATE TABLE IF NOT EXISTS document_shares (
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    user_id     TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (document_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_document_shares_user ON document_shares(user_id);

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
    ]
}
