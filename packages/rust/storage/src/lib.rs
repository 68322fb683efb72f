//! libSQL storage layer (embedded, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding documents, folders,
//! summaries and the durable workflow step log (see [`workflows`]).
//!
//! The schema enforces the document invariant that `storage_key` is set if
//! and only if the status is READY, so a buggy caller fails loudly instead of
//! persisting a READY row that points nowhere.

mod migrations;
mod shares;
pub mod workflows;

use std::path::Path;

use chrono::{DateTime, Utc};
use docflow_shared::{
    DocflowError, Document, DocumentQuery, DocumentStatus, DocumentSummary, DocumentUpdate,
    Folder, Result, SortOrder, format_timestamp,
};
use libsql::{Connection, Database, params};

pub use workflows::{InstanceStatus, NewWorkflowInstance, StepRecord, WorkflowInstance, WorkflowKind};

/// Column list matching [`row_to_document`].
const DOCUMENT_COLUMNS: &str =
    "id, owner_id, name, storage_key, size_bytes, folder_id, status, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;
        configure_connection(&conn, true).await?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DocflowError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Open a dedicated connection for a multi-statement transaction.
    ///
    /// The shared connection is used concurrently by background tasks, so a
    /// transaction opened on it would swallow their statements.
    async fn transaction_connection(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(storage_err)?;
        configure_connection(&conn, false).await?;
        Ok(conn)
    }

    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Persist a new document row together with the ingestion workflow
    /// instance that will process it. Either both rows exist afterwards or
    /// neither does.
    pub async fn create_ingestion(
        &self,
        document: &Document,
        instance: &NewWorkflowInstance<'_>,
    ) -> Result<()> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await.map_err(storage_err)?;
        let now = format_timestamp(&Utc::now());

        tx.execute(
            "INSERT INTO documents (id, owner_id, name, storage_key, size_bytes, folder_id, status, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7)",
            params![
                document.id.as_str(),
                document.owner_id.as_str(),
                document.name.as_str(),
                document.size_bytes as i64,
                document.folder_id.as_deref(),
                document.status.as_str(),
                format_timestamp(&document.created_at),
            ],
        )
        .await
        .map_err(storage_err)?;

        tx.execute(
            "INSERT INTO workflow_instances (id, workflow, document_id, input, input_json, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6, ?6)",
            params![
                instance.id,
                instance.kind.as_str(),
                instance.document_id,
                instance.input.map(|b| b.to_vec()),
                instance.input_json,
                now.as_str(),
            ],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Get only the storage key of a document. `None` when the document does
    /// not exist or is not READY.
    pub async fn get_storage_key(&self, id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT storage_key FROM documents WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Set a non-READY status. Returns the owner id, or `None` if the
    /// document no longer exists.
    pub async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<Option<String>> {
        if status == DocumentStatus::Ready {
            return Err(DocflowError::validation(
                "READY requires a storage key; use mark_ready",
            ));
        }
        let mut rows = self
            .conn
            .query(
                "UPDATE documents SET status = ?1 WHERE id = ?2 RETURNING owner_id",
                params![status.as_str(), id],
            )
            .await
            .map_err(storage_err)?;

        returned_owner(&mut rows).await
    }

    /// Move a document to READY, recording its storage key and stored size in
    /// the same statement. Returns the owner id, or `None` if the document no
    /// longer exists.
    pub async fn mark_ready(
        &self,
        id: &str,
        storage_key: &str,
        size_bytes: u64,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE documents SET status = 'READY', storage_key = ?1, size_bytes = ?2
                 WHERE id = ?3 RETURNING owner_id",
                params![storage_key, size_bytes as i64, id],
            )
            .await
            .map_err(storage_err)?;

        returned_owner(&mut rows).await
    }

    /// List READY documents of an owner.
    pub async fn list_documents(
        &self,
        owner_id: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE owner_id = ?1 AND status = 'READY' AND (?2 IS NULL OR folder_id = ?2)
             ORDER BY {}
             LIMIT ?3 OFFSET ?4",
            order_clause(query.order)
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![
                    owner_id,
                    query.folder_id.as_deref(),
                    query.limit as i64,
                    query.offset as i64
                ],
            )
            .await
            .map_err(storage_err)?;

        collect_documents(&mut rows).await
    }

    /// Case-insensitive substring search on document names, any status.
    pub async fn search_documents(
        &self,
        owner_id: &str,
        term: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Document>> {
        let pattern = format!("%{}%", escape_like(term));
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE owner_id = ?1 AND name LIKE ?2 ESCAPE '\\' AND (?3 IS NULL OR folder_id = ?3)
             ORDER BY {}
             LIMIT ?4 OFFSET ?5",
            order_clause(query.order)
        );
        let mut rows = self
            .conn
            .query(
                &sql,
                params![
                    owner_id,
                    pattern.as_str(),
                    query.folder_id.as_deref(),
                    query.limit as i64,
                    query.offset as i64
                ],
            )
            .await
            .map_err(storage_err)?;

        collect_documents(&mut rows).await
    }

    /// Apply a partial update. Returns the updated row, or `None` if the
    /// document does not exist.
    pub async fn update_document(
        &self,
        id: &str,
        update: &DocumentUpdate,
    ) -> Result<Option<Document>> {
        if let Some(name) = &update.name {
            self.conn
                .execute(
                    "UPDATE documents SET name = ?1 WHERE id = ?2",
                    params![name.as_str(), id],
                )
                .await
                .map_err(storage_err)?;
        }
        if let Some(folder_id) = &update.folder_id {
            self.conn
                .execute(
                    "UPDATE documents SET folder_id = ?1 WHERE id = ?2",
                    params![folder_id.as_deref(), id],
                )
                .await
                .map_err(storage_err)?;
        }
        self.get_document(id).await
    }

    /// Delete a document (its summary cascades). Returns the deleted row.
    pub async fn delete_document(&self, id: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("DELETE FROM documents WHERE id = ?1 RETURNING {DOCUMENT_COLUMNS}"),
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Documents still UPLOADING or PROCESSING, created before `cutoff`, with
    /// no pending or running ingestion instance left to finish them.
    pub async fn find_stale_documents(&self, cutoff: &DateTime<Utc>) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents d
             WHERE d.status IN ('UPLOADING', 'PROCESSING')
               AND d.created_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM workflow_instances w
                   WHERE w.document_id = d.id
                     AND w.workflow = 'ingest'
                     AND w.status IN ('PENDING', 'RUNNING')
               )
             ORDER BY d.created_at"
        );
        let mut rows = self
            .conn
            .query(&sql, params![format_timestamp(cutoff)])
            .await
            .map_err(storage_err)?;

        collect_documents(&mut rows).await
    }

    // -----------------------------------------------------------------------
    // Summary operations
    // -----------------------------------------------------------------------

    /// Insert the summary of a document unless one already exists.
    /// Returns `true` when this call created it.
    pub async fn insert_summary_once(&self, document_id: &str, summary: &str) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let affected = self
            .conn
            .execute(
                "INSERT INTO document_summaries (document_id, summary, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(document_id) DO NOTHING",
                params![document_id, summary, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected == 1)
    }

    /// Get the summary of a document.
    pub async fn get_summary(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, summary, created_at FROM document_summaries WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(DocumentSummary {
                document_id: row.get::<String>(0).map_err(storage_err)?,
                summary: row.get::<String>(1).map_err(storage_err)?,
                created_at: parse_timestamp(&row.get::<String>(2).map_err(storage_err)?)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Folder operations
    // -----------------------------------------------------------------------

    /// Insert a new folder.
    pub async fn insert_folder(&self, folder: &Folder) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO folders (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    folder.id.as_str(),
                    folder.owner_id.as_str(),
                    folder.name.as_str(),
                    format_timestamp(&folder.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a folder by ID.
    pub async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, name, created_at FROM folders WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_folder(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all folders of an owner, by name.
    pub async fn list_folders(&self, owner_id: &str) -> Result<Vec<Folder>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_id, name, created_at FROM folders WHERE owner_id = ?1 ORDER BY name",
                params![owner_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_folder(&row)?);
        }
        Ok(results)
    }

    /// Rename a folder owned by `owner_id`.
    pub async fn rename_folder(
        &self,
        id: &str,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<Folder>> {
        let mut rows = self
            .conn
            .query(
                "UPDATE folders SET name = ?1 WHERE id = ?2 AND owner_id = ?3
                 RETURNING id, owner_id, name, created_at",
                params![name, id, owner_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_folder(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Ids of every document filed in a folder, any status.
    pub async fn document_ids_in_folder(&self, folder_id: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM documents WHERE folder_id = ?1",
                params![folder_id],
            )
            .await
            .map_err(storage_err)?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            ids.push(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(ids)
    }

    /// Delete a folder owned by `owner_id`. Its documents are detached.
    pub async fn delete_folder(&self, id: &str, owner_id: &str) -> Result<Option<Folder>> {
        let mut rows = self
            .conn
            .query(
                "DELETE FROM folders WHERE id = ?1 AND owner_id = ?2
                 RETURNING id, owner_id, name, created_at",
                params![id, owner_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_folder(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a libSQL error into the storage variant.
pub(crate) fn storage_err(e: libsql::Error) -> DocflowError {
    DocflowError::Storage(e.to_string())
}

/// Per-connection pragmas. Foreign keys are off by default in SQLite.
async fn configure_connection(conn: &Connection, primary: bool) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", params![])
        .await
        .map_err(storage_err)?;
    // Both pragmas report their new value as a row.
    conn.query("PRAGMA busy_timeout = 5000", params![])
        .await
        .map_err(storage_err)?;
    if primary {
        conn.query("PRAGMA journal_mode = WAL", params![])
            .await
            .map_err(storage_err)?;
    }
    Ok(())
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::NewestFirst => "created_at DESC, id DESC",
        SortOrder::OldestFirst => "created_at ASC, id ASC",
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

async fn returned_owner(rows: &mut libsql::Rows) -> Result<Option<String>> {
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(storage_err(e)),
    }
}

async fn collect_documents(rows: &mut libsql::Rows) -> Result<Vec<Document>> {
    let mut results = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        results.push(row_to_document(&row)?);
    }
    Ok(results)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocflowError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Document`].
fn row_to_document(row: &libsql::Row) -> Result<Document> {
    let status: String = row.get(6).map_err(storage_err)?;
    Ok(Document {
        id: row.get::<String>(0).map_err(storage_err)?,
        owner_id: row.get::<String>(1).map_err(storage_err)?,
        name: row.get::<String>(2).map_err(storage_err)?,
        storage_key: row.get::<String>(3).ok(),
        size_bytes: row.get::<i64>(4).map_err(storage_err)? as u64,
        folder_id: row.get::<String>(5).ok(),
        status: status.parse().map_err(DocflowError::Storage)?,
        created_at: parse_timestamp(&row.get::<String>(7).map_err(storage_err)?)?,
    })
}

fn row_to_folder(row: &libsql::Row) -> Result<Folder> {
    Ok(Folder {
        id: row.get::<String>(0).map_err(storage_err)?,
        owner_id: row.get::<String>(1).map_err(storage_err)?,
        name: row.get::<String>(2).map_err(storage_err)?,
        created_at: parse_timestamp(&row.get::<String>(3).map_err(storage_err)?)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use docflow_shared::new_id;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("docflow_test_{}.db", new_id()));
        Storage::open(&tmp).await.expect("open test db")
    }

    pub(crate) fn new_document(owner: &str, name: &str) -> Document {
        Document {
            id: new_id(),
            owner_id: owner.into(),
            name: name.into(),
            storage_key: None,
            size_bytes: 128,
            folder_id: None,
            status: DocumentStatus::Uploading,
            created_at: Utc::now(),
        }
    }

    pub(crate) async fn insert_document(storage: &Storage, doc: &Document) -> String {
        let instance_id = new_id();
        storage
            .create_ingestion(
                doc,
                &NewWorkflowInstance {
                    id: &instance_id,
                    kind: WorkflowKind::Ingest,
                    document_id: &doc.id,
                    input: Some(b"raw bytes"),
                    input_json: "{}",
                },
            )
            .await
            .expect("create ingestion");
        instance_id
    }

    async fn ready_document(storage: &Storage, owner: &str, name: &str) -> Document {
        let doc = new_document(owner, name);
        insert_document(storage, &doc).await;
        storage
            .mark_ready(&doc.id, &format!("{owner}/{}.pdf", doc.id), 64)
            .await
            .expect("mark ready");
        storage.get_document(&doc.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("docflow_test_{}.db", new_id()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 3);
    }

    #[tokio::test]
    async fn create_ingestion_writes_both_rows() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        let instance_id = insert_document(&storage, &doc).await;

        let found = storage.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(found.status, DocumentStatus::Uploading);
        assert_eq!(found.storage_key, None);
        assert_eq!(found.size_bytes, 128);

        let instance = storage
            .get_workflow_instance(&instance_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.document_id, doc.id);
        assert_eq!(instance.status, InstanceStatus::Pending);
    }

    #[tokio::test]
    async fn create_ingestion_is_atomic() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        let instance_id = insert_document(&storage, &doc).await;

        // Same instance id again: the instance insert fails, so the second
        // document must not be left behind.
        let other = new_document("user-1", "other");
        let result = storage
            .create_ingestion(
                &other,
                &NewWorkflowInstance {
                    id: &instance_id,
                    kind: WorkflowKind::Ingest,
                    document_id: &other.id,
                    input: None,
                    input_json: "{}",
                },
            )
            .await;
        assert!(result.is_err());
        assert!(storage.get_document(&other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_updates_return_owner() {
        let storage = test_storage().await;
        let doc = new_document("user-7", "report");
        insert_document(&storage, &doc).await;

        let owner = storage
            .update_status(&doc.id, DocumentStatus::Processing)
            .await
            .unwrap();
        assert_eq!(owner.as_deref(), Some("user-7"));

        let missing = storage
            .update_status("no-such-doc", DocumentStatus::Failed)
            .await
            .unwrap();
        assert!(missing.is_none());

        assert!(
            storage
                .update_status(&doc.id, DocumentStatus::Ready)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn mark_ready_sets_key_and_size() {
        let storage = test_storage().await;
        let doc = ready_document(&storage, "user-1", "report").await;
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert_eq!(doc.size_bytes, 64);
        let key = storage.get_storage_key(&doc.id).await.unwrap();
        assert_eq!(key, doc.storage_key);
        assert!(key.is_some());
    }

    #[tokio::test]
    async fn storage_key_absent_until_ready() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        insert_document(&storage, &doc).await;
        assert!(storage.get_storage_key(&doc.id).await.unwrap().is_none());
        assert!(storage.get_storage_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn schema_rejects_ready_without_key() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        insert_document(&storage, &doc).await;
        let result = storage
            .conn
            .execute(
                "UPDATE documents SET status = 'READY' WHERE id = ?1",
                params![doc.id.as_str()],
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_returns_only_ready_documents() {
        let storage = test_storage().await;
        let a = ready_document(&storage, "user-1", "alpha").await;
        let b = ready_document(&storage, "user-1", "beta").await;
        let pending = new_document("user-1", "gamma");
        insert_document(&storage, &pending).await;
        ready_document(&storage, "user-2", "delta").await;

        let newest = storage
            .list_documents("user-1", &DocumentQuery::default())
            .await
            .unwrap();
        let ids: Vec<_> = newest.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);

        let oldest = storage
            .list_documents(
                "user-1",
                &DocumentQuery {
                    order: SortOrder::OldestFirst,
                    limit: 1,
                    ..DocumentQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].id, a.id);
    }

    #[tokio::test]
    async fn search_matches_substring_and_escapes_wildcards() {
        let storage = test_storage().await;
        ready_document(&storage, "user-1", "Quarterly_Report").await;
        ready_document(&storage, "user-1", "invoice").await;
        ready_document(&storage, "user-1", "100%_done").await;

        let hits = storage
            .search_documents("user-1", "report", &DocumentQuery::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Quarterly_Report");

        let hits = storage
            .search_documents("user-1", "%", &DocumentQuery::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "100%_done");
    }

    #[tokio::test]
    async fn folder_filter_and_detach_on_delete() {
        let storage = test_storage().await;
        let folder = Folder {
            id: new_id(),
            owner_id: "user-1".into(),
            name: "Contracts".into(),
            created_at: Utc::now(),
        };
        storage.insert_folder(&folder).await.unwrap();

        let doc = ready_document(&storage, "user-1", "lease").await;
        ready_document(&storage, "user-1", "unfiled").await;
        storage
            .update_document(
                &doc.id,
                &DocumentUpdate {
                    name: None,
                    folder_id: Some(Some(folder.id.clone())),
                },
            )
            .await
            .unwrap();

        let in_folder = storage
            .list_documents(
                "user-1",
                &DocumentQuery {
                    folder_id: Some(folder.id.clone()),
                    ..DocumentQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(in_folder.len(), 1);
        assert_eq!(in_folder[0].id, doc.id);
        assert_eq!(
            storage.document_ids_in_folder(&folder.id).await.unwrap(),
            vec![doc.id.clone()]
        );

        // Wrong owner cannot delete
        assert!(storage.delete_folder(&folder.id, "user-2").await.unwrap().is_none());
        storage.delete_folder(&folder.id, "user-1").await.unwrap().unwrap();
        let doc = storage.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.folder_id, None);
    }

    #[tokio::test]
    async fn folder_rename_checks_owner() {
        let storage = test_storage().await;
        let folder = Folder {
            id: new_id(),
            owner_id: "user-1".into(),
            name: "Old".into(),
            created_at: Utc::now(),
        };
        storage.insert_folder(&folder).await.unwrap();

        assert!(
            storage
                .rename_folder(&folder.id, "user-2", "Stolen")
                .await
                .unwrap()
                .is_none()
        );
        let renamed = storage
            .rename_folder(&folder.id, "user-1", "New")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "New");
        assert_eq!(storage.list_folders("user-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn summary_is_created_once_and_cascades() {
        let storage = test_storage().await;
        let doc = ready_document(&storage, "user-1", "report").await;

        assert!(storage.insert_summary_once(&doc.id, "first").await.unwrap());
        assert!(!storage.insert_summary_once(&doc.id, "second").await.unwrap());
        let summary = storage.get_summary(&doc.id).await.unwrap().unwrap();
        assert_eq!(summary.summary, "first");

        let deleted = storage.delete_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(deleted.id, doc.id);
        assert!(storage.get_summary(&doc.id).await.unwrap().is_none());
        assert!(storage.delete_document(&doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_documents_exclude_live_workflows() {
        let storage = test_storage().await;

        let live = new_document("user-1", "live");
        insert_document(&storage, &live).await;

        let orphan = new_document("user-1", "orphan");
        let orphan_instance = insert_document(&storage, &orphan).await;
        storage
            .finish_instance(&orphan_instance, InstanceStatus::Failed, Some("crashed"))
            .await
            .unwrap();

        ready_document(&storage, "user-1", "done").await;

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = storage.find_stale_documents(&cutoff).await.unwrap();
        let ids: Vec<_> = stale.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![orphan.id.as_str()]);

        let earlier = Utc::now() - chrono::Duration::hours(1);
        assert!(storage.find_stale_documents(&earlier).await.unwrap().is_empty());
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
