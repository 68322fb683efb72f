//! Durable step log backing the workflow executor.
//!
//! A workflow instance is one run of a named workflow for one document. Each
//! step that completes records its serialized result under
//! `(instance_id, step_name)`; a resumed instance replays recorded results
//! instead of executing the step again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docflow_shared::{DocflowError, Result, format_timestamp};
use libsql::params;

use crate::{Storage, parse_timestamp, storage_err};

/// Which workflow an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowKind {
    Ingest,
    Summarize,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Self::Ingest),
            "summarize" => Ok(Self::Summarize),
            other => Err(format!("unknown workflow: {other}")),
        }
    }
}

/// Lifecycle of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// Parameters for a new workflow instance.
#[derive(Debug, Clone, Copy)]
pub struct NewWorkflowInstance<'a> {
    pub id: &'a str,
    pub kind: WorkflowKind,
    pub document_id: &'a str,
    /// Raw input bytes, cleared once the instance finishes.
    pub input: Option<&'a [u8]>,
    /// Small JSON parameters (filename, owner, declared type).
    pub input_json: &'a str,
}

/// A persisted workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: String,
    pub kind: WorkflowKind,
    pub document_id: String,
    pub input: Option<Vec<u8>>,
    pub input_json: String,
    pub status: InstanceStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recorded step, without its payload.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_name: String,
    pub recorded_at: DateTime<Utc>,
}

const INSTANCE_COLUMNS: &str =
    "id, workflow, document_id, input, input_json, status, error, created_at, updated_at";

impl Storage {
    /// Insert a workflow instance unless one with the same id exists.
    /// Returns `true` when this call created it.
    pub async fn insert_workflow_instance(&self, instance: &NewWorkflowInstance<'_>) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO workflow_instances
                 (id, workflow, document_id, input, input_json, status, created_at, updated_at)
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
        Ok(affected == 1)
    }

    /// Get a workflow instance by ID.
    pub async fn get_workflow_instance(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_instance(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Instances that were never finished, oldest first.
    pub async fn list_resumable_instances(&self) -> Result<Vec<WorkflowInstance>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM workflow_instances
                     WHERE status IN ('PENDING', 'RUNNING')
                     ORDER BY created_at, id"
                ),
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_instance(&row)?);
        }
        Ok(results)
    }

    /// Instances belonging to a document, newest first.
    pub async fn list_document_instances(&self, document_id: &str) -> Result<Vec<WorkflowInstance>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM workflow_instances
                     WHERE document_id = ?1
                     ORDER BY created_at DESC, id DESC"
                ),
                params![document_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_instance(&row)?);
        }
        Ok(results)
    }

    /// Set the status of an unfinished instance.
    pub async fn set_instance_status(&self, id: &str, status: InstanceStatus) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE workflow_instances SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status IN ('PENDING', 'RUNNING')",
                params![status.as_str(), now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark an instance finished. The raw input and step payloads are dropped,
    /// the step names stay for inspection.
    pub async fn finish_instance(
        &self,
        id: &str,
        status: InstanceStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if !status.is_finished() {
            return Err(DocflowError::Workflow(format!(
                "cannot finish instance {id} as {}",
                status.as_str()
            )));
        }
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await.map_err(storage_err)?;
        let now = format_timestamp(&Utc::now());

        tx.execute(
            "UPDATE workflow_instances SET status = ?1, error = ?2, input = NULL, updated_at = ?3
             WHERE id = ?4",
            params![status.as_str(), error, now.as_str(), id],
        )
        .await
        .map_err(storage_err)?;

        tx.execute(
            "UPDATE workflow_steps SET result = X'' WHERE instance_id = ?1",
            params![id],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// Recorded result of a step, if it completed before.
    pub async fn get_step_result(&self, instance_id: &str, step_name: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result FROM workflow_steps WHERE instance_id = ?1 AND step_name = ?2",
                params![instance_id, step_name],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<Vec<u8>>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Record the result of a completed step. The first record wins;
    /// returns `false` if the step was already recorded.
    pub async fn record_step(&self, instance_id: &str, step_name: &str, result: &[u8]) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let affected = self
            .conn
            .execute(
                "INSERT INTO workflow_steps (instance_id, step_name, result, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(instance_id, step_name) DO NOTHING",
                params![instance_id, step_name, result.to_vec(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected == 1)
    }

    /// Steps recorded for an instance, in completion order.
    pub async fn list_steps(&self, instance_id: &str) -> Result<Vec<StepRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT step_name, recorded_at FROM workflow_steps
                 WHERE instance_id = ?1 ORDER BY recorded_at, rowid",
                params![instance_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(StepRecord {
                step_name: row.get::<String>(0).map_err(storage_err)?,
                recorded_at: parse_timestamp(&row.get::<String>(1).map_err(storage_err)?)?,
            });
        }
        Ok(results)
    }
}

fn row_to_instance(row: &libsql::Row) -> Result<WorkflowInstance> {
    let kind: String = row.get(1).map_err(storage_err)?;
    let status: String = row.get(5).map_err(storage_err)?;
    Ok(WorkflowInstance {
        id: row.get::<String>(0).map_err(storage_err)?,
        kind: kind.parse().map_err(DocflowError::Storage)?,
        document_id: row.get::<String>(2).map_err(storage_err)?,
        input: row.get::<Vec<u8>>(3).ok(),
        input_json: row.get::<String>(4).map_err(storage_err)?,
        status: status.parse().map_err(DocflowError::Storage)?,
        error: row.get::<String>(6).ok(),
        created_at: parse_timestamp(&row.get::<String>(7).map_err(storage_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(8).map_err(storage_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{insert_document, new_document, test_storage};

    #[tokio::test]
    async fn insert_is_idempotent() {
        let storage = test_storage().await;
        let new = NewWorkflowInstance {
            id: "doc-1:summary",
            kind: WorkflowKind::Summarize,
            document_id: "doc-1",
            input: None,
            input_json: "{}",
        };
        assert!(storage.insert_workflow_instance(&new).await.unwrap());
        assert!(!storage.insert_workflow_instance(&new).await.unwrap());

        let instance = storage
            .get_workflow_instance("doc-1:summary")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.kind, WorkflowKind::Summarize);
        assert_eq!(instance.status, InstanceStatus::Pending);
        assert!(instance.input.is_none());
    }

    #[tokio::test]
    async fn first_step_record_wins() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        let instance_id = insert_document(&storage, &doc).await;

        assert!(storage.get_step_result(&instance_id, "validate").await.unwrap().is_none());
        assert!(storage.record_step(&instance_id, "validate", b"pdf").await.unwrap());
        assert!(!storage.record_step(&instance_id, "validate", b"png").await.unwrap());
        assert_eq!(
            storage.get_step_result(&instance_id, "validate").await.unwrap(),
            Some(b"pdf".to_vec())
        );
    }

    #[tokio::test]
    async fn resumable_excludes_finished() {
        let storage = test_storage().await;
        let a = new_document("user-1", "a");
        let a_instance = insert_document(&storage, &a).await;
        let b = new_document("user-1", "b");
        let b_instance = insert_document(&storage, &b).await;

        storage
            .set_instance_status(&b_instance, InstanceStatus::Running)
            .await
            .unwrap();
        let resumable = storage.list_resumable_instances().await.unwrap();
        assert_eq!(resumable.len(), 2);
        assert_eq!(resumable[0].input.as_deref(), Some(&b"raw bytes"[..]));

        storage
            .finish_instance(&a_instance, InstanceStatus::Completed, None)
            .await
            .unwrap();
        let resumable = storage.list_resumable_instances().await.unwrap();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].id, b_instance);
    }

    #[tokio::test]
    async fn finish_drops_payloads_but_keeps_step_names() {
        let storage = test_storage().await;
        let doc = new_document("user-1", "report");
        let instance_id = insert_document(&storage, &doc).await;
        storage.record_step(&instance_id, "generate-key", b"k").await.unwrap();
        storage.record_step(&instance_id, "validate", b"pdf").await.unwrap();

        storage
            .finish_instance(&instance_id, InstanceStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let instance = storage.get_workflow_instance(&instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
        assert_eq!(instance.error.as_deref(), Some("boom"));
        assert!(instance.input.is_none());

        let steps = storage.list_steps(&instance_id).await.unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names, vec!["generate-key", "validate"]);

        // Finished instances ignore late status writes.
        storage
            .set_instance_status(&instance_id, InstanceStatus::Running)
            .await
            .unwrap();
        let instance = storage.get_workflow_instance(&instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn finish_rejects_unfinished_status() {
        let storage = test_storage().await;
        assert!(
            storage
                .finish_instance("x", InstanceStatus::Running, None)
                .await
                .is_err()
        );
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("ingest".parse::<WorkflowKind>(), Ok(WorkflowKind::Ingest));
        assert!("crawl".parse::<WorkflowKind>().is_err());
        assert_eq!("RUNNING".parse::<InstanceStatus>(), Ok(InstanceStatus::Running));
    }
}
