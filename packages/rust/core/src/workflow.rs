//! Durable step execution.
//!
//! A workflow body calls [`StepContext::step`] for each named step. The first
//! time a step runs its result is encoded and recorded in the step log before
//! the body moves on. When an interrupted instance is resumed, recorded steps
//! return their stored result without running again, so only the first
//! unrecorded step repeats.

use std::future::Future;

use docflow_convert::FileKind;
use docflow_shared::{DocflowError, Result};
use docflow_storage::Storage;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A step result that can be stored in the step log.
pub trait StepValue: Sized {
    fn encode(&self) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl StepValue for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl StepValue for String {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DocflowError::Workflow(format!("recorded step is not UTF-8: {e}")))
    }
}

impl StepValue for () {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn decode(_bytes: &[u8]) -> Result<Self> {
        Ok(())
    }
}

impl StepValue for bool {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(vec![u8::from(*self)])
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [0] => Ok(false),
            [1] => Ok(true),
            other => Err(DocflowError::Workflow(format!(
                "recorded step is not a bool: {other:?}"
            ))),
        }
    }
}

impl StepValue for FileKind {
    fn encode(&self) -> Result<Vec<u8>> {
        Json(*self).encode()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Json::decode(bytes).map(|Json(kind)| kind)
    }
}

/// Records any serde type as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize + DeserializeOwned> StepValue for Json<T> {
    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
            .map_err(|e| DocflowError::Workflow(format!("cannot encode step result: {e}")))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map(Json)
            .map_err(|e| DocflowError::Workflow(format!("cannot decode recorded step: {e}")))
    }
}

/// Step runner bound to one workflow instance.
pub struct StepContext<'a> {
    storage: &'a Storage,
    instance_id: &'a str,
}

impl<'a> StepContext<'a> {
    pub fn new(storage: &'a Storage, instance_id: &'a str) -> Self {
        Self {
            storage,
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &str {
        self.instance_id
    }

    /// Run `name` once. A recorded result is decoded and returned instead of
    /// calling `run`. A failed step records nothing.
    pub async fn step<T, F, Fut>(&self, name: &'static str, run: F) -> Result<T>
    where
        T: StepValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(recorded) = self.storage.get_step_result(self.instance_id, name).await? {
            debug!(instance_id = self.instance_id, step = name, "replaying recorded step");
            return T::decode(&recorded);
        }

        let value = run().await?;
        let encoded = value.encode()?;
        if !self
            .storage
            .record_step(self.instance_id, name, &encoded)
            .await?
        {
            // Another runner recorded it first; its result is authoritative.
            let recorded = self
                .storage
                .get_step_result(self.instance_id, name)
                .await?
                .ok_or_else(|| {
                    DocflowError::Workflow(format!("step {name} vanished from the step log"))
                })?;
            return T::decode(&recorded);
        }
        debug!(instance_id = self.instance_id, step = name, "step recorded");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_storage;
    use docflow_storage::{NewWorkflowInstance, WorkflowKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn instance(storage: &Storage, id: &str) {
        storage
            .insert_workflow_instance(&NewWorkflowInstance {
                id,
                kind: WorkflowKind::Ingest,
                document_id: "doc-1",
                input: None,
                input_json: "{}",
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recorded_steps_are_not_rerun() {
        let storage = test_storage().await;
        instance(&storage, "wf-1").await;
        let ctx = StepContext::new(&storage, "wf-1");
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let key: String = ctx
                .step("generate-key", || async {
                    let n = runs.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("owner/key-{n}.pdf"))
                })
                .await
                .unwrap();
            assert_eq!(key, "owner/key-0.pdf");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_steps_are_retried() {
        let storage = test_storage().await;
        instance(&storage, "wf-1").await;
        let ctx = StepContext::new(&storage, "wf-1");

        let first: Result<()> = ctx
            .step("upload", || async {
                Err(DocflowError::StorageWriteFailed("disk full".into()))
            })
            .await;
        assert!(first.is_err());
        assert!(storage.get_step_result("wf-1", "upload").await.unwrap().is_none());

        ctx.step("upload", || async { Ok(()) }).await.unwrap();
        assert!(storage.get_step_result("wf-1", "upload").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn steps_are_scoped_to_their_instance() {
        let storage = test_storage().await;
        instance(&storage, "wf-1").await;
        instance(&storage, "wf-2").await;

        let a: String = StepContext::new(&storage, "wf-1")
            .step("generate-key", || async { Ok("a".to_string()) })
            .await
            .unwrap();
        let b: String = StepContext::new(&storage, "wf-2")
            .step("generate-key", || async { Ok("b".to_string()) })
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
    }

    #[test]
    fn values_survive_the_log() {
        assert!(bool::decode(&true.encode().unwrap()).unwrap());
        assert_eq!(
            FileKind::decode(&FileKind::Docx.encode().unwrap()).unwrap(),
            FileKind::Docx
        );
        assert!(String::decode(&[0xff, 0xfe]).is_err());
        assert!(bool::decode(b"yes").is_err());
    }
}
