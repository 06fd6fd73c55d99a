//! Multi-write mutation plans with compensation.
//!
//! A like is one atomic update; a follow touches four documents and the
//! store offers no multi-document transaction. The executor runs writes
//! in order and, when one fails, undoes the ones that already landed,
//! newest first, so follower and following counters stay symmetric.

use meowgram_core::{DocPath, Fields};

use crate::error::StoreError;
use crate::store::{AtomicUpdate, DocumentStore};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { path: DocPath, fields: Fields },
    Delete { path: DocPath },
    Update { path: DocPath, update: AtomicUpdate },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. } | WriteOp::Delete { path } | WriteOp::Update { path, .. } => path,
        }
    }
}

/// How to undo a write once it succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum Undo {
    /// Issue this write.
    Op(WriteOp),
    /// Read the document before writing and put it back afterwards
    /// (deleted if it did not exist). A failed read aborts the plan
    /// before the write.
    RestoreCaptured,
    /// Not compensable; a failure after this write leaves it applied.
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub op: WriteOp,
    pub undo: Undo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationPlan {
    writes: Vec<PlannedWrite>,
}

impl MutationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite; undone by deleting the document.
    pub fn create_record(mut self, path: DocPath, fields: Fields) -> Self {
        let undo = Undo::Op(WriteOp::Delete { path: path.clone() });
        self.writes.push(PlannedWrite {
            op: WriteOp::Set { path, fields },
            undo,
        });
        self
    }

    /// Delete; undone by restoring what was there.
    pub fn remove_record(mut self, path: DocPath) -> Self {
        self.writes.push(PlannedWrite {
            op: WriteOp::Delete { path },
            undo: Undo::RestoreCaptured,
        });
        self
    }

    /// Atomic update; undone by its inverse when one exists.
    pub fn update(mut self, path: DocPath, update: AtomicUpdate) -> Self {
        let undo = match update.inverse() {
            Some(inverse) => Undo::Op(WriteOp::Update {
                path: path.clone(),
                update: inverse,
            }),
            None => Undo::Nothing,
        };
        self.writes.push(PlannedWrite {
            op: WriteOp::Update { path, update },
            undo,
        });
        self
    }

    pub fn writes(&self) -> &[PlannedWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// What the executor did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub applied: usize,
    pub compensated: usize,
    pub compensation_failures: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanFailure {
    pub error: StoreError,
    /// Index of the write that failed.
    pub failed_at: usize,
    pub report: ExecutionReport,
}

async fn run_op(store: &dyn DocumentStore, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { path, fields } => store.set(path, fields.clone()).await,
        WriteOp::Delete { path } => store.delete(path).await,
        WriteOp::Update { path, update } => store.atomic_update(path, update).await,
    }
}

/// Run `plan` against `store`, compensating on partial failure.
pub async fn execute(store: &dyn DocumentStore, plan: &MutationPlan) -> Result<ExecutionReport, PlanFailure> {
    let mut report = ExecutionReport::default();
    let mut undo_stack: Vec<WriteOp> = Vec::with_capacity(plan.len());

    for (index, write) in plan.writes.iter().enumerate() {
        let undo = match &write.undo {
            Undo::Op(op) => Some(op.clone()),
            Undo::Nothing => None,
            Undo::RestoreCaptured => {
                let path = write.op.path().clone();
                match store.get(&path).await {
                    Ok(doc) => Some(WriteOp::Set {
                        path,
                        fields: doc.fields,
                    }),
                    Err(StoreError::NotFound(_)) => Some(WriteOp::Delete { path }),
                    // Without a copy the write could not be undone; stop
                    // before touching the document.
                    Err(error) => {
                        log::warn!("Capture of {path} before write {}/{} failed: {error}", index + 1, plan.len());
                        compensate(store, &mut undo_stack, &mut report).await;
                        return Err(PlanFailure {
                            error,
                            failed_at: index,
                            report,
                        });
                    }
                }
            }
        };

        if let Err(error) = run_op(store, &write.op).await {
            log::warn!(
                "Write {}/{} to {} failed: {error}",
                index + 1,
                plan.len(),
                write.op.path()
            );
            compensate(store, &mut undo_stack, &mut report).await;
            return Err(PlanFailure {
                error,
                failed_at: index,
                report,
            });
        }

        report.applied += 1;
        if let Some(op) = undo {
            undo_stack.push(op);
        }
    }

    Ok(report)
}

async fn compensate(store: &dyn DocumentStore, undo_stack: &mut Vec<WriteOp>, report: &mut ExecutionReport) {
    while let Some(op) = undo_stack.pop() {
        match run_op(store, &op).await {
            Ok(()) => report.compensated += 1,
            Err(e) => {
                report.compensation_failures += 1;
                log::error!("Compensating write to {} failed, data may be asymmetric: {e}", op.path());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::scripted::ScriptedStore;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn path(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    fn counter_fields(n: i64) -> Fields {
        let mut f = Fields::new();
        f.insert("n".into(), json!(n));
        f
    }

    #[tokio::test]
    async fn test_all_writes_applied() {
        let store = MemoryStore::default();
        store.seed(&path("users/a"), counter_fields(0)).await;

        let plan = MutationPlan::new()
            .create_record(path("users/a/following/b"), Fields::new())
            .update(path("users/a"), AtomicUpdate::new().increment("n", 1));

        let report = execute(&store, &plan).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.compensated, 0);
        assert!(store.peek(&path("users/a/following/b")).await.is_some());
        assert_eq!(store.peek(&path("users/a")).await.unwrap().get_i64("n"), Some(1));
    }

    #[tokio::test]
    async fn test_failure_compensates_prior_writes() {
        let store = MemoryStore::default();
        store.seed(&path("users/a"), counter_fields(5)).await;

        let plan = MutationPlan::new()
            .create_record(path("users/a/following/b"), Fields::new())
            .update(path("users/a"), AtomicUpdate::new().increment("n", 1))
            .update(path("users/missing"), AtomicUpdate::new().increment("n", 1));

        let failure = execute(&store, &plan).await.unwrap_err();
        assert_eq!(failure.failed_at, 2);
        assert!(matches!(failure.error, StoreError::NotFound(_)));
        assert_eq!(failure.report.applied, 2);
        assert_eq!(failure.report.compensated, 2);

        assert!(store.peek(&path("users/a/following/b")).await.is_none());
        assert_eq!(store.peek(&path("users/a")).await.unwrap().get_i64("n"), Some(5));
    }

    #[tokio::test]
    async fn test_removed_record_is_restored() {
        let store = MemoryStore::default();
        store.seed(&path("users/a/following/b"), counter_fields(42)).await;

        let plan = MutationPlan::new()
            .remove_record(path("users/a/following/b"))
            .update(path("users/missing"), AtomicUpdate::new().increment("n", -1));

        execute(&store, &plan).await.unwrap_err();
        let restored = store.peek(&path("users/a/following/b")).await.unwrap();
        assert_eq!(restored.get_i64("n"), Some(42));
    }

    #[tokio::test]
    async fn test_failed_capture_stops_before_delete() {
        let store = ScriptedStore::failing_reads(StoreError::Unavailable("flaky".into()));
        store.inner.seed(&path("users/a"), counter_fields(1)).await;
        store.inner.seed(&path("users/a/following/b"), counter_fields(42)).await;

        let plan = MutationPlan::new()
            .update(path("users/a"), AtomicUpdate::new().increment("n", -1))
            .remove_record(path("users/a/following/b"))
            .update(path("users/b"), AtomicUpdate::new().increment("n", -1));

        let failure = execute(&store, &plan).await.unwrap_err();
        assert_eq!(failure.failed_at, 1);
        assert!(matches!(failure.error, StoreError::Unavailable(_)));
        assert_eq!(failure.report.applied, 1);
        assert_eq!(failure.report.compensated, 1);

        let record = store.inner.peek(&path("users/a/following/b")).await.unwrap();
        assert_eq!(record.get_i64("n"), Some(42));
        assert_eq!(store.inner.peek(&path("users/a")).await.unwrap().get_i64("n"), Some(1));
    }

    #[tokio::test]
    async fn test_compensation_failures_are_counted() {
        let store = MemoryStore::default();
        store.seed(&path("users/a"), counter_fields(0)).await;

        let plan = MutationPlan::new()
            .update(path("users/a"), AtomicUpdate::new().increment("n", 1))
            .update(path("users/a"), AtomicUpdate::new().increment("n", 1));

        // Second write fails, and so does the undo of the first.
        store.fail_nth_write(2, StoreError::Unavailable("offline".into()));
        store.fail_nth_write(3, StoreError::Unavailable("offline".into()));

        let failure = execute(&store, &plan).await.unwrap_err();
        assert_eq!(failure.report.compensation_failures, 1);
        assert_eq!(store.peek(&path("users/a")).await.unwrap().get_i64("n"), Some(1));
    }
}
