use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::error::{StageError, StoreError};
use super::types::{Field, Record, is_resolved_value};

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Persists complete snapshots of the record set.
pub trait SnapshotStore {
    fn save(&mut self, records: &[Record]) -> Result<(), StoreError>;
}

/// Per-record work that fills in a single field.
pub trait RecordOperation {
    fn field(&self) -> Field;

    /// Records that already carry a value are skipped.
    fn is_done(&self, record: &Record) -> bool {
        is_resolved_value(record.get(self.field()))
    }

    fn is_eligible(&self, _record: &Record) -> bool {
        true
    }

    /// Delay after every record the operation was invoked for.
    fn pacing(&self) -> Duration {
        Duration::ZERO
    }

    async fn apply(&mut self, record: &Record) -> Result<String, StageError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub snapshots: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointedProcessor {
    batch_size: usize,
}

impl Default for CheckpointedProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl CheckpointedProcessor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Runs `op` over every unresolved record in order, checkpointing every
    /// `batch_size` positions and after the last one.
    ///
    /// Operation failures are contained per record. Only a failure to write
    /// the final snapshot is returned.
    pub async fn process<O, S>(
        &self,
        records: &mut [Record],
        op: &mut O,
        store: &mut S,
    ) -> Result<Summary, StoreError>
    where
        O: RecordOperation,
        S: SnapshotStore,
    {
        let mut summary = Summary::default();
        let total = records.len();
        let field = op.field();
        info!(
            total,
            field = field.column(),
            batch_size = self.batch_size,
            "processing records"
        );

        if total == 0 {
            store.save(records)?;
            summary.snapshots += 1;
            return Ok(summary);
        }

        for index in 0..total {
            let position = index + 1;
            let record = &records[index];

            if op.is_done(record) {
                debug!(position, name = %record.name, "already resolved");
                summary.skipped += 1;
            } else if !op.is_eligible(record) {
                info!(position, name = %record.name, "not eligible, skipping");
                summary.skipped += 1;
            } else {
                info!(position, total, name = %record.name, "processing");
                match op.apply(record).await {
                    Ok(value) => {
                        records[index].set(field, value);
                        summary.processed += 1;
                    }
                    Err(err) => {
                        error!(
                            position,
                            name = %records[index].name,
                            error = %err,
                            "record failed"
                        );
                        records[index].set(field, "");
                        summary.failed += 1;
                        self.checkpoint(records, store, &mut summary, position, false)?;
                    }
                }
                let pause = op.pacing();
                if !pause.is_zero() {
                    sleep(pause).await;
                }
            }

            let last = position == total;
            if last || position % self.batch_size == 0 {
                self.checkpoint(records, store, &mut summary, position, last)?;
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            snapshots = summary.snapshots,
            "processing finished"
        );
        Ok(summary)
    }

    fn checkpoint<S: SnapshotStore>(
        &self,
        records: &[Record],
        store: &mut S,
        summary: &mut Summary,
        position: usize,
        last: bool,
    ) -> Result<(), StoreError> {
        match store.save(records) {
            Ok(()) => {
                summary.snapshots += 1;
                info!(position, total = records.len(), "checkpoint saved");
                Ok(())
            }
            Err(err) if last => Err(err),
            Err(err) => {
                warn!(position, error = %err, "checkpoint failed, continuing");
                Ok(())
            }
        }
    }
}
