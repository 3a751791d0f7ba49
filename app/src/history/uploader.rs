use std::collections::HashMap;

use anyhow::{Context, bail};

use crate::core::time::{DateTime, DateTimeRange, Duration};
use crate::core::unit::TemperatureUnit;
use crate::port::{OptimizerPort, RawStateChange, StateHistoryPort};

use super::{HistoryBatch, RemoteDataDates, SensorColumn, UserInfo, extractor};

/// Lookback window for steady-state catch-up uploads.
pub const HISTORY_DAYS: i64 = 28;

/// How far back the one-time backlog upload digs, matching the remote
/// store's retention.
pub const DEEP_HISTORY_DAYS: i64 = 5 * 365;

/// Per-batch sample cap. Bounds upload size and worst-case per-tick latency.
pub const MAX_UPLOAD_HISTORY_READINGS: usize = 2000;

/// Outcome of one backlog (old-history) pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogStatus {
    /// Backlog was already drained before this call.
    AlreadyComplete,
    /// At least one batch went out; older data may remain.
    Uploaded,
    /// This pass found nothing older than the remote store for any column.
    Completed,
}

/// Keeps the remote store in sync with locally recorded history.
///
/// The remote store answers every upload with its per-column oldest/newest
/// timestamps. Boundaries for the next batch are always recomputed from those
/// cursors, so repeated calls without new data never re-upload a stored range.
pub struct HistoryUploader<H, O> {
    history: H,
    optimizer: O,
    columns: Vec<(SensorColumn, String)>,
    display_unit: TemperatureUnit,
    user_hash: String,
    user_info: Option<UserInfo>,
    remote_dates: Option<RemoteDataDates>,
    history_upload_complete: bool,
}

impl<H, O> HistoryUploader<H, O>
where
    H: StateHistoryPort,
    O: OptimizerPort,
{
    pub fn new(
        history: H,
        optimizer: O,
        columns: Vec<(SensorColumn, String)>,
        display_unit: TemperatureUnit,
        user_hash: String,
        user_info: Option<UserInfo>,
    ) -> Self {
        Self {
            history,
            optimizer,
            columns,
            display_unit,
            user_hash,
            user_info,
            remote_dates: None,
            history_upload_complete: false,
        }
    }

    pub fn history_upload_complete(&self) -> bool {
        self.history_upload_complete
    }

    /// Columns whose local history is ahead of the remote store: nothing
    /// stored yet, or the newest stored sample is older than the newest
    /// local one.
    pub async fn columns_missing_from_remote(&mut self) -> anyhow::Result<Vec<SensorColumn>> {
        self.ensure_remote_dates().await?;

        let mut missing = vec![];

        for (column, entity_id) in self.columns.clone() {
            let changes = self
                .history
                .state_changes(&entity_id, DateTimeRange::last(Duration::days(HISTORY_DAYS)))
                .await
                .with_context(|| format!("Error reading history of {}", entity_id))?;

            let Some(local_newest) = changes.last().map(|c| c.timestamp) else {
                continue;
            };

            match self.remote_newest(column) {
                None => missing.push(column),
                Some(remote_newest) if remote_newest < local_newest => missing.push(column),
                Some(_) => {}
            }
        }

        Ok(missing)
    }

    /// Uploads one bounded batch of not-yet-stored recent history per missing
    /// column. Returns the total number of samples shipped; a missing column
    /// with no new samples past the boundary violates the caller's contract.
    pub async fn upload_new_history(&mut self, missing: &[SensorColumn]) -> anyhow::Result<usize> {
        let mut uploaded = 0;

        for column in missing {
            let entity_id = self.entity_for(*column)?;
            let changes = self
                .history
                .state_changes(&entity_id, DateTimeRange::last(Duration::days(HISTORY_DAYS)))
                .await
                .with_context(|| format!("Error reading history of {}", entity_id))?;

            let mut slice = match self.remote_newest(*column) {
                Some(boundary) => after_boundary(&changes, boundary),
                None => changes.clone(),
            };

            if slice.is_empty() {
                bail!(
                    "Column {} was reported missing from the remote store but no new local samples exist",
                    column
                );
            }

            // Oldest-first cap keeps batches contiguous with the cursor
            slice.truncate(MAX_UPLOAD_HISTORY_READINGS);

            uploaded += self.upload_column(*column, &slice).await?;
        }

        Ok(uploaded)
    }

    /// One backward-filling pass: per column, uploads the newest slice of
    /// history older than anything the remote store holds. A no-op once the
    /// backlog has drained.
    pub async fn upload_old_history(&mut self) -> anyhow::Result<BacklogStatus> {
        if self.history_upload_complete {
            return Ok(BacklogStatus::AlreadyComplete);
        }

        self.ensure_remote_dates().await?;

        let mut any_uploaded = false;

        for (column, entity_id) in self.columns.clone() {
            let boundary = self.remote_oldest(column).unwrap_or_else(DateTime::far_future);

            let changes = self
                .history
                .state_changes(&entity_id, DateTimeRange::last(Duration::days(DEEP_HISTORY_DAYS)))
                .await
                .with_context(|| format!("Error reading history of {}", entity_id))?;

            let mut slice = before_boundary(&changes, boundary);
            if slice.is_empty() {
                continue;
            }

            // Newest-first cap: keep the tail closest to the boundary so the
            // stored range stays contiguous
            if slice.len() > MAX_UPLOAD_HISTORY_READINGS {
                slice.drain(..slice.len() - MAX_UPLOAD_HISTORY_READINGS);
            }

            if self.upload_column(column, &slice).await? > 0 {
                any_uploaded = true;
            }
        }

        if any_uploaded {
            Ok(BacklogStatus::Uploaded)
        } else {
            tracing::info!("Local history backlog fully uploaded to the remote store");
            self.history_upload_complete = true;
            Ok(BacklogStatus::Completed)
        }
    }

    async fn upload_column(&mut self, column: SensorColumn, changes: &[RawStateChange]) -> anyhow::Result<usize> {
        let (samples, constant_attributes) = extractor::states_to_history(column, changes, self.display_unit)?;

        if samples.is_empty() {
            // Every raw record was skipped by normalization, nothing to ship
            tracing::warn!("All {} samples of {} were dropped during normalization", changes.len(), column);
            return Ok(0);
        }

        let count = samples.len();
        let batch = HistoryBatch {
            histories: HashMap::from([(column, samples)]),
            constant_attributes: HashMap::from([(column, constant_attributes)]),
            user_hash: self.user_hash.clone(),
            user_info: self.user_info.clone(),
        };

        let dates = self.optimizer.upload_history(&batch).await?;
        tracing::debug!("Uploaded {} samples of {}", count, column);
        self.remote_dates = Some(dates);

        Ok(count)
    }

    async fn ensure_remote_dates(&mut self) -> anyhow::Result<()> {
        if self.remote_dates.is_none() {
            let dates = self.optimizer.get_data_dates(&self.user_hash).await?;
            self.remote_dates = Some(dates);
        }

        Ok(())
    }

    fn entity_for(&self, column: SensorColumn) -> anyhow::Result<String> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| anyhow::anyhow!("No entity configured for column {}", column))
    }

    fn remote_newest(&self, column: SensorColumn) -> Option<DateTime> {
        self.remote_dates
            .as_ref()
            .and_then(|d| d.newest.get(&column).copied().flatten())
    }

    fn remote_oldest(&self, column: SensorColumn) -> Option<DateTime> {
        self.remote_dates
            .as_ref()
            .and_then(|d| d.oldest.get(&column).copied().flatten())
    }
}

/// Everything strictly newer than the boundary, by linear forward scan over
/// ascending timestamps.
fn after_boundary(changes: &[RawStateChange], boundary: DateTime) -> Vec<RawStateChange> {
    let idx = changes.iter().position(|c| c.timestamp > boundary);
    match idx {
        Some(idx) => changes[idx..].to_vec(),
        None => vec![],
    }
}

/// Everything strictly older than the boundary.
fn before_boundary(changes: &[RawStateChange], boundary: DateTime) -> Vec<RawStateChange> {
    let idx = changes.iter().position(|c| c.timestamp >= boundary);
    match idx {
        Some(idx) => changes[..idx].to_vec(),
        None => changes.to_vec(),
    }
}
