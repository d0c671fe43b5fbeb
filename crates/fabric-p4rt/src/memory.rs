//! In-process device used by tests and by simulation runs.

use crate::entry::TableEntry;
use crate::error::{ChannelError, ChannelResult};
use crate::session::{CounterData, CounterEntry, DeviceSession};
use async_trait::async_trait;
use fabric_types::DeviceId;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct State {
    /// Installed entries in first-write order.
    entries: Vec<TableEntry>,
    /// Default action per table id, as set by default-action writes.
    defaults: BTreeMap<u32, TableEntry>,
    counters: BTreeMap<(u32, u64), CounterData>,
    write_attempts: usize,
    /// Scripted failures keyed by 1-based write attempt.
    write_failures: HashMap<usize, ChannelError>,
    read_failure: Option<ChannelError>,
    closed: bool,
}

/// A [`DeviceSession`] that keeps its tables in memory.
///
/// Writes upsert by entry key, so a second write to the same key replaces
/// the first. A default-action write replaces the table's default and is
/// not returned by [`read_table_entries`](DeviceSession::read_table_entries),
/// matching a wildcard P4Runtime read. Failures can be scripted per write attempt or for all reads.
#[derive(Debug)]
pub struct MemorySession {
    device: DeviceId,
    state: Mutex<State>,
}

impl MemorySession {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the `attempt`-th write (counting from 1) fail with `err`.
    pub fn fail_write(&self, attempt: usize, err: ChannelError) {
        self.state().write_failures.insert(attempt, err);
    }

    /// Makes every read fail with `err` until [`clear_read_failure`] is called.
    ///
    /// [`clear_read_failure`]: MemorySession::clear_read_failure
    pub fn fail_reads(&self, err: ChannelError) {
        self.state().read_failure = Some(err);
    }

    pub fn clear_read_failure(&self) {
        self.state().read_failure = None;
    }

    pub fn set_counter(&self, counter_id: u32, index: u64, data: CounterData) {
        self.state().counters.insert((counter_id, index), data);
    }

    /// Snapshot of the installed entries, table defaults excluded.
    pub fn entries(&self) -> Vec<TableEntry> {
        self.state().entries.clone()
    }

    /// The default action last written to `table_id`, if any.
    pub fn default_entry(&self, table_id: u32) -> Option<TableEntry> {
        self.state().defaults.get(&table_id).cloned()
    }

    /// Number of writes attempted, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.state().write_attempts
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn check_open(&self, state: &State) -> ChannelResult<()> {
        if state.closed {
            return Err(ChannelError::closed(&self.device));
        }
        Ok(())
    }

    fn check_read(&self, state: &State) -> ChannelResult<()> {
        self.check_open(state)?;
        match &state.read_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceSession for MemorySession {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    async fn write(&self, entry: &TableEntry) -> ChannelResult<()> {
        let mut state = self.state();
        self.check_open(&state)?;

        state.write_attempts += 1;
        let attempt = state.write_attempts;
        if let Some(err) = state.write_failures.remove(&attempt) {
            debug!(device = %self.device, attempt, error = %err, "Scripted write failure");
            return Err(err);
        }

        if entry.is_default_action {
            trace!(device = %self.device, table = %entry.table, "Replacing table default");
            state.defaults.insert(entry.table_id, entry.clone());
            return Ok(());
        }

        let key = entry.key();
        match state.entries.iter().position(|e| e.key() == key) {
            Some(pos) => {
                trace!(device = %self.device, table = %entry.table, "Replacing entry");
                state.entries[pos] = entry.clone();
            }
            None => {
                trace!(device = %self.device, table = %entry.table, "Inserting entry");
                state.entries.push(entry.clone());
            }
        }
        Ok(())
    }

    async fn read_table_entries(&self) -> ChannelResult<Vec<TableEntry>> {
        let state = self.state();
        self.check_read(&state)?;
        Ok(state.entries.clone())
    }

    async fn read_counter(
        &self,
        counter_id: u32,
        index: Option<u64>,
    ) -> ChannelResult<Vec<CounterEntry>> {
        let state = self.state();
        self.check_read(&state)?;

        let cells = match index {
            // Any index of a declared counter is readable; unset cells are zero.
            Some(index) => vec![CounterEntry {
                counter_id,
                index,
                data: state
                    .counters
                    .get(&(counter_id, index))
                    .copied()
                    .unwrap_or_default(),
            }],
            None => state
                .counters
                .range((counter_id, 0)..=(counter_id, u64::MAX))
                .map(|(&(counter_id, index), &data)| CounterEntry {
                    counter_id,
                    index,
                    data,
                })
                .collect(),
        };
        Ok(cells)
    }

    async fn close(&self) -> ChannelResult<()> {
        let mut state = self.state();
        if !state.closed {
            debug!(device = %self.device, "Closing in-memory session");
            state.closed = true;
        }
        Ok(())
    }
}
