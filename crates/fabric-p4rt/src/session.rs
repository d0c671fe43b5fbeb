//! The control channel to one device.

use crate::entry::TableEntry;
use crate::error::ChannelResult;
use async_trait::async_trait;
use fabric_types::DeviceId;
use serde::{Deserialize, Serialize};

/// Packet and byte totals for one counter cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterData {
    pub packets: u64,
    pub bytes: u64,
}

/// One cell of an indexed counter as read from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntry {
    pub counter_id: u32,
    pub index: u64,
    pub data: CounterData,
}

/// An ordered, single-writer control channel to one switch.
///
/// Implementations own connection setup and arbitration; by the time a
/// session is handed out it is ready for writes. No method carries its own
/// timeout.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// The device this session talks to.
    fn device(&self) -> &DeviceId;

    /// Installs `entry`, replacing any entry with the same key.
    async fn write(&self, entry: &TableEntry) -> ChannelResult<()>;

    /// Reads every entry of every table.
    async fn read_table_entries(&self) -> ChannelResult<Vec<TableEntry>>;

    /// Reads one cell of `counter_id`, or every cell when `index` is `None`.
    async fn read_counter(
        &self,
        counter_id: u32,
        index: Option<u64>,
    ) -> ChannelResult<Vec<CounterEntry>>;

    /// Closes the channel. Later calls fail with
    /// [`ChannelError::Closed`](crate::ChannelError::Closed).
    async fn close(&self) -> ChannelResult<()>;
}
