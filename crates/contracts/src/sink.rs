//! Snapshot sinks

use crate::{ContractError, ScanSnapshot};

/// Consumer of published scan snapshots
///
/// Each sink runs on its own worker with its own queue; a slow or failing
/// sink never stalls acquisition or the other sinks.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Name used in logs and sink metrics
    fn name(&self) -> &str;

    /// Consume one snapshot. Sequences arrive strictly increasing, possibly with gaps.
    async fn write(&mut self, snapshot: &ScanSnapshot) -> Result<(), ContractError>;

    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Called once after the last snapshot
    async fn close(&mut self) -> Result<(), ContractError>;
}
