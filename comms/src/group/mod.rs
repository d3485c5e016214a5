//! Synchronous collectives over a fixed group of ranks.
//!
//! Every rank runs the same program. Rank [`COORDINATOR`] is the only one allowed to take
//! single-authority decisions, every other rank learns about them through [`ProcessGroup::broadcast`]
//! and reports back through [`ProcessGroup::gather`]. Each collective is a barrier: all ranks must
//! call the same collectives in the same order.

mod bootstrap;
mod star;

use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

pub use bootstrap::{MemGroup, TcpGroup, in_memory};
pub use star::StarGroup;

/// The rank that takes every single-authority decision.
pub const COORDINATOR: usize = 0;

/// One rank's contribution to a gather.
#[derive(Debug, Clone, Copy)]
pub struct Part<'a, T> {
    /// Structured data, sent as JSON.
    pub meta: &'a T,
    /// Numeric data, sent without copying.
    pub floats: &'a [f64],
}

/// A contribution as received by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Gathered<T> {
    pub meta: T,
    pub floats: Vec<f64>,
}

#[allow(unused)]
#[trait_variant::make(ProcessGroup: Send)]
pub trait LocalProcessGroup {
    /// This process' rank, in `0..size`.
    fn rank(&self) -> usize;

    /// The amount of ranks in the group.
    fn size(&self) -> usize;

    /// Whether this rank is the coordinator.
    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Copies the coordinator's value to every rank.
    ///
    /// # Arguments
    /// * `value` - `Some` on the coordinator, ignored elsewhere.
    ///
    /// # Returns
    /// The value decoded from the broadcast bytes, identical on every rank, or
    /// `CommsErr::Aborted` if the coordinator sent an abort instead.
    async fn broadcast<T>(&mut self, value: Option<&T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync;

    /// Collects one contribution per rank on the coordinator.
    ///
    /// A rank that failed to produce its part passes `Err(detail)`, which still counts as its
    /// contribution. The coordinator drains every peer before reporting the first failure.
    ///
    /// # Arguments
    /// * `part` - This rank's contribution or the reason it has none.
    ///
    /// # Returns
    /// `Some` with every rank's part ordered by rank on the coordinator, `None` elsewhere.
    async fn gather<'a, T>(
        &mut self,
        part: std::result::Result<Part<'a, T>, &'a str>,
    ) -> Result<Option<Vec<Gathered<T>>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync;

    /// Replaces this rank's next payload with an error frame.
    ///
    /// On the coordinator every peer sees the abort in its next broadcast.
    ///
    /// # Arguments
    /// * `detail` - A human readable reason.
    async fn abort(&mut self, detail: &str) -> Result<()>;
}
