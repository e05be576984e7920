//! Lifecycle reconciler trait definition

use crate::error::{CloudError, Result};
use crate::id::StableId;
use crate::merge::MergeReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle reconciler for one resource family
///
/// Each family (cluster, firewall rule, VPC peering connection) implements
/// this trait on top of its remote gateway.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Declared intent
    type Spec: Send + Sync;

    /// Locally tracked model: declared fields plus computed fields
    type Model: Send + Sync;

    /// Resource kind used in logs and state keys (e.g. "cluster")
    fn kind(&self) -> &'static str;

    /// Provision the resource and wait until it is usable.
    ///
    /// A failed wait is surfaced as an error and the remote resource is
    /// left in place.
    async fn create(&self, spec: &Self::Spec) -> Result<Tracked<Self::Model>>;

    /// Refresh the model from the server. When the resource no longer
    /// exists the id is cleared and [`ReadOutcome::Gone`] is returned.
    async fn read(&self, tracked: &mut Tracked<Self::Model>) -> Result<ReadOutcome>;

    /// Remove the resource. Removing an absent resource succeeds.
    async fn delete(&self, id: &StableId) -> Result<()>;

    /// Model seeded from the coordinates encoded in `id`, before any read.
    fn seed(&self, id: &StableId) -> Result<Self::Model>;

    /// Start tracking an existing remote resource.
    async fn import(&self, id: &StableId) -> Result<Tracked<Self::Model>> {
        let mut tracked = Tracked::new(id.clone(), self.seed(id)?);
        match self.read(&mut tracked).await? {
            ReadOutcome::Present(_) => Ok(tracked),
            ReadOutcome::Gone => Err(CloudError::NotFound(format!("{} {}", self.kind(), id))),
        }
    }
}

/// A model together with the id that re-identifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<M> {
    pub id: StableId,
    pub model: M,
}

impl<M> Tracked<M> {
    pub fn new(id: impl Into<StableId>, model: M) -> Self {
        Self {
            id: id.into(),
            model,
        }
    }

    /// Whether a read found the remote resource missing.
    pub fn is_gone(&self) -> bool {
        self.id.is_empty()
    }

    /// Stop tracking the resource.
    pub fn forget(&mut self) {
        self.id.clear();
    }
}

/// Result of [`Reconciler::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Present(MergeReport),
    Gone,
}

impl ReadOutcome {
    pub fn is_gone(&self) -> bool {
        matches!(self, ReadOutcome::Gone)
    }

    /// Settable fields that diverged from the declared model.
    pub fn drifted(&self) -> &[&'static str] {
        match self {
            ReadOutcome::Present(report) => report.drifted(),
            ReadOutcome::Gone => &[],
        }
    }
}
