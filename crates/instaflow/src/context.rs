//! Reconcilers and state wired for one CLI invocation

use instaflow_cloud::{
    CloudError, ReadOutcome, Reconciler, ResourceState, StableId, StateManager, Tracked,
};
use instaflow_cloud_instaclustr::{
    ApiConfig, ClusterReconciler, FirewallRuleReconciler, InstaclustrClient, VpcPeeringReconciler,
    cluster, firewall, vpc_peering,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

pub struct Context {
    pub client: Arc<InstaclustrClient>,
    pub clusters: ClusterReconciler<InstaclustrClient>,
    pub firewall_rules: FirewallRuleReconciler<InstaclustrClient>,
    pub peerings: VpcPeeringReconciler<InstaclustrClient>,
    pub state: StateManager,
    cancel: watch::Receiver<bool>,
}

impl Context {
    pub fn new(
        config: ApiConfig,
        state_dir: &Path,
        cancel: watch::Receiver<bool>,
    ) -> instaflow_cloud::Result<Self> {
        let client = Arc::new(InstaclustrClient::new(config)?);
        Ok(Self {
            clusters: ClusterReconciler::new(Arc::clone(&client)).with_cancellation(cancel.clone()),
            firewall_rules: FirewallRuleReconciler::new(Arc::clone(&client)),
            peerings: VpcPeeringReconciler::new(Arc::clone(&client))
                .with_cancellation(cancel.clone()),
            client,
            state: StateManager::new(state_dir),
            cancel,
        })
    }

    /// Whether Ctrl-C was pressed during this invocation.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Read a tracked resource and record the result in `resource`.
    pub async fn read(&self, resource: &mut ResourceState) -> instaflow_cloud::Result<ReadOutcome> {
        match resource.kind.as_str() {
            cluster::KIND => read_with(&self.clusters, resource).await,
            firewall::KIND => read_with(&self.firewall_rules, resource).await,
            vpc_peering::KIND => read_with(&self.peerings, resource).await,
            other => Err(unknown_kind(other)),
        }
    }

    pub async fn delete(&self, kind: &str, id: &StableId) -> instaflow_cloud::Result<()> {
        match kind {
            cluster::KIND => self.clusters.delete(id).await,
            firewall::KIND => self.firewall_rules.delete(id).await,
            vpc_peering::KIND => self.peerings.delete(id).await,
            other => Err(unknown_kind(other)),
        }
    }

    /// Start tracking an existing remote resource under `name`.
    pub async fn import(
        &self,
        kind: &str,
        name: &str,
        id: &StableId,
    ) -> instaflow_cloud::Result<ResourceState> {
        match kind {
            cluster::KIND => import_with(&self.clusters, name, id).await,
            firewall::KIND => import_with(&self.firewall_rules, name, id).await,
            vpc_peering::KIND => import_with(&self.peerings, name, id).await,
            other => Err(unknown_kind(other)),
        }
    }
}

fn unknown_kind(kind: &str) -> CloudError {
    CloudError::StateError(format!(
        "unknown resource kind '{kind}' (expected {}, {} or {})",
        cluster::KIND,
        firewall::KIND,
        vpc_peering::KIND
    ))
}

async fn read_with<R>(reconciler: &R, resource: &mut ResourceState) -> instaflow_cloud::Result<ReadOutcome>
where
    R: Reconciler,
    R::Model: Serialize + DeserializeOwned,
{
    let mut tracked: Tracked<R::Model> = resource.to_tracked()?;
    let outcome = reconciler.read(&mut tracked).await?;
    if !outcome.is_gone() {
        resource.refresh(&tracked)?;
    }
    Ok(outcome)
}

async fn import_with<R>(reconciler: &R, name: &str, id: &StableId) -> instaflow_cloud::Result<ResourceState>
where
    R: Reconciler,
    R::Model: Serialize,
{
    let tracked = reconciler.import(id).await?;
    ResourceState::from_tracked(reconciler.kind(), name, &tracked)
}

/// Order in which kinds are created; deletion runs in reverse.
pub fn kind_rank(kind: &str) -> u8 {
    match kind {
        cluster::KIND => 0,
        firewall::KIND => 1,
        vpc_peering::KIND => 2,
        _ => 3,
    }
}
