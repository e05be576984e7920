//! Managed Cassandra clusters
//!
//! Clusters are provisioned asynchronously: the create call only returns
//! an id, and the cluster walks through `GENESIS`, `PROVISIONING` and
//! `PROVISIONED` before it is `RUNNING`. The reconciler waits for
//! `RUNNING` before handing the cluster back.

use crate::client::InstaclustrClient;
use crate::wire::{Network, as_string};
use async_trait::async_trait;
use instaflow_cloud::{
    CloudError, DriftMerge, ForceNew, MergeReport, ReadOutcome, Reconciler, Removal, Result,
    StableId, StateChangeWaiter, Tracked, WaitSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const KIND: &str = "cluster";

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status reported in `clusterStatus`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterState {
    Genesis,
    Provisioning,
    Provisioned,
    Running,
    Failed,
    Deleted,
    Other(String),
}

impl From<&str> for ClusterState {
    fn from(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "GENESIS" => ClusterState::Genesis,
            "PROVISIONING" => ClusterState::Provisioning,
            "PROVISIONED" => ClusterState::Provisioned,
            "RUNNING" => ClusterState::Running,
            "FAILED" => ClusterState::Failed,
            "DELETED" => ClusterState::Deleted,
            _ => ClusterState::Other(status.to_string()),
        }
    }
}

impl From<String> for ClusterState {
    fn from(status: String) -> Self {
        ClusterState::from(status.as_str())
    }
}

impl From<ClusterState> for String {
    fn from(status: ClusterState) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Genesis => write!(f, "GENESIS"),
            ClusterState::Provisioning => write!(f, "PROVISIONING"),
            ClusterState::Provisioned => write!(f, "PROVISIONED"),
            ClusterState::Running => write!(f, "RUNNING"),
            ClusterState::Failed => write!(f, "FAILED"),
            ClusterState::Deleted => write!(f, "DELETED"),
            ClusterState::Other(status) => write!(f, "{status}"),
        }
    }
}

/// Wait until a freshly created cluster is `RUNNING`.
pub fn cluster_wait_spec() -> WaitSpec<ClusterState> {
    WaitSpec::new(
        [
            ClusterState::Genesis,
            ClusterState::Provisioning,
            ClusterState::Provisioned,
        ],
        [ClusterState::Running],
    )
    .with_timeout(Duration::from_secs(10 * 60))
    .with_delay(Duration::from_secs(1))
    .with_poll_interval(Duration::from_secs(30))
    .with_min_poll_interval(Duration::from_secs(3))
}

// ============================================================================
// Declared intent
// ============================================================================

/// Declared cluster. Every field forces a new cluster when changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub version: String,
    pub datacenter: DatacenterSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatacenterSpec {
    /// Cloud provider, e.g. `AWS_VPC`
    pub provider_name: String,

    /// Provider account to run in, when not the default one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Provider region, e.g. `US_EAST_1`
    pub region: String,

    /// Node size, e.g. `t3.small`
    pub size: String,

    /// Password authentication and user authorization
    #[serde(default)]
    pub auth: bool,

    #[serde(default)]
    pub client_encryption: bool,

    #[serde(default)]
    pub use_private_rpc_broadcast_address: bool,

    /// Cluster network in CIDR notation
    pub default_network: String,

    pub racks: Vec<RackAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RackAllocation {
    pub name: String,
    pub node_count: u32,
}

impl RackAllocation {
    pub fn new(name: impl Into<String>, node_count: u32) -> Self {
        Self {
            name: name.into(),
            node_count,
        }
    }
}

impl ClusterSpec {
    /// Rack layout keyed by rack name.
    fn rack_layout(&self) -> BTreeMap<&str, u32> {
        rack_layout(&self.datacenter.racks)
    }
}

fn rack_layout(racks: &[RackAllocation]) -> BTreeMap<&str, u32> {
    let mut layout = BTreeMap::new();
    for rack in racks {
        *layout.entry(rack.name.as_str()).or_insert(0) += rack.node_count;
    }
    layout
}

fn same_racks(a: &[RackAllocation], b: &[RackAllocation]) -> bool {
    rack_layout(a) == rack_layout(b)
}

impl ForceNew for ClusterSpec {
    fn replacement_fields(&self, declared: &Self) -> Vec<&'static str> {
        let (dc, other) = (&self.datacenter, &declared.datacenter);
        let mut fields = Vec::new();
        if self.name != declared.name {
            fields.push("name");
        }
        if self.version != declared.version {
            fields.push("version");
        }
        if dc.provider_name != other.provider_name {
            fields.push("datacenter.provider_name");
        }
        if dc.account != other.account {
            fields.push("datacenter.account");
        }
        if dc.region != other.region {
            fields.push("datacenter.region");
        }
        if dc.size != other.size {
            fields.push("datacenter.size");
        }
        if dc.auth != other.auth {
            fields.push("datacenter.auth");
        }
        if dc.client_encryption != other.client_encryption {
            fields.push("datacenter.client_encryption");
        }
        if dc.use_private_rpc_broadcast_address != other.use_private_rpc_broadcast_address {
            fields.push("datacenter.use_private_rpc_broadcast_address");
        }
        if dc.default_network != other.default_network {
            fields.push("datacenter.default_network");
        }
        if self.rack_layout() != declared.rack_layout() {
            fields.push("datacenter.racks");
        }
        fields
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Body of the create call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    pub cluster_name: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub version: String,
    pub size: String,
    pub region: RegionRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionRequest {
    #[serde(rename = "dataCentre")]
    pub datacenter: String,
    #[serde(serialize_with = "as_string")]
    pub authn_authz: bool,
    #[serde(serialize_with = "as_string")]
    pub client_encryption: bool,
    #[serde(rename = "usePrivateBroadcastRPCAddress", serialize_with = "as_string")]
    pub use_private_broadcast_rpc_address: bool,
    pub default_network: String,
    pub firewall_rules: Vec<String>,
    pub rack_allocation: Vec<RackRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RackRequest {
    pub name: String,
    #[serde(serialize_with = "as_string")]
    pub node_count: u32,
}

impl From<&ClusterSpec> for CreateClusterRequest {
    fn from(spec: &ClusterSpec) -> Self {
        let dc = &spec.datacenter;
        Self {
            cluster_name: spec.name.clone(),
            provider: dc.provider_name.clone(),
            account: dc.account.clone(),
            version: spec.version.clone(),
            size: dc.size.clone(),
            region: RegionRequest {
                datacenter: dc.region.clone(),
                authn_authz: dc.auth,
                client_encryption: dc.client_encryption,
                use_private_broadcast_rpc_address: dc.use_private_rpc_broadcast_address,
                default_network: dc.default_network.clone(),
                firewall_rules: Vec::new(),
                rack_allocation: spec
                    .rack_layout()
                    .into_iter()
                    .map(|(name, node_count)| RackRequest {
                        name: name.to_string(),
                        node_count,
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// Entry of the cluster list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cassandra_version: Option<String>,
    #[serde(default)]
    pub node_count: u32,
    #[serde(default)]
    pub running_node_count: u32,
    #[serde(default)]
    pub derived_status: Option<String>,
}

/// Full cluster snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub id: String,
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_network: Option<Network>,
    pub cluster_status: ClusterState,
    #[serde(default)]
    pub cassandra_version: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "dataCentres", default)]
    pub datacenters: Vec<Datacenter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    pub id: String,
    /// Region of the datacenter
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub client_encryption: Option<bool>,
    #[serde(default)]
    pub password_authentication: Option<bool>,
    #[serde(default)]
    pub user_authorization: Option<bool>,
    #[serde(rename = "usePrivateBroadcastRPCAddress", default)]
    pub use_private_broadcast_rpc_address: Option<bool>,
    #[serde(default)]
    pub cdc_network: Option<Network>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub size: String,
    pub rack: String,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub private_address: Option<String>,
    #[serde(default)]
    pub node_status: Option<String>,
}

impl ClusterStatus {
    /// Public and private addresses of every node in every datacenter.
    /// Nodes without an address are skipped.
    pub fn node_addresses(&self) -> (Vec<String>, Vec<String>) {
        let mut public = Vec::new();
        let mut private = Vec::new();
        for node in self.datacenters.iter().flat_map(|dc| &dc.nodes) {
            if let Some(addr) = node.public_address.as_deref().filter(|a| !a.is_empty()) {
                public.push(addr.to_string());
            }
            if let Some(addr) = node.private_address.as_deref().filter(|a| !a.is_empty()) {
                private.push(addr.to_string());
            }
        }
        (public, private)
    }
}

impl Datacenter {
    /// Racks as observed: node count per rack label.
    pub fn racks(&self) -> Vec<RackAllocation> {
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.rack.as_str()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(name, count)| RackAllocation::new(name, count))
            .collect()
    }
}

// ============================================================================
// Tracked model
// ============================================================================

/// Declared cluster plus the fields only the server knows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterModel {
    #[serde(flatten)]
    pub spec: ClusterSpec,

    #[serde(default)]
    pub status: Option<ClusterState>,

    #[serde(default)]
    pub datacenter_id: Option<String>,

    #[serde(default)]
    pub public_ips: Vec<String>,

    #[serde(default)]
    pub private_ips: Vec<String>,
}

impl From<ClusterSpec> for ClusterModel {
    fn from(spec: ClusterSpec) -> Self {
        Self {
            spec,
            ..Default::default()
        }
    }
}

impl DriftMerge for ClusterModel {
    type Snapshot = ClusterStatus;

    fn merge(&mut self, cluster: &ClusterStatus) -> MergeReport {
        let mut report = MergeReport::new();
        let (public_ips, private_ips) = cluster.node_addresses();

        report.computed("status", &mut self.status, Some(Some(cluster.cluster_status.clone())));
        report.computed("public_ips", &mut self.public_ips, Some(public_ips));
        report.computed("private_ips", &mut self.private_ips, Some(private_ips));

        report.settable("name", &mut self.spec.name, Some(cluster.cluster_name.clone()));
        report.settable("version", &mut self.spec.version, cluster.cassandra_version.clone());

        let dc = &mut self.spec.datacenter;
        report.settable(
            "datacenter.default_network",
            &mut dc.default_network,
            cluster.cluster_network.as_ref().map(Network::cidr),
        );

        // Only the first datacenter is managed
        if let Some(observed) = cluster.datacenters.first() {
            report.computed(
                "datacenter_id",
                &mut self.datacenter_id,
                Some(Some(observed.id.clone())),
            );
            report.settable(
                "datacenter.provider_name",
                &mut dc.provider_name,
                Some(observed.provider.clone()),
            );
            report.settable("datacenter.region", &mut dc.region, Some(observed.name.clone()));
            report.settable(
                "datacenter.size",
                &mut dc.size,
                observed.nodes.first().map(|n| n.size.clone()),
            );
            let auth = observed
                .password_authentication
                .zip(observed.user_authorization)
                .map(|(password, user)| password && user);
            report.settable("datacenter.auth", &mut dc.auth, auth);
            report.settable(
                "datacenter.client_encryption",
                &mut dc.client_encryption,
                observed.client_encryption,
            );
            report.settable(
                "datacenter.use_private_rpc_broadcast_address",
                &mut dc.use_private_rpc_broadcast_address,
                observed.use_private_broadcast_rpc_address,
            );
            if !observed.nodes.is_empty() {
                report.settable_by(
                    "datacenter.racks",
                    &mut dc.racks,
                    Some(observed.racks()),
                    |a, b| same_racks(a, b),
                );
            }
        }

        report
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<ClusterSummary>>;

    /// `None` when the cluster does not exist
    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterStatus>>;

    /// Returns the id of the new cluster
    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<String>;

    async fn delete_cluster(&self, cluster_id: &str) -> Result<Removal>;
}

#[async_trait]
impl ClusterGateway for InstaclustrClient {
    async fn list_clusters(&self) -> Result<Vec<ClusterSummary>> {
        self.get(&[]).await?.json("list clusters")
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterStatus>> {
        self.get(&[cluster_id]).await?.json_if_found("get cluster")
    }

    async fn create_cluster(&self, request: &CreateClusterRequest) -> Result<String> {
        let created: CreatedResponse = self.post(&[], request).await?.json("create cluster")?;
        Ok(created.id)
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<Removal> {
        self.delete(&[cluster_id]).await?.into_removal("delete cluster")
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Lifecycle reconciler for clusters
pub struct ClusterReconciler<G: ?Sized> {
    gateway: Arc<G>,
    wait: WaitSpec<ClusterState>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<G: ClusterGateway + ?Sized> ClusterReconciler<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            wait: cluster_wait_spec(),
            cancel: None,
        }
    }

    pub fn with_wait_spec(mut self, wait: WaitSpec<ClusterState>) -> Self {
        self.wait = wait;
        self
    }

    /// Abort provisioning waits once `cancel` flips to `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    async fn wait_until_running(&self, cluster_id: &str) -> Result<ClusterStatus> {
        let mut waiter = StateChangeWaiter::new(self.wait.clone());
        if let Some(cancel) = &self.cancel {
            waiter = waiter.with_cancellation(cancel.clone());
        }

        let resource = format!("{KIND} {cluster_id}");
        waiter
            .wait(&resource, move || async move {
                match self.gateway.get_cluster(cluster_id).await? {
                    Some(cluster) => {
                        let status = cluster.cluster_status.clone();
                        Ok((cluster, status))
                    }
                    None => Err(CloudError::NotFound(format!("{KIND} {cluster_id}"))),
                }
            })
            .await
    }
}

#[async_trait]
impl<G: ClusterGateway + ?Sized> Reconciler for ClusterReconciler<G> {
    type Spec = ClusterSpec;
    type Model = ClusterModel;

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn create(&self, spec: &ClusterSpec) -> Result<Tracked<ClusterModel>> {
        let request = CreateClusterRequest::from(spec);
        tracing::info!(name = %spec.name, region = %spec.datacenter.region, "Creating cluster");

        let cluster_id = self.gateway.create_cluster(&request).await?;
        tracing::info!(cluster_id = %cluster_id, "Cluster requested, waiting until running");

        if let Err(err) = self.wait_until_running(&cluster_id).await {
            tracing::warn!(
                cluster_id = %cluster_id,
                error = %err,
                "Cluster did not become ready; it is left in place"
            );
            return Err(err);
        }

        let mut tracked = Tracked::new(cluster_id.as_str(), ClusterModel::from(spec.clone()));
        if self.read(&mut tracked).await?.is_gone() {
            return Err(CloudError::NotFound(format!("{KIND} {cluster_id}")));
        }
        tracing::info!(cluster_id = %tracked.id, "Cluster is running");
        Ok(tracked)
    }

    async fn read(&self, tracked: &mut Tracked<ClusterModel>) -> Result<ReadOutcome> {
        if tracked.is_gone() {
            return Ok(ReadOutcome::Gone);
        }

        let cluster = match self.gateway.get_cluster(tracked.id.as_str()).await? {
            Some(cluster) if cluster.cluster_status != ClusterState::Deleted => cluster,
            _ => {
                tracing::info!(cluster_id = %tracked.id, "Cluster no longer exists");
                tracked.forget();
                return Ok(ReadOutcome::Gone);
            }
        };

        let report = tracked.model.merge(&cluster);
        if report.has_drift() {
            tracing::warn!(cluster_id = %tracked.id, drifted = ?report.drifted(), "Cluster drifted");
        }
        Ok(ReadOutcome::Present(report))
    }

    async fn delete(&self, id: &StableId) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        match self.gateway.delete_cluster(id.as_str()).await? {
            Removal::Deleted => tracing::info!(cluster_id = %id, "Cluster deleted"),
            Removal::AlreadyAbsent => tracing::info!(cluster_id = %id, "Cluster already absent"),
        }
        Ok(())
    }

    fn seed(&self, id: &StableId) -> Result<ClusterModel> {
        if id.is_empty() {
            return Err(CloudError::MalformedIdentifier(id.to_string()));
        }
        Ok(ClusterModel::default())
    }
}
