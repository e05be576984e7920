//! VPC peering connections
//!
//! A peering connects a cluster datacenter's VPC to a VPC in the user's
//! own AWS account. The provider initiates the request asynchronously and
//! the connection then waits for the peer side to accept it, so creation
//! is done once the request reaches `pending-acceptance`.

use crate::client::InstaclustrClient;
use crate::wire::Network;
use async_trait::async_trait;
use instaflow_cloud::id::{self, ensure_segment};
use instaflow_cloud::{
    CloudError, DriftMerge, ForceNew, MergeReport, ReadOutcome, Reconciler, Removal, Result,
    StableId, StateChangeWaiter, Tracked, WaitSpec,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const KIND: &str = "vpc_peering";

const VPC_PEERING: &str = "vpc-peering";

/// Status reported in `statusCode`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PeeringState {
    InitiatingRequest,
    Provisioning,
    PendingAcceptance,
    Active,
    Failed,
    Rejected,
    Expired,
    Deleting,
    Deleted,
    Other(String),
}

impl From<&str> for PeeringState {
    fn from(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "initiating-request" => PeeringState::InitiatingRequest,
            "provisioning" => PeeringState::Provisioning,
            "pending-acceptance" => PeeringState::PendingAcceptance,
            "active" => PeeringState::Active,
            "failed" => PeeringState::Failed,
            "rejected" => PeeringState::Rejected,
            "expired" => PeeringState::Expired,
            "deleting" => PeeringState::Deleting,
            "deleted" => PeeringState::Deleted,
            _ => PeeringState::Other(status.to_string()),
        }
    }
}

impl From<String> for PeeringState {
    fn from(status: String) -> Self {
        PeeringState::from(status.as_str())
    }
}

impl From<PeeringState> for String {
    fn from(status: PeeringState) -> Self {
        status.to_string()
    }
}

impl fmt::Display for PeeringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            PeeringState::InitiatingRequest => "initiating-request",
            PeeringState::Provisioning => "provisioning",
            PeeringState::PendingAcceptance => "pending-acceptance",
            PeeringState::Active => "active",
            PeeringState::Failed => "failed",
            PeeringState::Rejected => "rejected",
            PeeringState::Expired => "expired",
            PeeringState::Deleting => "deleting",
            PeeringState::Deleted => "deleted",
            PeeringState::Other(status) => status,
        };
        f.write_str(status)
    }
}

/// Wait until the peering request has reached the peer account.
pub fn peering_wait_spec() -> WaitSpec<PeeringState> {
    WaitSpec::new(
        [PeeringState::InitiatingRequest, PeeringState::Provisioning],
        [PeeringState::PendingAcceptance, PeeringState::Active],
    )
    .with_timeout(Duration::from_secs(5 * 60))
    .with_delay(Duration::from_secs(1))
    .with_poll_interval(Duration::from_secs(10))
    .with_min_poll_interval(Duration::from_secs(2))
}

/// Declared peering connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcPeeringSpec {
    /// Datacenter of the cluster side
    pub cluster_datacenter_id: String,
    pub peer_vpc_id: String,
    pub peer_account_id: String,
    /// Peer subnet in CIDR notation
    pub peer_subnet: String,
}

impl ForceNew for VpcPeeringSpec {
    fn replacement_fields(&self, declared: &Self) -> Vec<&'static str> {
        [
            ("cluster_datacenter_id", &self.cluster_datacenter_id, &declared.cluster_datacenter_id),
            ("peer_vpc_id", &self.peer_vpc_id, &declared.peer_vpc_id),
            ("peer_account_id", &self.peer_account_id, &declared.peer_account_id),
            ("peer_subnet", &self.peer_subnet, &declared.peer_subnet),
        ]
        .into_iter()
        .filter(|(_, current, wanted)| current != wanted)
        .map(|(field, _, _)| field)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVpcPeerRequest {
    pub peer_vpc_id: String,
    pub peer_account_id: String,
    pub peer_subnet: Network,
}

impl TryFrom<&VpcPeeringSpec> for CreateVpcPeerRequest {
    type Error = CloudError;

    fn try_from(spec: &VpcPeeringSpec) -> Result<Self> {
        let peer_subnet = Network::parse(&spec.peer_subnet).ok_or_else(|| {
            CloudError::InvalidConfig(format!(
                "peer_subnet '{}' is not in CIDR notation",
                spec.peer_subnet
            ))
        })?;
        Ok(Self {
            peer_vpc_id: spec.peer_vpc_id.clone(),
            peer_account_id: spec.peer_account_id.clone(),
            peer_subnet,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// Peering connection as the API reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcPeer {
    pub id: String,
    #[serde(rename = "aws_vpc_connection_id", default)]
    pub aws_vpc_connection_id: Option<String>,
    #[serde(rename = "clusterDataCentre", default)]
    pub cluster_datacenter_id: Option<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub peer_vpc_id: Option<String>,
    #[serde(default)]
    pub peer_account_id: Option<String>,
    #[serde(default)]
    pub peer_subnet: Option<Network>,
    pub status_code: PeeringState,
}

/// Declared peering plus the fields assigned by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcPeeringModel {
    #[serde(flatten)]
    pub spec: VpcPeeringSpec,

    /// VPC of the cluster side
    #[serde(default)]
    pub vpc_id: Option<String>,

    #[serde(default)]
    pub aws_vpc_connection_id: Option<String>,

    #[serde(default)]
    pub status: Option<PeeringState>,
}

impl DriftMerge for VpcPeeringModel {
    type Snapshot = VpcPeer;

    fn merge(&mut self, peer: &VpcPeer) -> MergeReport {
        let mut report = MergeReport::new();
        report.computed("status", &mut self.status, Some(Some(peer.status_code.clone())));
        report.computed("vpc_id", &mut self.vpc_id, peer.vpc_id.clone().map(Some));
        report.computed(
            "aws_vpc_connection_id",
            &mut self.aws_vpc_connection_id,
            peer.aws_vpc_connection_id.clone().map(Some),
        );

        let spec = &mut self.spec;
        report.settable(
            "cluster_datacenter_id",
            &mut spec.cluster_datacenter_id,
            peer.cluster_datacenter_id.clone(),
        );
        report.settable("peer_vpc_id", &mut spec.peer_vpc_id, peer.peer_vpc_id.clone());
        report.settable(
            "peer_account_id",
            &mut spec.peer_account_id,
            peer.peer_account_id.clone(),
        );
        report.settable(
            "peer_subnet",
            &mut spec.peer_subnet,
            peer.peer_subnet.as_ref().map(Network::cidr),
        );
        report
    }
}

#[async_trait]
pub trait VpcPeeringGateway: Send + Sync {
    /// Peerings of a datacenter; empty when the datacenter does not exist
    async fn list_vpc_peers(&self, datacenter_id: &str) -> Result<Vec<VpcPeer>>;

    async fn get_vpc_peer(&self, datacenter_id: &str, peering_id: &str) -> Result<Option<VpcPeer>>;

    /// Returns the id of the new peering
    async fn create_vpc_peer(
        &self,
        datacenter_id: &str,
        request: &CreateVpcPeerRequest,
    ) -> Result<String>;

    async fn delete_vpc_peer(&self, datacenter_id: &str, peering_id: &str) -> Result<Removal>;
}

#[async_trait]
impl VpcPeeringGateway for InstaclustrClient {
    async fn list_vpc_peers(&self, datacenter_id: &str) -> Result<Vec<VpcPeer>> {
        let peers = self
            .get(&[VPC_PEERING, datacenter_id])
            .await?
            .json_if_found("list VPC peerings")?;
        Ok(peers.unwrap_or_default())
    }

    async fn get_vpc_peer(&self, datacenter_id: &str, peering_id: &str) -> Result<Option<VpcPeer>> {
        self.get(&[VPC_PEERING, datacenter_id, peering_id])
            .await?
            .json_if_found("get VPC peering")
    }

    async fn create_vpc_peer(
        &self,
        datacenter_id: &str,
        request: &CreateVpcPeerRequest,
    ) -> Result<String> {
        let created: CreatedResponse = self
            .post(&[VPC_PEERING, datacenter_id], request)
            .await?
            .json("create VPC peering")?;
        Ok(created.id)
    }

    async fn delete_vpc_peer(&self, datacenter_id: &str, peering_id: &str) -> Result<Removal> {
        self.delete(&[VPC_PEERING, datacenter_id, peering_id])
            .await?
            .into_removal("delete VPC peering")
    }
}

/// Lifecycle reconciler for VPC peering connections
pub struct VpcPeeringReconciler<G: ?Sized> {
    gateway: Arc<G>,
    wait: WaitSpec<PeeringState>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<G: VpcPeeringGateway + ?Sized> VpcPeeringReconciler<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            wait: peering_wait_spec(),
            cancel: None,
        }
    }

    pub fn with_wait_spec(mut self, wait: WaitSpec<PeeringState>) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    async fn wait_until_requested(&self, datacenter_id: &str, peering_id: &str) -> Result<VpcPeer> {
        let mut waiter = StateChangeWaiter::new(self.wait.clone());
        if let Some(cancel) = &self.cancel {
            waiter = waiter.with_cancellation(cancel.clone());
        }

        let resource = format!("{KIND} {datacenter_id}:{peering_id}");
        waiter
            .wait(&resource, move || async move {
                match self.gateway.get_vpc_peer(datacenter_id, peering_id).await? {
                    Some(peer) => {
                        let status = peer.status_code.clone();
                        Ok((peer, status))
                    }
                    None => Err(CloudError::NotFound(format!("{KIND} {peering_id}"))),
                }
            })
            .await
    }
}

#[async_trait]
impl<G: VpcPeeringGateway + ?Sized> Reconciler for VpcPeeringReconciler<G> {
    type Spec = VpcPeeringSpec;
    type Model = VpcPeeringModel;

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn create(&self, spec: &VpcPeeringSpec) -> Result<Tracked<VpcPeeringModel>> {
        ensure_segment("cluster_datacenter_id", &spec.cluster_datacenter_id)?;
        let request = CreateVpcPeerRequest::try_from(spec)?;

        tracing::info!(
            datacenter_id = %spec.cluster_datacenter_id,
            peer_vpc_id = %spec.peer_vpc_id,
            "Requesting VPC peering"
        );
        let peering_id = self
            .gateway
            .create_vpc_peer(&spec.cluster_datacenter_id, &request)
            .await?;
        ensure_segment("peering id", &peering_id)?;

        if let Err(err) = self
            .wait_until_requested(&spec.cluster_datacenter_id, &peering_id)
            .await
        {
            tracing::warn!(
                peering_id = %peering_id,
                error = %err,
                "VPC peering did not reach the peer account; it is left in place"
            );
            return Err(err);
        }

        let mut tracked = Tracked::new(
            id::encode(&spec.cluster_datacenter_id, &peering_id),
            VpcPeeringModel {
                spec: spec.clone(),
                ..Default::default()
            },
        );
        if self.read(&mut tracked).await?.is_gone() {
            return Err(CloudError::NotFound(format!("{KIND} {peering_id}")));
        }
        tracing::info!(id = %tracked.id, "VPC peering awaiting acceptance");
        Ok(tracked)
    }

    async fn read(&self, tracked: &mut Tracked<VpcPeeringModel>) -> Result<ReadOutcome> {
        if tracked.is_gone() {
            return Ok(ReadOutcome::Gone);
        }
        let (datacenter_id, peering_id) = tracked.id.split()?;

        let peers = self.gateway.list_vpc_peers(datacenter_id).await?;
        let found = peers
            .into_iter()
            .find(|p| p.id == peering_id && p.status_code != PeeringState::Deleted);
        let Some(peer) = found else {
            tracing::info!(id = %tracked.id, "VPC peering no longer exists");
            tracked.forget();
            return Ok(ReadOutcome::Gone);
        };

        let report = tracked.model.merge(&peer);
        if report.has_drift() {
            tracing::warn!(id = %tracked.id, drifted = ?report.drifted(), "VPC peering drifted");
        }
        Ok(ReadOutcome::Present(report))
    }

    async fn delete(&self, id: &StableId) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let (datacenter_id, peering_id) = id.split()?;
        match self.gateway.delete_vpc_peer(datacenter_id, peering_id).await? {
            Removal::Deleted => tracing::info!(%id, "VPC peering deleted"),
            Removal::AlreadyAbsent => tracing::info!(%id, "VPC peering already absent"),
        }
        Ok(())
    }

    fn seed(&self, id: &StableId) -> Result<VpcPeeringModel> {
        let (datacenter_id, _) = id.split()?;
        Ok(VpcPeeringModel {
            spec: VpcPeeringSpec {
                cluster_datacenter_id: datacenter_id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}
