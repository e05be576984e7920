//! Cluster IPs data source
//!
//! Read-only lookup of the addresses a cluster exposes, for wiring
//! security groups and client configuration.

use crate::cluster::{ClusterGateway, ClusterStatus};
use instaflow_cloud::{CloudError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIps {
    pub cluster_id: String,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    /// CDC network of the first datacenter
    pub cidr_block: Option<String>,
}

impl ClusterIps {
    pub async fn read<G: ClusterGateway + ?Sized>(gateway: &G, cluster_id: &str) -> Result<Self> {
        let cluster = gateway
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| CloudError::NotFound(format!("cluster {cluster_id}")))?;
        tracing::debug!(cluster_id, status = %cluster.cluster_status, "Read cluster addresses");
        Ok(Self::from(&cluster))
    }

    /// Read by cluster id, or by cluster name when no cluster has that id.
    pub async fn lookup<G: ClusterGateway + ?Sized>(gateway: &G, target: &str) -> Result<Self> {
        let clusters = gateway.list_clusters().await?;
        if clusters.iter().any(|c| c.id == target) {
            return Self::read(gateway, target).await;
        }

        let mut named = clusters.iter().filter(|c| c.name == target);
        match (named.next(), named.next()) {
            (Some(cluster), None) => {
                tracing::debug!(name = target, cluster_id = %cluster.id, "Resolved cluster by name");
                Self::read(gateway, &cluster.id).await
            }
            (Some(_), Some(_)) => Err(CloudError::InvalidConfig(format!(
                "several clusters are named '{target}'; pass the cluster id instead"
            ))),
            (None, _) => Self::read(gateway, target).await,
        }
    }
}

impl From<&ClusterStatus> for ClusterIps {
    fn from(cluster: &ClusterStatus) -> Self {
        let (public_ips, private_ips) = cluster.node_addresses();
        Self {
            cluster_id: cluster.id.clone(),
            public_ips,
            private_ips,
            cidr_block: cluster
                .datacenters
                .first()
                .and_then(|dc| dc.cdc_network.as_ref())
                .map(|network| network.cidr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterSummary, CreateClusterRequest};
    use async_trait::async_trait;
    use instaflow_cloud::gateway::Removal;
    use std::sync::Mutex;

    /// Cluster list plus a log of the ids passed to `get_cluster`
    struct Listed {
        clusters: Vec<ClusterSummary>,
        gets: Mutex<Vec<String>>,
    }

    impl Listed {
        fn new(clusters: &[(&str, &str)]) -> Self {
            Self {
                clusters: clusters
                    .iter()
                    .map(|(id, name)| ClusterSummary {
                        id: id.to_string(),
                        name: name.to_string(),
                        cassandra_version: None,
                        node_count: 1,
                        running_node_count: 1,
                        derived_status: Some("RUNNING".to_string()),
                    })
                    .collect(),
                gets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterGateway for Listed {
        async fn list_clusters(&self) -> Result<Vec<ClusterSummary>> {
            Ok(self.clusters.clone())
        }

        async fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterStatus>> {
            self.gets.lock().unwrap().push(cluster_id.to_string());
            let Some(summary) = self.clusters.iter().find(|c| c.id == cluster_id) else {
                return Ok(None);
            };
            Ok(Some(
                serde_json::from_value(serde_json::json!({
                    "id": summary.id,
                    "clusterName": summary.name,
                    "clusterStatus": "RUNNING",
                    "dataCentres": []
                }))
                .unwrap(),
            ))
        }

        async fn create_cluster(&self, _request: &CreateClusterRequest) -> Result<String> {
            unreachable!("lookups never create")
        }

        async fn delete_cluster(&self, _cluster_id: &str) -> Result<Removal> {
            unreachable!("lookups never delete")
        }
    }

    #[tokio::test]
    async fn test_lookup_by_id_or_name() {
        let gateway = Listed::new(&[("X123", "analytics"), ("X456", "events")]);

        assert_eq!(ClusterIps::lookup(&gateway, "X456").await.unwrap().cluster_id, "X456");
        assert_eq!(ClusterIps::lookup(&gateway, "analytics").await.unwrap().cluster_id, "X123");
        assert_eq!(*gateway.gets.lock().unwrap(), vec!["X456", "X123"]);

        let err = ClusterIps::lookup(&gateway, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lookup_rejects_ambiguous_name() {
        let gateway = Listed::new(&[("X123", "analytics"), ("X789", "analytics")]);

        let err = ClusterIps::lookup(&gateway, "analytics").await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
        assert!(gateway.gets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_addresses_span_all_datacenters() {
        let cluster: ClusterStatus = serde_json::from_value(serde_json::json!({
            "id": "X123",
            "clusterName": "c1",
            "clusterStatus": "RUNNING",
            "dataCentres": [
                {
                    "id": "dc-1",
                    "name": "US_EAST_1",
                    "provider": "AWS_VPC",
                    "cdcNetwork": {"network": "10.0.0.0", "prefixLength": 18},
                    "nodes": [
                        {"id": "n1", "size": "t3.small", "rack": "a", "publicAddress": "54.0.0.1", "privateAddress": "10.0.0.1"},
                        {"id": "n2", "size": "t3.small", "rack": "b", "publicAddress": "", "privateAddress": "10.0.0.2"}
                    ]
                },
                {
                    "id": "dc-2",
                    "name": "EU_WEST_1",
                    "provider": "AWS_VPC",
                    "cdcNetwork": {"network": "10.1.0.0", "prefixLength": 18},
                    "nodes": [
                        {"id": "n3", "size": "t3.small", "rack": "a", "privateAddress": "10.1.0.1"}
                    ]
                }
            ]
        }))
        .unwrap();

        let ips = ClusterIps::from(&cluster);
        assert_eq!(ips.public_ips, vec!["54.0.0.1"]);
        assert_eq!(ips.private_ips, vec!["10.0.0.1", "10.0.0.2", "10.1.0.1"]);
        assert_eq!(ips.cidr_block.as_deref(), Some("10.0.0.0/18"));
    }
}
