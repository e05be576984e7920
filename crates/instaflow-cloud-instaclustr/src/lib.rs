//! Instaclustr provider for Instaflow
//!
//! This crate implements the reconcilers of the three resource families
//! exposed by the Instaclustr provisioning API on top of an HTTP gateway.
//!
//! # Resources
//!
//! - Clusters (asynchronous, waits until `RUNNING`)
//! - Cluster firewall rules (synchronous, composite id `clusterId:network`)
//! - VPC peering connections (asynchronous, waits until
//!   `pending-acceptance`, composite id `datacenterId:peeringId`)
//! - Cluster IPs (read-only data source)
//!
//! # Requirements
//!
//! - `INSTACLUSTR_ACCESS_KEY`, `INSTACLUSTR_SECRET_KEY` env vars
//! - `INSTACLUSTR_URL` to override the provisioning API endpoint
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use instaflow_cloud::Reconciler;
//! use instaflow_cloud_instaclustr::{ApiConfig, FirewallRuleReconciler, FirewallRuleSpec, InstaclustrClient};
//!
//! let client = Arc::new(InstaclustrClient::new(ApiConfig::from_env()?)?);
//! let rules = FirewallRuleReconciler::new(client);
//!
//! let tracked = rules.create(&FirewallRuleSpec::new("X123", "10.0.0.0/24")).await?;
//! assert_eq!(tracked.id.as_str(), "X123:10.0.0.0/24");
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod firewall;
pub mod ips;
pub mod vpc_peering;
pub mod wire;

pub use client::InstaclustrClient;
pub use cluster::{
    ClusterGateway, ClusterModel, ClusterReconciler, ClusterSpec, ClusterState, ClusterStatus,
    DatacenterSpec, RackAllocation,
};
pub use config::ApiConfig;
pub use firewall::{FirewallGateway, FirewallRuleModel, FirewallRuleReconciler, FirewallRuleSpec};
pub use ips::ClusterIps;
pub use vpc_peering::{
    PeeringState, VpcPeer, VpcPeeringGateway, VpcPeeringModel, VpcPeeringReconciler,
    VpcPeeringSpec,
};
pub use wire::Network;
