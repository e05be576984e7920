//! Declared resources
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! clusters:
//!   analytics:
//!     version: apache-cassandra-3.11.4
//!     datacenter:
//!       provider_name: AWS_VPC
//!       region: US_EAST_1
//!       size: t3.small
//!       default_network: 10.224.0.0/16
//!       racks:
//!         - { name: a, node_count: 1 }
//!         - { name: b, node_count: 1 }
//! firewall_rules:
//!   office:
//!     cluster: analytics
//!     network: 203.0.113.0/24
//! vpc_peerings:
//!   app:
//!     cluster: analytics
//!     peer_vpc_id: vpc-0123
//!     peer_account_id: "123456789012"
//!     peer_subnet: 192.168.0.0/24
//! ```
//!
//! Firewall rules and peerings point at a cluster either by the name it
//! is declared under (`cluster`) or by a literal id of a cluster managed
//! elsewhere (`cluster_id` / `cluster_datacenter_id`).

use anyhow::{Context, bail};
use instaflow_cloud_instaclustr::{ClusterSpec, DatacenterSpec, FirewallRuleSpec, VpcPeeringSpec};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declarations {
    #[serde(default)]
    pub clusters: BTreeMap<String, ClusterDecl>,

    #[serde(default)]
    pub firewall_rules: BTreeMap<String, FirewallRuleDecl>,

    #[serde(default)]
    pub vpc_peerings: BTreeMap<String, VpcPeeringDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterDecl {
    /// Cluster name at the provider; defaults to the declared name
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    pub datacenter: DatacenterSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallRuleDecl {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub network: String,
    #[serde(default)]
    pub rule_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VpcPeeringDecl {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub cluster_datacenter_id: Option<String>,
    pub peer_vpc_id: String,
    pub peer_account_id: String,
    pub peer_subnet: String,
}

/// Where a dependent resource finds its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRef<'a> {
    /// A cluster declared in the same file
    Declared(&'a str),
    /// A literal id
    Literal(&'a str),
}

fn cluster_ref<'a>(
    what: &str,
    cluster: &'a Option<String>,
    literal: &'a Option<String>,
    literal_field: &str,
) -> anyhow::Result<ClusterRef<'a>> {
    match (cluster, literal) {
        (Some(name), None) => Ok(ClusterRef::Declared(name)),
        (None, Some(id)) => Ok(ClusterRef::Literal(id)),
        _ => bail!("{what}: set exactly one of `cluster` or `{literal_field}`"),
    }
}

impl ClusterDecl {
    pub fn to_spec(&self, name: &str) -> ClusterSpec {
        ClusterSpec {
            name: self.name.clone().unwrap_or_else(|| name.to_string()),
            version: self.version.clone(),
            datacenter: self.datacenter.clone(),
        }
    }
}

impl FirewallRuleDecl {
    pub fn cluster_ref(&self) -> anyhow::Result<ClusterRef<'_>> {
        cluster_ref("firewall rule", &self.cluster, &self.cluster_id, "cluster_id")
    }

    pub fn to_spec(&self, cluster_id: &str) -> FirewallRuleSpec {
        let mut spec = FirewallRuleSpec::new(cluster_id, self.network.clone());
        if let Some(rule_types) = &self.rule_types {
            spec.rule_types = rule_types.clone();
        }
        spec
    }
}

impl VpcPeeringDecl {
    pub fn cluster_ref(&self) -> anyhow::Result<ClusterRef<'_>> {
        cluster_ref(
            "VPC peering",
            &self.cluster,
            &self.cluster_datacenter_id,
            "cluster_datacenter_id",
        )
    }

    pub fn to_spec(&self, datacenter_id: &str) -> VpcPeeringSpec {
        VpcPeeringSpec {
            cluster_datacenter_id: datacenter_id.to_string(),
            peer_vpc_id: self.peer_vpc_id.clone(),
            peer_account_id: self.peer_account_id.clone(),
            peer_subnet: self.peer_subnet.clone(),
        }
    }
}

impl Declarations {
    /// Load and validate a declarations file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let declarations = Self::parse(&content)
            .with_context(|| format!("Invalid declarations in {}", path.display()))?;
        tracing::debug!(
            clusters = declarations.clusters.len(),
            firewall_rules = declarations.firewall_rules.len(),
            vpc_peerings = declarations.vpc_peerings.len(),
            "Loaded declarations"
        );
        Ok(declarations)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let declarations: Self = serde_yaml::from_str(content)?;
        declarations.validate()?;
        Ok(declarations)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, cluster) in &self.clusters {
            let racks = &cluster.datacenter.racks;
            if racks.is_empty() {
                bail!("cluster '{name}': at least one rack is required");
            }
            let mut seen = BTreeSet::new();
            for rack in racks {
                if !seen.insert(rack.name.as_str()) {
                    bail!("cluster '{name}': rack '{}' is declared twice", rack.name);
                }
                if rack.node_count == 0 {
                    bail!("cluster '{name}': rack '{}' needs at least one node", rack.name);
                }
            }
        }

        for (name, rule) in &self.firewall_rules {
            let reference = rule
                .cluster_ref()
                .with_context(|| format!("firewall rule '{name}'"))?;
            self.check_reference(reference)
                .with_context(|| format!("firewall rule '{name}'"))?;
            if rule.rule_types.as_ref().is_some_and(Vec::is_empty) {
                bail!("firewall rule '{name}': rule_types must not be empty");
            }
        }

        for (name, peering) in &self.vpc_peerings {
            let reference = peering
                .cluster_ref()
                .with_context(|| format!("VPC peering '{name}'"))?;
            self.check_reference(reference)
                .with_context(|| format!("VPC peering '{name}'"))?;
        }
        Ok(())
    }

    fn check_reference(&self, reference: ClusterRef<'_>) -> anyhow::Result<()> {
        match reference {
            ClusterRef::Declared(cluster) if !self.clusters.contains_key(cluster) => {
                bail!("refers to undeclared cluster '{cluster}'")
            }
            _ => Ok(()),
        }
    }

    pub fn is_declared(&self, kind: &str, name: &str) -> bool {
        use instaflow_cloud_instaclustr::{cluster, firewall, vpc_peering};
        match kind {
            cluster::KIND => self.clusters.contains_key(name),
            firewall::KIND => self.firewall_rules.contains_key(name),
            vpc_peering::KIND => self.vpc_peerings.contains_key(name),
            _ => false,
        }
    }
}
