//! Cluster firewall rules
//!
//! A rule admits one network to a cluster. The API has no rule ids: rules
//! are addressed by `(cluster, network)`, so the StableID is the composite
//! `clusterId:network`. Rules take effect synchronously.

use crate::client::InstaclustrClient;
use async_trait::async_trait;
use instaflow_cloud::id::{self, ensure_segment};
use instaflow_cloud::{
    CloudError, DriftMerge, ForceNew, MergeReport, ReadOutcome, Reconciler, Removal, Result,
    StableId, Tracked,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const KIND: &str = "firewall_rule";

const FIREWALL_RULES: &str = "firewallRules";

fn default_rule_types() -> Vec<String> {
    vec!["CASSANDRA".to_string()]
}

/// Declared firewall rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSpec {
    pub cluster_id: String,

    /// Admitted network in CIDR notation
    pub network: String,

    /// Services the network may reach
    #[serde(default = "default_rule_types")]
    pub rule_types: Vec<String>,
}

impl FirewallRuleSpec {
    pub fn new(cluster_id: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            network: network.into(),
            rule_types: default_rule_types(),
        }
    }

    fn rule_set(&self) -> FirewallRuleSet {
        FirewallRuleSet::request(&self.network, &self.rule_types)
    }
}

fn same_types(a: &[String], b: &[String]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

impl ForceNew for FirewallRuleSpec {
    fn replacement_fields(&self, declared: &Self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.cluster_id != declared.cluster_id {
            fields.push("cluster_id");
        }
        if self.network != declared.network {
            fields.push("network");
        }
        if !same_types(&self.rule_types, &declared.rule_types) {
            fields.push("rule_types");
        }
        fields
    }
}

/// Rules for one network, as listed and posted by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRuleSet {
    pub network: String,
    #[serde(default)]
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl FirewallRuleSet {
    /// Body of a create or delete call: network and rule types, no status.
    pub fn request(network: &str, rule_types: &[String]) -> Self {
        Self {
            network: network.to_string(),
            rules: rule_types
                .iter()
                .map(|rule_type| FirewallRule {
                    rule_type: rule_type.clone(),
                    status: None,
                })
                .collect(),
        }
    }

    pub fn rule_types(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.rule_type.clone()).collect()
    }
}

/// Declared rule plus per-type provisioning status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleModel {
    #[serde(flatten)]
    pub spec: FirewallRuleSpec,

    /// Status reported for each rule type
    #[serde(default)]
    pub statuses: BTreeMap<String, String>,
}

impl DriftMerge for FirewallRuleModel {
    type Snapshot = FirewallRuleSet;

    fn merge(&mut self, rules: &FirewallRuleSet) -> MergeReport {
        let mut report = MergeReport::new();
        let statuses = rules
            .rules
            .iter()
            .filter_map(|r| Some((r.rule_type.clone(), r.status.clone()?)))
            .collect();

        report.computed("statuses", &mut self.statuses, Some(statuses));
        report.settable("network", &mut self.spec.network, Some(rules.network.clone()));
        if !rules.rules.is_empty() {
            report.settable_by(
                "rule_types",
                &mut self.spec.rule_types,
                Some(rules.rule_types()),
                |a, b| same_types(a, b),
            );
        }
        report
    }
}

#[async_trait]
pub trait FirewallGateway: Send + Sync {
    /// All rules of a cluster; empty when the cluster does not exist
    async fn list_firewall_rules(&self, cluster_id: &str) -> Result<Vec<FirewallRuleSet>>;

    async fn create_firewall_rule(&self, cluster_id: &str, rule: &FirewallRuleSet) -> Result<()>;

    async fn delete_firewall_rule(
        &self,
        cluster_id: &str,
        rule: &FirewallRuleSet,
    ) -> Result<Removal>;
}

#[async_trait]
impl FirewallGateway for InstaclustrClient {
    async fn list_firewall_rules(&self, cluster_id: &str) -> Result<Vec<FirewallRuleSet>> {
        let rules = self
            .get(&[cluster_id, FIREWALL_RULES])
            .await?
            .json_if_found("list firewall rules")?;
        Ok(rules.unwrap_or_default())
    }

    async fn create_firewall_rule(&self, cluster_id: &str, rule: &FirewallRuleSet) -> Result<()> {
        self.post(&[cluster_id, FIREWALL_RULES], rule)
            .await?
            .into_success("create firewall rule")?;
        Ok(())
    }

    async fn delete_firewall_rule(
        &self,
        cluster_id: &str,
        rule: &FirewallRuleSet,
    ) -> Result<Removal> {
        self.delete_with_body(&[cluster_id, FIREWALL_RULES], rule)
            .await?
            .into_removal("delete firewall rule")
    }
}

/// Lifecycle reconciler for firewall rules
pub struct FirewallRuleReconciler<G: ?Sized> {
    gateway: Arc<G>,
}

impl<G: FirewallGateway + ?Sized> FirewallRuleReconciler<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    async fn find(&self, cluster_id: &str, network: &str) -> Result<Option<FirewallRuleSet>> {
        let rules = self.gateway.list_firewall_rules(cluster_id).await?;
        Ok(rules.into_iter().find(|r| r.network == network))
    }
}

#[async_trait]
impl<G: FirewallGateway + ?Sized> Reconciler for FirewallRuleReconciler<G> {
    type Spec = FirewallRuleSpec;
    type Model = FirewallRuleModel;

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn create(&self, spec: &FirewallRuleSpec) -> Result<Tracked<FirewallRuleModel>> {
        ensure_segment("cluster_id", &spec.cluster_id)?;
        ensure_segment("network", &spec.network)?;
        if spec.rule_types.is_empty() {
            return Err(CloudError::InvalidConfig(
                "firewall rule needs at least one rule type".to_string(),
            ));
        }

        if self.find(&spec.cluster_id, &spec.network).await?.is_some() {
            tracing::info!(
                cluster_id = %spec.cluster_id,
                network = %spec.network,
                "Firewall rule already present, adopting it"
            );
        } else {
            tracing::info!(
                cluster_id = %spec.cluster_id,
                network = %spec.network,
                "Creating firewall rule"
            );
            self.gateway
                .create_firewall_rule(&spec.cluster_id, &spec.rule_set())
                .await?;
        }

        let mut tracked = Tracked::new(
            id::encode(&spec.cluster_id, &spec.network),
            FirewallRuleModel {
                spec: spec.clone(),
                ..Default::default()
            },
        );
        if self.read(&mut tracked).await?.is_gone() {
            return Err(CloudError::NotFound(format!(
                "{KIND} {}:{}",
                spec.cluster_id, spec.network
            )));
        }
        Ok(tracked)
    }

    async fn read(&self, tracked: &mut Tracked<FirewallRuleModel>) -> Result<ReadOutcome> {
        if tracked.is_gone() {
            return Ok(ReadOutcome::Gone);
        }
        let (cluster_id, network) = tracked.id.split()?;

        let Some(rules) = self.find(cluster_id, network).await? else {
            tracing::info!(id = %tracked.id, "Firewall rule no longer exists");
            tracked.forget();
            return Ok(ReadOutcome::Gone);
        };

        let cluster_id = cluster_id.to_string();
        let mut report = tracked.model.merge(&rules);
        report.settable("cluster_id", &mut tracked.model.spec.cluster_id, Some(cluster_id));
        Ok(ReadOutcome::Present(report))
    }

    async fn delete(&self, id: &StableId) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let (cluster_id, network) = id.split()?;

        let Some(rules) = self.find(cluster_id, network).await? else {
            tracing::info!(%id, "Firewall rule already absent");
            return Ok(());
        };

        let request = FirewallRuleSet::request(&rules.network, &rules.rule_types());
        match self.gateway.delete_firewall_rule(cluster_id, &request).await? {
            Removal::Deleted => tracing::info!(%id, "Firewall rule deleted"),
            Removal::AlreadyAbsent => tracing::info!(%id, "Firewall rule already absent"),
        }
        Ok(())
    }

    fn seed(&self, id: &StableId) -> Result<FirewallRuleModel> {
        let (cluster_id, network) = id.split()?;
        Ok(FirewallRuleModel {
            spec: FirewallRuleSpec {
                cluster_id: cluster_id.to_string(),
                network: network.to_string(),
                rule_types: Vec::new(),
            },
            statuses: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rule sets per cluster id
    #[derive(Default)]
    struct FakeFirewall {
        rules: Mutex<BTreeMap<String, Vec<FirewallRuleSet>>>,
        creates: AtomicUsize,
        deletes: AtomicUsize,
        deleted: Mutex<Vec<FirewallRuleSet>>,
    }

    impl FakeFirewall {
        fn with_rule(cluster_id: &str, network: &str) -> Self {
            let fake = Self::default();
            fake.rules.lock().unwrap().insert(
                cluster_id.to_string(),
                vec![provisioned(network, &["CASSANDRA"])],
            );
            fake
        }
    }

    fn provisioned(network: &str, types: &[&str]) -> FirewallRuleSet {
        FirewallRuleSet {
            network: network.to_string(),
            rules: types
                .iter()
                .map(|t| FirewallRule {
                    rule_type: t.to_string(),
                    status: Some("GRANTED".to_string()),
                })
                .collect(),
        }
    }

    #[async_trait]
    impl FirewallGateway for FakeFirewall {
        async fn list_firewall_rules(&self, cluster_id: &str) -> Result<Vec<FirewallRuleSet>> {
            Ok(self
                .rules
                .lock()
                .unwrap()
                .get(cluster_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_firewall_rule(&self, cluster_id: &str, rule: &FirewallRuleSet) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            let types: Vec<&str> = rule.rules.iter().map(|r| r.rule_type.as_str()).collect();
            self.rules
                .lock()
                .unwrap()
                .entry(cluster_id.to_string())
                .or_default()
                .push(provisioned(&rule.network, &types));
            Ok(())
        }

        async fn delete_firewall_rule(
            &self,
            cluster_id: &str,
            rule: &FirewallRuleSet,
        ) -> Result<Removal> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.deleted.lock().unwrap().push(rule.clone());
            let mut rules = self.rules.lock().unwrap();
            let Some(sets) = rules.get_mut(cluster_id) else {
                return Ok(Removal::AlreadyAbsent);
            };
            let before = sets.len();
            sets.retain(|r| r.network != rule.network);
            Ok(if sets.len() < before {
                Removal::Deleted
            } else {
                Removal::AlreadyAbsent
            })
        }
    }

    #[tokio::test]
    async fn test_create_uses_composite_id() {
        let gateway = Arc::new(FakeFirewall::default());
        let reconciler = FirewallRuleReconciler::new(gateway.clone());

        let tracked = reconciler
            .create(&FirewallRuleSpec::new("clusterA", "10.0.0.0/24"))
            .await
            .unwrap();

        assert_eq!(tracked.id.as_str(), "clusterA:10.0.0.0/24");
        assert_eq!(tracked.model.statuses.get("CASSANDRA").map(String::as_str), Some("GRANTED"));
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 1);

        let (cluster_id, network) = id::decode(tracked.id.as_str()).unwrap();
        assert_eq!((cluster_id, network), ("clusterA", "10.0.0.0/24"));

        // the rule is found again through the composite id
        let mut again = tracked.clone();
        let outcome = reconciler.read(&mut again).await.unwrap();
        assert!(!outcome.is_gone());
        assert_eq!(again, tracked);
    }

    #[tokio::test]
    async fn test_delete_sends_rule_types_without_status() {
        let gateway = Arc::new(FakeFirewall::with_rule("clusterA", "10.0.0.0/24"));
        let reconciler = FirewallRuleReconciler::new(gateway.clone());

        reconciler
            .delete(&StableId::new("clusterA:10.0.0.0/24"))
            .await
            .unwrap();

        let deleted = gateway.deleted.lock().unwrap();
        assert_eq!(
            *deleted,
            vec![FirewallRuleSet::request("10.0.0.0/24", &["CASSANDRA".to_string()])]
        );
        assert!(deleted[0].rules.iter().all(|r| r.status.is_none()));
    }

    #[tokio::test]
    async fn test_create_adopts_existing_rule() {
        let gateway = Arc::new(FakeFirewall::with_rule("clusterA", "10.0.0.0/24"));
        let reconciler = FirewallRuleReconciler::new(gateway.clone());

        let tracked = reconciler
            .create(&FirewallRuleSpec::new("clusterA", "10.0.0.0/24"))
            .await
            .unwrap();

        assert_eq!(tracked.id.as_str(), "clusterA:10.0.0.0/24");
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_colon_in_network() {
        let gateway = Arc::new(FakeFirewall::default());
        let reconciler = FirewallRuleReconciler::new(gateway.clone());

        let err = reconciler
            .create(&FirewallRuleSpec::new("clusterA", "2001:db8::/32"))
            .await
            .unwrap_err();

        assert!(matches!(err, CloudError::InvalidConfig(_)));
        assert_eq!(gateway.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_clears_id_when_gone() {
        let reconciler = FirewallRuleReconciler::new(Arc::new(FakeFirewall::default()));
        let mut tracked = Tracked::new(
            "clusterA:10.0.0.0/24",
            FirewallRuleModel {
                spec: FirewallRuleSpec::new("clusterA", "10.0.0.0/24"),
                ..Default::default()
            },
        );

        assert!(reconciler.read(&mut tracked).await.unwrap().is_gone());
        assert!(tracked.is_gone());
    }

    #[tokio::test]
    async fn test_read_rejects_malformed_id() {
        let reconciler = FirewallRuleReconciler::new(Arc::new(FakeFirewall::default()));
        let mut tracked = Tracked::new("nodelimiter", FirewallRuleModel::default());

        let err = reconciler.read(&mut tracked).await.unwrap_err();
        assert!(matches!(err, CloudError::MalformedIdentifier(_)));
    }

    #[tokio::test]
    async fn test_read_reports_rule_type_drift() {
        let gateway = Arc::new(FakeFirewall::default());
        gateway.rules.lock().unwrap().insert(
            "clusterA".to_string(),
            vec![provisioned("10.0.0.0/24", &["CASSANDRA", "SPARK"])],
        );
        let reconciler = FirewallRuleReconciler::new(gateway);
        let mut tracked = Tracked::new(
            "clusterA:10.0.0.0/24",
            FirewallRuleModel {
                spec: FirewallRuleSpec::new("clusterA", "10.0.0.0/24"),
                ..Default::default()
            },
        );

        let outcome = reconciler.read(&mut tracked).await.unwrap();
        assert_eq!(outcome.drifted(), ["rule_types"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let gateway = Arc::new(FakeFirewall::with_rule("clusterA", "10.0.0.0/24"));
        let reconciler = FirewallRuleReconciler::new(gateway.clone());
        let id = StableId::new("clusterA:10.0.0.0/24");

        reconciler.delete(&id).await.unwrap();
        reconciler.delete(&id).await.unwrap();

        // the second delete finds nothing to remove
        assert_eq!(gateway.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_import_seeds_from_id() {
        let reconciler =
            FirewallRuleReconciler::new(Arc::new(FakeFirewall::with_rule("clusterA", "10.0.0.0/24")));

        let tracked = reconciler
            .import(&StableId::new("clusterA:10.0.0.0/24"))
            .await
            .unwrap();
        assert_eq!(tracked.model.spec, FirewallRuleSpec::new("clusterA", "10.0.0.0/24"));

        let err = reconciler
            .import(&StableId::new("clusterA:192.168.0.0/24"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = reconciler.import(&StableId::new("a:b:c")).await.unwrap_err();
        assert!(matches!(err, CloudError::MalformedIdentifier(_)));
    }

    #[test]
    fn test_rule_set_wire_format() {
        let body = serde_json::to_value(FirewallRuleSpec::new("c", "10.0.0.0/24").rule_set()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"network": "10.0.0.0/24", "rules": [{"type": "CASSANDRA"}]})
        );
    }

    #[test]
    fn test_spec_defaults_rule_types() {
        let spec: FirewallRuleSpec =
            serde_json::from_str(r#"{"cluster_id": "c", "network": "10.0.0.0/24"}"#).unwrap();
        assert_eq!(spec.rule_types, vec!["CASSANDRA"]);
    }
}
