//! Plan computation
//!
//! Compares the declarations with the tracked state. No resource can be
//! updated in place, so a declared field that differs from the tracked
//! model turns into a replacement.

use crate::context::kind_rank;
use crate::declarations::{ClusterRef, Declarations};
use instaflow_cloud::{
    Action, ActionType, ForceNew, GlobalState, Plan, ResourceState, StableId, Tracked,
};
use instaflow_cloud_instaclustr::{
    ClusterModel, FirewallRuleModel, VpcPeeringModel, cluster, firewall, vpc_peering,
};
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// Declared clusters that will be created or replaced by the plan.
pub type Pending<'a> = BTreeSet<&'a str>;

fn tracked_cluster(state: &GlobalState, name: &str) -> Option<Tracked<ClusterModel>> {
    let resource = state.get(cluster::KIND, name)?;
    match resource.to_tracked::<ClusterModel>() {
        Ok(tracked) if !tracked.is_gone() => Some(tracked),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(cluster = name, error = %err, "Unreadable cluster state");
            None
        }
    }
}

/// Cluster id behind a reference; `None` when it is only known after apply.
pub fn resolve_cluster_id(
    reference: ClusterRef<'_>,
    state: &GlobalState,
    pending: &Pending<'_>,
) -> Option<String> {
    match reference {
        ClusterRef::Literal(id) => Some(id.to_string()),
        ClusterRef::Declared(name) if pending.contains(name) => None,
        ClusterRef::Declared(name) => {
            tracked_cluster(state, name).map(|tracked| tracked.id.to_string())
        }
    }
}

/// Datacenter id behind a reference; `None` when it is only known after apply.
pub fn resolve_datacenter_id(
    reference: ClusterRef<'_>,
    state: &GlobalState,
    pending: &Pending<'_>,
) -> Option<String> {
    match reference {
        ClusterRef::Literal(id) => Some(id.to_string()),
        ClusterRef::Declared(name) if pending.contains(name) => None,
        ClusterRef::Declared(name) => {
            tracked_cluster(state, name).and_then(|tracked| tracked.model.datacenter_id)
        }
    }
}

fn compare<S: ForceNew>(
    kind: &str,
    name: &str,
    id: &StableId,
    tracked: &S,
    declared: &S,
) -> Action {
    let fields = tracked.replacement_fields(declared);
    if fields.is_empty() {
        Action::new(ActionType::NoOp, kind, name, format!("{kind} {name} ({id}) is up to date"))
    } else {
        Action::new(
            ActionType::Replace,
            kind,
            name,
            format!("replace {kind} {name} ({id}): {} changed", fields.join(", ")),
        )
        .with_drifted(fields)
    }
}

fn dependent_replacement(kind: &str, name: &str, resource: &ResourceState, field: &str) -> Action {
    Action::new(
        ActionType::Replace,
        kind,
        name,
        format!(
            "replace {kind} {name} ({}): its cluster is being recreated",
            resource.stable_id
        ),
    )
    .with_drifted([field])
}

pub fn plan(declarations: &Declarations, state: &GlobalState) -> anyhow::Result<Plan> {
    let mut actions = Vec::new();
    let mut pending = Pending::new();

    for (name, decl) in &declarations.clusters {
        let declared = decl.to_spec(name);
        let action = match state.get(cluster::KIND, name) {
            None => Action::new(
                ActionType::Create,
                cluster::KIND,
                name,
                format!(
                    "create cluster {} ({} x{} in {})",
                    declared.name,
                    declared.datacenter.size,
                    declared
                        .datacenter
                        .racks
                        .iter()
                        .map(|r| r.node_count)
                        .sum::<u32>(),
                    declared.datacenter.region
                ),
            ),
            Some(resource) => {
                let tracked: Tracked<ClusterModel> = resource.to_tracked()?;
                compare(cluster::KIND, name, &tracked.id, &tracked.model.spec, &declared)
            }
        };
        if action.action_type != ActionType::NoOp {
            pending.insert(name.as_str());
        }
        actions.push(action);
    }

    for (name, decl) in &declarations.firewall_rules {
        let cluster_id = resolve_cluster_id(decl.cluster_ref()?, state, &pending);
        let action = match (state.get(firewall::KIND, name), cluster_id) {
            (None, _) => Action::new(
                ActionType::Create,
                firewall::KIND,
                name,
                format!("create firewall rule {name} admitting {}", decl.network),
            ),
            (Some(resource), None) => dependent_replacement(firewall::KIND, name, resource, "cluster_id"),
            (Some(resource), Some(cluster_id)) => {
                let tracked: Tracked<FirewallRuleModel> = resource.to_tracked()?;
                compare(
                    firewall::KIND,
                    name,
                    &tracked.id,
                    &tracked.model.spec,
                    &decl.to_spec(&cluster_id),
                )
            }
        };
        actions.push(action);
    }

    for (name, decl) in &declarations.vpc_peerings {
        let datacenter_id = resolve_datacenter_id(decl.cluster_ref()?, state, &pending);
        let action = match (state.get(vpc_peering::KIND, name), datacenter_id) {
            (None, _) => Action::new(
                ActionType::Create,
                vpc_peering::KIND,
                name,
                format!("create VPC peering {name} to {}", decl.peer_vpc_id),
            ),
            (Some(resource), None) => {
                dependent_replacement(vpc_peering::KIND, name, resource, "cluster_datacenter_id")
            }
            (Some(resource), Some(datacenter_id)) => {
                let tracked: Tracked<VpcPeeringModel> = resource.to_tracked()?;
                compare(
                    vpc_peering::KIND,
                    name,
                    &tracked.id,
                    &tracked.model.spec,
                    &decl.to_spec(&datacenter_id),
                )
            }
        };
        actions.push(action);
    }

    let mut orphans: Vec<&ResourceState> = state
        .resources
        .values()
        .filter(|r| !declarations.is_declared(&r.kind, &r.name))
        .collect();
    orphans.sort_by_key(|r| Reverse(kind_rank(&r.kind)));
    for resource in orphans {
        actions.push(Action::new(
            ActionType::Delete,
            resource.kind.clone(),
            resource.name.clone(),
            format!(
                "delete {} {} ({}): no longer declared",
                resource.kind, resource.name, resource.stable_id
            ),
        ));
    }

    Ok(Plan::new(actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use instaflow_cloud::PlanSummary;
    use instaflow_cloud_instaclustr::{ClusterState, FirewallRuleSpec, VpcPeeringSpec};

    const DECLARATIONS: &str = r#"
clusters:
  analytics:
    version: apache-cassandra-3.11.4
    datacenter:
      provider_name: AWS_VPC
      region: US_EAST_1
      size: t3.small
      default_network: 10.224.0.0/16
      racks:
        - { name: a, node_count: 1 }
        - { name: b, node_count: 1 }
firewall_rules:
  office:
    cluster: analytics
    network: 203.0.113.0/24
vpc_peerings:
  app:
    cluster: analytics
    peer_vpc_id: vpc-0123
    peer_account_id: "123456789012"
    peer_subnet: 192.168.0.0/24
"#;

    fn declarations() -> Declarations {
        Declarations::parse(DECLARATIONS).unwrap()
    }

    /// State as it looks after a successful apply of DECLARATIONS.
    fn applied_state(declarations: &Declarations) -> GlobalState {
        let mut state = GlobalState::new();

        let mut cluster = ClusterModel::from(declarations.clusters["analytics"].to_spec("analytics"));
        cluster.status = Some(ClusterState::Running);
        cluster.datacenter_id = Some("dc-1".to_string());
        state.set_resource(
            ResourceState::from_tracked(cluster::KIND, "analytics", &Tracked::new("X123", cluster))
                .unwrap(),
        );

        let rule = FirewallRuleModel {
            spec: FirewallRuleSpec::new("X123", "203.0.113.0/24"),
            ..Default::default()
        };
        state.set_resource(
            ResourceState::from_tracked(
                firewall::KIND,
                "office",
                &Tracked::new("X123:203.0.113.0/24", rule),
            )
            .unwrap(),
        );

        let peering = VpcPeeringModel {
            spec: VpcPeeringSpec {
                cluster_datacenter_id: "dc-1".to_string(),
                peer_vpc_id: "vpc-0123".to_string(),
                peer_account_id: "123456789012".to_string(),
                peer_subnet: "192.168.0.0/24".to_string(),
            },
            ..Default::default()
        };
        state.set_resource(
            ResourceState::from_tracked(vpc_peering::KIND, "app", &Tracked::new("dc-1:pcx-1", peering))
                .unwrap(),
        );
        state
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let plan = plan(&declarations(), &GlobalState::new()).unwrap();

        assert_eq!(
            plan.summary(),
            PlanSummary {
                create: 3,
                replace: 0,
                delete: 0,
                no_change: 0,
            }
        );
        let kinds: Vec<&str> = plan.actions.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, vec!["cluster", "firewall_rule", "vpc_peering"]);
        assert!(plan.actions[0].description.contains("t3.small x2 in US_EAST_1"));
    }

    #[test]
    fn test_applied_state_is_unchanged() {
        let declarations = declarations();
        let plan = plan(&declarations, &applied_state(&declarations)).unwrap();

        assert!(!plan.has_changes, "{:?}", plan.actions);
        assert_eq!(plan.summary().no_change, 3);
    }

    #[test]
    fn test_cluster_change_replaces_dependents() {
        let mut declarations = declarations();
        let state = applied_state(&declarations);
        declarations
            .clusters
            .get_mut("analytics")
            .unwrap()
            .datacenter
            .size = "m5.xlarge".to_string();

        let plan = plan(&declarations, &state).unwrap();

        let replaced = plan.actions_by_type(ActionType::Replace);
        assert_eq!(replaced.len(), 3);
        assert_eq!(replaced[0].drifted, vec!["datacenter.size"]);
        assert_eq!(replaced[1].drifted, vec!["cluster_id"]);
        assert_eq!(replaced[2].drifted, vec!["cluster_datacenter_id"]);
    }

    #[test]
    fn test_rule_change_replaces_only_the_rule() {
        let mut declarations = declarations();
        let state = applied_state(&declarations);
        declarations.firewall_rules.get_mut("office").unwrap().rule_types =
            Some(vec!["CASSANDRA".to_string(), "SPARK".to_string()]);

        let plan = plan(&declarations, &state).unwrap();

        let replaced = plan.actions_by_type(ActionType::Replace);
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].key(), "firewall_rule:office");
        assert_eq!(replaced[0].drifted, vec!["rule_types"]);
    }

    #[test]
    fn test_undeclared_resources_are_deleted_dependents_first() {
        let state = applied_state(&declarations());
        let plan = plan(&Declarations::default(), &state).unwrap();

        let deleted: Vec<String> = plan
            .actions_by_type(ActionType::Delete)
            .iter()
            .map(|a| a.key())
            .collect();
        assert_eq!(
            deleted,
            vec!["vpc_peering:app", "firewall_rule:office", "cluster:analytics"]
        );
    }

    #[test]
    fn test_resolve_literal_and_declared_references() {
        let declarations = declarations();
        let state = applied_state(&declarations);
        let mut pending = Pending::new();

        assert_eq!(
            resolve_cluster_id(ClusterRef::Literal("X999"), &state, &pending).as_deref(),
            Some("X999")
        );
        assert_eq!(
            resolve_cluster_id(ClusterRef::Declared("analytics"), &state, &pending).as_deref(),
            Some("X123")
        );
        assert_eq!(
            resolve_datacenter_id(ClusterRef::Declared("analytics"), &state, &pending).as_deref(),
            Some("dc-1")
        );

        pending.insert("analytics");
        assert!(resolve_cluster_id(ClusterRef::Declared("analytics"), &state, &pending).is_none());
    }
}
