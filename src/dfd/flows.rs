use log::debug;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use crate::dfd::classifier::{node_id, truthy};
use crate::dfd::types::{DataClassification, DfdEdge, DfdNode, NodeType, TrustBoundary};
use crate::infra::Resource;

pub const EXTERNAL_USER_ID: &str = "external_user";

const PHI_KEYWORDS: &[&str] = &["health", "medical", "patient", "diagnosis"];
const PII_KEYWORDS: &[&str] = &["user", "customer", "profile", "personal", "email", "phone", "address"];

/// Classify the data carried by an edge from its label and endpoint types.
pub fn infer_data_classification(label: &str, source: &DfdNode, target: &DfdNode) -> DataClassification {
    let label = label.to_lowercase();
    let either = |t: NodeType| source.node_type == t || target.node_type == t;

    if PHI_KEYWORDS.iter().any(|k| label.contains(k)) {
        DataClassification::Phi
    } else if PII_KEYWORDS.iter().any(|k| label.contains(k)) {
        DataClassification::Pii
    } else if either(NodeType::Database) {
        DataClassification::Confidential
    } else if either(NodeType::External) {
        DataClassification::Public
    } else {
        // storage endpoints and everything else
        DataClassification::Internal
    }
}

/// Type-pair heuristic for whether `source` plausibly talks to `target`.
pub fn could_connect(source: &DfdNode, target: &DfdNode) -> bool {
    match source.node_type {
        NodeType::Service | NodeType::Api | NodeType::Compute => matches!(
            target.node_type,
            NodeType::Database | NodeType::Storage | NodeType::Cache
        ),
        NodeType::LoadBalancer => matches!(target.node_type, NodeType::Service | NodeType::Api),
        _ => false,
    }
}

/// Infers data flows between classified nodes.
#[derive(Debug, Clone, Default)]
pub struct FlowDetector;

impl FlowDetector {
    pub fn new() -> Self {
        FlowDetector
    }

    /// Edges for every resource with a node, in resource order. Targets are
    /// visited in node order.
    pub fn detect(&self, resources: &[Resource], nodes: &[DfdNode]) -> Vec<DfdEdge> {
        let by_id: HashMap<&str, &DfdNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut visited = HashSet::new();
        let mut edges = Vec::new();

        for resource in resources {
            let id = node_id(resource);
            let Some(source) = by_id.get(id.as_str()).copied() else { continue };
            if !visited.insert(id) {
                continue;
            }
            self.flows_from(resource, source, nodes, &mut edges);
        }

        debug!("Detected {} data flows between {} nodes", edges.len(), nodes.len());
        edges
    }

    fn flows_from(&self, resource: &Resource, source: &DfdNode, nodes: &[DfdNode], edges: &mut Vec<DfdEdge>) {
        let references_database =
            resource.property("database_url").is_some() || resource.property("db_instance").is_some();
        let references_storage =
            resource.property("bucket").is_some() || resource.property("storage_account").is_some();

        if source.node_type.is_workload() {
            for target in nodes.iter().filter(|n| n.node_type == NodeType::Database) {
                if references_database || could_connect(source, target) {
                    edges.push(
                        DfdEdge::new(&source.id, &target.id, "queries", "SQL")
                            .encrypted(truthy(target.properties.get("encrypted")))
                            .classified(infer_data_classification("queries", source, target)),
                    );
                }
            }

            for target in nodes.iter().filter(|n| n.node_type == NodeType::Storage) {
                if references_storage || could_connect(source, target) {
                    edges.push(
                        DfdEdge::new(&source.id, &target.id, "read/write", "HTTPS")
                            .encrypted(true)
                            .classified(infer_data_classification("read/write", source, target)),
                    );
                }
            }
        }

        if matches!(source.node_type, NodeType::Service | NodeType::Api) {
            for target in nodes.iter().filter(|n| n.node_type == NodeType::Cache) {
                edges.push(
                    DfdEdge::new(&source.id, &target.id, "cache operations", "Redis")
                        .classified(DataClassification::Internal),
                );
            }
        }

        if source.node_type == NodeType::LoadBalancer {
            for target in nodes.iter().filter(|n| n.node_type.is_workload()) {
                edges.push(
                    DfdEdge::new(&source.id, &target.id, "HTTP requests", "HTTPS")
                        .port(443)
                        .encrypted(true)
                        .classified(DataClassification::Public),
                );
            }
        }
    }

    /// The synthetic external user and its edges, when any node is exposed.
    pub fn external_user(&self, nodes: &[DfdNode]) -> Option<(DfdNode, Vec<DfdEdge>)> {
        let public: Vec<&DfdNode> = nodes
            .iter()
            .filter(|n| n.trust_boundary.map(|b| b.is_public()).unwrap_or(false))
            .collect();
        if public.is_empty() || nodes.iter().any(|n| n.id == EXTERNAL_USER_ID) {
            return None;
        }

        let user = DfdNode::new(EXTERNAL_USER_ID, "External Users", NodeType::User, TrustBoundary::Internet)
            .with_properties(json!({"external": true}));

        let edges = public
            .into_iter()
            .filter(|n| matches!(n.node_type, NodeType::Service | NodeType::Api | NodeType::LoadBalancer))
            .map(|n| {
                DfdEdge::new(EXTERNAL_USER_ID, &n.id, "HTTP requests", "HTTPS")
                    .port(443)
                    .encrypted(true)
                    .classified(DataClassification::Public)
            })
            .collect();

        Some((user, edges))
    }
}
