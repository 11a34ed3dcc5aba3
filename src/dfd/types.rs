use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Service,
    Database,
    Storage,
    Compute,
    Network,
    Api,
    Cache,
    Queue,
    Function,
    External,
    LoadBalancer,
    Firewall,
    Vpc,
    Subnet,
    User,
    Admin,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Service => "service",
            NodeType::Database => "database",
            NodeType::Storage => "storage",
            NodeType::Compute => "compute",
            NodeType::Network => "network",
            NodeType::Api => "api",
            NodeType::Cache => "cache",
            NodeType::Queue => "queue",
            NodeType::Function => "function",
            NodeType::External => "external",
            NodeType::LoadBalancer => "load_balancer",
            NodeType::Firewall => "firewall",
            NodeType::Vpc => "vpc",
            NodeType::Subnet => "subnet",
            NodeType::User => "user",
            NodeType::Admin => "admin",
        }
    }

    /// Node types that originate application traffic.
    pub fn is_workload(&self) -> bool {
        matches!(self, NodeType::Service | NodeType::Api | NodeType::Compute)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Security zone of a node, ordered from least to most protected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TrustBoundary {
    Internet,
    Dmz,
    Internal,
    Private,
    Restricted,
}

impl TrustBoundary {
    pub fn security_level(&self) -> u8 {
        match self {
            TrustBoundary::Internet => 0,
            TrustBoundary::Dmz => 1,
            TrustBoundary::Internal => 2,
            TrustBoundary::Private => 3,
            TrustBoundary::Restricted => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustBoundary::Internet => "internet",
            TrustBoundary::Dmz => "dmz",
            TrustBoundary::Internal => "internal",
            TrustBoundary::Private => "private",
            TrustBoundary::Restricted => "restricted",
        }
    }

    /// Display name of the zone grouping nodes in this boundary.
    pub fn zone_name(&self) -> &'static str {
        match self {
            TrustBoundary::Internet => "Internet Zone",
            TrustBoundary::Dmz => "Dmz Zone",
            TrustBoundary::Internal => "Internal Zone",
            TrustBoundary::Private => "Private Zone",
            TrustBoundary::Restricted => "Restricted Zone",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TrustBoundary::Internet => "Publicly accessible from the internet",
            TrustBoundary::Dmz => "Demilitarized zone with limited external access",
            TrustBoundary::Internal => "Internal network, not directly accessible",
            TrustBoundary::Private => "Private network with restricted access",
            TrustBoundary::Restricted => "Highly restricted, sensitive data zone",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, TrustBoundary::Internet | TrustBoundary::Dmz)
    }
}

impl fmt::Display for TrustBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Restricted,
    Pii,
    Phi,
}

impl DataClassification {
    pub fn sensitivity_level(&self) -> u8 {
        match self {
            DataClassification::Public => 0,
            DataClassification::Internal => 1,
            DataClassification::Confidential => 2,
            DataClassification::Pii | DataClassification::Phi => 3,
            DataClassification::Restricted => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Confidential => "confidential",
            DataClassification::Restricted => "restricted",
            DataClassification::Pii => "pii",
            DataClassification::Phi => "phi",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DfdNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub cloud_provider: Option<String>,
    pub trust_boundary: Option<TrustBoundary>,
    pub resource_type: Option<String>,
    pub properties: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DfdNode {
    pub fn new(id: &str, label: &str, node_type: NodeType, trust_boundary: TrustBoundary) -> Self {
        DfdNode {
            id: id.to_string(),
            label: label.to_string(),
            node_type,
            cloud_provider: None,
            trust_boundary: Some(trust_boundary),
            resource_type: None,
            properties: Value::Object(Map::new()),
            tags: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DfdEdge {
    pub source: String,
    pub target: String,
    pub label: String,
    pub data_classification: Option<DataClassification>,
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub encrypted: bool,
    pub bidirectional: bool,
}

impl DfdEdge {
    pub fn new(source: &str, target: &str, label: &str, protocol: &str) -> Self {
        DfdEdge {
            source: source.to_string(),
            target: target.to_string(),
            label: label.to_string(),
            data_classification: None,
            protocol: Some(protocol.to_string()),
            port: None,
            encrypted: false,
            bidirectional: false,
        }
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn classified(mut self, classification: DataClassification) -> Self {
        self.data_classification = Some(classification);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustBoundaryGroup {
    pub boundary: TrustBoundary,
    pub name: String,
    pub node_ids: Vec<String>,
    pub description: String,
}

/// Group nodes by boundary, keeping boundaries in order of first appearance.
pub fn group_by_trust_boundary(nodes: &[DfdNode]) -> Vec<TrustBoundaryGroup> {
    let mut groups: Vec<TrustBoundaryGroup> = Vec::new();
    for node in nodes {
        let Some(boundary) = node.trust_boundary else { continue };
        match groups.iter_mut().find(|g| g.boundary == boundary) {
            Some(group) => group.node_ids.push(node.id.clone()),
            None => groups.push(TrustBoundaryGroup {
                boundary,
                name: boundary.zone_name().to_string(),
                node_ids: vec![node.id.clone()],
                description: boundary.description().to_string(),
            }),
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DfdLevel {
    Service,
    Component,
    Code,
}

impl DfdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DfdLevel::Service => "service",
            DfdLevel::Component => "component",
            DfdLevel::Code => "code",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DfdStatistics {
    pub level: DfdLevel,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: HashMap<String, usize>,
    pub trust_boundaries: HashMap<String, usize>,
    pub data_classifications: HashMap<String, usize>,
    pub cross_boundary_flows: usize,
    pub external_connections: usize,
    pub encrypted_flows: usize,
}

/// Data flow diagram at one abstraction level.
#[derive(Debug, Clone, PartialEq)]
pub struct Dfd {
    pub level: DfdLevel,
    pub nodes: Vec<DfdNode>,
    pub edges: Vec<DfdEdge>,
    pub trust_boundaries: Vec<TrustBoundaryGroup>,
    pub metadata: Map<String, Value>,
}

impl Dfd {
    pub fn new(level: DfdLevel) -> Self {
        Dfd {
            level,
            nodes: Vec::new(),
            edges: Vec::new(),
            trust_boundaries: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&DfdNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_for_node(&self, id: &str) -> Vec<&DfdEdge> {
        self.edges
            .iter()
            .filter(|e| e.source == id || e.target == id)
            .collect()
    }

    pub fn nodes_by_type(&self, node_type: NodeType) -> Vec<&DfdNode> {
        self.nodes.iter().filter(|n| n.node_type == node_type).collect()
    }

    pub fn nodes_in_boundary(&self, boundary: TrustBoundary) -> Vec<&DfdNode> {
        self.nodes
            .iter()
            .filter(|n| n.trust_boundary == Some(boundary))
            .collect()
    }

    /// Whether both endpoints exist and sit in different boundaries.
    pub fn is_cross_boundary(&self, edge: &DfdEdge) -> bool {
        match (self.node(&edge.source), self.node(&edge.target)) {
            (Some(source), Some(target)) => source.trust_boundary != target.trust_boundary,
            _ => false,
        }
    }

    pub fn cross_boundary_edges(&self) -> Vec<&DfdEdge> {
        self.edges.iter().filter(|e| self.is_cross_boundary(e)).collect()
    }

    /// Edges with an EXTERNAL node at either end.
    pub fn external_connections(&self) -> Vec<&DfdEdge> {
        let is_external = |id: &str| {
            self.node(id)
                .map(|n| n.node_type == NodeType::External)
                .unwrap_or(false)
        };
        self.edges
            .iter()
            .filter(|e| is_external(&e.source) || is_external(&e.target))
            .collect()
    }

    pub fn statistics(&self) -> DfdStatistics {
        let mut node_types = HashMap::new();
        let mut trust_boundaries = HashMap::new();
        for node in &self.nodes {
            *node_types.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
            if let Some(boundary) = node.trust_boundary {
                *trust_boundaries.entry(boundary.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let mut data_classifications = HashMap::new();
        for classification in self.edges.iter().filter_map(|e| e.data_classification) {
            *data_classifications.entry(classification.as_str().to_string()).or_insert(0) += 1;
        }

        DfdStatistics {
            level: self.level,
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            node_types,
            trust_boundaries,
            data_classifications,
            cross_boundary_flows: self.cross_boundary_edges().len(),
            external_connections: self.external_connections().len(),
            encrypted_flows: self.edges.iter().filter(|e| e.encrypted).count(),
        }
    }
}

impl Serialize for Dfd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Dfd", 6)?;
        state.serialize_field("level", &self.level)?;
        state.serialize_field("nodes", &self.nodes)?;
        state.serialize_field("edges", &self.edges)?;
        state.serialize_field("trust_boundaries", &self.trust_boundaries)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("statistics", &self.statistics())?;
        state.end()
    }
}

/// Diagrams for every generated level.
#[derive(Debug, Clone, Serialize)]
pub struct DfdGenerationResult {
    pub service_level: Dfd,
    pub component_level: Dfd,
    pub code_level: Option<Dfd>,
    pub metadata: Map<String, Value>,
}

impl DfdGenerationResult {
    fn levels(&self) -> impl Iterator<Item = &Dfd> {
        [Some(&self.service_level), Some(&self.component_level), self.code_level.as_ref()]
            .into_iter()
            .flatten()
    }

    pub fn all_nodes(&self) -> Vec<&DfdNode> {
        self.levels().flat_map(|dfd| dfd.nodes.iter()).collect()
    }

    pub fn all_edges(&self) -> Vec<&DfdEdge> {
        self.levels().flat_map(|dfd| dfd.edges.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dfd {
        let mut dfd = Dfd::new(DfdLevel::Service);
        dfd.nodes.push(DfdNode::new("web", "web", NodeType::Service, TrustBoundary::Dmz));
        dfd.nodes.push(DfdNode::new("db", "db", NodeType::Database, TrustBoundary::Private));
        dfd.nodes.push(DfdNode::new("stripe", "stripe", NodeType::External, TrustBoundary::Internet));
        dfd.nodes.push(DfdNode::new("worker", "worker", NodeType::Service, TrustBoundary::Dmz));
        dfd.edges.push(DfdEdge::new("web", "db", "queries", "SQL").classified(DataClassification::Confidential));
        dfd.edges.push(DfdEdge::new("web", "worker", "jobs", "HTTPS").encrypted(true));
        dfd.edges.push(DfdEdge::new("worker", "stripe", "API call", "HTTPS").encrypted(true));
        dfd.trust_boundaries = group_by_trust_boundary(&dfd.nodes);
        dfd
    }

    #[test]
    fn test_security_levels_are_strictly_ordered() {
        let ordered = [
            TrustBoundary::Internet,
            TrustBoundary::Dmz,
            TrustBoundary::Internal,
            TrustBoundary::Private,
            TrustBoundary::Restricted,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].security_level() < pair[1].security_level());
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_sensitivity_levels() {
        assert_eq!(DataClassification::Pii.sensitivity_level(), DataClassification::Phi.sensitivity_level());
        assert!(DataClassification::Public.sensitivity_level() < DataClassification::Restricted.sensitivity_level());
    }

    #[test]
    fn test_boundary_groups_in_first_appearance_order() {
        let groups = sample().trust_boundaries;
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Dmz Zone", "Private Zone", "Internet Zone"]);
        assert_eq!(groups[0].node_ids, vec!["web".to_string(), "worker".to_string()]);
    }

    #[test]
    fn test_cross_boundary_and_external() {
        let dfd = sample();
        let cross: Vec<&str> = dfd.cross_boundary_edges().iter().map(|e| e.target.as_str()).collect();
        assert_eq!(cross, vec!["db", "stripe"]);
        assert_eq!(dfd.external_connections().len(), 1);
        assert_eq!(dfd.edges_for_node("worker").len(), 2);
    }

    #[test]
    fn test_statistics_and_serialization() {
        let dfd = sample();
        let stats = dfd.statistics();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.node_types.get("service"), Some(&2));
        assert_eq!(stats.encrypted_flows, 2);
        assert_eq!(stats.cross_boundary_flows, 2);

        let value = serde_json::to_value(&dfd).unwrap();
        assert_eq!(value["level"], json!("service"));
        assert_eq!(value["nodes"][0]["type"], json!("service"));
        assert_eq!(value["statistics"]["data_classifications"]["confidential"], json!(1));
    }
}
