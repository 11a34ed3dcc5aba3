use log::{info, warn};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use crate::dfd::classifier::{classify, node_id, sanitize_id};
use crate::dfd::flows::FlowDetector;
use crate::dfd::types::{
    group_by_trust_boundary, DataClassification, Dfd, DfdEdge, DfdGenerationResult, DfdLevel, DfdNode,
    NodeType, TrustBoundary,
};
use crate::infra::{CodeFlow, Resource};

/// Builds data flow diagrams at service, component and code level.
#[derive(Debug, Clone, Default)]
pub struct DfdGenerator {
    detector: FlowDetector,
}

impl DfdGenerator {
    pub fn new() -> Self {
        DfdGenerator {
            detector: FlowDetector::new(),
        }
    }

    /// One node per resource plus the inferred flows between them.
    pub fn build_service_level(&self, resources: &[Resource]) -> Dfd {
        let mut dfd = Dfd::new(DfdLevel::Service);
        let mut seen = HashSet::new();

        for resource in resources {
            let id = node_id(resource);
            if !seen.insert(id.clone()) {
                warn!("Duplicate node id {} for {}, keeping the first", id, resource.full_name);
                continue;
            }

            let (node_type, trust_boundary) = classify(resource);
            let label = if resource.name.is_empty() { &resource.full_name } else { &resource.name };

            dfd.nodes.push(DfdNode {
                id,
                label: label.clone(),
                node_type,
                cloud_provider: resource.cloud_provider.clone(),
                trust_boundary: Some(trust_boundary),
                resource_type: Some(resource.resource_type.clone()),
                properties: resource.properties.clone(),
                tags: Vec::new(),
            });
        }

        dfd.edges = self.detector.detect(resources, &dfd.nodes);

        if let Some((user, edges)) = self.detector.external_user(&dfd.nodes) {
            dfd.nodes.push(user);
            dfd.edges.extend(edges);
        }

        dfd.trust_boundaries = group_by_trust_boundary(&dfd.nodes);

        let cloud_provider = resources.first().and_then(|r| r.cloud_provider.clone());
        dfd.metadata.insert("cloud_provider".to_string(), json!(cloud_provider));
        dfd.metadata.insert("resource_count".to_string(), json!(resources.len()));
        dfd.metadata.insert(
            "description".to_string(),
            json!("Service-level architecture showing major services and data flows"),
        );

        info!(
            "Generated service-level DFD: {} nodes, {} edges",
            dfd.nodes.len(),
            dfd.edges.len()
        );
        dfd
    }

    pub fn build_component_level(&self, resources: &[Resource]) -> Dfd {
        self.expand_components(&self.build_service_level(resources))
    }

    /// Split every service and API node into an `_api` entry point and an
    /// internal `_logic` component. Incoming edges move to the entry point,
    /// outgoing edges leave from the logic component.
    pub fn expand_components(&self, service: &Dfd) -> Dfd {
        let mut dfd = service.clone();
        dfd.level = DfdLevel::Component;
        dfd.metadata.insert(
            "description".to_string(),
            json!("Component-level architecture showing internal components"),
        );

        let mut nodes = Vec::with_capacity(service.nodes.len());
        let mut internal_edges = Vec::new();

        for node in &service.nodes {
            if !matches!(node.node_type, NodeType::Service | NodeType::Api) {
                nodes.push(node.clone());
                continue;
            }

            let api = DfdNode {
                id: format!("{}_api", node.id),
                label: format!("{} API", node.label),
                node_type: NodeType::Api,
                ..node.clone()
            };
            let logic = DfdNode {
                id: format!("{}_logic", node.id),
                label: format!("{} Logic", node.label),
                node_type: NodeType::Function,
                trust_boundary: Some(TrustBoundary::Internal),
                ..node.clone()
            };

            for edge in dfd.edges.iter_mut() {
                if edge.target == node.id {
                    edge.target = api.id.clone();
                }
                if edge.source == node.id {
                    edge.source = logic.id.clone();
                }
            }

            internal_edges.push(
                DfdEdge::new(&api.id, &logic.id, "process request", "Internal")
                    .classified(DataClassification::Internal),
            );
            nodes.push(api);
            nodes.push(logic);
        }

        dfd.nodes = nodes;
        dfd.edges.extend(internal_edges);
        dfd.trust_boundaries = group_by_trust_boundary(&dfd.nodes);
        dfd
    }

    /// Function-level diagram from call graph records.
    pub fn build_code_level(&self, code_flows: &[CodeFlow]) -> Dfd {
        let mut dfd = Dfd::new(DfdLevel::Code);
        let mut seen = HashSet::new();

        let mut add_node = |dfd: &mut Dfd, node: DfdNode| {
            if seen.insert(node.id.clone()) {
                dfd.nodes.push(node);
            }
        };

        for flow in code_flows {
            let function_id = sanitize_id(&flow.function, false);
            let properties = serde_json::to_value(flow).unwrap_or(Value::Null);
            add_node(
                &mut dfd,
                DfdNode::new(&function_id, &flow.function, NodeType::Function, TrustBoundary::Internal)
                    .with_properties(properties),
            );

            for callee in &flow.calls {
                let id = sanitize_id(callee, false);
                add_node(&mut dfd, DfdNode::new(&id, callee, NodeType::Function, TrustBoundary::Internal));
                dfd.edges.push(
                    DfdEdge::new(&function_id, &id, "calls", "Internal").classified(DataClassification::Internal),
                );
            }

            for api in &flow.external_apis {
                let id = sanitize_id(api, false);
                add_node(&mut dfd, DfdNode::new(&id, api, NodeType::External, TrustBoundary::Internet));
                dfd.edges.push(
                    DfdEdge::new(&function_id, &id, "API call", "HTTPS")
                        .encrypted(true)
                        .classified(DataClassification::Public),
                );
            }

            for store in &flow.data_access {
                let id = sanitize_id(store, false);
                add_node(&mut dfd, DfdNode::new(&id, store, NodeType::Database, TrustBoundary::Restricted));
                dfd.edges.push(
                    DfdEdge::new(&function_id, &id, "query", "SQL").classified(DataClassification::Confidential),
                );
            }
        }

        dfd.trust_boundaries = group_by_trust_boundary(&dfd.nodes);
        let function_count = dfd.nodes_by_type(NodeType::Function).len();
        let external_dependencies = dfd.nodes_by_type(NodeType::External).len();
        dfd.metadata.insert("function_count".to_string(), json!(function_count));
        dfd.metadata.insert("external_dependencies".to_string(), json!(external_dependencies));
        dfd.metadata.insert(
            "description".to_string(),
            json!("Code-level architecture showing function calls and dependencies"),
        );
        dfd
    }

    /// Service and component diagrams, plus the code diagram when call
    /// graph records are supplied.
    pub fn build_all(&self, resources: &[Resource], code_flows: Option<&[CodeFlow]>) -> DfdGenerationResult {
        let service_level = self.build_service_level(resources);
        let component_level = self.expand_components(&service_level);
        let code_level = code_flows
            .filter(|flows| !flows.is_empty())
            .map(|flows| self.build_code_level(flows));

        let mut levels = vec!["service", "component"];
        if code_level.is_some() {
            levels.push("code");
        }

        let mut result = DfdGenerationResult {
            service_level,
            component_level,
            code_level,
            metadata: Map::new(),
        };
        let total_nodes = result.all_nodes().len();
        let total_edges = result.all_edges().len();
        result.metadata.insert("levels_generated".to_string(), json!(levels));
        result.metadata.insert("total_nodes".to_string(), json!(total_nodes));
        result.metadata.insert("total_edges".to_string(), json!(total_edges));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn web_stack() -> Vec<Resource> {
        vec![
            Resource::new("aws_lb", "front", json!({})),
            Resource::new("aws_ecs_service", "app", json!({"associate_public_ip_address": true})),
            Resource::new("aws_db_instance", "users", json!({"encrypted": true})),
            Resource::new("aws_s3_bucket", "assets", json!({"acl": "private"})),
        ]
    }

    #[test]
    fn test_service_level_nodes_and_flows() {
        let dfd = DfdGenerator::new().build_service_level(&web_stack());

        assert_eq!(dfd.level, DfdLevel::Service);
        let app = dfd.node("aws_ecs_service_app").unwrap();
        assert_eq!(app.node_type, NodeType::Service);
        assert_eq!(app.trust_boundary, Some(TrustBoundary::Dmz));
        assert_eq!(app.cloud_provider.as_deref(), Some("aws"));

        let user = dfd.node("external_user").unwrap();
        assert_eq!(user.label, "External Users");
        let user_edges = dfd.edges_for_node("external_user");
        assert_eq!(user_edges.len(), 1);
        assert_eq!(user_edges[0].target, "aws_ecs_service_app");

        let outgoing: Vec<&str> = dfd
            .edges
            .iter()
            .filter(|e| e.source == "aws_ecs_service_app")
            .map(|e| e.label.as_str())
            .collect();
        assert_eq!(outgoing, vec!["queries", "read/write"]);
        assert_eq!(dfd.metadata["resource_count"], json!(4));
    }

    #[test]
    fn test_duplicate_resource_ids_keep_first() {
        let resources = vec![
            Resource::new("aws_s3_bucket", "a", json!({})).with_id("shared"),
            Resource::new("aws_sqs_queue", "b", json!({})).with_id("shared"),
        ];
        let dfd = DfdGenerator::new().build_service_level(&resources);
        assert_eq!(dfd.nodes.len(), 1);
        assert_eq!(dfd.nodes[0].node_type, NodeType::Storage);
    }

    #[test]
    fn test_component_expansion_redirects_edges() {
        let mut service = Dfd::new(DfdLevel::Service);
        service.nodes.push(DfdNode::new("lb", "lb", NodeType::LoadBalancer, TrustBoundary::Dmz));
        service.nodes.push(DfdNode::new("svc1", "svc1", NodeType::Service, TrustBoundary::Dmz));
        service.nodes.push(DfdNode::new("db", "db", NodeType::Database, TrustBoundary::Private));
        service.edges.push(DfdEdge::new("lb", "svc1", "HTTP requests", "HTTPS"));
        service.edges.push(DfdEdge::new("svc1", "db", "queries", "SQL"));

        let dfd = DfdGenerator::new().expand_components(&service);

        let ids: Vec<&str> = dfd.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["lb", "svc1_api", "svc1_logic", "db"]);

        let api = dfd.node("svc1_api").unwrap();
        assert_eq!(api.node_type, NodeType::Api);
        assert_eq!(api.trust_boundary, Some(TrustBoundary::Dmz));
        let logic = dfd.node("svc1_logic").unwrap();
        assert_eq!(logic.node_type, NodeType::Function);
        assert_eq!(logic.trust_boundary, Some(TrustBoundary::Internal));

        assert_eq!(dfd.edges.len(), 3);
        assert_eq!((dfd.edges[0].source.as_str(), dfd.edges[0].target.as_str()), ("lb", "svc1_api"));
        assert_eq!((dfd.edges[1].source.as_str(), dfd.edges[1].target.as_str()), ("svc1_logic", "db"));
        assert_eq!(dfd.edges[2].label, "process request");
        assert!(dfd.edges.iter().all(|e| e.source != "svc1" && e.target != "svc1"));
    }

    #[test]
    fn test_code_level() {
        let flows = vec![
            CodeFlow {
                function: "processPayment".to_string(),
                calls: vec!["validateCard".to_string(), "saveTransaction".to_string()],
                external_apis: vec!["stripe.com/charge".to_string()],
                data_access: vec!["payments_db".to_string()],
            },
            CodeFlow {
                function: "saveTransaction".to_string(),
                data_access: vec!["payments_db".to_string()],
                ..Default::default()
            },
        ];

        let dfd = DfdGenerator::new().build_code_level(&flows);
        assert_eq!(dfd.nodes.len(), 5);
        assert_eq!(dfd.edges.len(), 5);

        let stripe = dfd.node("stripe_com_charge").unwrap();
        assert_eq!(stripe.node_type, NodeType::External);
        assert_eq!(stripe.trust_boundary, Some(TrustBoundary::Internet));
        assert_eq!(dfd.external_connections().len(), 1);
        assert_eq!(dfd.metadata["function_count"], json!(3));
    }

    #[test]
    fn test_build_all() {
        let generator = DfdGenerator::new();
        let without_code = generator.build_all(&web_stack(), None);
        assert!(without_code.code_level.is_none());
        assert_eq!(without_code.metadata["levels_generated"], json!(["service", "component"]));

        let flows = vec![CodeFlow { function: "main".to_string(), ..Default::default() }];
        let with_code = generator.build_all(&web_stack(), Some(flows.as_slice()));
        assert!(with_code.code_level.is_some());
        assert_eq!(
            with_code.metadata["total_nodes"],
            json!(with_code.all_nodes().len())
        );
    }
}
