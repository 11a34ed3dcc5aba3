use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;
use crate::dfd::types::{NodeType, TrustBoundary};
use crate::infra::Resource;

static RESOURCE_TYPE_TABLE: Lazy<HashMap<&'static str, NodeType>> = Lazy::new(|| {
    HashMap::from([
        // GCP
        ("google_sql_database_instance", NodeType::Database),
        ("google_compute_instance", NodeType::Compute),
        ("google_storage_bucket", NodeType::Storage),
        ("google_cloud_run_service", NodeType::Service),
        ("google_compute_backend_service", NodeType::Api),
        ("google_redis_instance", NodeType::Cache),
        ("google_pubsub_topic", NodeType::Queue),
        ("google_cloudfunctions_function", NodeType::Function),
        ("google_compute_network", NodeType::Network),
        ("google_compute_firewall", NodeType::Firewall),
        ("google_compute_subnetwork", NodeType::Subnet),
        // AWS
        ("aws_db_instance", NodeType::Database),
        ("aws_rds_cluster", NodeType::Database),
        ("aws_dynamodb_table", NodeType::Database),
        ("aws_instance", NodeType::Compute),
        ("aws_ec2_instance", NodeType::Compute),
        ("aws_s3_bucket", NodeType::Storage),
        ("aws_ecs_service", NodeType::Service),
        ("aws_lambda_function", NodeType::Function),
        ("aws_api_gateway_rest_api", NodeType::Api),
        ("aws_elasticache_cluster", NodeType::Cache),
        ("aws_sqs_queue", NodeType::Queue),
        ("aws_vpc", NodeType::Vpc),
        ("aws_subnet", NodeType::Subnet),
        ("aws_security_group", NodeType::Firewall),
        ("aws_lb", NodeType::LoadBalancer),
        ("aws_elb", NodeType::LoadBalancer),
        // Azure
        ("azurerm_sql_database", NodeType::Database),
        ("azurerm_virtual_machine", NodeType::Compute),
        ("azurerm_storage_account", NodeType::Storage),
        ("azurerm_app_service", NodeType::Service),
        ("azurerm_function_app", NodeType::Function),
        ("azurerm_api_management", NodeType::Api),
        ("azurerm_redis_cache", NodeType::Cache),
        ("azurerm_servicebus_queue", NodeType::Queue),
        ("azurerm_virtual_network", NodeType::Network),
        ("azurerm_network_security_group", NodeType::Firewall),
    ])
});

/// Keyword fallback for unknown resource types. Evaluated in order; the
/// first rule with a keyword contained in the type wins.
const KEYWORD_RULES: &[(&[&str], NodeType)] = &[
    (&["database", "sql", "db"], NodeType::Database),
    (&["storage", "bucket"], NodeType::Storage),
    (&["compute", "instance", "vm"], NodeType::Compute),
    (&["function", "lambda"], NodeType::Function),
    (&["cache", "redis"], NodeType::Cache),
    (&["queue", "pubsub", "sqs"], NodeType::Queue),
    (&["api", "gateway"], NodeType::Api),
    (&["network", "vpc"], NodeType::Network),
    (&["firewall", "security_group"], NodeType::Firewall),
    (&["load_balancer", "lb", "elb"], NodeType::LoadBalancer),
];

const OPEN_CIDRS: &[&str] = &["0.0.0.0/0", "::/0"];

/// Stable node id: the resource id when present, else its sanitized full name.
pub fn node_id(resource: &Resource) -> String {
    match &resource.id {
        Some(id) => id.clone(),
        None => sanitize_id(&resource.full_name, true),
    }
}

/// Replace every character outside `[A-Za-z0-9_]` (and `-` when allowed) with `_`.
pub fn sanitize_id(raw: &str, keep_dash: bool) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (keep_dash && c == '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn infer_node_type(resource_type: &str) -> NodeType {
    let resource_type = resource_type.to_lowercase();

    if let Some(node_type) = RESOURCE_TYPE_TABLE.get(resource_type.as_str()) {
        return *node_type;
    }

    KEYWORD_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| resource_type.contains(k)))
        .map(|(_, node_type)| *node_type)
        .unwrap_or(NodeType::Service)
}

/// Loose truthiness for flags that parsers may emit as bools, numbers, or strings.
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// HCL blocks come through either as a map or as a list of maps.
fn blocks(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().filter(|v| v.is_object()).collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}

fn first_block<'v>(value: Option<&'v Value>) -> Option<&'v Value> {
    blocks(value).into_iter().next()
}

fn allows_any_source(rule: &Value) -> bool {
    ["cidr_blocks", "ipv6_cidr_blocks", "source_ranges"]
        .iter()
        .filter_map(|key| rule.get(*key))
        .any(|ranges| match ranges {
            Value::Array(items) => items.iter().filter_map(Value::as_str).any(|c| OPEN_CIDRS.contains(&c)),
            Value::String(s) => OPEN_CIDRS.contains(&s.as_str()),
            _ => false,
        })
}

/// Cloud SQL style public IP settings. `None` when public IPv4 is off.
fn sql_network_boundary(resource: &Resource) -> Option<TrustBoundary> {
    let settings = first_block(resource.property("settings"))?;
    let ip_config = first_block(settings.get("ip_configuration"))?;
    if !truthy(ip_config.get("ipv4_enabled")) {
        return None;
    }

    let open = blocks(ip_config.get("authorized_networks"))
        .iter()
        .any(|network| network.get("value").and_then(Value::as_str) == Some("0.0.0.0/0"));

    Some(if open {
        TrustBoundary::Internet
    } else if truthy(resource.property("encrypted")) {
        TrustBoundary::Private
    } else {
        TrustBoundary::Dmz
    })
}

pub fn infer_trust_boundary(resource: &Resource) -> TrustBoundary {
    let resource_type = resource.resource_type.to_lowercase();
    let is_database = resource_type.contains("sql") || resource_type.contains("database");

    if is_database {
        if let Some(boundary) = sql_network_boundary(resource) {
            return boundary;
        }
    }

    if resource_type.contains("bucket") || resource_type.contains("storage") {
        let public_acl = resource
            .property("acl")
            .and_then(Value::as_str)
            .map(|acl| acl.contains("public"))
            .unwrap_or(false);
        if public_acl {
            return TrustBoundary::Internet;
        }
    }

    if truthy(resource.property("publicly_accessible")) || truthy(resource.property("associate_public_ip_address")) {
        return TrustBoundary::Dmz;
    }

    if (resource_type.contains("security_group") || resource_type.contains("firewall"))
        && blocks(resource.property("ingress")).into_iter().any(allows_any_source)
    {
        return TrustBoundary::Dmz;
    }

    if is_database {
        if truthy(resource.property("storage_encrypted")) || truthy(resource.property("encrypted")) {
            return TrustBoundary::Restricted;
        }
        return TrustBoundary::Private;
    }

    TrustBoundary::Internal
}

/// Node type and trust boundary for a resource.
pub fn classify(resource: &Resource) -> (NodeType, TrustBoundary) {
    (infer_node_type(&resource.resource_type), infer_trust_boundary(resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_and_keyword_node_types() {
        assert_eq!(infer_node_type("google_sql_database_instance"), NodeType::Database);
        assert_eq!(infer_node_type("aws_vpc"), NodeType::Vpc);
        assert_eq!(infer_node_type("AWS_LB"), NodeType::LoadBalancer);
        // keyword order: "db" wins over "instance"
        assert_eq!(infer_node_type("alicloud_db_instance"), NodeType::Database);
        assert_eq!(infer_node_type("aws_lambda_permission"), NodeType::Function);
        assert_eq!(infer_node_type("aws_alb_listener"), NodeType::LoadBalancer);
        assert_eq!(infer_node_type("random_password"), NodeType::Service);
    }

    #[test]
    fn test_public_cloud_sql_is_internet() {
        let resource = Resource::new(
            "google_sql_database_instance",
            "main",
            json!({"settings": {"ip_configuration": {
                "ipv4_enabled": true,
                "authorized_networks": [{"value": "0.0.0.0/0"}]
            }}}),
        );
        assert_eq!(infer_trust_boundary(&resource), TrustBoundary::Internet);
    }

    #[test]
    fn test_cloud_sql_restricted_networks() {
        let props = |encrypted: bool| {
            json!({
                "encrypted": encrypted,
                "settings": [{"ip_configuration": [{
                    "ipv4_enabled": true,
                    "authorized_networks": [{"value": "10.0.0.0/8"}]
                }]}]
            })
        };
        let plain = Resource::new("google_sql_database_instance", "a", props(false));
        let encrypted = Resource::new("google_sql_database_instance", "b", props(true));
        assert_eq!(infer_trust_boundary(&plain), TrustBoundary::Dmz);
        assert_eq!(infer_trust_boundary(&encrypted), TrustBoundary::Private);
    }

    #[test]
    fn test_bucket_acl() {
        let public = Resource::new("aws_s3_bucket", "site", json!({"acl": "public-read"}));
        let private = Resource::new("aws_s3_bucket", "logs", json!({"acl": "private"}));
        assert_eq!(infer_trust_boundary(&public), TrustBoundary::Internet);
        assert_ne!(infer_trust_boundary(&private), TrustBoundary::Internet);
    }

    #[test]
    fn test_public_ip_flags() {
        let vm = Resource::new("aws_instance", "web", json!({"associate_public_ip_address": true}));
        assert_eq!(infer_trust_boundary(&vm), TrustBoundary::Dmz);

        let rds = Resource::new("aws_db_instance", "db", json!({"publicly_accessible": "true"}));
        assert_eq!(infer_trust_boundary(&rds), TrustBoundary::Dmz);
    }

    #[test]
    fn test_open_security_group() {
        let single_rule = Resource::new(
            "aws_security_group",
            "web",
            json!({"ingress": {"from_port": 443, "cidr_blocks": ["0.0.0.0/0"]}}),
        );
        let ipv6 = Resource::new(
            "aws_security_group",
            "v6",
            json!({"ingress": [{"ipv6_cidr_blocks": ["::/0"]}]}),
        );
        let closed = Resource::new(
            "aws_security_group",
            "db",
            json!({"ingress": [{"cidr_blocks": ["10.0.0.0/16"]}]}),
        );
        assert_eq!(infer_trust_boundary(&single_rule), TrustBoundary::Dmz);
        assert_eq!(infer_trust_boundary(&ipv6), TrustBoundary::Dmz);
        assert_eq!(infer_trust_boundary(&closed), TrustBoundary::Internal);
    }

    #[test]
    fn test_database_fallback() {
        let encrypted = Resource::new("google_sql_database_instance", "c", json!({"storage_encrypted": true}));
        let plain = Resource::new("azurerm_sql_database", "d", json!({}));
        assert_eq!(classify(&encrypted), (NodeType::Database, TrustBoundary::Restricted));
        assert_eq!(classify(&plain), (NodeType::Database, TrustBoundary::Private));
    }

    #[test]
    fn test_node_id() {
        let named = Resource::new("aws_s3_bucket", "my-bucket", json!({}));
        assert_eq!(node_id(&named), "aws_s3_bucket_my-bucket");
        assert_eq!(node_id(&named.with_id("bucket-1")), "bucket-1");
    }

    #[test]
    fn test_unknown_resource_defaults() {
        let resource = Resource::new("random_id", "suffix", json!({}));
        assert_eq!(classify(&resource), (NodeType::Service, TrustBoundary::Internal));
    }
}
