use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write;
use crate::threatdb::types::display_value;

/// Kind of text requested from the model; selects the system prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    #[default]
    ThreatDescription,
    Remediation,
    Compliance,
    AttackScenario,
    RiskAssessment,
    MitigationAlternatives,
}

impl PromptKind {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            PromptKind::ThreatDescription | PromptKind::MitigationAlternatives => {
                "You are a security architect reviewing cloud infrastructure. \
                 Explain concrete security consequences of the configuration you are given \
                 and avoid generic advice."
            }
            PromptKind::Remediation => {
                "You are a DevSecOps engineer. Give remediation steps that can be applied \
                 as written, including infrastructure code where it helps."
            }
            PromptKind::Compliance => {
                "You are a compliance analyst. Relate technical findings to specific \
                 framework controls in language an auditor accepts."
            }
            PromptKind::AttackScenario => {
                "You are a red team operator. Describe attacks grounded in real-world \
                 techniques and name the tooling involved."
            }
            PromptKind::RiskAssessment => {
                "You are a risk analyst. Weigh financial, operational, reputational and \
                 regulatory impact and end with a remediation priority."
            }
        }
    }
}

/// Render a property map as an indented bullet list, sorted by key.
fn bullet_list(properties: &Map<String, Value>, bullet: &str) -> String {
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        let _ = writeln!(out, "  {}{}: {}", bullet, key, display_value(&properties[key.as_str()]));
    }
    out.trim_end().to_string()
}

fn as_map(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Prompt builders for each generated text.
pub struct PromptTemplates;

impl PromptTemplates {
    pub fn threat_description(
        service_type: &str,
        service_name: &str,
        properties: &Value,
        threat_name: &str,
        threat_category: &str,
    ) -> String {
        format!(
            "Configuration of {service_type} `{service_name}`:\n\
             {props}\n\n\
             Threat: {threat_name}\n\
             Category: {threat_category}\n\n\
             In two or three sentences for a security architect, state the weakness, \
             how an attacker would use it, and the resulting impact. \
             Stay specific to this configuration.",
            props = bullet_list(&as_map(properties), "- "),
        )
    }

    pub fn remediation(
        threat_name: &str,
        threat_description: &str,
        cloud_provider: &str,
        service_type: &str,
        resource_name: &str,
        current_config: &Value,
    ) -> String {
        format!(
            "Remediate this {cloud_provider} finding.\n\n\
             Threat: {threat_name}\n\
             Description: {threat_description}\n\
             Service type: {service_type}\n\
             Resource: {resource_name}\n\n\
             Current configuration:\n{config}\n\n\
             Include:\n\
             1. Ordered remediation steps\n\
             2. {cloud_provider} console steps or CLI commands\n\
             3. A Terraform snippet with the corrected settings\n\
             4. How to verify the fix",
            config = bullet_list(&as_map(current_config), ""),
        )
    }

    pub fn compliance_explanation(
        threat_name: &str,
        threat_description: &str,
        framework: &str,
        control_id: &str,
        control_description: Option<&str>,
    ) -> String {
        let control = control_description
            .map(|d| format!("\nControl description: {}", d))
            .unwrap_or_default();
        format!(
            "Map this threat onto {framework}.\n\n\
             Threat: {threat_name}\n\
             Description: {threat_description}\n\
             Control: {control_id}{control}\n\n\
             Cover what {framework} {control_id} requires, how the threat breaks it, \
             what restores compliance, and which evidence an auditor will ask for."
        )
    }

    pub fn attack_scenario(threat_name: &str, service_type: &str, details: &Value) -> String {
        format!(
            "Walk through a realistic attack on this weakness.\n\n\
             Threat: {threat_name}\n\
             Service: {service_type}\n\
             Details:\n{details}\n\n\
             Cover the attacker profile, each step of the attack, tools used, \
             time to exploit, and where defenders could detect it.",
            details = bullet_list(&as_map(details), "- "),
        )
    }

    pub fn risk_assessment(threat_name: &str, severity: &str, likelihood: &str, business_context: &Value) -> String {
        format!(
            "Assess the business risk of this threat.\n\n\
             Threat: {threat_name}\n\
             Severity: {severity}\n\
             Likelihood: {likelihood}\n\
             Business context:\n{context}\n\n\
             Cover business impact, regulatory exposure, customer impact, a remediation \
             priority (Critical/High/Medium/Low) and a target timeline.",
            context = bullet_list(&as_map(business_context), "- "),
        )
    }

    pub fn mitigation_alternatives(threat_name: &str, primary_mitigation: &str, constraints: Option<&Value>) -> String {
        let constraints = constraints
            .map(as_map)
            .filter(|m| !m.is_empty())
            .map(|m| format!("\nConstraints:\n{}", bullet_list(&m, "- ")))
            .unwrap_or_default();
        format!(
            "Propose alternatives to the recommended mitigation.\n\n\
             Threat: {threat_name}\n\
             Recommended mitigation: {primary_mitigation}{constraints}\n\n\
             Give three to five options. For each, list pros and cons, cost \
             (Low/Medium/High), rollout time, and effectiveness relative to the \
             recommended mitigation."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_lists_properties_sorted() {
        let prompt = PromptTemplates::threat_description(
            "Cloud SQL",
            "main",
            &json!({"tier": "db-f1-micro", "region": "us-central1"}),
            "Public database",
            "Data Exposure",
        );
        let region = prompt.find("- region: us-central1").unwrap();
        let tier = prompt.find("- tier: db-f1-micro").unwrap();
        assert!(region < tier);
        assert!(prompt.contains("Category: Data Exposure"));
    }

    #[test]
    fn test_optional_sections() {
        let without = PromptTemplates::compliance_explanation("t", "d", "ISO27001", "A.9.1", None);
        assert!(!without.contains("Control description"));

        let with = PromptTemplates::mitigation_alternatives("t", "close port", Some(&json!({"budget": "low"})));
        assert!(with.contains("Constraints:\n  - budget: low"));
        let empty = PromptTemplates::mitigation_alternatives("t", "close port", Some(&json!({})));
        assert!(!empty.contains("Constraints"));
    }

    #[test]
    fn test_each_kind_has_system_prompt() {
        for kind in [
            PromptKind::ThreatDescription,
            PromptKind::Remediation,
            PromptKind::Compliance,
            PromptKind::AttackScenario,
            PromptKind::RiskAssessment,
            PromptKind::MitigationAlternatives,
        ] {
            assert!(!kind.system_prompt().is_empty());
        }
    }
}
