use log::{error, info};
use serde_json::Value;
use std::sync::Arc;
use crate::infra::Resource;
use crate::llm::cache::ResponseStore;
use crate::llm::client::{LlmError, LlmRequest, TextGenerator};
use crate::llm::prompts::{PromptKind, PromptTemplates};
use crate::threatdb::types::Threat;

/// Token and temperature overrides per kind of generated text. Kinds
/// without one use the client's configured defaults.
fn sampling(kind: PromptKind) -> Option<(u32, f32)> {
    match kind {
        PromptKind::ThreatDescription => Some((500, 0.7)),
        PromptKind::Remediation => Some((1500, 0.5)),
        PromptKind::Compliance => Some((1000, 0.6)),
        PromptKind::AttackScenario => Some((1200, 0.7)),
        PromptKind::RiskAssessment => Some((1000, 0.6)),
        PromptKind::MitigationAlternatives => None,
    }
}

/// Writes explanatory text for matched threats.
pub struct ThreatNarrator<G> {
    generator: G,
    cache: Option<Arc<dyn ResponseStore>>,
}

impl<G: TextGenerator> ThreatNarrator<G> {
    pub fn new(generator: G) -> Self {
        ThreatNarrator { generator, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    async fn complete(&self, kind: PromptKind, prompt: String, subject: &str) -> Result<String, LlmError> {
        let system_prompt = kind.system_prompt();

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&prompt, Some(system_prompt))) {
            info!("Using cached {:?} for {}", kind, subject);
            return Ok(cached);
        }

        info!("Generating {:?} for {}", kind, subject);
        let mut request = LlmRequest::new(prompt).system(system_prompt);
        if let Some((max_tokens, temperature)) = sampling(kind) {
            request = request.max_tokens(max_tokens).temperature(temperature);
        }

        let response = self.generator.generate(&request).await.map_err(|e| {
            error!("Failed to generate {:?} for {}: {}", kind, subject, e);
            e
        })?;

        if let Some(cache) = &self.cache {
            cache.set(&request.prompt, &response, Some(system_prompt));
        }
        Ok(response)
    }

    pub async fn describe_threat(&self, threat: &Threat, resource: &Resource) -> Result<String, LlmError> {
        let prompt = PromptTemplates::threat_description(
            &resource.resource_type,
            &resource.name,
            &resource.properties,
            &threat.name,
            &threat.category,
        );
        self.complete(PromptKind::ThreatDescription, prompt, &threat.id).await
    }

    pub async fn remediation(&self, threat: &Threat, resource: &Resource) -> Result<String, LlmError> {
        let provider = resource
            .cloud_provider
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "the cloud provider".to_string());
        let prompt = PromptTemplates::remediation(
            &threat.name,
            &threat.description,
            &provider,
            &resource.resource_type,
            &resource.full_name,
            &resource.properties,
        );
        self.complete(PromptKind::Remediation, prompt, &threat.id).await
    }

    /// Without an explicit control, the threat's own mapping for the framework is used.
    pub async fn compliance_explanation(
        &self,
        threat: &Threat,
        framework: &str,
        control_id: Option<&str>,
        control_description: Option<&str>,
    ) -> Result<String, LlmError> {
        let mapping = threat
            .compliance_mappings
            .iter()
            .find(|m| m.framework.eq_ignore_ascii_case(framework));

        let (control_id, control_description) = match (control_id, mapping) {
            (Some(id), _) => (id, control_description),
            (None, Some(m)) => (
                m.control_id.as_str(),
                Some(m.description.as_str()).filter(|d| !d.is_empty()),
            ),
            (None, None) => ("General Security Controls", control_description),
        };

        let prompt = PromptTemplates::compliance_explanation(
            &threat.name,
            &threat.description,
            framework,
            control_id,
            control_description,
        );
        self.complete(PromptKind::Compliance, prompt, &threat.id).await
    }

    pub async fn attack_scenario(&self, threat: &Threat, resource: &Resource) -> Result<String, LlmError> {
        let prompt = PromptTemplates::attack_scenario(&threat.name, &resource.resource_type, &resource.properties);
        self.complete(PromptKind::AttackScenario, prompt, &threat.id).await
    }

    pub async fn risk_assessment(&self, threat: &Threat, business_context: &Value) -> Result<String, LlmError> {
        let prompt = PromptTemplates::risk_assessment(
            &threat.name,
            threat.severity.as_str(),
            threat.likelihood.as_str(),
            business_context,
        );
        self.complete(PromptKind::RiskAssessment, prompt, &threat.id).await
    }

    pub async fn mitigation_alternatives(&self, threat: &Threat, constraints: Option<&Value>) -> Result<String, LlmError> {
        let primary = threat
            .mitigations
            .first()
            .map(|m| m.description.as_str())
            .unwrap_or("None specified");
        let prompt = PromptTemplates::mitigation_alternatives(&threat.name, primary, constraints);
        self.complete(PromptKind::MitigationAlternatives, prompt, &threat.id).await
    }

    /// Generate one kind of text for a threat found on `resource`.
    pub async fn narrate(&self, kind: PromptKind, threat: &Threat, resource: &Resource) -> Result<String, LlmError> {
        match kind {
            PromptKind::ThreatDescription => self.describe_threat(threat, resource).await,
            PromptKind::Remediation => self.remediation(threat, resource).await,
            PromptKind::Compliance => {
                let framework = threat
                    .compliance_mappings
                    .first()
                    .map(|m| m.framework.clone())
                    .unwrap_or_else(|| "ISO27001".to_string());
                self.compliance_explanation(threat, &framework, None, None).await
            }
            PromptKind::AttackScenario => self.attack_scenario(threat, resource).await,
            PromptKind::RiskAssessment => {
                let context = serde_json::json!({
                    "resource": resource.full_name,
                    "cloud_provider": resource.cloud_provider,
                    "business_impact": threat.business_impact,
                });
                self.risk_assessment(threat, &context).await
            }
            PromptKind::MitigationAlternatives => self.mitigation_alternatives(threat, None).await,
        }
    }
}
