use chrono::Utc;
use log::{debug, info};
use serde_json::Value;
use std::time::Instant;
use crate::infra::Resource;
use crate::threatdb::conditions::ConditionEvaluator;
use crate::threatdb::types::{MatchResult, MatchedThreat, Threat};

/// Matches infrastructure resources against threat definitions.
///
/// Holds no per-run state, so one matcher can serve concurrent requests
/// against a shared threat list.
#[derive(Debug, Clone, Default)]
pub struct ThreatMatcher {
    evaluator: ConditionEvaluator,
}

impl ThreatMatcher {
    pub fn new() -> Self {
        ThreatMatcher {
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Match every resource against its applicable threats.
    ///
    /// With `filter_by_resource_type`, threats naming other resource types are
    /// skipped up front. Cloud provider filtering always applies when the
    /// resource knows its provider. Results are sorted by descending risk.
    pub fn match_threats<'t>(
        &self,
        resources: &[Resource],
        threats: &'t [Threat],
        filter_by_resource_type: bool,
    ) -> MatchResult<'t> {
        let started = Instant::now();
        let mut result = MatchResult {
            total_resources_scanned: resources.len(),
            total_threats_checked: threats.len(),
            ..Default::default()
        };

        info!("Matching {} threats against {} resources", threats.len(), resources.len());

        for resource in resources {
            let document = resource.document();

            let applicable: Vec<&'t Threat> = threats
                .iter()
                .filter(|t| !filter_by_resource_type || t.applies_to_resource_type(&resource.resource_type))
                .filter(|t| match &resource.cloud_provider {
                    Some(provider) => t.applies_to_provider(provider),
                    None => true,
                })
                .collect();

            debug!("Checking {} threats for {}", applicable.len(), resource.full_name);

            for threat in applicable {
                if let Some(matched) = self.match_threat_to_resource(threat, resource, &document) {
                    result.statistics.record(threat, &resource.resource_type);
                    result.matched_threats.push(matched);
                }
            }
        }

        result.sort_by_risk();
        result.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Matched {} threats in {:.2}ms",
            result.matched_threats.len(),
            result.execution_time_ms
        );

        result
    }

    /// A threat without conditions never matches: rules must be explicit.
    fn match_threat_to_resource<'t>(
        &self,
        threat: &'t Threat,
        resource: &Resource,
        document: &Value,
    ) -> Option<MatchedThreat<'t>> {
        let logic = threat.condition_logic.as_ref()?;

        let mut matched_conditions = Vec::new();
        if !self.evaluator.evaluate_group_document(logic, document, &mut matched_conditions) {
            return None;
        }

        debug!("Threat {} matched resource {}", threat.id, resource.full_name);

        Some(MatchedThreat {
            threat,
            resource_id: resource.full_name.clone(),
            resource_type: resource.resource_type.clone(),
            resource_properties: resource.properties.clone(),
            matched_conditions,
            confidence: 1.0,
            matched_at: Utc::now(),
            location: resource.source_location(),
        })
    }
}

/// Match with a fresh matcher and resource-type filtering enabled.
pub fn match_infrastructure_threats<'t>(resources: &[Resource], threats: &'t [Threat]) -> MatchResult<'t> {
    ThreatMatcher::new().match_threats(resources, threats, true)
}
