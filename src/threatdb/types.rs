use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn score(&self) -> u32 {
        match self {
            Severity::Critical => 10,
            Severity::High => 7,
            Severity::Medium => 5,
            Severity::Low => 3,
            Severity::Info => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            other => Err(format!("Invalid severity: {}", other)),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Likelihood {
    Certain,
    Likely,
    Possible,
    Unlikely,
    Rare,
}

impl Likelihood {
    pub fn score(&self) -> f64 {
        match self {
            Likelihood::Certain => 1.0,
            Likelihood::Likely => 0.8,
            Likelihood::Possible => 0.5,
            Likelihood::Unlikely => 0.3,
            Likelihood::Rare => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Likelihood::Certain => "certain",
            Likelihood::Likely => "likely",
            Likelihood::Possible => "possible",
            Likelihood::Unlikely => "unlikely",
            Likelihood::Rare => "rare",
        }
    }
}

impl FromStr for Likelihood {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "certain" => Ok(Likelihood::Certain),
            "likely" => Ok(Likelihood::Likely),
            "possible" => Ok(Likelihood::Possible),
            "unlikely" => Ok(Likelihood::Unlikely),
            "rare" => Ok(Likelihood::Rare),
            other => Err(format!("Invalid likelihood: {}", other)),
        }
    }
}

impl TryFrom<String> for Likelihood {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison applied by a condition. Unrecognized operator strings are kept
/// so that the rule still loads; such a condition simply never holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Contains,
    NotContains,
    ContainsAny,
    MapSuperset,
    Substring,
    Regex,
    Exists,
    NotExists,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Unknown(String),
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            ConditionOperator::Equals => "==",
            ConditionOperator::NotEquals => "!=",
            ConditionOperator::In => "in",
            ConditionOperator::NotIn => "not_in",
            ConditionOperator::Contains => "contains",
            ConditionOperator::NotContains => "not_contains",
            ConditionOperator::ContainsAny => "contains_any",
            ConditionOperator::MapSuperset => "map_superset",
            ConditionOperator::Substring => "substring",
            ConditionOperator::Regex => "regex",
            ConditionOperator::Exists => "exists",
            ConditionOperator::NotExists => "not_exists",
            ConditionOperator::GreaterThan => ">",
            ConditionOperator::LessThan => "<",
            ConditionOperator::GreaterOrEqual => ">=",
            ConditionOperator::LessOrEqual => "<=",
            ConditionOperator::Unknown(op) => op,
        }
    }
}

impl From<String> for ConditionOperator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "==" => ConditionOperator::Equals,
            "!=" => ConditionOperator::NotEquals,
            "in" => ConditionOperator::In,
            "not_in" => ConditionOperator::NotIn,
            "contains" => ConditionOperator::Contains,
            "not_contains" => ConditionOperator::NotContains,
            "contains_any" => ConditionOperator::ContainsAny,
            "map_superset" => ConditionOperator::MapSuperset,
            "substring" => ConditionOperator::Substring,
            "regex" => ConditionOperator::Regex,
            "exists" => ConditionOperator::Exists,
            "not_exists" => ConditionOperator::NotExists,
            ">" => ConditionOperator::GreaterThan,
            "<" => ConditionOperator::LessThan,
            ">=" => ConditionOperator::GreaterOrEqual,
            "<=" => ConditionOperator::LessOrEqual,
            _ => ConditionOperator::Unknown(value),
        }
    }
}

impl From<&str> for ConditionOperator {
    fn from(value: &str) -> Self {
        ConditionOperator::from(value.to_string())
    }
}

impl From<ConditionOperator> for String {
    fn from(op: ConditionOperator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Leaf predicate: `field operator value`, with `field` a dot path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, operator: impl Into<ConditionOperator>, value: Value) -> Self {
        Condition {
            field: field.to_string(),
            operator: operator.into(),
            value,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, display_value(&self.value))
    }
}

/// Render a value for human-readable output; strings are shown unquoted.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl TryFrom<String> for Logic {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "and" => Ok(Logic::And),
            "or" => Ok(Logic::Or),
            other => Err(format!("Invalid logic operator: {}", other)),
        }
    }
}

/// Boolean tree of conditions and nested groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LogicGroup {
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<LogicGroup>,
}

impl LogicGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        LogicGroup { logic: Logic::And, conditions, groups: Vec::new() }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        LogicGroup { logic: Logic::Or, conditions, groups: Vec::new() }
    }

    pub fn with_group(mut self, group: LogicGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mitigation {
    pub description: String,
    #[serde(default = "default_level")]
    pub effort: String,
    #[serde(default = "default_level")]
    pub impact: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceMapping {
    pub framework: String,
    pub control_id: String,
    #[serde(default)]
    pub description: String,
}

fn default_level() -> String {
    "medium".to_string()
}

/// A threat definition from the threat database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Threat {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub likelihood: Likelihood,
    pub category: String,
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub cloud_providers: Vec<String>,
    #[serde(
        default,
        rename(deserialize = "conditions", serialize = "condition_logic"),
        alias = "condition_logic"
    )]
    pub condition_logic: Option<LogicGroup>,
    #[serde(default)]
    pub attack_vectors: Vec<String>,
    #[serde(default = "default_level")]
    pub exploitability: String,
    #[serde(default = "default_level")]
    pub business_impact: String,
    #[serde(default)]
    pub mitigations: Vec<Mitigation>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub compliance_mappings: Vec<ComplianceMapping>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Threat {
    pub fn new(id: &str, name: &str, severity: Severity, likelihood: Likelihood, category: &str) -> Self {
        Threat {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            severity,
            likelihood,
            category: category.to_string(),
            resource_types: Vec::new(),
            cloud_providers: Vec::new(),
            condition_logic: None,
            attack_vectors: Vec::new(),
            exploitability: default_level(),
            business_impact: default_level(),
            mitigations: Vec::new(),
            references: Vec::new(),
            compliance_mappings: Vec::new(),
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_resource_types(mut self, types: &[&str]) -> Self {
        self.resource_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_cloud_providers(mut self, providers: &[&str]) -> Self {
        self.cloud_providers = providers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_conditions(mut self, logic: LogicGroup) -> Self {
        self.condition_logic = Some(logic);
        self
    }

    /// severity score x likelihood score
    pub fn risk_score(&self) -> f64 {
        f64::from(self.severity.score()) * self.likelihood.score()
    }

    /// Empty resource type list means the threat applies to every type.
    pub fn applies_to_resource_type(&self, resource_type: &str) -> bool {
        self.resource_types.is_empty() || self.resource_types.iter().any(|t| t == resource_type)
    }

    pub fn applies_to_provider(&self, provider: &str) -> bool {
        self.cloud_providers.is_empty() || self.cloud_providers.iter().any(|p| p == provider)
    }

    pub fn scored(&self) -> ScoredThreat<'_> {
        ScoredThreat { threat: self, risk_score: self.risk_score() }
    }
}

/// Serialized view of a threat including its derived risk score.
#[derive(Debug, Serialize)]
pub struct ScoredThreat<'a> {
    #[serde(flatten)]
    pub threat: &'a Threat,
    pub risk_score: f64,
}

/// A threat whose conditions held for a specific resource.
#[derive(Debug, Clone)]
pub struct MatchedThreat<'a> {
    pub threat: &'a Threat,
    pub resource_id: String,
    pub resource_type: String,
    pub resource_properties: Value,
    pub matched_conditions: Vec<String>,
    pub confidence: f64,
    pub matched_at: DateTime<Utc>,
    pub location: Option<String>,
}

impl MatchedThreat<'_> {
    pub fn risk_score(&self) -> f64 {
        self.threat.risk_score() * self.confidence
    }
}

impl Serialize for MatchedThreat<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MatchedThreat", 11)?;
        state.serialize_field("threat", &self.threat.scored())?;
        state.serialize_field("resource_id", &self.resource_id)?;
        state.serialize_field("resource_type", &self.resource_type)?;
        state.serialize_field("resource_properties", &self.resource_properties)?;
        state.serialize_field("matched_conditions", &self.matched_conditions)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("risk_score", &self.risk_score())?;
        state.serialize_field("matched_at", &self.matched_at.to_rfc3339())?;
        state.serialize_field("location", &self.location)?;
        state.serialize_field("severity", &self.threat.severity)?;
        state.serialize_field("category", &self.threat.category)?;
        state.end()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchStatistics {
    pub by_severity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub by_resource_type: HashMap<String, usize>,
}

impl MatchStatistics {
    pub(crate) fn record(&mut self, threat: &Threat, resource_type: &str) {
        *self.by_severity.entry(threat.severity.as_str().to_string()).or_insert(0) += 1;
        *self.by_category.entry(threat.category.clone()).or_insert(0) += 1;
        *self.by_resource_type.entry(resource_type.to_string()).or_insert(0) += 1;
    }
}

/// Outcome of one matching run.
#[derive(Debug, Clone, Default)]
pub struct MatchResult<'a> {
    pub matched_threats: Vec<MatchedThreat<'a>>,
    pub total_resources_scanned: usize,
    pub total_threats_checked: usize,
    pub execution_time_ms: f64,
    pub statistics: MatchStatistics,
}

impl<'a> MatchResult<'a> {
    pub fn total_matched(&self) -> usize {
        self.matched_threats.len()
    }

    pub fn critical_threats(&self) -> Vec<&MatchedThreat<'a>> {
        self.matched_threats
            .iter()
            .filter(|mt| mt.threat.severity == Severity::Critical)
            .collect()
    }

    pub fn high_risk_threats(&self, threshold: f64) -> Vec<&MatchedThreat<'a>> {
        self.matched_threats
            .iter()
            .filter(|mt| mt.risk_score() >= threshold)
            .collect()
    }

    /// Descending by risk score; `sort_by` is stable so ties keep match order.
    pub fn sort_by_risk(&mut self) {
        self.matched_threats.sort_by(|a, b| {
            b.risk_score()
                .partial_cmp(&a.risk_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

impl Serialize for MatchResult<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MatchResult", 6)?;
        state.serialize_field("matched_threats", &self.matched_threats)?;
        state.serialize_field("total_matched", &self.total_matched())?;
        state.serialize_field("total_resources_scanned", &self.total_resources_scanned)?;
        state.serialize_field("total_threats_checked", &self.total_threats_checked)?;
        state.serialize_field("execution_time_ms", &self.execution_time_ms)?;
        state.serialize_field("statistics", &self.statistics)?;
        state.end()
    }
}
