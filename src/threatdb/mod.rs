pub mod conditions;
pub mod loader;
pub mod matcher;
pub mod types;

pub use conditions::{resolve_path, ConditionEvaluator};
pub use loader::{load_threat_database, ThreatDatabase, ThreatDatabaseStatistics, ThreatLoadError, ThreatLoader};
pub use matcher::{match_infrastructure_threats, ThreatMatcher};
pub use types::{
    ComplianceMapping, Condition, ConditionOperator, Likelihood, Logic, LogicGroup, MatchResult,
    MatchStatistics, MatchedThreat, Mitigation, Severity, Threat,
};
