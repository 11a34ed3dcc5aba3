pub mod classifier;
pub mod flows;
pub mod generator;
pub mod types;

pub use classifier::{classify, infer_node_type, infer_trust_boundary, node_id};
pub use flows::{could_connect, infer_data_classification, FlowDetector, EXTERNAL_USER_ID};
pub use generator::DfdGenerator;
pub use types::{
    DataClassification, Dfd, DfdEdge, DfdGenerationResult, DfdLevel, DfdNode, DfdStatistics, NodeType,
    TrustBoundary, TrustBoundaryGroup,
};
