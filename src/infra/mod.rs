pub mod types;

pub use types::{
    validate_resources, CodeFlow, InfrastructureConfig, InputError, Resource,
};
