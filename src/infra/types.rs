use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Caller-contract violations found while validating parser output.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("resource #{index} is not an object")]
    NotAnObject { index: usize },
    #[error("resource #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("resource #{index} ({full_name}) has non-object properties")]
    InvalidProperties { index: usize, full_name: String },
    #[error("resource #{index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
}

/// A Terraform resource as produced by the HCL parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub cloud_provider: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub line_number: Option<usize>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "empty_object")]
    pub properties: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Resource {
    pub fn new(resource_type: &str, name: &str, properties: Value) -> Self {
        Resource {
            id: None,
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            full_name: format!("{}.{}", resource_type, name),
            cloud_provider: provider_from_type(resource_type).map(str::to_string),
            location: None,
            line_number: None,
            depends_on: Vec::new(),
            properties,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_line_number(mut self, line_number: usize) -> Self {
        self.line_number = Some(line_number);
        self
    }

    pub fn with_depends_on(mut self, depends_on: &[&str]) -> Self {
        self.depends_on = depends_on.iter().map(|d| d.to_string()).collect();
        self
    }

    /// `file:line` when the parser recorded both, otherwise just the file.
    pub fn source_location(&self) -> Option<String> {
        match (&self.location, self.line_number) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.clone()),
            (None, _) => None,
        }
    }

    /// Fill in the derived fields the parser may have left out.
    fn normalize(mut self) -> Self {
        if self.full_name.is_empty() {
            self.full_name = format!("{}.{}", self.resource_type, self.name);
        }
        if self.cloud_provider.is_none() {
            self.cloud_provider = provider_from_type(&self.resource_type).map(str::to_string);
        }
        self
    }

    /// Look up a top-level property.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    /// The tree that condition field paths are resolved against.
    pub fn document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("resource_type".to_string(), Value::String(self.resource_type.clone()));
        doc.insert("name".to_string(), Value::String(self.name.clone()));
        doc.insert("full_name".to_string(), Value::String(self.full_name.clone()));
        if let Some(id) = &self.id {
            doc.insert("id".to_string(), Value::String(id.clone()));
        }
        doc.insert(
            "cloud_provider".to_string(),
            self.cloud_provider.clone().map(Value::String).unwrap_or(Value::Null),
        );
        doc.insert(
            "location".to_string(),
            self.location.clone().map(Value::String).unwrap_or(Value::Null),
        );
        doc.insert(
            "line_number".to_string(),
            self.line_number.map(Value::from).unwrap_or(Value::Null),
        );
        doc.insert(
            "depends_on".to_string(),
            Value::Array(self.depends_on.iter().cloned().map(Value::String).collect()),
        );
        doc.insert("properties".to_string(), self.properties.clone());
        Value::Object(doc)
    }
}

/// Map a resource type prefix onto its cloud provider.
pub fn provider_from_type(resource_type: &str) -> Option<&'static str> {
    if resource_type.starts_with("google_") {
        Some("gcp")
    } else if resource_type.starts_with("aws_") {
        Some("aws")
    } else if resource_type.starts_with("azurerm_") {
        Some("azure")
    } else if resource_type.starts_with("alicloud_") {
        Some("alibaba")
    } else {
        None
    }
}

/// Parsed Terraform configuration handed over by the parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub source_files: Vec<String>,
}

impl InfrastructureConfig {
    /// Build a configuration from untyped parser output, validating every resource.
    pub fn from_value(value: &Value) -> Result<Self, InputError> {
        let raw = value
            .get("resources")
            .and_then(Value::as_array)
            .map(|a| a.as_slice())
            .unwrap_or(&[]);
        let resources = validate_resources(raw)?;
        let source_files = value
            .get("source_files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(InfrastructureConfig { resources, source_files })
    }
}

/// Check every raw resource up front so scans never fail halfway through.
pub fn validate_resources(values: &[Value]) -> Result<Vec<Resource>, InputError> {
    let mut resources = Vec::with_capacity(values.len());

    for (index, value) in values.iter().enumerate() {
        let obj = value.as_object().ok_or(InputError::NotAnObject { index })?;

        for field in ["resource_type", "name"] {
            match obj.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => return Err(InputError::MissingField { index, field }),
            }
        }

        if let Some(props) = obj.get("properties") {
            if !props.is_object() && !props.is_null() {
                let full_name = format!(
                    "{}.{}",
                    obj["resource_type"].as_str().unwrap_or_default(),
                    obj["name"].as_str().unwrap_or_default()
                );
                return Err(InputError::InvalidProperties { index, full_name });
            }
        }

        let mut resource: Resource = serde_json::from_value(value.clone())
            .map_err(|e| InputError::Malformed { index, reason: e.to_string() })?;
        if resource.properties.is_null() {
            resource.properties = empty_object();
        }
        resources.push(resource.normalize());
    }

    Ok(resources)
}

/// One function's call graph record, used for the code-level diagram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeFlow {
    pub function: String,
    #[serde(default)]
    pub calls: Vec<String>,
    #[serde(default)]
    pub external_apis: Vec<String>,
    #[serde(default)]
    pub data_access: Vec<String>,
}
