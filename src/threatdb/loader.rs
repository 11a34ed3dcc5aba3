use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;
use crate::threatdb::types::{Severity, Threat};

#[derive(Debug, Error)]
pub enum ThreatLoadError {
    #[error("threat database directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid threat record #{index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// Top-level layout of a threat file.
#[derive(Debug, Default, Deserialize)]
struct ThreatFile {
    #[serde(default)]
    threats: Option<Vec<serde_yaml::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreatDatabaseStatistics {
    pub total_threats: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub by_cloud_provider: HashMap<String, usize>,
    pub unique_resource_types: usize,
    pub unique_categories: usize,
}

/// In-memory, read-only threat database with lookup indexes.
///
/// Indexes hold positions into `threats`, so lookups preserve load order.
#[derive(Debug, Clone, Default)]
pub struct ThreatDatabase {
    threats: Vec<Threat>,
    by_id: HashMap<String, usize>,
    by_resource_type: HashMap<String, Vec<usize>>,
    by_cloud_provider: HashMap<String, Vec<usize>>,
    by_category: HashMap<String, Vec<usize>>,
    by_severity: HashMap<Severity, Vec<usize>>,
}

impl ThreatDatabase {
    /// Build a database from already-parsed threats. A repeated id replaces
    /// the earlier definition in place.
    pub fn from_threats(threats: impl IntoIterator<Item = Threat>) -> Self {
        let mut db = ThreatDatabase::default();
        for threat in threats {
            db.insert(threat);
        }
        db.rebuild_indexes();
        db
    }

    fn insert(&mut self, threat: Threat) {
        match self.by_id.get(&threat.id) {
            Some(&pos) => {
                warn!("Duplicate threat id {}, later definition wins", threat.id);
                self.threats[pos] = threat;
            }
            None => {
                self.by_id.insert(threat.id.clone(), self.threats.len());
                self.threats.push(threat);
            }
        }
    }

    fn rebuild_indexes(&mut self) {
        self.by_resource_type.clear();
        self.by_cloud_provider.clear();
        self.by_category.clear();
        self.by_severity.clear();

        for (pos, threat) in self.threats.iter().enumerate() {
            for resource_type in &threat.resource_types {
                self.by_resource_type.entry(resource_type.clone()).or_default().push(pos);
            }
            for provider in &threat.cloud_providers {
                self.by_cloud_provider.entry(provider.clone()).or_default().push(pos);
            }
            self.by_category.entry(threat.category.clone()).or_default().push(pos);
            self.by_severity.entry(threat.severity).or_default().push(pos);
        }
    }

    fn collect(&self, positions: Option<&Vec<usize>>) -> Vec<&Threat> {
        positions
            .map(|p| p.iter().map(|&i| &self.threats[i]).collect())
            .unwrap_or_default()
    }

    pub fn threats(&self) -> &[Threat] {
        &self.threats
    }

    pub fn len(&self) -> usize {
        self.threats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threats.is_empty()
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Threat> {
        self.by_id.get(id).map(|&i| &self.threats[i])
    }

    /// Threats that name this resource type explicitly.
    pub fn by_resource_type(&self, resource_type: &str) -> Vec<&Threat> {
        self.collect(self.by_resource_type.get(resource_type))
    }

    pub fn by_cloud_provider(&self, provider: &str) -> Vec<&Threat> {
        self.collect(self.by_cloud_provider.get(provider))
    }

    pub fn by_category(&self, category: &str) -> Vec<&Threat> {
        self.collect(self.by_category.get(category))
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<&Threat> {
        self.collect(self.by_severity.get(&severity))
    }

    pub fn statistics(&self) -> ThreatDatabaseStatistics {
        let mut stats = ThreatDatabaseStatistics {
            total_threats: self.threats.len(),
            ..Default::default()
        };

        for (severity, positions) in &self.by_severity {
            stats.by_severity.insert(severity.as_str().to_string(), positions.len());
        }
        for (category, positions) in &self.by_category {
            stats.by_category.insert(category.clone(), positions.len());
        }
        for (provider, positions) in &self.by_cloud_provider {
            stats.by_cloud_provider.insert(provider.clone(), positions.len());
        }

        let resource_types: BTreeSet<&str> = self
            .threats
            .iter()
            .flat_map(|t| t.resource_types.iter().map(String::as_str))
            .collect();
        stats.unique_resource_types = resource_types.len();
        stats.unique_categories = self.by_category.len();

        stats
    }
}

/// Reads threat definitions from a directory of YAML files.
pub struct ThreatLoader {
    directory: PathBuf,
}

impl ThreatLoader {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        ThreatLoader {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Load every `*.yaml`/`*.yml` file directly inside the directory, in
    /// file name order. Bad files and bad records are logged and skipped.
    pub fn load(&self) -> Result<ThreatDatabase, ThreatLoadError> {
        if !self.directory.is_dir() {
            return Err(ThreatLoadError::DirectoryNotFound(self.directory.clone()));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.directory)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
            .collect();
        files.sort();

        let mut threats = Vec::new();
        for path in &files {
            match self.load_file(path) {
                Ok(mut loaded) => {
                    info!("Loaded {} threats from {}", loaded.len(), path.display());
                    threats.append(&mut loaded);
                }
                Err(e) => warn!("Skipping threat file: {}", e),
            }
        }

        let db = ThreatDatabase::from_threats(threats);
        info!("Threat database ready: {} threats from {} files", db.len(), files.len());
        Ok(db)
    }

    fn load_file(&self, path: &Path) -> Result<Vec<Threat>, ThreatLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ThreatLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_threats(&content).map_err(|source| ThreatLoadError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Parse the `threats:` list of one YAML document, skipping invalid records.
pub fn parse_threats(content: &str) -> Result<Vec<Threat>, serde_yaml::Error> {
    if content.trim().is_empty() {
        warn!("Empty threat file");
        return Ok(Vec::new());
    }

    let file: ThreatFile = serde_yaml::from_str::<Option<ThreatFile>>(content)?.unwrap_or_default();
    let records = match file.threats {
        Some(records) => records,
        None => {
            warn!("Threat file has no `threats` key");
            return Ok(Vec::new());
        }
    };

    let mut threats = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match serde_yaml::from_value::<Threat>(record) {
            Ok(threat) => threats.push(threat),
            Err(e) => {
                let err = ThreatLoadError::InvalidRecord { index, reason: e.to_string() };
                error!("Skipping {}", err);
            }
        }
    }
    Ok(threats)
}

/// Load the threat database rooted at `path`.
pub fn load_threat_database(path: impl AsRef<Path>) -> Result<ThreatDatabase> {
    Ok(ThreatLoader::new(path).load()?)
}
