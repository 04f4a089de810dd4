//! Immutable catalog of loaded models and their scaler sets.
//!
//! Built once at startup from a TOML manifest and handed to the pipeline.
//! A model whose artifact or scaler is unusable stays in the registry as a
//! failed entry so every request reports it instead of silently shrinking
//! the ensemble.

use super::artifact::NativeArtifact;
use super::{Architecture, ModelDescriptor, OfflineMetrics, ScorableModel};
use crate::config::ForecastConfig;
use crate::error::{ForecastError, ModelError, Result};
use crate::normalize::NormalizationParameters;
use crate::window::{InputLayout, InputShape};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Artifact backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Native,
    Onnx,
}

impl ArtifactFormat {
    fn infer(path: &Path) -> Self {
        if path.extension().is_some_and(|e| e == "onnx") {
            ArtifactFormat::Onnx
        } else {
            ArtifactFormat::Native
        }
    }
}

/// One `[[models]]` entry of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub architecture: Architecture,
    #[serde(default = "default_variant")]
    pub variant: InputLayout,
    pub artifact: PathBuf,
    #[serde(default)]
    pub format: Option<ArtifactFormat>,
    #[serde(default)]
    pub lookback: Option<usize>,
    pub scaler: String,
    pub metrics: OfflineMetrics,
}

fn default_variant() -> InputLayout {
    InputLayout::Multivariate
}

/// The model manifest.
///
/// ```toml
/// [scalers]
/// multivariate = "scalers/multivariate.json"
///
/// [[models]]
/// name = "gru"
/// architecture = "gru"
/// artifact = "models/gru.json"
/// scaler = "multivariate"
/// metrics = { r2 = 0.990, mae = 34.94, rmse = 45.92, mape = 1.6 }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub scalers: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub models: Vec<CatalogEntry>,
}

impl ModelCatalog {
    pub fn from_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// A catalogued model and either its loaded weights or why they failed.
#[derive(Clone)]
pub struct RegisteredModel {
    pub descriptor: ModelDescriptor,
    pub model: std::result::Result<Arc<dyn ScorableModel>, ModelError>,
}

impl RegisteredModel {
    pub fn is_loaded(&self) -> bool {
        self.model.is_ok()
    }
}

impl std::fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModel")
            .field("descriptor", &self.descriptor)
            .field("loaded", &self.model.as_ref().map(|_| ()))
            .finish()
    }
}

/// Models sharing one input shape and scaler set, so one window serves all.
#[derive(Debug)]
pub struct ModelGroup<'a> {
    pub shape: InputShape,
    pub scaler: &'a str,
    pub params: Option<&'a Arc<NormalizationParameters>>,
    pub members: Vec<&'a RegisteredModel>,
}

/// Read-only registry passed into the pipeline.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<RegisteredModel>,
    scalers: HashMap<String, Arc<NormalizationParameters>>,
}

impl ModelRegistry {
    /// Load every model named in a manifest. Relative paths resolve against
    /// the manifest's directory.
    pub fn load(catalog_path: &Path, config: &ForecastConfig) -> Result<Self> {
        let catalog = ModelCatalog::from_toml(catalog_path)?;
        let base = catalog_path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_catalog(&catalog, base, config)
    }

    pub fn from_catalog(catalog: &ModelCatalog, base: &Path, config: &ForecastConfig) -> Result<Self> {
        let mut scalers = HashMap::new();
        let mut scaler_errors: HashMap<&str, String> = HashMap::new();
        for (id, path) in &catalog.scalers {
            match NormalizationParameters::from_json(&base.join(path), config.min_divisor) {
                Ok(params) => {
                    scalers.insert(id.clone(), params);
                }
                Err(e) => {
                    warn!(scaler = %id, error = %e, "Failed to load scaler set");
                    scaler_errors.insert(id.as_str(), e.to_string());
                }
            }
        }

        let mut entries = Vec::with_capacity(catalog.models.len());
        for entry in &catalog.models {
            let path = base.join(&entry.artifact);
            let format = entry.format.unwrap_or_else(|| ArtifactFormat::infer(&path));
            let (shape, model) = load_entry(entry, &path, format, config);

            let model = match (model, scaler_errors.get(entry.scaler.as_str())) {
                (Ok(_), Some(reason)) => Err(ModelError::CorruptArtifact(format!(
                    "scaler '{}' unusable: {}",
                    entry.scaler, reason
                ))),
                (model, _) => model,
            };

            let descriptor = ModelDescriptor {
                name: entry.name.clone(),
                architecture: entry.architecture,
                input: shape,
                metrics: entry.metrics,
                scaler: entry.scaler.clone(),
            };
            entries.push((descriptor, model));
        }

        let registry = Self::from_entries(entries, scalers)?;
        info!(
            models = registry.len(),
            loaded = registry.models.iter().filter(|m| m.is_loaded()).count(),
            "Model registry ready"
        );
        Ok(registry)
    }

    /// Assemble a registry from already-loaded models.
    ///
    /// Fails only on catalog-level mistakes (no models, duplicate names).
    /// Per-model problems are recorded on the entry.
    pub fn from_entries(
        entries: Vec<(ModelDescriptor, std::result::Result<Arc<dyn ScorableModel>, ModelError>)>,
        scalers: HashMap<String, NormalizationParameters>,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(ForecastError::Config("model catalog is empty".into()));
        }
        let mut seen = HashSet::new();
        for (descriptor, _) in &entries {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(ForecastError::Config(format!(
                    "duplicate model name '{}'",
                    descriptor.name
                )));
            }
        }

        let scalers: HashMap<String, Arc<NormalizationParameters>> =
            scalers.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();

        let models = entries
            .into_iter()
            .map(|(descriptor, model)| {
                let model = model.and_then(|m| check_contract(&descriptor, m, &scalers));
                if let Err(e) = &model {
                    warn!(model = %descriptor.name, error = %e, "Model unavailable");
                }
                RegisteredModel { descriptor, model }
            })
            .collect();

        Ok(Self { models, scalers })
    }

    pub fn models(&self) -> &[RegisteredModel] {
        &self.models
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModel> {
        self.models.iter().find(|m| m.descriptor.name == name)
    }

    pub fn scaler(&self, id: &str) -> Option<&Arc<NormalizationParameters>> {
        self.scalers.get(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Longest lookback any model needs.
    pub fn max_lookback(&self) -> usize {
        self.models
            .iter()
            .map(|m| m.descriptor.input.lookback)
            .max()
            .unwrap_or(0)
    }

    /// Models grouped by `(input shape, scaler)`, in catalog order.
    pub fn groups(&self) -> Vec<ModelGroup<'_>> {
        let mut groups: Vec<ModelGroup<'_>> = Vec::new();
        for model in &self.models {
            let d = &model.descriptor;
            match groups
                .iter_mut()
                .find(|g| g.shape == d.input && g.scaler == d.scaler)
            {
                Some(group) => group.members.push(model),
                None => groups.push(ModelGroup {
                    shape: d.input,
                    scaler: d.scaler.as_str(),
                    params: self.scalers.get(&d.scaler),
                    members: vec![model],
                }),
            }
        }
        groups
    }
}

fn load_entry(
    entry: &CatalogEntry,
    path: &Path,
    format: ArtifactFormat,
    config: &ForecastConfig,
) -> (InputShape, std::result::Result<Arc<dyn ScorableModel>, ModelError>) {
    let declared = |lookback| InputShape::new(lookback, entry.variant);

    match format {
        ArtifactFormat::Native => match NativeArtifact::read(path) {
            Ok(artifact) => {
                let shape = declared(entry.lookback.unwrap_or(artifact.lookback));
                if artifact.architecture != entry.architecture {
                    let err = ModelError::CorruptArtifact(format!(
                        "artifact is {}, catalog says {}",
                        artifact.architecture, entry.architecture
                    ));
                    return (shape, Err(err));
                }
                (shape, artifact.build())
            }
            Err(e) => (declared(entry.lookback.unwrap_or(config.lookback)), Err(e)),
        },
        ArtifactFormat::Onnx => {
            let shape = declared(entry.lookback.unwrap_or(config.lookback));
            (shape, load_onnx(path, shape))
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path, shape: InputShape) -> std::result::Result<Arc<dyn ScorableModel>, ModelError> {
    let model = super::onnx::OnnxModel::load(path, shape, true)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path, _shape: InputShape) -> std::result::Result<Arc<dyn ScorableModel>, ModelError> {
    Err(ModelError::Backend(format!(
        "{}: built without ONNX support",
        path.display()
    )))
}

/// Per-model checks that need both the weights and the registry's scalers.
fn check_contract(
    descriptor: &ModelDescriptor,
    model: Arc<dyn ScorableModel>,
    scalers: &HashMap<String, Arc<NormalizationParameters>>,
) -> std::result::Result<Arc<dyn ScorableModel>, ModelError> {
    let actual = model.input_shape();
    if actual != descriptor.input {
        return Err(ModelError::ShapeMismatch {
            expected: descriptor.input.dims(),
            actual: actual.dims(),
        });
    }
    let params = scalers.get(&descriptor.scaler).ok_or_else(|| {
        ModelError::CorruptArtifact(format!("unknown scaler set '{}'", descriptor.scaler))
    })?;
    if descriptor.input.layout == InputLayout::Multivariate && !params.has_features() {
        return Err(ModelError::CorruptArtifact(format!(
            "scaler set '{}' has no feature scalers for a multivariate model",
            descriptor.scaler
        )));
    }
    Ok(model)
}
