//! Template descriptors and where they come from.

use crate::config::Tier;
use crate::error::CertBatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A registered certificate template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub id: u64,
    pub name: String,
    /// Which uploads a batch for this template needs.
    #[serde(default)]
    pub tier: Tier,
    /// Layout definition consumed by the renderer.
    pub definition_path: PathBuf,
    /// Images shipped with this template (background, borders, seals).
    #[serde(default)]
    pub static_image_dir: Option<PathBuf>,
}

/// Read access to templates by id.
pub trait TemplateRepository: Send + Sync {
    fn get(&self, id: u64) -> Option<TemplateDescriptor>;
}

/// Templates held in a map, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTemplateRepository {
    templates: HashMap<u64, TemplateDescriptor>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: TemplateDescriptor) {
        self.templates.insert(template.id, template);
    }

    pub fn with(mut self, template: TemplateDescriptor) -> Self {
        self.insert(template);
        self
    }
}

impl TemplateRepository for InMemoryTemplateRepository {
    fn get(&self, id: u64) -> Option<TemplateDescriptor> {
        self.templates.get(&id).cloned()
    }
}

/// Templates listed in a JSON file (an array of [`TemplateDescriptor`]).
///
/// Relative `definition_path` and `static_image_dir` entries resolve against
/// the catalog's own directory.
#[derive(Debug, Clone)]
pub struct JsonTemplateCatalog {
    inner: InMemoryTemplateRepository,
}

impl JsonTemplateCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CertBatchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CertBatchError::InvalidConfig(format!(
                "Cannot read template catalog '{}': {}",
                path.display(),
                e
            ))
        })?;
        let entries: Vec<TemplateDescriptor> = serde_json::from_str(&raw).map_err(|e| {
            CertBatchError::InvalidConfig(format!(
                "Template catalog '{}' is not valid: {}",
                path.display(),
                e
            ))
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut inner = InMemoryTemplateRepository::new();
        for mut t in entries {
            t.definition_path = resolve(base, &t.definition_path);
            t.static_image_dir = t.static_image_dir.map(|d| resolve(base, &d));
            debug!("Catalog template {} '{}' (tier {})", t.id, t.name, t.tier);
            inner.insert(t);
        }
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.templates.is_empty()
    }
}

impl TemplateRepository for JsonTemplateCatalog {
    fn get(&self, id: u64) -> Option<TemplateDescriptor> {
        self.inner.get(id)
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
