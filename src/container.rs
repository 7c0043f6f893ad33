//! Registry of loaded configuration models, one per architecture.
//!
//! The registry is an explicit value handed to the analyzer; it is populated
//! once at startup and only read afterwards, so concurrent queries need no
//! extra locking beyond the map itself.

use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use regex::Regex;

use crate::cnf_model::CnfModel;
use crate::model::{ConfigurationModel, ModelError};
use crate::rsf_model::RsfModel;

pub struct ModelRegistry {
    models: DashMap<String, Arc<dyn ConfigurationModel>>,
    main_model: Mutex<Option<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
            main_model: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Architectures with a loaded model, sorted for deterministic
    /// crosschecking.
    pub fn archs(&self) -> Vec<String> {
        let mut archs: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        archs.sort();
        archs
    }

    pub fn register(&self, arch: &str, model: Arc<dyn ConfigurationModel>) {
        self.models.insert(arch.to_string(), model);
    }

    pub fn lookup(&self, arch: &str) -> Option<Arc<dyn ConfigurationModel>> {
        self.models.get(arch).map(|e| e.value().clone())
    }

    /// The primary model used for first-pass classification.
    pub fn lookup_main(&self) -> Option<Arc<dyn ConfigurationModel>> {
        let name = self.main_model.lock().unwrap().clone()?;
        self.lookup(&name)
    }

    pub fn main_model(&self) -> Option<String> {
        self.main_model.lock().unwrap().clone()
    }

    pub fn set_main_model(&self, arch: &str) {
        if self.lookup(arch).is_none() {
            log::error!(
                "cannot use {} as primary model, no such model is loaded",
                arch
            );
            return;
        }
        log::info!("using {} as primary model", arch);
        *self.main_model.lock().unwrap() = Some(arch.to_string());
    }

    /// Load a single model file (`.cnf` is the precompiled encoding,
    /// anything else reads as RSF) and register it under the given arch.
    pub fn register_model_file(
        &self,
        path: &Path,
        arch: &str,
    ) -> Result<Arc<dyn ConfigurationModel>, ModelError> {
        if let Some(existing) = self.lookup(arch) {
            log::info!("a model for {} was already loaded", arch);
            return Ok(existing);
        }
        let model: Arc<dyn ConfigurationModel> =
            if path.extension().and_then(|e| e.to_str()) == Some("cnf") {
                Arc::new(CnfModel::from_file(path)?)
            } else {
                Arc::new(RsfModel::from_file(path)?)
            };
        self.register(arch, model.clone());
        Ok(model)
    }

    /// Load a model file, or every `<arch>.model` / `<arch>.cnf` in a
    /// directory. Returns the last model loaded; the caller usually makes it
    /// primary.
    pub fn load_models(&self, path: &Path) -> Result<Arc<dyn ConfigurationModel>, ModelError> {
        if !path.exists() {
            return Err(ModelError::Missing(path.display().to_string()));
        }
        if !path.is_dir() {
            let arch = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            return self.register_model_file(path, &arch);
        }

        let pattern = Regex::new(r"^([-[:alnum:]]+)\.(model|cnf)$").expect("model regex compiles");
        let mut filenames: Vec<String> = std::fs::read_dir(path)
            .map_err(ModelError::Io)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        filenames.sort();

        let mut found = None;
        for filename in filenames {
            let Some(caps) = pattern.captures(&filename) else {
                continue;
            };
            let arch = caps[1].to_string();
            if self.models.contains_key(&arch) {
                continue;
            }
            let model = self.register_model_file(&path.join(&filename), &arch)?;
            found = Some(model);
        }
        match found {
            Some(model) => {
                log::info!("found {} models", self.len());
                Ok(model)
            }
            None => Err(ModelError::NoModels(path.display().to_string())),
        }
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
