// src/transforms/registry.rs
//! Table of stage type name → factory.
//!
//! The table is assembled once at bootstrap by [`RegistryBuilder`] and is
//! immutable afterwards, so a [`Registry`] can be cloned into any number of
//! runners and looked up concurrently.

use super::options::{OptionDescriptor, TransformerConfig};
use super::{domain, mapping, rename, replace, DecodedOptions, Stage, Transformer};
use crate::error::ConstructionError;
use crate::record::{records_from_sample, Record};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

/// How to build one stage type.
#[derive(Clone, Copy)]
pub struct Factory {
    /// Position used unless the configuration moves the stage. The built
    /// instance's [`Transformer::stage`] is authoritative.
    pub default_stage: Stage,
    pub description: &'static str,
    pub sample_config: &'static str,
    pub options: fn() -> Vec<OptionDescriptor>,
    pub build: fn(&DecodedOptions) -> Result<Box<dyn Transformer>, ConstructionError>,
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("default_stage", &self.default_stage)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: IndexMap<String, Factory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage type. A name may only be registered once.
    pub fn register(
        mut self,
        type_name: &str,
        factory: Factory,
    ) -> Result<Self, ConstructionError> {
        if self.entries.contains_key(type_name) {
            return Err(ConstructionError::DuplicateRegistration(type_name.to_string()));
        }
        self.entries.insert(type_name.to_string(), factory);
        Ok(self)
    }

    pub fn with_builtins(self) -> Result<Self, ConstructionError> {
        self.register(domain::TYPE, domain::factory())?
            .register(mapping::TYPE, mapping::factory())?
            .register(rename::TYPE, rename::factory())?
            .register(replace::TYPE, replace::factory())
    }

    pub fn build(self) -> Registry {
        Registry {
            entries: Arc::new(self.entries),
        }
    }
}

/// Self-description of a registered stage type.
#[derive(Debug, Clone, Serialize)]
pub struct TransformerDescription {
    #[serde(rename = "type")]
    pub type_name: String,
    pub default_stage: Stage,
    pub description: &'static str,
    pub options: Vec<OptionDescriptor>,
    pub sample_config: &'static str,
}

#[derive(Debug, Clone)]
pub struct Registry {
    entries: Arc<IndexMap<String, Factory>>,
}

impl Registry {
    /// Registry holding every built-in stage type.
    pub fn builtin() -> Result<Self, ConstructionError> {
        Ok(RegistryBuilder::new().with_builtins()?.build())
    }

    pub fn lookup(&self, type_name: &str) -> Result<&Factory, ConstructionError> {
        self.entries
            .get(type_name)
            .ok_or_else(|| ConstructionError::NotRegistered(type_name.to_string()))
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Build a stage instance from its untyped configuration.
    pub fn build(
        &self,
        config: &TransformerConfig,
    ) -> Result<Box<dyn Transformer>, ConstructionError> {
        let type_name = config.type_name()?;
        let factory = self.lookup(type_name)?;
        let decoded = config.decode(type_name, &(factory.options)())?;
        (factory.build)(&decoded)
    }

    /// Build a stage and, if the configuration carries a `sampleLog`, run it
    /// once over the sample on a throw-away instance. Any per-record failure
    /// on the sample rejects the configuration.
    ///
    /// Returns the fresh instance together with the transformed sample.
    pub fn build_validated(
        &self,
        config: &TransformerConfig,
    ) -> Result<(Box<dyn Transformer>, Vec<Record>), ConstructionError> {
        let stage = self.build(config)?;
        let Some(sample) = config.sample_log() else {
            return Ok((stage, Vec::new()));
        };

        let type_name = stage.type_name();
        let rejected = |message: String| ConstructionError::SampleRejected {
            stage: type_name.to_string(),
            message,
        };

        let mut records = records_from_sample(&sample).map_err(rejected)?;
        let mut trial = self.build(config)?;
        trial
            .transform(&mut records)
            .map_err(|e| rejected(e.to_string()))?;

        Ok((stage, records))
    }

    pub fn describe(&self) -> Vec<TransformerDescription> {
        self.entries
            .iter()
            .map(|(name, factory)| TransformerDescription {
                type_name: name.clone(),
                default_stage: factory.default_stage,
                description: factory.description,
                options: (factory.options)(),
                sample_config: factory.sample_config,
            })
            .collect()
    }
}
