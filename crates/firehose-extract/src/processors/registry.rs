use crate::processors::eos::{Actions, Headers, Transfers};
use firehose_extract_core::{BlockProcessor, Error, Result};
use std::{collections::BTreeMap, sync::Arc};

/// Processor used when none is named.
pub const DEFAULT_PROCESSOR: &str = Transfers::NAME;

/// Block processors available to a run, by name.
///
/// Processors are resolved once, before any network activity, so a bad name
/// or an incompatible processor stops the run before a stream is opened.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn BlockProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in EOSIO processors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn BlockProcessor>; 3] =
            [Arc::new(Transfers), Arc::new(Actions), Arc::new(Headers)];
        for processor in builtins {
            registry
                .processors
                .insert(processor.name().to_string(), processor);
        }
        registry
    }

    /// Adds `processor` under its own name.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the name is already taken.
    pub fn register(&mut self, processor: Arc<dyn BlockProcessor>) -> Result<()> {
        let name = processor.name().to_string();
        if self.processors.contains_key(&name) {
            return Err(Error::configuration(format!(
                "a block processor named `{name}` is already registered"
            )));
        }
        self.processors.insert(name, processor);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }

    /// Looks up `name` and checks that it decodes `block_type`.
    ///
    /// With `check_type` set, a processor that declares a different block
    /// type is rejected. A processor that declares none cannot be checked;
    /// a warning is logged and it is accepted.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an unknown name or a block type
    /// mismatch.
    pub fn resolve(
        &self,
        name: &str,
        block_type: &str,
        check_type: bool,
    ) -> Result<Arc<dyn BlockProcessor>> {
        let processor = self.processors.get(name).cloned().ok_or_else(|| {
            Error::configuration(format!(
                "unknown block processor `{name}` (available: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        if !check_type {
            return Ok(processor);
        }

        match processor.block_type() {
            None => {
                tracing::warn!(
                    "Could not check block type of processor `{name}` (it does not declare one)"
                );
            }
            Some(declared) if declared != block_type => {
                return Err(Error::configuration(format!(
                    "incompatible block processor `{name}`: decodes `{declared}` but the stream carries `{block_type}`"
                )));
            }
            Some(_) => {}
        }

        Ok(processor)
    }
}
