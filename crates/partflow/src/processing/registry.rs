//! Dispatch table from (value type, intent) to command processor.

use std::collections::HashMap;
use std::fmt;

use super::CommandProcessor;
use crate::error::{Error, Result};
use crate::record::{Intent, ValueType};

/// Immutable mapping of command kinds to their processors.
///
/// An [`Intent`] is scoped to exactly one [`ValueType`], so the intent alone
/// identifies an entry.
pub struct ProcessorRegistry {
    processors: HashMap<Intent, Box<dyn CommandProcessor>>,
}

impl ProcessorRegistry {
    pub fn builder() -> ProcessorRegistryBuilder {
        ProcessorRegistryBuilder::default()
    }

    pub fn lookup(&self, value_type: ValueType, intent: Intent) -> Option<&dyn CommandProcessor> {
        if intent.value_type() != value_type {
            return None;
        }
        self.processors.get(&intent).map(|processor| processor.as_ref())
    }

    pub fn contains(&self, value_type: ValueType, intent: Intent) -> bool {
        self.lookup(value_type, intent).is_some()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut intents: Vec<_> = self.processors.keys().collect();
        intents.sort();
        f.debug_struct("ProcessorRegistry")
            .field("intents", &intents)
            .finish()
    }
}

/// Builder for a [`ProcessorRegistry`].
///
/// Registration mistakes are remembered and reported by [`build`](Self::build).
#[derive(Default)]
pub struct ProcessorRegistryBuilder {
    processors: HashMap<Intent, Box<dyn CommandProcessor>>,
    error: Option<Error>,
}

impl ProcessorRegistryBuilder {
    /// Register `processor` for commands of `value_type` with `intent`.
    pub fn register(
        mut self,
        value_type: ValueType,
        intent: impl Into<Intent>,
        processor: impl CommandProcessor,
    ) -> Self {
        let intent = intent.into();
        if self.error.is_some() {
            return self;
        }
        if intent.value_type() != value_type {
            self.error = Some(Error::IntentMismatch { value_type, intent });
            return self;
        }
        if self.processors.contains_key(&intent) {
            self.error = Some(Error::DuplicateProcessor { value_type, intent });
            return self;
        }
        self.processors.insert(intent, Box::new(processor));
        self
    }

    pub fn build(self) -> Result<ProcessorRegistry> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(ProcessorRegistry {
            processors: self.processors,
        })
    }
}
