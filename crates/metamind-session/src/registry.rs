//! The catalogue of training modules clients can start.

use std::collections::BTreeMap;
use std::fmt;

use metamind_protocol::{ModuleSummary, Snapshot};
use tracing::debug;

use crate::{ModuleError, SessionError, TrainingModule};

/// Builds a module from the client's `start_session` parameters.
pub type ModuleFactory = Box<
    dyn Fn(&Snapshot) -> Result<Box<dyn TrainingModule>, ModuleError>
        + Send
        + Sync,
>;

struct Entry {
    description: String,
    factory: ModuleFactory,
}

/// Maps module ids to factories.
///
/// Built once at startup and handed to the server.
///
/// ```rust
/// use std::time::Duration;
///
/// use metamind_protocol::Snapshot;
/// use metamind_session::{ModuleError, ModuleRegistry, TrainingModule};
///
/// struct Idle;
///
/// impl TrainingModule for Idle {
///     fn get_state(&self) -> Result<Snapshot, ModuleError> {
///         Ok(Snapshot::new())
///     }
///     fn update(&mut self, _dt: Duration) -> Result<(), ModuleError> {
///         Ok(())
///     }
/// }
///
/// let mut registry = ModuleRegistry::new();
/// registry.register("idle", "Does nothing", |_params| Ok(Box::new(Idle)));
///
/// assert!(registry.contains("idle"));
/// assert!(registry.create("idle", &Snapshot::new()).is_ok());
/// ```
#[derive(Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module. Registering an id twice replaces the first entry.
    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        factory: F,
    ) where
        F: Fn(&Snapshot) -> Result<Box<dyn TrainingModule>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        let id = id.into();
        debug!(module_id = %id, "training module registered");
        self.entries.insert(
            id,
            Entry {
                description: description.into(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every registered module, sorted by id.
    pub fn list(&self) -> Vec<ModuleSummary> {
        self.entries
            .iter()
            .map(|(id, entry)| ModuleSummary {
                id: id.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    /// Instantiates module `id` with `parameters`.
    ///
    /// # Errors
    /// [`SessionError::UnknownModule`] for an unregistered id,
    /// [`SessionError::Module`] if the factory rejects the parameters.
    pub fn create(
        &self,
        id: &str,
        parameters: &Snapshot,
    ) -> Result<Box<dyn TrainingModule>, SessionError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| SessionError::UnknownModule(id.to_owned()))?;
        Ok((entry.factory)(parameters)?)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
