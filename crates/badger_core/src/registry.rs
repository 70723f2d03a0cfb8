//! Game name to provisioner lookup.
//!
//! The registry is filled once at startup from a fixed list of games and
//! then shared read-only. Every lookup builds a fresh provisioner instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::provisioner::Provisioner;

/// Builds a provisioner instance.
pub type ProvisionerFactory = Arc<dyn Fn() -> Box<dyn Provisioner> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ProvisionerRegistry {
    factories: HashMap<String, ProvisionerFactory>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `game_name` (case-insensitive). A later
    /// registration for the same name replaces the earlier one.
    pub fn register<F>(&mut self, game_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Provisioner> + Send + Sync + 'static,
    {
        let key = game_name.to_lowercase();
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            warn!("Replacing provisioner registered for game: {}", key);
        } else {
            info!("Registered provisioner for game: {}", key);
        }
    }

    /// A new provisioner for `game_name`, or `None` if the game is not served.
    pub fn get(&self, game_name: &str) -> Option<Box<dyn Provisioner>> {
        let key = game_name.to_lowercase();
        match self.factories.get(&key) {
            Some(factory) => Some(factory()),
            None => {
                debug!("No provisioner found for game: {}", key);
                None
            }
        }
    }

    pub fn contains(&self, game_name: &str) -> bool {
        self.factories.contains_key(&game_name.to_lowercase())
    }

    /// Registered game names, sorted.
    pub fn games(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ProvisionerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerRegistry")
            .field("games", &self.games())
            .finish()
    }
}
