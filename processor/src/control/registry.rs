//! Explicit command registration: name → (handler, description).
//!
//! Optional callbacks make it unclear which commands a service actually
//! supports; registration is explicit and introspectable instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' already registered")]
    Duplicate(String),

    #[error("unknown command '{command}'; available: {}", .available.join(", "))]
    Unknown {
        command: String,
        available: Vec<String>,
    },

    #[error("command '{command}' failed: {source}")]
    Failed {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}

type Handler = Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

struct RegisteredCommand {
    handler: Handler,
    description: String,
}

/// Name → handler table. Writes take the lock; execution reads a snapshot
/// and runs the handler outside it.
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Command names are normalized to lowercase.
    pub fn register<F>(
        &self,
        command: &str,
        description: &str,
        handler: F,
    ) -> Result<(), CommandError>
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let command = command.to_lowercase();
        let mut commands = self.commands.write();
        if commands.contains_key(&command) {
            return Err(CommandError::Duplicate(command));
        }
        commands.insert(
            command,
            RegisteredCommand {
                handler: Arc::new(handler),
                description: description.to_string(),
            },
        );
        Ok(())
    }

    /// Execute a registered command with its full JSON payload.
    pub fn execute(&self, command: &str, payload: &serde_json::Value) -> Result<(), CommandError> {
        let command = command.to_lowercase();
        let handler = {
            let commands = self.commands.read();
            match commands.get(&command) {
                Some(registered) => registered.handler.clone(),
                None => {
                    return Err(CommandError::Unknown {
                        command,
                        available: Self::sorted_names(&commands),
                    });
                }
            }
        };
        handler(payload).map_err(|source| CommandError::Failed { command, source })
    }

    pub fn has(&self, command: &str) -> bool {
        self.commands.read().contains_key(&command.to_lowercase())
    }

    /// Sorted list of registered command names.
    pub fn names(&self) -> Vec<String> {
        Self::sorted_names(&self.commands.read())
    }

    /// Command name → description.
    pub fn help(&self) -> BTreeMap<String, String> {
        self.commands
            .read()
            .iter()
            .map(|(name, registered)| (name.clone(), registered.description.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.commands.read().len()
    }

    fn sorted_names(commands: &HashMap<String, RegisteredCommand>) -> Vec<String> {
        let mut names: Vec<String> = commands.keys().cloned().collect();
        names.sort();
        names
    }
}
