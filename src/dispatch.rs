//! Action routing.
//!
//! The UI layer dispatches typed actions; some of them must reach the
//! worker as commands. [`ActionRouter`] is the explicit table from action
//! type to command builder, handed to the supervisor at construction.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use serde_json::Value;

use crate::models::command::{Action, Command};
use crate::{AppError, Result};

/// Builds the command for an action; `None` means "handled, nothing to send".
pub type ActionHandler = Box<dyn Fn(&Action) -> Option<Command> + Send + Sync>;

/// Outcome of routing one action.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// No handler is registered for the action type.
    Unhandled,
    /// A handler ran and produced this command, if any.
    Handled(Option<Command>),
}

/// Table of action handlers keyed by action type.
#[derive(Default)]
pub struct ActionRouter {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router that forwards each listed action type verbatim.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a type is listed twice.
    pub fn forwarding<I, S>(action_types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut router = Self::new();
        for action_type in action_types {
            router.register(action_type, |action| Some(forward_fields(action)))?;
        }
        Ok(router)
    }

    /// Register `handler` for `action_type`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a handler is already registered for
    /// `action_type`.
    pub fn register<F>(&mut self, action_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&Action) -> Option<Command> + Send + Sync + 'static,
    {
        let action_type = action_type.into();
        if self.handlers.contains_key(&action_type) {
            return Err(AppError::Config(format!(
                "attempt to register existing action handler `{action_type}`"
            )));
        }
        self.handlers.insert(action_type, Box::new(handler));
        Ok(())
    }

    /// Whether a handler exists for `action_type`.
    #[must_use]
    pub fn handles(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Run the handler registered for `action`, if any.
    #[must_use]
    pub fn route(&self, action: &Action) -> Routed {
        self.handlers
            .get(&action.action_type)
            .map_or(Routed::Unhandled, |handler| Routed::Handled(handler(action)))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Debug for ActionRouter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ActionRouter")
            .field("action_types", &types)
            .finish()
    }
}

/// The action's fields plus its `type`, as a command.
#[must_use]
pub fn forward_fields(action: &Action) -> Command {
    action
        .fields
        .iter()
        .fold(
            Command::new().with_field("type", Value::String(action.action_type.clone())),
            |command, (name, value)| command.with_field(name.clone(), value.clone()),
        )
}
