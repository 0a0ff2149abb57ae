//! Outbound commands and inbound UI actions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Instruction sent to the worker as one JSON object per line.
///
/// Field order follows insertion order on the wire, though the worker must
/// not rely on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Command {
    fields: Map<String, Value>,
}

impl Command {
    /// Create an empty command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field, returning the updated command.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Parse a command from a JSON object line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Decode` if `raw` is not a JSON object.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(AppError::Decode(format!(
                "command must be a JSON object, got {other}"
            ))),
        }
    }

    /// Look up a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrow all fields.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl From<Map<String, Value>> for Command {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// A dispatched application action, as produced by the UI layer.
///
/// Actions are routed to command builders by their `type` string through
/// an [`ActionRouter`](crate::dispatch::ActionRouter).
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Action type, e.g. `interpreter-start`.
    pub action_type: String,
    /// Remaining named fields.
    pub fields: Map<String, Value>,
}

impl Action {
    /// Create an action with no fields.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            fields: Map::new(),
        }
    }

    /// Add or replace a field, returning the updated action.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Split a `type`-tagged command into an action.
    ///
    /// Returns `None` when the command has no string `type` field.
    #[must_use]
    pub fn from_command(command: &Command) -> Option<Self> {
        let action_type = command.get("type")?.as_str()?.to_owned();
        let fields = command
            .fields()
            .iter()
            .filter(|(name, _)| name.as_str() != "type")
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Some(Self {
            action_type,
            fields,
        })
    }
}
