//! Profiler descriptor and typed parameter accessors.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Value type declared for a profiler parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Signed 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// `true` / `false`.
    Boolean,
    /// Free-form text.
    #[default]
    String,
}

/// A single key/value setting passed to the agent at startup.
///
/// The value is always stored as text; typed accessors parse it on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProfilerParameter {
    /// Lookup key understood by the agent.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Longer description for UIs.
    #[serde(default)]
    pub description: String,
    /// Declared value type.
    #[serde(default, rename = "type")]
    pub kind: ParameterKind,
    /// Raw textual value.
    pub value: String,
}

impl ProfilerParameter {
    /// Construct a parameter with an explicit type and raw value.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: ParameterKind, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            description: String::new(),
            kind,
            value: value.into(),
        }
    }

    /// Parse the value as an `i32`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParameter` if the value is not an integer.
    pub fn value_i32(&self) -> Result<i32> {
        self.value.trim().parse().map_err(|_| self.conversion_error("i32"))
    }

    /// Parse the value as an `f32`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParameter` if the value is not a number.
    pub fn value_f32(&self) -> Result<f32> {
        self.value.trim().parse().map_err(|_| self.conversion_error("f32"))
    }

    /// Parse the value as a boolean, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParameter` unless the value is `true` or `false`.
    pub fn value_bool(&self) -> Result<bool> {
        self.value
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| self.conversion_error("bool"))
    }

    /// Store an integer value.
    pub fn set_i32(&mut self, value: i32) {
        self.value = value.to_string();
    }

    /// Store a float value.
    pub fn set_f32(&mut self, value: f32) {
        self.value = value.to_string();
    }

    /// Store a boolean value.
    pub fn set_bool(&mut self, value: bool) {
        self.value = value.to_string();
    }

    /// Replace the raw value after checking it against the declared type.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidParameter` if `raw` does not parse as the
    /// parameter's declared kind. The stored value is left untouched.
    pub fn set_raw(&mut self, raw: &str) -> Result<()> {
        let candidate = Self {
            value: raw.to_owned(),
            ..self.clone()
        };
        match self.kind {
            ParameterKind::Int => candidate.value_i32().map(|_| ())?,
            ParameterKind::Float => candidate.value_f32().map(|_| ())?,
            ParameterKind::Boolean => candidate.value_bool().map(|_| ())?,
            ParameterKind::String => {}
        }
        self.value = candidate.value;
        Ok(())
    }

    fn conversion_error(&self, target: &str) -> AppError {
        AppError::InvalidParameter(format!(
            "'{}' value '{}' does not convert to {target}",
            self.key, self.value
        ))
    }
}

/// Identity and settings of one profiler implemented by the agent.
///
/// The identity fields are fixed once constructed; only parameter values
/// change, and only before the profiler is attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProfilerDescriptor {
    /// Class identifier the agent registers the profiler under.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Longer description for UIs.
    #[serde(default)]
    pub description: String,
    /// Whether the profiler is offered outside development builds.
    #[serde(default)]
    pub is_released: bool,
    /// Ordered parameters.
    #[serde(default)]
    pub parameters: Vec<ProfilerParameter>,
}

impl ProfilerDescriptor {
    /// Construct a descriptor with no parameters.
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            is_released: true,
            parameters: Vec::new(),
        }
    }

    /// Look up a parameter by key.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&ProfilerParameter> {
        self.parameters.iter().find(|p| p.key == key)
    }

    /// Look up a parameter by key for modification.
    pub fn parameter_mut(&mut self, key: &str) -> Option<&mut ProfilerParameter> {
        self.parameters.iter_mut().find(|p| p.key == key)
    }

    /// Set the value of an existing parameter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown key and
    /// `AppError::InvalidParameter` if the value does not match its type.
    pub fn set_parameter(&mut self, key: &str, raw: &str) -> Result<()> {
        let id = self.id;
        self.parameter_mut(key)
            .ok_or_else(|| AppError::NotFound(format!("profiler {id} has no parameter '{key}'")))?
            .set_raw(raw)
    }
}
