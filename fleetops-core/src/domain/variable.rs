//! Declared variables
//!
//! A variable's effective value is `value` when set, otherwise `default`.
//! Variables are copied into each run, never shared with the definition.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a variable failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("please set variable: {name}")]
    Required { name: String },

    #[error("variable {name}: value '{value}' is not one of {enums:?}")]
    NotInEnums {
        name: String,
        value: String,
        enums: Vec<String>,
    },

    #[error("variable {name}: value '{value}' does not match '{pattern}'")]
    RegexMismatch {
        name: String,
        value: String,
        pattern: String,
    },

    #[error("variable {name}: invalid regex '{pattern}'")]
    InvalidRegex { name: String, pattern: String },
}

/// A declared variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variable {
    pub default: String,
    pub display: String,
    pub value: String,
    pub desc: String,
    pub regex: String,
    pub required: bool,
    pub enums: Vec<String>,
    pub examples: Vec<String>,
}

impl Variable {
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            ..Default::default()
        }
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// `value` if non-empty, else `default`
    pub fn effective_value(&self) -> &str {
        if self.value.is_empty() {
            &self.default
        } else {
            &self.value
        }
    }

    /// Fills only the fields that are still empty on `self`
    pub fn merge_low_priority(&mut self, other: &Variable) {
        fill(&mut self.default, &other.default);
        fill(&mut self.display, &other.display);
        fill(&mut self.value, &other.value);
        fill(&mut self.desc, &other.desc);
        fill(&mut self.regex, &other.regex);
        if !self.required {
            self.required = other.required;
        }
        if self.enums.is_empty() {
            self.enums = other.enums.clone();
        }
        if self.examples.is_empty() {
            self.examples = other.examples.clone();
        }
    }

    /// Overwrites every field `other` sets
    pub fn merge_high_priority(&mut self, other: &Variable) {
        overwrite(&mut self.default, &other.default);
        overwrite(&mut self.display, &other.display);
        overwrite(&mut self.value, &other.value);
        overwrite(&mut self.desc, &other.desc);
        overwrite(&mut self.regex, &other.regex);
        if other.required {
            self.required = true;
        }
        if !other.enums.is_empty() {
            self.enums = other.enums.clone();
        }
        if !other.examples.is_empty() {
            self.examples = other.examples.clone();
        }
    }

    /// Checks required/enum/regex constraints against the effective value
    ///
    /// An unparsable regex is a failure.
    pub fn check(&self, name: &str) -> Result<(), VariableError> {
        let value = self.effective_value();

        if self.required && value.is_empty() {
            return Err(VariableError::Required {
                name: name.to_string(),
            });
        }

        if !self.enums.is_empty() && !self.enums.iter().any(|e| e == value) {
            return Err(VariableError::NotInEnums {
                name: name.to_string(),
                value: value.to_string(),
                enums: self.enums.clone(),
            });
        }

        if !self.regex.is_empty() {
            let re = Regex::new(&self.regex).map_err(|_| VariableError::InvalidRegex {
                name: name.to_string(),
                pattern: self.regex.clone(),
            })?;
            if !re.is_match(value) {
                return Err(VariableError::RegexMismatch {
                    name: name.to_string(),
                    value: value.to_string(),
                    pattern: self.regex.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> bool {
        self.check("").is_ok()
    }
}

fn fill(target: &mut String, other: &str) {
    if target.is_empty() && !other.is_empty() {
        *target = other.to_string();
    }
}

fn overwrite(target: &mut String, other: &str) {
    if !other.is_empty() {
        *target = other.to_string();
    }
}

/// Named variables declared by a Task or Pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(pub BTreeMap<String, Variable>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, variable: Variable) {
        self.0.insert(name.into(), variable);
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.0.iter()
    }

    /// Effective values of every declared variable
    pub fn effective_values(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.effective_value().to_string()))
            .collect()
    }

    /// Low-priority merge for keys declared on both sides
    pub fn merge_low_priority(&mut self, other: &Variables) {
        for (name, var) in self.0.iter_mut() {
            if let Some(o) = other.0.get(name) {
                var.merge_low_priority(o);
            }
        }
    }

    /// High-priority merge for keys declared on both sides
    pub fn merge_high_priority(&mut self, other: &Variables) {
        for (name, var) in self.0.iter_mut() {
            if let Some(o) = other.0.get(name) {
                var.merge_high_priority(o);
            }
        }
    }

    /// Caller-supplied `values` win over the declared ones
    ///
    /// Empty values and names that are not declared are ignored.
    pub fn apply_values(&mut self, values: &BTreeMap<String, String>) {
        let supplied: Variables = values
            .iter()
            .map(|(name, value)| (name.clone(), Variable::with_value(value.clone())))
            .collect();
        self.merge_high_priority(&supplied);
    }

    /// Checks every variable, returning the first failure in name order
    pub fn check(&self) -> Result<(), VariableError> {
        self.0.iter().try_for_each(|(name, var)| var.check(name))
    }
}

impl FromIterator<(String, Variable)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Variable)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
