//! Warning aggregation
//!
//! Best-effort sub-operations record their failures here instead of
//! aborting the convergence. Scoped to a single convergence call.

use std::fmt;
use tracing::warn;

use driftless_common::Error;

/// A recoverable failure of one sub-operation
#[derive(Debug)]
pub struct Warning {
    pub operation: String,
    pub error: Error,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.error)
    }
}

/// Append-only list of warnings
#[derive(Debug, Default)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: impl Into<String>, error: Error) {
        let operation = operation.into();
        warn!("{} failed, continuing: {}", operation, error);
        self.items.push(Warning { operation, error });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.items.iter()
    }

    pub fn operations(&self) -> Vec<&str> {
        self.items.iter().map(|w| w.operation.as_str()).collect()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.items
    }

    /// All warnings as one combined message, or `None` when there are none.
    pub fn diagnostic(&self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.to_string())
    }
}

impl fmt::Display for Warnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operation(s) failed", self.items.len())?;
        for warning in &self.items {
            write!(f, "\n  - {}", warning)?;
        }
        Ok(())
    }
}

/// Result of a successful convergence
#[derive(Debug)]
pub struct Converged<T> {
    pub value: T,
    pub warnings: Warnings,
}

impl<T> Converged<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Warnings::new(),
        }
    }

    /// Converged without any failed sub-operation.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn diagnostic(&self) -> Option<String> {
        self.warnings.diagnostic()
    }
}
