//! Schema validation gate.
//!
//! The engine treats schema validation as an opaque capability: anything
//! implementing [`SchemaValidator`] (including plain closures) may be
//! attached to a slice. Whatever the capability does to say "no" (an `Err`
//! or a panic) is folded into [`Validation::Rejected`].

use std::panic::{self, AssertUnwindSafe};

/// Validates a slice value.
pub trait SchemaValidator<T>: Send + Sync {
    /// Returns `Err(reason)` when `value` does not satisfy the schema.
    fn validate(&self, value: &T) -> Result<(), String>;
}

impl<T, F> SchemaValidator<T> for F
where
    F: Fn(&T) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<(), String> {
        self(value)
    }
}

/// Outcome of running a value through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Rejected(String),
}

impl Validation {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Runs `value` through `schema`. No schema means every value passes.
pub fn validate<T>(value: &T, schema: Option<&dyn SchemaValidator<T>>) -> Validation {
    let Some(schema) = schema else {
        return Validation::Ok;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| schema.validate(value))) {
        Ok(Ok(())) => Validation::Ok,
        Ok(Err(reason)) => Validation::Rejected(reason),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "schema validator panicked".to_string());
            Validation::Rejected(reason)
        }
    }
}
