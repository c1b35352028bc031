//! Single-key typed views.

use super::{Binding, Container};
use crate::error::KbResult;
use crate::knowledge::{KnowledgeBase, UpdateSettings};
use crate::record::Record;

macro_rules! scalar_common {
    ($ty:ident, $label:literal) => {
        impl $ty {
            /// Bind to the key `name`.
            ///
            /// # Errors
            ///
            /// Returns a validation error for a bad name.
            pub fn new(kb: &KnowledgeBase, name: &str) -> KbResult<Self> {
                Ok(Self {
                    binding: Binding::bind(kb, name, UpdateSettings::default())?,
                })
            }

            /// Rebind to another store or key.
            ///
            /// # Errors
            ///
            /// Returns a validation error for a bad name.
            pub fn set_name(&mut self, kb: &KnowledgeBase, name: &str) -> KbResult<()> {
                self.binding = Binding::bind(kb, name, *self.binding.settings())?;
                Ok(())
            }

            /// Write policy for updates.
            pub fn set_settings(&mut self, settings: UpdateSettings) {
                self.binding.set_settings(settings);
            }

            /// The stored record, uninitialized if absent.
            ///
            /// # Errors
            ///
            /// Returns an execution error if the view has no live store.
            pub fn to_record(&self) -> KbResult<Record> {
                self.binding.access(|vars| Ok(vars.get(self.binding.name())))
            }

            /// True if the key holds a value.
            ///
            /// # Errors
            ///
            /// Returns an execution error if the view has no live store.
            pub fn exists(&self) -> KbResult<bool> {
                Ok(self.to_record()?.exists())
            }
        }

        impl Container for $ty {
            fn name(&self) -> &str {
                self.binding.name()
            }

            fn modify(&self) -> KbResult<()> {
                self.binding.access(|vars| {
                    vars.mark_modified(self.binding.name());
                    Ok(())
                })
            }

            fn is_true(&self) -> KbResult<bool> {
                Ok(self.to_record()?.is_true())
            }

            fn debug_info(&self) -> KbResult<String> {
                Ok(format!(
                    "{} {} = {}",
                    $label,
                    self.binding.name(),
                    self.to_record()?.to_string_value()
                ))
            }

            fn ensure_bound(&self) -> KbResult<()> {
                self.binding.store().map(|_| ())
            }
        }
    };
}

/// Integer view of one key.
#[derive(Debug, Clone)]
pub struct Integer {
    binding: Binding,
}

scalar_common!(Integer, "Integer");

impl Integer {
    /// Current value, 0 if absent.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn get(&self) -> KbResult<i64> {
        Ok(self.to_record()?.to_integer())
    }

    /// Overwrite the value.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn set(&self, value: i64) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.set_with(self.binding.name(), value, self.binding.settings())?;
            Ok(())
        })
    }

    /// Add `delta` and return the result.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn inc_by(&self, delta: i64) -> KbResult<i64> {
        self.binding
            .access(|vars| vars.inc(self.binding.name(), delta, self.binding.settings()))
    }

    /// Add one and return the result.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn inc(&self) -> KbResult<i64> {
        self.inc_by(1)
    }

    /// Subtract one and return the result.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn dec(&self) -> KbResult<i64> {
        self.inc_by(-1)
    }
}

/// Double view of one key.
#[derive(Debug, Clone)]
pub struct Double {
    binding: Binding,
}

scalar_common!(Double, "Double");

impl Double {
    /// Current value, 0.0 if absent.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn get(&self) -> KbResult<f64> {
        Ok(self.to_record()?.to_double())
    }

    /// Overwrite the value.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn set(&self, value: f64) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.set_with(self.binding.name(), value, self.binding.settings())?;
            Ok(())
        })
    }
}

/// String view of one key.
#[derive(Debug, Clone)]
pub struct Text {
    binding: Binding,
}

scalar_common!(Text, "Text");

impl Text {
    /// Current value, empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn get(&self) -> KbResult<String> {
        Ok(self.to_record()?.to_string_value())
    }

    /// Overwrite the value.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the view has no live store.
    pub fn set(&self, value: impl Into<String>) -> KbResult<()> {
        let value = value.into();
        self.binding.access(|vars| {
            vars.set_with(self.binding.name(), value, self.binding.settings())?;
            Ok(())
        })
    }
}
