//! Kernel API errors.
//!
//! These cover misuse of the kernel surface itself. Failures raised by module
//! hooks never surface here: they are contained by the kernel and reported
//! through the module-error path instead.

use thiserror::Error;

use crate::ModuleId;

#[derive(Debug, Error)]
pub enum KernelError {
    /// Module ids are global; a second registration is rejected untouched.
    #[error("module already registered: {0}")]
    DuplicateModule(ModuleId),

    #[error("module not found: {0}")]
    ModuleNotFound(ModuleId),

    /// The module is currently executing one of its own hooks.
    #[error("module is busy inside a hook: {0}")]
    ModuleBusy(ModuleId),

    /// A state key could not be read or written as the requested type.
    #[error("state key '{key}' has an unexpected shape")]
    StateShape {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl KernelError {
    pub(crate) fn shape(key: &str, source: serde_json::Error) -> Self {
        Self::StateShape {
            key: key.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_module() {
        let err = KernelError::DuplicateModule(ModuleId::from("power"));
        assert_eq!(err.to_string(), "module already registered: power");
        let err = KernelError::ModuleNotFound(ModuleId::from("nav"));
        assert!(err.to_string().contains("nav"));
    }

    #[test]
    fn shape_error_keeps_source() {
        let source = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = KernelError::shape("systems", source);
        assert!(err.to_string().contains("systems"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
