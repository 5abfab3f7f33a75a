// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler errors.
//!
//! Every failure, whether raised by a routine, by a forced exit, or by an
//! external completion, travels as one of these through `Outcome`.

use std::any::Any;

use thiserror::Error;

/// A failure carried through the outcome register.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Raised by routine logic or by an external completion.
    #[error("{0}")]
    Raised(String),

    /// A routine panicked while being advanced.
    #[error("routine panicked: {0}")]
    Panicked(String),

    /// A value was read back as the wrong type.
    #[error("expected a value of type `{expected}`, found `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// `evaluate` was called from inside an active reduction.
    #[error("scheduler is already reducing; use `Reenter` to inject work")]
    Reentrant,

    /// The settling side of a completion was dropped before settling.
    #[error("completion was abandoned before it settled")]
    Abandoned,
}

impl Error {
    /// Shorthand for an operation failure with the given message.
    pub fn raised(msg: impl Into<String>) -> Self {
        Error::Raised(msg.into())
    }
}

/// Render a `catch_unwind` payload as a message.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_displays_message() {
        assert_eq!(Error::raised("boom").to_string(), "boom");
    }

    #[test]
    fn panic_payloads_render() {
        let caught = std::panic::catch_unwind(|| panic!("static boom")).unwrap_err();
        assert_eq!(panic_message(caught), "static boom");

        let caught = std::panic::catch_unwind(|| panic!("{} boom", "formatted")).unwrap_err();
        assert_eq!(panic_message(caught), "formatted boom");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(caught), "unknown panic");
    }
}
