// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Outcome register.
//!
//! The value fed into the next resumption step. A failure stored here is
//! re-raised inside the resuming routine rather than dropped.

use crate::error::Error;
use crate::value::Value;

/// Success value or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T = Value> {
    Success(T),
    Failure(Error),
}

impl<T> Outcome<T> {
    pub fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    pub fn failure(error: Error) -> Self {
        Outcome::Failure(error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Return the value or re-raise the failure.
    pub fn unbox(self) -> Result<T, Error> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(error) => Outcome::Failure(error),
        }
    }
}

impl Outcome<Value> {
    /// Success with no value.
    pub fn unit() -> Self {
        Outcome::Success(Value::unit())
    }

    /// Wrap a concrete value.
    pub fn of<T: 'static>(value: T) -> Self {
        Outcome::Success(Value::new(value))
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error),
        }
    }
}
