// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Register payloads.
//!
//! Routines of different result types share one register, so values are
//! type-erased and read back with a checked downcast.

use std::any::{type_name, Any};
use std::fmt;
use std::rc::Rc;

use crate::error::Error;

/// A type-erased, cheaply clonable value.
#[derive(Clone)]
pub struct Value {
    inner: Rc<dyn Any>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            inner: Rc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// The "no value" payload.
    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn is_unit(&self) -> bool {
        self.inner.is::<()>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clone the payload out as `T`.
    pub fn cloned<T: Any + Clone>(&self) -> Result<T, Error> {
        self.get::<T>().cloned().ok_or(Error::TypeMismatch {
            expected: type_name::<T>(),
            found: self.type_name,
        })
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_the_stored_type() {
        let v = Value::new(42i32);
        assert_eq!(v.cloned::<i32>(), Ok(42));
        assert_eq!(v.get::<i32>(), Some(&42));
        assert!(!v.is_unit());
    }

    #[test]
    fn wrong_type_is_a_mismatch() {
        let v = Value::new("text".to_string());
        match v.cloned::<i32>() {
            Err(Error::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "i32");
                assert_eq!(found, "alloc::string::String");
            }
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn unit_is_the_default() {
        assert!(Value::default().is_unit());
        assert_eq!(format!("{:?}", Value::unit()), "Value<()>");
    }
}
