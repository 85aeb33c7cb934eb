//! Core value types and fault taxonomy for the Hamba stack machine.
//!
//! This crate provides the foundational types shared by the bytecode
//! engine and its collaborators.
//!
//! # Overview
//!
//! - [`Value`] - Runtime value held on the operand stack and in variable slots
//! - [`FaultKind`] - Terminal failure categories of an execution
//!
//! # Examples
//!
//! ```
//! use core_types::{FaultKind, Value};
//!
//! let sum = Value::Int(5);
//! assert!(sum.is_truthy());
//! assert_eq!(sum.to_string(), "5");
//!
//! assert!(FaultKind::ForcedTermination.is_scripted());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod value;

pub use error::FaultKind;
pub use value::Value;
