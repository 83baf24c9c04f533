//! Filter trees and their translation into the native query DSL.
//!
//! - [`FilterBuilder`] - backend-neutral boolean filter tree
//! - [`QueryTranslator`] - rewrites generic operators into native ones

pub mod filter;
pub mod translate;

pub use filter::{BuilderNode, FilterBuilder, FilterChild, Relation};
pub use translate::{QueryTranslator, escape_regex, native_operator};
