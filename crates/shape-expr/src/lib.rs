//! Condition expression language for Shape forms.
//!
//! Parses expressions such as `formValues.newsletter and stepType == "summary"`
//! into an [`Expr`] and evaluates them with a [`Resolver`] bound to a variable
//! context.
//!
//! # Example
//! ```
//! use serde_json::json;
//!
//! let vars = json!({"formValues": {"age": 21}});
//! let resolver = shape_expr::Resolver::new(vars.as_object().unwrap().clone());
//! assert!(resolver.evaluate_bool("formValues.age >= 18").unwrap());
//! ```

pub mod ast;
mod eval;
mod parser;

pub use ast::*;
pub use eval::{is_truthy, loose_eq, stringify, Resolver};
pub use parser::parse;
