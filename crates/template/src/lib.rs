//! # Template
//!
//! Stack templates and the intrinsic expression language.
//!
//! A template declares parameters, mappings, conditions, resources and
//! outputs. Loading parses every property value into an [`Expr`] tree;
//! [`resolve`] then validates parameters, evaluates conditions and folds
//! every expression that does not depend on a resource into a literal.
//! What remains open are `Ref`s and `Fn::GetAtt`s on other resources,
//! which the reconciliation engine evaluates through its own [`Scope`].
//!
//! ## Example
//!
//! ```ignore
//! use template::{Environment, StackIdentity, Template, resolve};
//!
//! let template = Template::load(Path::new("network.yaml"))?;
//! let resolved = resolve(
//!     &template,
//!     &overrides,
//!     &Environment::default(),
//!     StackIdentity { name: "net".into(), id: "stack-1".into() },
//! )?;
//! for (name, resource) in &resolved.resources {
//!     println!("{name}: {}", resource.resource_type);
//! }
//! ```

pub mod document;
pub mod error;
pub mod eval;
pub mod expr;
pub mod functions;
pub mod parameters;
pub mod resolver;
pub mod yaml;

pub use document::{DeletionPolicy, Mapping, OutputDecl, Parameter, ParameterType, ResourceDecl, Template};
pub use error::{Error, Result};
pub use eval::{Scope, evaluate};
pub use expr::{ConditionExpr, Expr, NO_VALUE, Reference, SubPart};
pub use parameters::ResolvedParameter;
pub use resolver::{
    Environment, PreparedOutput, PreparedResource, Resolved, StackIdentity, resolve,
};
