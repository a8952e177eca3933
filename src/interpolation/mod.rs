//! `{{...}}` reference resolution.
//!
//! Each pass rewrites a whole document and leaves whatever it cannot resolve
//! untouched for the next one:
//! - [`resolve_self_references`] substitutes values from the document itself
//! - [`resolve_env`] substitutes environment variables
//! - [`SecretInjector`] dispatches secret references to the backends
//!
//! [`validate`] then rejects anything still unresolved, and [`clean_escapes`]
//! unwraps escaped literals.

mod env;
mod injector;
mod references;
pub mod syntax;
mod validator;

pub use env::resolve_env;
pub use injector::{DEFAULT_SECRET_CACHE_CAPACITY, SecretCache, SecretInjector};
pub use references::resolve_self_references;
pub use validator::{clean_escapes, validate};
