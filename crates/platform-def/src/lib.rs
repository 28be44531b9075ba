//! Platform Definitions
//!
//! Data model and resolution logic shared by the one-pf-manage crates:
//! - `machine`: machine and disk specifications, power states, permissions
//! - `definition`: the versioned definition document and its override objects
//! - `resolver`: class-chain resolution into concrete target machines
//! - `loader`: reading JSON/YAML definition files

pub mod definition;
pub mod error;
pub mod loader;
pub mod machine;
pub mod resolver;

pub use definition::*;
pub use error::*;
pub use loader::*;
pub use machine::*;
pub use resolver::*;
