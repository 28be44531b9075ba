//! OpenNebula Control Plane Client
//!
//! Gateway between the reconciliation engine and an OpenNebula control
//! plane. The engine only sees `OneClientTrait`; `OneClient` drives the
//! `one*` command-line tools and `MockOneClient` (feature `test-util`) keeps
//! machines in memory.
//!
//! # Example
//!
//! ```no_run
//! use one_client::{OneClient, OneClientConfig, OneClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OneClient::new(OneClientConfig {
//!     endpoint: Some("http://one:2633/RPC2".to_string()),
//!     ..Default::default()
//! });
//! client.verify().await?;
//! for machine in client.list_inventory().await? {
//!     println!("{} {:?}", machine.name, machine.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
mod command;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod one_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{OneClient, OneClientConfig, DEFAULT_COMMAND_TIMEOUT, REQUIRED_COMMANDS};
pub use command::ENV_ONE_XMLRPC;
pub use error::OneError;
pub use models::{ResizeRequest, UserInfo};
pub use one_trait::OneClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{GatewayCall, MockOneClient, MockOperation};
