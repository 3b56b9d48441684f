//! Configuration for droidpush.
//!
//! Settings come from an optional `droidpush.toml` and are overridden by
//! command-line flags.

mod parser;
mod schema;
mod store;

pub use parser::{parse_config, parse_config_str, to_toml};
pub use schema::{ConfigOverrides, DroidpushConfig};
pub use store::ConfigStore;
