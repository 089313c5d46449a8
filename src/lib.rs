pub mod bindings;
pub mod bootstrap;
pub mod config;
mod error;
pub mod host;
pub mod logging;
#[cfg(not(target_arch = "wasm32"))]
pub mod memory;
pub mod message;
#[cfg(not(target_arch = "wasm32"))]
pub mod native;
pub mod resolver;
pub mod task;
#[cfg(test)]
mod testing;
#[cfg(target_arch = "wasm32")]
pub mod time;

pub use error::{Error, Fault, Result};
pub use host::{spawn, Host};
pub use message::{EntryMode, EntryPoint, EntryToken, LoaderHint, WorkerBootstrapMessage};
