use thiserror::Error;

/// Everything that can go wrong between `spawn` and worker teardown.
///
/// None of these are retried. Apart from [`Error::SpawnFailure`], which is
/// returned synchronously to the spawning thread, every variant is terminal
/// for the worker it happened in.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Error {
    #[error("could not create worker: {0}")]
    SpawnFailure(String),
    #[error("no bindings could be loaded (tried {attempted:?})")]
    BindingsNotFound { attempted: Vec<String> },
    #[error("bindings failed to initialize: {0}")]
    InitializationFailure(Fault),
    #[error("entry point failed: {0}")]
    EntryExecutionFailure(Fault),
}

/// A failure reported by a bindings module or a module loader.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{0}")]
pub struct Fault(pub String);

impl From<&str> for Fault {
    fn from(value: &str) -> Self {
        Fault(value.to_owned())
    }
}

impl From<String> for Fault {
    fn from(value: String) -> Self {
        Fault(value)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
