//! The contract a bindings module has to fulfil so a worker can run it.

use std::future::Future;

use crate::error::Fault;
use crate::message::EntryToken;

/// Loads a bindings module from a runtime-computed location.
pub trait BindingsLoader {
    type Bindings: Bindings;

    fn load(&self, location: &str) -> impl Future<Output = Result<Self::Bindings, Fault>>;
}

/// A loaded, not yet initialized bindings module.
pub trait Bindings {
    type Module;
    type Memory;
    type Handle: BindingsHandle;

    /// Instantiates the bindings against the shared module/memory pair.
    fn init(
        &self,
        module: &Self::Module,
        memory: &Self::Memory,
    ) -> impl Future<Output = Result<Self::Handle, Fault>>;
}

/// Initialized bindings living on the current worker thread.
pub trait BindingsHandle {
    fn run_entry(&self, token: EntryToken) -> Result<(), Fault>;

    fn run_entry_async(&self, token: EntryToken) -> impl Future<Output = Result<(), Fault>>;

    /// Frees the stack and thread-local storage this thread owns inside the
    /// shared memory.
    fn release_thread_locals(&self);
}
