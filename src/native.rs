//! Native stand-ins for a compiled module and its bindings, used by the
//! thread host.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::bindings::{Bindings, BindingsHandle, BindingsLoader};
use crate::error::Fault;
use crate::memory::{SharedMemory, ThreadBlock};
use crate::message::{EntryPoint, EntryToken};

type SyncEntry = Box<dyn FnOnce(&SharedMemory) -> Result<(), Fault> + Send>;
type AsyncEntry =
    Box<dyn FnOnce(SharedMemory) -> LocalBoxFuture<'static, Result<(), Fault>> + Send>;

enum Entry {
    Sync(SyncEntry),
    Async(AsyncEntry),
}

/// A compiled module: a table of entry points plus the memory size it
/// expects. Cheap to clone and shared between all workers.
#[derive(Clone)]
pub struct NativeModule {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    name: String,
    min_memory_words: usize,
    next_token: AtomicU32,
    entries: Mutex<HashMap<EntryToken, Entry>>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>, min_memory_words: usize) -> Self {
        Self {
            inner: Arc::new(ModuleInner {
                name: name.into(),
                min_memory_words,
                next_token: AtomicU32::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn min_memory_words(&self) -> usize {
        self.inner.min_memory_words
    }

    /// Registers a one-shot entry under a fresh token.
    pub fn register<F>(&self, f: F) -> EntryPoint
    where
        F: FnOnce(&SharedMemory) -> Result<(), Fault> + Send + 'static,
    {
        self.define(self.next_token(), f)
    }

    /// Registers a one-shot entry under `token`, replacing whatever was there.
    pub fn define<F>(&self, token: EntryToken, f: F) -> EntryPoint
    where
        F: FnOnce(&SharedMemory) -> Result<(), Fault> + Send + 'static,
    {
        self.entries().insert(token, Entry::Sync(Box::new(f)));
        EntryPoint::sync(token)
    }

    /// Registers an entry whose future the worker awaits before tearing down.
    pub fn register_async<F, Fut>(&self, f: F) -> EntryPoint
    where
        F: FnOnce(SharedMemory) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Fault>> + 'static,
    {
        let token = self.next_token();
        let entry: AsyncEntry = Box::new(move |memory| f(memory).boxed_local());
        self.entries().insert(token, Entry::Async(entry));
        EntryPoint::awaited(token)
    }

    /// Drops an entry that will never run.
    pub fn forget(&self, token: EntryToken) -> bool {
        self.entries().remove(&token).is_some()
    }

    pub fn pending_entries(&self) -> usize {
        self.entries().len()
    }

    fn take(&self, token: EntryToken) -> Result<Entry, Fault> {
        self.entries()
            .remove(&token)
            .ok_or_else(|| Fault(format!("module {} has no entry {token}", self.name())))
    }

    fn next_token(&self) -> EntryToken {
        EntryToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<EntryToken, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bindings as found at some location: they know how big a thread block each
/// worker needs.
#[derive(Clone, Debug)]
pub struct NativeBindings {
    stack_words: usize,
}

impl NativeBindings {
    pub fn new(stack_words: usize) -> Self {
        Self { stack_words }
    }
}

impl Bindings for NativeBindings {
    type Module = NativeModule;
    type Memory = SharedMemory;
    type Handle = NativeBindingsHandle;

    async fn init(
        &self,
        module: &NativeModule,
        memory: &SharedMemory,
    ) -> Result<NativeBindingsHandle, Fault> {
        if memory.len() < module.min_memory_words() {
            return Err(Fault(format!(
                "module {} needs {} words of memory, got {}",
                module.name(),
                module.min_memory_words(),
                memory.len()
            )));
        }
        let block = memory.alloc_thread_block(self.stack_words)?;
        log::trace!("thread block of {} words at {}", block.len(), block.start());
        Ok(NativeBindingsHandle {
            module: module.clone(),
            memory: memory.clone(),
            block: Cell::new(Some(block)),
        })
    }
}

pub struct NativeBindingsHandle {
    module: NativeModule,
    memory: SharedMemory,
    block: Cell<Option<ThreadBlock>>,
}

impl BindingsHandle for NativeBindingsHandle {
    fn run_entry(&self, token: EntryToken) -> Result<(), Fault> {
        match self.module.take(token)? {
            Entry::Sync(f) => self.call_sync(f),
            Entry::Async(_) => Err(Fault(format!("entry {token} is async and must be awaited"))),
        }
    }

    async fn run_entry_async(&self, token: EntryToken) -> Result<(), Fault> {
        match self.module.take(token)? {
            Entry::Sync(f) => self.call_sync(f),
            Entry::Async(f) => {
                let memory = self.memory.clone();
                let future =
                    panic::catch_unwind(AssertUnwindSafe(|| f(memory))).map_err(panic_fault)?;
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|e| Err(panic_fault(e)))
            }
        }
    }

    fn release_thread_locals(&self) {
        if let Some(block) = self.block.take() {
            self.memory.free_thread_block(&block);
        }
    }
}

impl NativeBindingsHandle {
    fn call_sync(&self, f: SyncEntry) -> Result<(), Fault> {
        panic::catch_unwind(AssertUnwindSafe(|| f(&self.memory)))
            .unwrap_or_else(|e| Err(panic_fault(e)))
    }
}

fn panic_fault(payload: Box<dyn Any + Send>) -> Fault {
    if let Some(message) = payload.downcast_ref::<&str>() {
        Fault(format!("panicked: {message}"))
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Fault(format!("panicked: {message}"))
    } else {
        Fault::from("panicked")
    }
}

/// The native module loader: a table from location to bindings.
#[derive(Clone, Default)]
pub struct BindingsRegistry {
    modules: Arc<Mutex<HashMap<String, NativeBindings>>>,
}

impl BindingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, location: impl Into<String>, bindings: NativeBindings) {
        self.modules().insert(location.into(), bindings);
    }

    pub fn unregister(&self, location: &str) -> Option<NativeBindings> {
        self.modules().remove(location)
    }

    fn modules(&self) -> MutexGuard<'_, HashMap<String, NativeBindings>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BindingsLoader for BindingsRegistry {
    type Bindings = NativeBindings;

    async fn load(&self, location: &str) -> Result<NativeBindings, Fault> {
        self.modules()
            .get(location)
            .cloned()
            .ok_or_else(|| Fault(format!("no bindings registered at {location}")))
    }
}
