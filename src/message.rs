use std::fmt;

/// Opaque reference to the function a worker runs once its bindings are up.
///
/// The bootstrap never interprets it, it is handed to the bindings verbatim.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EntryToken(pub u32);

impl fmt::Display for EntryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum EntryMode {
    /// Run the entry to completion before tearing down.
    #[default]
    Sync,
    /// Await the future the entry returns before tearing down.
    Async,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct EntryPoint {
    pub token: EntryToken,
    pub mode: EntryMode,
}

impl EntryPoint {
    pub fn sync(token: EntryToken) -> Self {
        Self {
            token,
            mode: EntryMode::Sync,
        }
    }

    pub fn awaited(token: EntryToken) -> Self {
        Self {
            token,
            mode: EntryMode::Async,
        }
    }
}

/// Extra information telling the worker where its bindings live.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum LoaderHint {
    /// A concrete location, used as is.
    Url(String),
    /// A package name that is substituted into the hinted template.
    ModuleName(String),
}

/// The one message a spawner sends to a fresh worker.
///
/// Built once per worker and never mutated afterwards; the bootstrap takes it
/// apart with [`WorkerBootstrapMessage::into_parts`].
#[derive(Clone, Debug)]
pub struct WorkerBootstrapMessage<M, S> {
    compiled_module: M,
    shared_memory: S,
    entry: EntryPoint,
    loader_hint: Option<LoaderHint>,
}

impl<M, S> WorkerBootstrapMessage<M, S> {
    pub fn new(
        compiled_module: M,
        shared_memory: S,
        entry: EntryPoint,
        loader_hint: Option<LoaderHint>,
    ) -> Self {
        Self {
            compiled_module,
            shared_memory,
            entry,
            loader_hint,
        }
    }

    pub fn compiled_module(&self) -> &M {
        &self.compiled_module
    }

    pub fn shared_memory(&self) -> &S {
        &self.shared_memory
    }

    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn loader_hint(&self) -> Option<&LoaderHint> {
        self.loader_hint.as_ref()
    }

    pub fn into_parts(self) -> (M, S, EntryPoint, Option<LoaderHint>) {
        (
            self.compiled_module,
            self.shared_memory,
            self.entry,
            self.loader_hint,
        )
    }
}
