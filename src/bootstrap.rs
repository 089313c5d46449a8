//! The worker side of the protocol.
//!
//! A [`Bootstrap`] is created when the worker context starts and handles
//! exactly one [`WorkerBootstrapMessage`]. Every later message is ignored.

use crate::bindings::{Bindings, BindingsHandle, BindingsLoader};
use crate::error::{Error, Result};
use crate::message::{EntryMode, WorkerBootstrapMessage};
use crate::resolver::Resolver;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    AwaitingMessage,
    Resolving,
    Initializing,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl State {
    pub fn is_finished(self) -> bool {
        matches!(self, State::Terminated | State::Failed)
    }
}

/// Sent back to the spawner. Carries no control semantics.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum WorkerEvent {
    Completed,
    Failed(Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Completion {
    /// The entry point ran and the worker has been shut down.
    Finished,
    /// The message arrived after the first one and was dropped.
    Ignored,
}

/// Host primitives available from inside a worker context.
pub trait WorkerScope {
    /// Posts an event on this worker's own channel to the spawner.
    fn post_event(&self, event: WorkerEvent);

    /// Ends the worker context.
    fn close(&self);
}

pub type ModuleOf<L> = <<L as BindingsLoader>::Bindings as Bindings>::Module;
pub type MemoryOf<L> = <<L as BindingsLoader>::Bindings as Bindings>::Memory;
pub type MessageFor<L> = WorkerBootstrapMessage<ModuleOf<L>, MemoryOf<L>>;

pub struct Bootstrap<L, S> {
    resolver: Resolver<L>,
    scope: S,
    state: State,
}

impl<L: BindingsLoader, S: WorkerScope> Bootstrap<L, S> {
    pub fn new(resolver: Resolver<L>, scope: S) -> Self {
        Self {
            resolver,
            scope,
            state: State::AwaitingMessage,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn scope(&self) -> &S {
        &self.scope
    }

    /// Runs the whole protocol for `message`.
    ///
    /// A failure is posted as [`WorkerEvent::Failed`] and also returned, so it
    /// is seen both by whoever listens on the worker and by whoever awaits
    /// this call.
    pub async fn handle_message(&mut self, message: MessageFor<L>) -> Result<Completion> {
        if self.state != State::AwaitingMessage {
            log::debug!("ignoring bootstrap message in state {:?}", self.state);
            return Ok(Completion::Ignored);
        }
        let (module, memory, entry, hint) = message.into_parts();

        self.transition(State::Resolving);
        let resolved = match self.resolver.resolve(hint.as_ref()).await {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.fail(e)),
        };
        log::debug!("bindings resolved to {}", resolved.location);

        self.transition(State::Initializing);
        let handle = match resolved.bindings.init(&module, &memory).await {
            Ok(handle) => handle,
            Err(fault) => return Err(self.fail(Error::InitializationFailure(fault))),
        };

        self.transition(State::Running);
        let outcome = match entry.mode {
            EntryMode::Sync => handle.run_entry(entry.token),
            EntryMode::Async => handle.run_entry_async(entry.token).await,
        };

        // The stack and TLS live in the shared memory, so they are released
        // no matter how the entry point ended.
        self.transition(State::Terminating);
        handle.release_thread_locals();

        match outcome {
            Ok(()) => {
                self.scope.post_event(WorkerEvent::Completed);
                self.scope.close();
                self.transition(State::Terminated);
                Ok(Completion::Finished)
            }
            Err(fault) => Err(self.fail(Error::EntryExecutionFailure(fault))),
        }
    }

    fn transition(&mut self, state: State) {
        log::trace!("bootstrap {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, error: Error) -> Error {
        log::error!("worker bootstrap failed: {error}");
        self.transition(State::Failed);
        self.scope.post_event(WorkerEvent::Failed(error.clone()));
        self.scope.close();
        error
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Fault;
    use crate::message::{EntryPoint, EntryToken};
    use crate::resolver::{ResolutionPlan, Strategy};
    use crate::testing::{RecordingLoader, TestBindings, TestScope};

    fn bootstrap(loader: RecordingLoader) -> Bootstrap<RecordingLoader, TestScope> {
        let plan = ResolutionPlan::new().with(Strategy::Static("app.js".to_owned()));
        let scope = TestScope::new(loader.journal());
        Bootstrap::new(Resolver::new(loader, plan), scope)
    }

    fn message(entry: EntryPoint) -> MessageFor<RecordingLoader> {
        WorkerBootstrapMessage::new("module", Rc::new(Cell::new(0)), entry, None)
    }

    #[test]
    fn runs_entry_then_releases_then_closes() {
        let loader = RecordingLoader::accepting(&["app.js"]);
        let mut b = bootstrap(loader.clone());
        let memory = Rc::new(Cell::new(0));
        let msg = WorkerBootstrapMessage::new(
            "module",
            memory.clone(),
            EntryPoint::sync(EntryToken(7)),
            None,
        );

        let completion = pollster::block_on(b.handle_message(msg)).unwrap();

        assert_eq!(completion, Completion::Finished);
        assert_eq!(b.state(), State::Terminated);
        assert_eq!(memory.get(), 7);
        assert_eq!(
            loader.journal().entries(),
            vec!["init", "run 7", "release", "completed", "close"]
        );
    }

    #[test]
    fn awaits_async_entries() {
        let loader = RecordingLoader::accepting(&["app.js"]);
        let mut b = bootstrap(loader.clone());

        pollster::block_on(b.handle_message(message(EntryPoint::awaited(EntryToken(3))))).unwrap();

        assert_eq!(
            loader.journal().entries(),
            vec!["init", "run async 3", "release", "completed", "close"]
        );
    }

    #[test]
    fn second_message_is_ignored() {
        let loader = RecordingLoader::accepting(&["app.js"]);
        let mut b = bootstrap(loader.clone());

        pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(1))))).unwrap();
        let again =
            pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(2))))).unwrap();

        assert_eq!(again, Completion::Ignored);
        assert_eq!(b.state(), State::Terminated);
        let journal = loader.journal();
        assert_eq!(journal.count("release"), 1);
        assert_eq!(journal.count("close"), 1);
        assert_eq!(journal.count("run 2"), 0);
    }

    #[test]
    fn init_failure_never_runs_the_entry() {
        let bindings = TestBindings::default().failing_init("bad memory");
        let loader = RecordingLoader::accepting(&["app.js"]).with_bindings(bindings);
        let mut b = bootstrap(loader.clone());

        let err = pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(1)))))
            .err()
            .unwrap();

        let expected = Error::InitializationFailure(Fault::from("bad memory"));
        assert_eq!(err, expected);
        assert_eq!(b.state(), State::Failed);
        assert_eq!(b.scope().events(), vec![WorkerEvent::Failed(expected)]);
        assert_eq!(loader.journal().entries(), vec!["init", "failed", "close"]);
    }

    #[test]
    fn missing_bindings_fail_before_init() {
        let loader = RecordingLoader::accepting(&[]);
        let mut b = bootstrap(loader.clone());

        let err = pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(1)))))
            .err()
            .unwrap();

        assert!(matches!(err, Error::BindingsNotFound { .. }));
        assert_eq!(loader.journal().count("init"), 0);
        assert_eq!(loader.journal().count("close"), 1);
    }

    #[test]
    fn failing_entry_still_releases_exactly_once() {
        let bindings = TestBindings::default().failing_entry("boom");
        let loader = RecordingLoader::accepting(&["app.js"]).with_bindings(bindings);
        let mut b = bootstrap(loader.clone());

        let err = pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(5)))))
            .err()
            .unwrap();
        let again =
            pollster::block_on(b.handle_message(message(EntryPoint::sync(EntryToken(5))))).unwrap();

        assert_eq!(err, Error::EntryExecutionFailure(Fault::from("boom")));
        assert_eq!(again, Completion::Ignored);
        assert_eq!(
            loader.journal().entries(),
            vec!["init", "run 5", "release", "failed", "close"]
        );
    }
}
