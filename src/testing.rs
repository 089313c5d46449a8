//! Recording doubles for the bindings and scope traits.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::bindings::{Bindings, BindingsHandle, BindingsLoader};
use crate::bootstrap::{WorkerEvent, WorkerScope};
use crate::error::Fault;
use crate::message::EntryToken;

#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|it| *it == entry).count()
    }
}

#[derive(Clone)]
pub struct RecordingLoader {
    accepted: Vec<String>,
    attempts: Journal,
    bindings: TestBindings,
}

impl RecordingLoader {
    pub fn accepting(locations: &[&str]) -> Self {
        Self {
            accepted: locations.iter().map(|it| it.to_string()).collect(),
            attempts: Journal::default(),
            bindings: TestBindings::default(),
        }
    }

    pub fn with_bindings(mut self, bindings: TestBindings) -> Self {
        self.bindings = TestBindings {
            journal: self.bindings.journal.clone(),
            ..bindings
        };
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.entries()
    }

    /// What the bindings and the scope did, in order.
    pub fn journal(&self) -> Journal {
        self.bindings.journal.clone()
    }
}

impl BindingsLoader for RecordingLoader {
    type Bindings = TestBindings;

    async fn load(&self, location: &str) -> Result<TestBindings, Fault> {
        self.attempts.record(location);
        if self.accepted.iter().any(|it| it == location) {
            Ok(self.bindings.clone())
        } else {
            Err(Fault(format!("nothing at {location}")))
        }
    }
}

#[derive(Clone, Default)]
pub struct TestBindings {
    journal: Journal,
    init_fault: Option<Fault>,
    entry_fault: Option<Fault>,
}

impl TestBindings {
    pub fn failing_init(mut self, reason: &str) -> Self {
        self.init_fault = Some(Fault::from(reason));
        self
    }

    pub fn failing_entry(mut self, reason: &str) -> Self {
        self.entry_fault = Some(Fault::from(reason));
        self
    }
}

impl Bindings for TestBindings {
    type Module = &'static str;
    type Memory = Rc<Cell<u32>>;
    type Handle = TestHandle;

    async fn init(
        &self,
        _module: &&'static str,
        memory: &Rc<Cell<u32>>,
    ) -> Result<TestHandle, Fault> {
        self.journal.record("init");
        if let Some(fault) = &self.init_fault {
            return Err(fault.clone());
        }
        Ok(TestHandle {
            journal: self.journal.clone(),
            memory: memory.clone(),
            entry_fault: self.entry_fault.clone(),
        })
    }
}

pub struct TestHandle {
    journal: Journal,
    memory: Rc<Cell<u32>>,
    entry_fault: Option<Fault>,
}

impl TestHandle {
    fn run(&self, token: EntryToken) -> Result<(), Fault> {
        if let Some(fault) = &self.entry_fault {
            return Err(fault.clone());
        }
        self.memory.set(token.0);
        Ok(())
    }
}

impl BindingsHandle for TestHandle {
    fn run_entry(&self, token: EntryToken) -> Result<(), Fault> {
        self.journal.record(format!("run {}", token.0));
        self.run(token)
    }

    async fn run_entry_async(&self, token: EntryToken) -> Result<(), Fault> {
        self.journal.record(format!("run async {}", token.0));
        self.run(token)
    }

    fn release_thread_locals(&self) {
        self.journal.record("release");
    }
}

pub struct TestScope {
    journal: Journal,
    events: RefCell<Vec<WorkerEvent>>,
}

impl TestScope {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            events: RefCell::new(vec![]),
        }
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.borrow().clone()
    }
}

impl WorkerScope for TestScope {
    fn post_event(&self, event: WorkerEvent) {
        self.journal.record(match &event {
            WorkerEvent::Completed => "completed",
            WorkerEvent::Failed(_) => "failed",
        });
        self.events.borrow_mut().push(event);
    }

    fn close(&self) {
        self.journal.record("close");
    }
}
