use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadHandle};

use crate::bootstrap::{Bootstrap, WorkerEvent, WorkerScope};
use crate::config::BootstrapConfig;
use crate::error::{Error, Fault, Result};
use crate::host::{self, Host};
use crate::memory::SharedMemory;
use crate::message::{LoaderHint, WorkerBootstrapMessage};
use crate::native::{BindingsRegistry, NativeModule};
use crate::resolver::{ResolutionPlan, Resolver};
use crate::task::{self, JoinHandle};

type NativeMessage = WorkerBootstrapMessage<NativeModule, SharedMemory>;

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// True on a thread started by a [`ThreadHost`].
pub fn is_worker_scope() -> bool {
    IN_WORKER.with(Cell::get)
}

fn run_thread(
    inbox: Receiver<NativeMessage>,
    mut bootstrap: Bootstrap<BindingsRegistry, ThreadScope>,
) {
    IN_WORKER.with(|it| it.set(true));
    while let Ok(message) = inbox.recv() {
        let module = message.compiled_module().clone();
        let token = message.entry().token;
        // Failures have already been posted on the worker's event channel.
        pollster::block_on(bootstrap.handle_message(message)).ok();
        // An entry that never ran is dropped here, along with anything it
        // captured, such as a task slot.
        if module.forget(token) {
            log::debug!("dropped entry {token}, it never ran");
        }
        if bootstrap.state().is_finished() {
            break;
        }
    }
    for message in inbox.try_iter() {
        message.compiled_module().forget(message.entry().token);
    }
}

/// Runs every worker context on its own OS thread.
pub struct ThreadHost {
    registry: BindingsRegistry,
    plan: ResolutionPlan,
    max_workers: Option<usize>,
    active: Arc<AtomicUsize>,
    next_id: u32,
}

impl ThreadHost {
    pub fn new(registry: BindingsRegistry, plan: ResolutionPlan) -> Self {
        Self {
            registry,
            plan,
            max_workers: None,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: 1,
        }
    }

    pub fn from_config(registry: BindingsRegistry, config: &BootstrapConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            ..Self::new(registry, config.plan.clone())
        }
    }

    /// Further spawns fail with [`Error::SpawnFailure`] while `max` workers are
    /// alive.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = Some(max);
        self
    }

    /// Workers that have been created and not yet closed.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs `f` on a new worker and hands back its result.
    pub fn spawn_task<T, F>(
        &mut self,
        module: &NativeModule,
        memory: &SharedMemory,
        loader_hint: Option<LoaderHint>,
        f: F,
    ) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&SharedMemory) -> T + Send + 'static,
    {
        let (slot, handle) = task::channel();
        let entry = module.register(move |memory| {
            slot.call(|| f(memory));
            Ok(())
        });
        let spawned = host::spawn(self, module.clone(), memory.clone(), entry, loader_hint);
        if let Err(e) = spawned {
            module.forget(entry.token);
            return Err(e);
        }
        Ok(handle)
    }

    /// Like [`ThreadHost::spawn_task`], but the worker awaits the future `f`
    /// returns. Aborting the handle stops the future at its next suspension
    /// point.
    pub fn spawn_async_task<T, F, Fut>(
        &mut self,
        module: &NativeModule,
        memory: &SharedMemory,
        loader_hint: Option<LoaderHint>,
        f: F,
    ) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(SharedMemory) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + 'static,
    {
        let (slot, handle) = task::channel();
        let entry = module.register_async(move |memory| async move {
            slot.run(f(memory)).await;
            Ok::<(), Fault>(())
        });
        let spawned = host::spawn(self, module.clone(), memory.clone(), entry, loader_hint);
        if let Err(e) = spawned {
            module.forget(entry.token);
            return Err(e);
        }
        Ok(handle)
    }
}

impl Host for ThreadHost {
    type Module = NativeModule;
    type Memory = SharedMemory;
    type Worker = ThreadWorker;

    fn create_worker(&mut self) -> Result<ThreadWorker> {
        if let Some(max) = self.max_workers {
            if self.active_workers() >= max {
                return Err(Error::SpawnFailure(format!("limit of {max} workers reached")));
            }
        }
        let id = self.next_id;
        self.next_id += 1;

        let (inbox_sender, inbox) = mpsc::channel();
        let (event_sender, events) = mpsc::channel();
        let scope = ThreadScope {
            events: event_sender,
            active: Cell::new(Some(ActiveGuard::new(&self.active))),
        };
        let resolver = Resolver::new(self.registry.clone(), self.plan.clone());
        let bootstrap = Bootstrap::new(resolver, scope);

        let thread = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || run_thread(inbox, bootstrap))
            .map_err(|e| Error::SpawnFailure(e.to_string()))?;
        log::debug!("created worker {id}");

        Ok(ThreadWorker {
            id,
            inbox: RefCell::new(Some(inbox_sender)),
            events,
            thread: Some(thread),
        })
    }

    fn post_message(&self, worker: &ThreadWorker, message: NativeMessage) -> Result<()> {
        let inbox = worker.inbox.borrow();
        let sender = inbox.as_ref().ok_or_else(|| {
            Error::SpawnFailure(format!("worker {} was terminated", worker.id))
        })?;
        sender
            .send(message)
            .map_err(|_| Error::SpawnFailure(format!("worker {} has exited", worker.id)))
    }

    /// Closes the worker's inbox. An OS thread cannot be killed, so a worker
    /// that is already running its entry finishes it before exiting.
    fn terminate(&self, worker: &ThreadWorker) {
        if worker.inbox.borrow_mut().take().is_some() {
            log::debug!("terminated worker {}", worker.id);
        }
    }
}

/// The spawner's handle on one worker thread.
pub struct ThreadWorker {
    id: u32,
    inbox: RefCell<Option<Sender<NativeMessage>>>,
    events: Receiver<WorkerEvent>,
    thread: Option<ThreadHandle<()>>,
}

impl ThreadWorker {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn try_event(&self) -> Option<WorkerEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the worker's event and for its thread to exit. Returns `None`
    /// if the worker went away without reporting, e.g. after being terminated
    /// before it got its message.
    pub fn join(mut self) -> Option<WorkerEvent> {
        let event = self.events.recv().ok();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("worker {} thread panicked", self.id);
            }
        }
        event
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ThreadScope {
    events: Sender<WorkerEvent>,
    active: Cell<Option<ActiveGuard>>,
}

impl WorkerScope for ThreadScope {
    fn post_event(&self, event: WorkerEvent) {
        // Nobody listening is fine, events are only observational.
        self.events.send(event).ok();
    }

    fn close(&self) {
        drop(self.active.take());
    }
}
