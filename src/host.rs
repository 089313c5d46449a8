#[cfg(not(target_arch = "wasm32"))]
pub mod thread_host;
#[cfg(target_arch = "wasm32")]
pub mod web_host;

#[cfg(not(target_arch = "wasm32"))]
pub use thread_host::is_worker_scope;
#[cfg(target_arch = "wasm32")]
pub use web_host::is_worker_scope;

use crate::error::Result;
use crate::message::{EntryPoint, LoaderHint, WorkerBootstrapMessage};

/// The host's parallel-execution primitive, seen from the spawning thread.
pub trait Host {
    type Module;
    type Memory;
    type Worker;

    fn create_worker(&mut self) -> Result<Self::Worker>;

    fn post_message(
        &self,
        worker: &Self::Worker,
        message: WorkerBootstrapMessage<Self::Module, Self::Memory>,
    ) -> Result<()>;

    /// Abruptly ends a worker. Nothing is cleaned up inside it.
    fn terminate(&self, worker: &Self::Worker);
}

/// Creates a worker and hands it its bootstrap message.
///
/// Errors come back synchronously so the caller can fall back to running
/// single-threaded. A worker that was created but could not be reached is
/// terminated before returning.
pub fn spawn<H: Host>(
    host: &mut H,
    compiled_module: H::Module,
    shared_memory: H::Memory,
    entry: EntryPoint,
    loader_hint: Option<LoaderHint>,
) -> Result<H::Worker> {
    let worker = host.create_worker()?;
    let message = WorkerBootstrapMessage::new(compiled_module, shared_memory, entry, loader_hint);
    if let Err(e) = host.post_message(&worker, message) {
        log::error!("could not deliver bootstrap message for {entry:?}: {e}");
        host.terminate(&worker);
        return Err(e);
    }
    Ok(worker)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::Error;
    use crate::message::EntryToken;

    #[derive(Default)]
    struct FakeHost {
        capacity: usize,
        created: usize,
        refuse_messages: bool,
        posted: RefCell<Vec<(usize, EntryPoint, Option<LoaderHint>)>>,
        terminated: RefCell<Vec<usize>>,
    }

    impl Host for FakeHost {
        type Module = ();
        type Memory = ();
        type Worker = usize;

        fn create_worker(&mut self) -> Result<usize> {
            if self.created == self.capacity {
                return Err(Error::SpawnFailure("out of workers".to_owned()));
            }
            self.created += 1;
            Ok(self.created)
        }

        fn post_message(
            &self,
            worker: &usize,
            message: WorkerBootstrapMessage<(), ()>,
        ) -> Result<()> {
            if self.refuse_messages {
                return Err(Error::SpawnFailure("worker gone".to_owned()));
            }
            let hint = message.loader_hint().cloned();
            self.posted.borrow_mut().push((*worker, message.entry(), hint));
            Ok(())
        }

        fn terminate(&self, worker: &usize) {
            self.terminated.borrow_mut().push(*worker);
        }
    }

    #[test]
    fn posts_exactly_one_message() {
        let mut host = FakeHost {
            capacity: 1,
            ..Default::default()
        };
        let hint = LoaderHint::ModuleName("app".to_owned());
        let entry = EntryPoint::sync(EntryToken(7));

        let worker = spawn(&mut host, (), (), entry, Some(hint.clone())).unwrap();

        assert_eq!(
            host.posted.into_inner(),
            vec![(worker, EntryPoint::sync(EntryToken(7)), Some(hint))]
        );
    }

    #[test]
    fn creation_failure_is_returned() {
        let mut host = FakeHost::default();

        let err = spawn(&mut host, (), (), EntryPoint::sync(EntryToken(1)), None).err().unwrap();

        assert_eq!(err, Error::SpawnFailure("out of workers".to_owned()));
        assert!(host.posted.borrow().is_empty());
    }

    #[test]
    fn undeliverable_worker_is_terminated() {
        let mut host = FakeHost {
            capacity: 1,
            refuse_messages: true,
            ..Default::default()
        };

        let err = spawn(&mut host, (), (), EntryPoint::sync(EntryToken(1)), None).err().unwrap();

        assert!(matches!(err, Error::SpawnFailure(_)));
        assert_eq!(host.terminated.into_inner(), vec![1]);
    }
}
