#[cfg(not(target_arch = "wasm32"))]
fn main() {
    use log::{error, info};
    use worker_bootstrap::bootstrap::WorkerEvent;
    use worker_bootstrap::config::{default_loader_hint, BootstrapConfig};
    use worker_bootstrap::host::thread_host::ThreadHost;
    use worker_bootstrap::memory::SharedMemory;
    use worker_bootstrap::native::{BindingsRegistry, NativeBindings, NativeModule};
    use worker_bootstrap::{logging, spawn, EntryToken};

    const CELL: usize = 0;

    let config = BootstrapConfig::default();
    logging::init(config.log_level);

    // Pretend the bindings were built to wherever the plan looks first.
    let hint = default_loader_hint();
    let registry = BindingsRegistry::new();
    if let Some(location) = config.plan.locations(Some(&hint)).into_iter().next() {
        info!("serving demo bindings at {location}");
        registry.register(location, NativeBindings::new(256));
    }
    let mut host = ThreadHost::from_config(registry, &config);

    let module = NativeModule::new("demo", 1024);
    let memory = SharedMemory::new(64, 4096);
    let entry = module.define(EntryToken(7), |memory| {
        memory.store(CELL, 42);
        Ok(())
    });

    let worker = match spawn(&mut host, module, memory.clone(), entry, Some(hint)) {
        Ok(worker) => worker,
        Err(e) => {
            error!("{e}, running nothing");
            return;
        }
    };
    match worker.join() {
        Some(WorkerEvent::Completed) => {
            info!("worker finished, shared cell reads {}", memory.load(CELL))
        }
        Some(WorkerEvent::Failed(e)) => error!("worker failed: {e}"),
        None => error!("worker exited without reporting"),
    }
    info!("{} workers still active", host.active_workers());
}

#[cfg(target_arch = "wasm32")]
fn main() {}
