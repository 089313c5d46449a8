use log::LevelFilter;

/// Installs a logger for the current platform. Does nothing if the embedding
/// program already installed one.
#[cfg(not(target_arch = "wasm32"))]
pub fn init(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Installs a logger for the current platform. Does nothing if the embedding
/// program already installed one.
#[cfg(target_arch = "wasm32")]
pub fn init(level: LevelFilter) {
    if log::set_logger(&console::LOGGER).is_ok() {
        log::set_max_level(level);
        std::panic::set_hook(Box::new(|info| {
            web_sys::console::error_1(&info.to_string().into());
        }));
    }
}

#[cfg(target_arch = "wasm32")]
mod console {
    use log::{Level, Log, Metadata, Record};
    use web_sys::console;

    pub(super) struct ConsoleLogger;

    pub(super) static LOGGER: ConsoleLogger = ConsoleLogger {};

    impl Log for ConsoleLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let log = match record.level() {
                    Level::Error => console::error_1,
                    Level::Warn => console::warn_1,
                    Level::Info => console::info_1,
                    Level::Debug => console::log_1,
                    Level::Trace => console::debug_1,
                };
                log(&format!("[{}] {}", record.target(), record.args()).into());
            }
        }

        fn flush(&self) {}
    }
}
