// Logging
//
// Logger seam used by the plugin and the forked-checker worker. The worker
// has no channel back to a build UI, so its console logger is the one place
// this crate writes to process output directly.

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

/// Logger trait.
pub trait Logger {
    fn level(&self) -> LogLevel;
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
    fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.level()
    }
}

/// Logger writing to stdout/stderr.
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Logger for ConsoleLogger {
    fn level(&self) -> LogLevel {
        self.min_level
    }
    fn debug(&self, msg: &str) {
        if self.is_enabled(LogLevel::Debug) {
            println!("{}", msg);
        }
    }
    fn info(&self, msg: &str) {
        if self.is_enabled(LogLevel::Info) {
            println!("{}", msg);
        }
    }
    fn warn(&self, msg: &str) {
        if self.is_enabled(LogLevel::Warn) {
            eprintln!("{}", msg);
        }
    }
    fn error(&self, msg: &str) {
        if self.is_enabled(LogLevel::Error) {
            eprintln!("{}", msg);
        }
    }
}

/// Null logger (logs nothing).
#[derive(Default)]
pub struct NullLogger;

impl NullLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for NullLogger {
    fn level(&self) -> LogLevel {
        LogLevel::Error
    }
    fn debug(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
}
