// Type Checker
//
// Forked type-checking: the main build emits without waiting for semantic
// results while a worker process runs the full diagnostic passes and
// reports through its own logger. The wire protocol is one JSON message
// per stdin line, fire-and-forget; the parent never reads anything back.

use crate::cache::SourceFileCache;
use crate::compiler_host::{create_augmented_host, FileDependencyMap, HostOptions};
use crate::logging::Logger;
use crate::paths::normalize_path;
use crate::program::TsProgram;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{BufRead, Write as _};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use ts::{format_diagnostics, CompilerHost, CompilerOptions, NodeCompilerHost, Program};

/// Marker argument that tells the worker binary it was forked by the
/// plugin rather than invoked by hand.
pub const AUTO_START_ARG: &str = "9d93e901-158a-4cf9-ba1b-2f0582ffcfeb";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeCheckerMessage {
    Init {
        compiler_options: CompilerOptions,
        base_path: String,
        jit_mode: bool,
        root_names: Vec<String>,
    },
    Update {
        root_names: Vec<String>,
        changed_compilation_files: Vec<String>,
    },
}

/// Strip debugger flags from forwarded exec arguments; a worker inheriting
/// its parent's inspector port would fail to bind it.
pub fn filtered_exec_args<'a>(args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    args.into_iter()
        .filter(|arg| !arg.starts_with("--inspect") && !arg.starts_with("--debug"))
        .map(|arg| arg.to_string())
        .collect()
}

/// Parent-side handle to the forked worker. Once the child exits
/// unexpectedly the handle stays broken for the rest of the process; the
/// orchestrator falls back to same-process diagnostics.
pub struct ForkedTypeChecker {
    child: Child,
    stdin: Option<ChildStdin>,
    broken: bool,
    exit_reported: bool,
}

impl ForkedTypeChecker {
    /// Fork the worker binary. Exec arguments are forwarded with debugger
    /// flags stripped.
    pub fn spawn(
        worker_path: &str,
        exec_args: &[String],
    ) -> std::io::Result<Self> {
        let mut child = Command::new(worker_path)
            .args(filtered_exec_args(exec_args.iter().map(String::as_str)))
            .arg(AUTO_START_ARG)
            .stdin(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        Ok(Self {
            child,
            stdin,
            broken: false,
            exit_reported: false,
        })
    }

    /// Send one message. Returns false when the worker is gone; the caller
    /// decides whether that deserves a warning via
    /// [`ForkedTypeChecker::take_unexpected_exit`].
    pub fn send(&mut self, message: &TypeCheckerMessage) -> bool {
        if self.broken {
            return false;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.broken = true;
            return false;
        }
        let Ok(mut line) = serde_json::to_string(message) else {
            return false;
        };
        line.push('\n');
        let ok = match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()).is_ok(),
            None => false,
        };
        if !ok {
            self.broken = true;
        }
        ok
    }

    /// True exactly once after the worker died on its own, so the
    /// orchestrator can warn a single time before falling back.
    pub fn take_unexpected_exit(&mut self) -> bool {
        if self.broken && !self.exit_reported {
            self.exit_reported = true;
            return true;
        }
        false
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Graceful shutdown: closing stdin ends the worker's message loop.
    pub fn kill(&mut self) {
        self.stdin = None;
        let _ = self.child.wait();
    }
}

impl Drop for ForkedTypeChecker {
    fn drop(&mut self) {
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Worker-side checker state, rebuilt per Update over a shared source-file
/// cache so unchanged files keep their parsed trees.
pub struct TypeCheckerWorker {
    options: CompilerOptions,
    jit_mode: bool,
    root_names: Vec<String>,
    host: Rc<dyn CompilerHost>,
    cache: Rc<RefCell<SourceFileCache>>,
    cancellation: Arc<AtomicBool>,
}

impl TypeCheckerWorker {
    pub fn new(
        options: CompilerOptions,
        base_path: &str,
        jit_mode: bool,
        root_names: Vec<String>,
    ) -> Self {
        let base: Rc<dyn CompilerHost> =
            Rc::new(NodeCompilerHost::with_current_directory(base_path));
        Self::with_host(options, base, jit_mode, root_names)
    }

    pub fn with_host(
        options: CompilerOptions,
        base: Rc<dyn CompilerHost>,
        jit_mode: bool,
        root_names: Vec<String>,
    ) -> Self {
        let cache = Rc::new(RefCell::new(SourceFileCache::new()));
        let dependencies = Rc::new(RefCell::new(FileDependencyMap::new()));
        let host = create_augmented_host(
            base,
            HostOptions::default(),
            cache.clone(),
            dependencies,
        );
        Self {
            options,
            jit_mode,
            root_names,
            host,
            cache,
            cancellation: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token observed between diagnostic batches; setting it aborts the
    /// remainder of the current update. The caller clears it before each
    /// pass.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation.clone()
    }

    /// Share a token with the message reader so an `Update` arriving
    /// mid-pass can abandon the pass in flight.
    pub fn install_cancellation_token(&mut self, token: Arc<AtomicBool>) {
        self.cancellation = token;
    }

    fn cancelled(&self) -> bool {
        self.cancellation.load(Ordering::SeqCst)
    }

    /// Run one diagnostic pass over the updated program and report through
    /// the logger. Errors never terminate the worker.
    pub fn update(
        &mut self,
        root_names: &[String],
        changed_files: &[String],
        logger: &dyn Logger,
    ) {
        if self.cancelled() {
            return;
        }
        if !root_names.is_empty() {
            self.root_names = root_names.to_vec();
        }
        {
            let mut cache = self.cache.borrow_mut();
            for file in changed_files {
                cache.remove(&normalize_path(file));
            }
        }

        let program = TsProgram::new(&self.root_names, self.options.clone(), &self.host);
        logger.debug(&format!(
            "TypeChecker: checking {} files ({}).",
            program.get_source_files().len(),
            if self.jit_mode { "JIT" } else { "AOT" }
        ));
        let mut diagnostics = program.get_options_diagnostics();
        if self.cancelled() {
            return;
        }
        diagnostics.extend(program.get_syntactic_diagnostics());
        if self.cancelled() {
            return;
        }
        diagnostics.extend(program.get_semantic_diagnostics());

        if !diagnostics.is_empty() {
            logger.error(&format_diagnostics(&diagnostics));
        }
    }
}

/// Worker message loop: one JSON message per line until stdin closes.
///
/// Messages are read on a dedicated thread so an `Update` arriving while a
/// diagnostic pass is still running raises the cancellation token and the
/// stale pass is abandoned at its next batch boundary.
pub fn run_type_checker_worker<R>(input: R, logger: &dyn Logger) -> anyhow::Result<()>
where
    R: BufRead + Send + 'static,
{
    let cancellation = Arc::new(AtomicBool::new(false));
    let pending = cancellation.clone();
    let (sender, receiver) = mpsc::channel::<Result<TypeCheckerMessage, String>>();
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message = serde_json::from_str::<TypeCheckerMessage>(trimmed);
            if matches!(&message, Ok(TypeCheckerMessage::Update { .. })) {
                // A newer update supersedes whatever pass is in flight.
                pending.store(true, Ordering::SeqCst);
            }
            if sender.send(message.map_err(|e| e.to_string())).is_err() {
                break;
            }
        }
    });

    let mut worker: Option<TypeCheckerWorker> = None;
    for message in receiver {
        match message {
            Ok(TypeCheckerMessage::Init {
                compiler_options,
                base_path,
                jit_mode,
                root_names,
            }) => {
                let mut initialized =
                    TypeCheckerWorker::new(compiler_options, &base_path, jit_mode, root_names);
                initialized.install_cancellation_token(cancellation.clone());
                worker = Some(initialized);
            }
            Ok(TypeCheckerMessage::Update {
                root_names,
                changed_compilation_files,
            }) => match worker.as_mut() {
                Some(worker) => {
                    cancellation.store(false, Ordering::SeqCst);
                    worker.update(&root_names, &changed_compilation_files, logger);
                }
                None => logger.error("TypeChecker: update received before initialization."),
            },
            Err(error) => {
                logger.error(&format!("TypeChecker: unknown message: {}", error));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, NullLogger};
    use std::io::Cursor;
    use std::sync::Mutex;
    use ts::InMemoryCompilerHost;

    #[derive(Default)]
    struct RecordingLogger {
        errors: Mutex<Vec<String>>,
    }

    impl Logger for RecordingLogger {
        fn level(&self) -> LogLevel {
            LogLevel::Debug
        }
        fn debug(&self, _message: &str) {}
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn messages_round_trip_as_tagged_json() {
        let message = TypeCheckerMessage::Update {
            root_names: vec!["/src/main.ts".to_string()],
            changed_compilation_files: vec!["/src/app.ts".to_string()],
        };
        let encoded = serde_json::to_string(&message).unwrap();
        assert!(encoded.contains("\"kind\":\"Update\""));
        let decoded: TypeCheckerMessage = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(decoded, TypeCheckerMessage::Update { .. }));
    }

    #[test]
    fn debugger_flags_are_stripped_from_exec_args() {
        let args = filtered_exec_args(
            ["--inspect=9229", "--debug-brk", "--max-old-space-size=4096"]
                .iter()
                .copied(),
        );
        assert_eq!(args, vec!["--max-old-space-size=4096"]);
    }

    fn worker_over(host: Rc<InMemoryCompilerHost>, roots: &[&str]) -> TypeCheckerWorker {
        TypeCheckerWorker::with_host(
            CompilerOptions::default(),
            host,
            false,
            roots.iter().map(|r| r.to_string()).collect(),
        )
    }

    #[test]
    fn update_reports_diagnostics_through_the_logger() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "import { X } from './missing';\n");
        let mut worker = worker_over(host, &["/src/main.ts"]);
        let logger = RecordingLogger::default();
        worker.update(&[], &[], &logger);
        let errors = logger.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("TS2307"));
    }

    #[test]
    fn clean_program_logs_nothing() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "const a = 1;\n");
        let mut worker = worker_over(host, &["/src/main.ts"]);
        let logger = RecordingLogger::default();
        worker.update(&[], &[], &logger);
        assert!(logger.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn changed_files_are_reparsed_on_update() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "import { X } from './missing';\n");
        let mut worker = worker_over(host.clone(), &["/src/main.ts"]);
        let logger = RecordingLogger::default();
        worker.update(&[], &[], &logger);

        host.add_file("/src/main.ts", "const fixed = true;\n");
        worker.update(&[], &["/src/main.ts".to_string()], &logger);
        assert_eq!(logger.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn a_pending_cancellation_abandons_the_pass() {
        let host = Rc::new(InMemoryCompilerHost::new("/p"));
        host.add_file("/src/main.ts", "import { X } from './missing';\n");
        let mut worker = worker_over(host, &["/src/main.ts"]);
        let logger = RecordingLogger::default();
        worker.cancellation_token().store(true, Ordering::SeqCst);
        worker.update(&[], &[], &logger);
        assert!(logger.errors.lock().unwrap().is_empty());

        // A cleared token lets the next pass run to completion.
        worker.cancellation_token().store(false, Ordering::SeqCst);
        worker.update(&[], &[], &logger);
        assert_eq!(logger.errors.lock().unwrap().len(), 1);
    }

    fn init_line(root_names: &[&str]) -> String {
        serde_json::to_string(&TypeCheckerMessage::Init {
            compiler_options: CompilerOptions::default(),
            base_path: "/p".to_string(),
            jit_mode: true,
            root_names: root_names.iter().map(|r| r.to_string()).collect(),
        })
        .unwrap()
    }

    fn update_line() -> String {
        serde_json::to_string(&TypeCheckerMessage::Update {
            root_names: Vec::new(),
            changed_compilation_files: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn worker_loop_processes_init_then_update() {
        let logger = NullLogger;
        let input = Cursor::new(format!("{}\n{}\n", init_line(&[]), update_line()));
        run_type_checker_worker(input, &logger).unwrap();
    }

    #[test]
    fn update_before_init_is_reported_not_fatal() {
        let logger = RecordingLogger::default();
        let input = Cursor::new(format!("{}\nnot-json\n", update_line()));
        run_type_checker_worker(input, &logger).unwrap();
        assert_eq!(logger.errors.lock().unwrap().len(), 2);
    }

    /// Blocks on a channel so the test controls exactly when the next
    /// message line becomes readable.
    struct ChannelReader {
        receiver: mpsc::Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl std::io::Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.receiver.recv() {
                    Ok(bytes) => self.pending = bytes,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    /// Feeds a second update into the worker's input while the first pass
    /// is running, then closes the input once the second pass starts.
    struct MidPassSender {
        sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        passes: std::sync::atomic::AtomicUsize,
        errors: Mutex<Vec<String>>,
    }

    impl Logger for MidPassSender {
        fn level(&self) -> LogLevel {
            LogLevel::Debug
        }
        fn debug(&self, _message: &str) {
            let pass = self.passes.fetch_add(1, Ordering::SeqCst);
            let mut sender = self.sender.lock().unwrap();
            if pass == 0 {
                if let Some(tx) = sender.as_ref() {
                    let _ = tx.send(format!("{}\n", update_line()).into_bytes());
                }
                // Give the reader thread time to raise the token.
                std::thread::sleep(std::time::Duration::from_millis(250));
            } else {
                *sender = None;
            }
        }
        fn info(&self, _message: &str) {}
        fn warn(&self, _message: &str) {}
        fn error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn a_newer_update_cancels_the_pass_in_flight() {
        let (sender, receiver) = mpsc::channel();
        let _ = sender.send(format!("{}\n{}\n", init_line(&["/src/main.ts"]), update_line())
            .into_bytes());
        let logger = MidPassSender {
            sender: Mutex::new(Some(sender)),
            passes: std::sync::atomic::AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
        };
        let input = std::io::BufReader::new(ChannelReader {
            receiver,
            pending: Vec::new(),
        });
        run_type_checker_worker(input, &logger).unwrap();

        // Both passes started, but only the second ran to completion: the
        // missing-root diagnostic is reported exactly once.
        assert_eq!(logger.passes.load(Ordering::SeqCst), 2);
        assert_eq!(logger.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn unexpected_worker_exit_is_reported_exactly_once() {
        let mut checker = ForkedTypeChecker::spawn("true", &[]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        let sent = checker.send(&TypeCheckerMessage::Update {
            root_names: Vec::new(),
            changed_compilation_files: Vec::new(),
        });
        assert!(!sent);
        assert!(checker.is_broken());
        assert!(checker.take_unexpected_exit());
        assert!(!checker.take_unexpected_exit());
    }
}
