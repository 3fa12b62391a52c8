use crate::errors::ReplayError;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stderr followed by stdout; linkers are not consistent about which one they use.
    pub fn diagnostics(&self) -> String {
        match (self.stderr.is_empty(), self.stdout.is_empty()) {
            (_, true) => self.stderr.clone(),
            (true, false) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
        }
    }
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, ReplayError>;
    /// Blocks until the process exits, or kills it once the request's timeout passes.
    fn wait(&self, handle: u64) -> Result<ProcessOutput, ReplayError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ReplayError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError>;
    /// Replaces any existing contents.
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReplayError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError>;
    fn remove_file(&self, path: &Path) -> Result<(), ReplayError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), ReplayError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReplayError> {
        std::fs::write(path, contents)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError> {
        std::fs::create_dir_all(path).map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReplayError> {
        std::fs::remove_file(path).map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

struct RunningChild {
    child: std::process::Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    timeout: Option<Duration>,
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, RunningChild>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }

    fn take_child(&self, handle: u64) -> Result<RunningChild, ReplayError> {
        self.state
            .lock()
            .map_err(|_| ReplayError::Process("process lock poisoned".to_string()))?
            .children
            .remove(&handle)
            .ok_or_else(|| ReplayError::Process(format!("unknown handle {handle}")))
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    source.map(|mut source| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = source.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, ReplayError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ReplayError::Process(format!("{}: {e}", request.program)))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut state = self
            .state
            .lock()
            .map_err(|_| ReplayError::Process("process lock poisoned".to_string()))?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(
            handle,
            RunningChild {
                child,
                stdout,
                stderr,
                timeout: request.timeout,
            },
        );
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, ReplayError> {
        let mut running = self.take_child(handle)?;
        let mut timed_out = false;

        let status = match running.timeout {
            None => running
                .child
                .wait()
                .map_err(|e| ReplayError::Process(e.to_string()))?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(status) = running
                        .child
                        .try_wait()
                        .map_err(|e| ReplayError::Process(e.to_string()))?
                    {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        timed_out = true;
                        let _ = running.child.kill();
                        break running
                            .child
                            .wait()
                            .map_err(|e| ReplayError::Process(e.to_string()))?;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: collect(running.stdout.take()),
            stderr: collect(running.stderr.take()),
            timed_out,
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), ReplayError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ReplayError::Io(e.to_string()))
    }
}

pub struct ReplayRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ReplayRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ReplayRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<ReplayError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: ReplayError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .cloned()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    fn maybe_fail(&self) -> Result<(), ReplayError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError> {
        self.maybe_fail()?;
        self.file(path)
            .ok_or_else(|| ReplayError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.files.lock().expect("files lock").remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), ReplayError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, ReplayError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, ReplayError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    /// Queues a completed process with the given exit code and streams.
    pub fn push_exit(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.push_response(Ok(ProcessOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
        }));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, ReplayError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn wait(&self, _handle: u64) -> Result<ProcessOutput, ReplayError> {
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(ReplayError::Process("no fake response queued".to_string()));
        }
        responses.remove(0)
    }
}
