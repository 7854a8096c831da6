use crate::errors::ImpactError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration) -> Result<(), ImpactError>;
}

pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ImpactError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, ImpactError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ImpactError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), ImpactError>;
    fn remove_file(&self, path: &Path) -> Result<(), ImpactError>;
    fn exists(&self, path: &Path) -> bool;
    /// Files directly inside `dir`, sorted by path. A missing directory is empty.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ImpactError>;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), ImpactError>;
    fn draw(&self, frame: &str) -> Result<(), ImpactError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Result<(), ImpactError> {
        std::thread::sleep(duration);
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ImpactError> {
        std::fs::read_to_string(path)
            .map_err(|e| ImpactError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ImpactError> {
        std::fs::write(path, contents)
            .map_err(|e| ImpactError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ImpactError> {
        std::fs::create_dir_all(path).map_err(|e| ImpactError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ImpactError> {
        std::fs::remove_file(path).map_err(|e| ImpactError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ImpactError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = std::fs::read_dir(dir)
            .map_err(|e| ImpactError::Io(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ImpactError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd
            .output()
            .map_err(|e| ImpactError::Process(format!("{}: {e}", request.program)))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), ImpactError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ImpactError::Io(e.to_string()))
    }

    fn draw(&self, frame: &str) -> Result<(), ImpactError> {
        self.write_line(frame.trim_end())
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        self.now.lock().map(|now| *now).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn sleep(&self, duration: Duration) -> Result<(), ImpactError> {
        let mut sleeps = self
            .sleeps
            .lock()
            .map_err(|_| ImpactError::Io("clock lock poisoned".to_string()))?;
        sleeps.push(duration);
        let mut now = self
            .now
            .lock()
            .map_err(|_| ImpactError::Io("clock lock poisoned".to_string()))?;
        *now += duration;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<ImpactError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        if let Ok(mut files) = fs.files.lock() {
            files.insert(path.into(), contents.into());
        }
        fs
    }

    pub fn set_fail_next(&self, error: ImpactError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn maybe_fail(&self) -> Result<(), ImpactError> {
        if let Some(err) = self.fail_next.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(err);
        }
        Ok(())
    }

    fn files(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<PathBuf, String>>, ImpactError> {
        self.files
            .lock()
            .map_err(|_| ImpactError::Io("files lock poisoned".to_string()))
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ImpactError> {
        self.maybe_fail()?;
        self.files()?
            .get(path)
            .cloned()
            .ok_or_else(|| ImpactError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), ImpactError> {
        self.maybe_fail()?;
        self.files()?
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ImpactError> {
        self.maybe_fail()?;
        if let Ok(mut dirs) = self.dirs.lock() {
            dirs.push(path.to_path_buf());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ImpactError> {
        self.maybe_fail()?;
        self.files()?.remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files().map(|f| f.contains_key(path)).unwrap_or(false)
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ImpactError> {
        self.maybe_fail()?;
        Ok(self
            .files()?
            .keys()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
    draws: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        self.draws.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), ImpactError> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(line.to_string());
        }
        Ok(())
    }

    fn draw(&self, frame: &str) -> Result<(), ImpactError> {
        if let Ok(mut draws) = self.draws.lock() {
            draws.push(frame.to_string());
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, ImpactError>>>>,
    requests: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, ImpactError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(output);
        }
    }

    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }));
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ImpactError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| ImpactError::Process("responses lock poisoned".to_string()))?;
        if responses.is_empty() {
            return Err(ImpactError::Process("no fake response queued".to_string()));
        }
        responses.remove(0)
    }
}
