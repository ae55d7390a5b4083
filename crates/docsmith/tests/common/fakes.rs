//! In-process stand-ins for the sandbox, the repository host, the job queue
//! and the notification sink.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use docsmith::broadcast::{JobEvent, NotificationSink};
use docsmith::domain::RepositoryRef;
use docsmith::error::WorkerError;
use docsmith::jobs::{JobQueue, JobRequest};
use docsmith::sandbox::{
    EntryPoint, ExecutionReport, SandboxError, SandboxExecutor, SandboxInvocation,
    SandboxWorkspace,
};
use docsmith::upstream::{SourceHost, UpstreamError};

/// What the scripted sandbox does on its next call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Writes the given files into `output/` and exits cleanly.
    Files(Vec<(&'static str, String)>),
    Timeout,
    Exit(i32),
    Panic,
}

impl Script {
    pub fn file(name: &'static str, contents: impl Into<String>) -> Self {
        Script::Files(vec![(name, contents.into())])
    }
}

/// One observed sandbox call.
#[derive(Debug, Clone)]
pub struct SandboxCall {
    pub entry_point: EntryPoint,
    /// `input/context.json` as staged for the run.
    pub context_json: String,
    pub env_names: Vec<String>,
}

/// Plays back scripts in order. With no script left it exits cleanly
/// without writing anything.
#[derive(Default)]
pub struct ScriptedSandbox {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<SandboxCall>>,
}

impl ScriptedSandbox {
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedSandbox {
    async fn execute(
        &self,
        invocation: &SandboxInvocation,
        workspace: &SandboxWorkspace,
    ) -> Result<ExecutionReport, SandboxError> {
        let missing = invocation.missing_secrets();
        if !missing.is_empty() {
            return Err(SandboxError::Configuration {
                entry_point: invocation.entry_point,
                missing,
            });
        }

        let context_json =
            std::fs::read_to_string(workspace.input_dir().join("context.json")).unwrap_or_default();
        self.calls.lock().unwrap().push(SandboxCall {
            entry_point: invocation.entry_point,
            context_json,
            env_names: invocation.env_names().map(str::to_string).collect(),
        });

        let script = self.scripts.lock().unwrap().pop_front();
        match script.unwrap_or(Script::Files(Vec::new())) {
            Script::Files(files) => {
                for (name, contents) in files {
                    std::fs::write(workspace.output_dir().join(name), contents)
                        .map_err(SandboxError::Workspace)?;
                }
                Ok(ExecutionReport {
                    duration: Duration::from_millis(5),
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            Script::Timeout => Err(SandboxError::Timeout {
                entry_point: invocation.entry_point,
                timeout: invocation.timeout,
                stderr_tail: String::new(),
            }),
            Script::Exit(code) => Err(SandboxError::NonZeroExit {
                entry_point: invocation.entry_point,
                code: Some(code),
                stderr_tail: "generator crashed".to_string(),
            }),
            Script::Panic => panic!("scripted sandbox panic"),
        }
    }
}

/// Serves a fixed head commit and diff. Can be switched to fail.
pub struct FakeSourceHost {
    pub head: Mutex<String>,
    pub diff: Mutex<String>,
    pub failing: Mutex<bool>,
    requests: AtomicUsize,
    methods: Mutex<Vec<&'static str>>,
}

impl Default for FakeSourceHost {
    fn default() -> Self {
        Self {
            head: Mutex::new("0123456789abcdef0123456789abcdef01234567".to_string()),
            diff: Mutex::new(String::new()),
            failing: Mutex::new(false),
            requests: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSourceHost {
    pub fn set_diff(&self, diff: &str) {
        *self.diff.lock().unwrap() = diff.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Names of the host methods called so far, in order.
    pub fn methods(&self) -> Vec<&'static str> {
        self.methods.lock().unwrap().clone()
    }

    fn respond(&self, method: &'static str, value: &Mutex<String>) -> Result<String, UpstreamError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.methods.lock().unwrap().push(method);
        if *self.failing.lock().unwrap() {
            return Err(UpstreamError::Http {
                status: 502,
                url: "https://api.example.test".to_string(),
                body: "bad gateway".to_string(),
            });
        }
        Ok(value.lock().unwrap().clone())
    }
}

#[async_trait]
impl SourceHost for FakeSourceHost {
    async fn head_commit(
        &self,
        _repo: &RepositoryRef,
        _token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        self.respond("head_commit", &self.head)
    }

    async fn commit_diff(
        &self,
        _repo: &RepositoryRef,
        _sha: &str,
        _token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        self.respond("commit_diff", &self.diff)
    }

    async fn compare(
        &self,
        _repo: &RepositoryRef,
        _base: &str,
        _head: &str,
        _token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        self.respond("compare", &self.diff)
    }

    async fn pull_request_diff(
        &self,
        _repo: &RepositoryRef,
        _number: u64,
        _token: Option<&SecretString>,
    ) -> Result<String, UpstreamError> {
        self.respond("pull_request_diff", &self.diff)
    }
}

/// Collects cascaded job requests instead of running them.
#[derive(Default)]
pub struct RecordingQueue {
    requests: Mutex<Vec<JobRequest>>,
}

impl RecordingQueue {
    pub fn requests(&self) -> Vec<JobRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl JobQueue for RecordingQueue {
    fn enqueue(&self, request: JobRequest) -> Result<(), WorkerError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}
