//! Process-backed executor: a throwaway Docker container, or a local program.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    ExecutionReport, SandboxError, SandboxExecutor, SandboxInvocation, SandboxWorkspace,
    DIAGNOSTIC_TAIL_BYTES,
};
use crate::config::{SandboxBackend, SandboxSettings};
use crate::sanitize;

/// Mount points inside the container.
const CONTAINER_INPUT: &str = "/sandbox/input";
const CONTAINER_OUTPUT: &str = "/sandbox/output";

/// Environment variables telling a local program where its directories are.
pub const INPUT_DIR_ENV: &str = "SANDBOX_INPUT_DIR";
pub const OUTPUT_DIR_ENV: &str = "SANDBOX_OUTPUT_DIR";

/// How long to wait for stream readers once the child is gone. A grandchild
/// that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct ProcessSandbox {
    backend: SandboxBackend,
    max_capture_bytes: usize,
    image_ready: OnceCell<()>,
}

impl ProcessSandbox {
    pub fn new(settings: &SandboxSettings) -> Self {
        Self {
            backend: settings.backend.clone(),
            max_capture_bytes: settings.max_capture_bytes,
            image_ready: OnceCell::new(),
        }
    }

    fn program(&self) -> String {
        match &self.backend {
            SandboxBackend::Docker { binary, .. } => binary.clone(),
            SandboxBackend::Local { program, .. } => program.display().to_string(),
        }
    }

    /// Builds the child command. Secret values are only ever placed in the
    /// child's environment; `docker run` receives bare `-e NAME` flags and
    /// copies the values from its own environment.
    fn command(
        &self,
        invocation: &SandboxInvocation,
        workspace: &SandboxWorkspace,
        container_name: &str,
    ) -> Command {
        let mut cmd = match &self.backend {
            SandboxBackend::Docker {
                binary,
                image,
                run_args,
                ..
            } => {
                let mut cmd = Command::new(binary);
                cmd.arg("run")
                    .arg("--rm")
                    .arg("--name")
                    .arg(container_name)
                    .arg("-v")
                    .arg(mount(workspace.input_dir(), CONTAINER_INPUT, true))
                    .arg("-v")
                    .arg(mount(workspace.output_dir(), CONTAINER_OUTPUT, false))
                    .args(run_args);
                for name in invocation.env_names() {
                    cmd.arg("-e").arg(name);
                }
                cmd.arg(image).arg(invocation.entry_point.as_str());
                cmd
            }
            SandboxBackend::Local { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args)
                    .arg(invocation.entry_point.as_str())
                    .env_clear()
                    .env(INPUT_DIR_ENV, workspace.input_dir())
                    .env(OUTPUT_DIR_ENV, workspace.output_dir());
                if let Some(path) = std::env::var_os("PATH") {
                    cmd.env("PATH", path);
                }
                cmd
            }
        };

        for (name, value) in invocation.secrets() {
            cmd.env(name, value.expose_secret());
        }
        for (name, value) in invocation.config_values() {
            cmd.env(name, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Builds the Docker image on first use when it is missing. Runs at most
    /// once per executor; a failed attempt is retried on the next call.
    async fn ensure_image(&self) -> Result<(), SandboxError> {
        let SandboxBackend::Docker {
            binary,
            image,
            build_context,
            ..
        } = &self.backend
        else {
            return Ok(());
        };

        self.image_ready
            .get_or_try_init(|| async {
                let present = Command::new(binary)
                    .args(["image", "inspect", image.as_str()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|source| SandboxError::Spawn {
                        program: binary.clone(),
                        source,
                    })?
                    .success();
                if present {
                    return Ok(());
                }

                let Some(context) = build_context else {
                    return Err(SandboxError::Image {
                        image: image.clone(),
                        reason: "image not found and no build context configured".to_string(),
                    });
                };

                info!(image = %image, "Building sandbox image");
                let output = Command::new(binary)
                    .arg("build")
                    .arg("-t")
                    .arg(image)
                    .arg(context)
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|source| SandboxError::Spawn {
                        program: binary.clone(),
                        source,
                    })?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(SandboxError::Image {
                        image: image.clone(),
                        reason: sanitize::mask_credentials(&sanitize::tail(
                            &stderr,
                            DIAGNOSTIC_TAIL_BYTES,
                        )),
                    });
                }
                Ok::<(), SandboxError>(())
            })
            .await
            .map(|_| ())
    }

    /// Best-effort stop of a timed-out container. Killing the `docker run`
    /// client alone does not stop the container.
    async fn kill_container(&self, name: &str) {
        if let SandboxBackend::Docker { binary, .. } = &self.backend {
            let result = Command::new(binary)
                .args(["kill", name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                warn!(container = name, error = %e, "Failed to kill timed-out container");
            }
        }
    }
}

#[async_trait]
impl SandboxExecutor for ProcessSandbox {
    async fn execute(
        &self,
        invocation: &SandboxInvocation,
        workspace: &SandboxWorkspace,
    ) -> Result<ExecutionReport, SandboxError> {
        let entry_point = invocation.entry_point;
        let missing = invocation.missing_secrets();
        if !missing.is_empty() {
            return Err(SandboxError::Configuration {
                entry_point,
                missing,
            });
        }

        self.ensure_image().await?;
        workspace.seal_input()?;

        let container_name = format!(
            "docsmith-{}-{}",
            entry_point,
            uuid::Uuid::new_v4().simple()
        );
        let mut cmd = self.command(invocation, workspace, &container_name);

        debug!(
            entry_point = %entry_point,
            workspace = %sanitize::redact_path(workspace.root()),
            timeout_secs = invocation.timeout.as_secs(),
            "Spawning sandbox"
        );

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: self.program(),
            source,
        })?;

        let stdout = Capture::spawn(child.stdout.take(), self.max_capture_bytes);
        let stderr = Capture::spawn(child.stderr.take(), self.max_capture_bytes);

        match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let duration = start.elapsed();
                let stdout = stdout.finish().await;
                let stderr = stderr.finish().await;
                if status.success() {
                    Ok(ExecutionReport {
                        duration,
                        stdout,
                        stderr,
                    })
                } else {
                    Err(SandboxError::NonZeroExit {
                        entry_point,
                        code: status.code(),
                        stderr_tail: diagnostic(invocation, &stderr),
                    })
                }
            }
            Ok(Err(source)) => Err(SandboxError::Spawn {
                program: self.program(),
                source,
            }),
            Err(_elapsed) => {
                warn!(
                    entry_point = %entry_point,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Sandbox timed out, terminating"
                );
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Child already exited");
                }
                self.kill_container(&container_name).await;
                let _ = tokio::time::timeout(DRAIN_GRACE, child.wait()).await;
                let stderr = stderr.finish().await;
                let _ = stdout.finish().await;
                Err(SandboxError::Timeout {
                    entry_point,
                    timeout: invocation.timeout,
                    stderr_tail: diagnostic(invocation, &stderr),
                })
            }
        }
    }
}

fn diagnostic(invocation: &SandboxInvocation, stderr: &str) -> String {
    let secrets: Vec<&str> = invocation
        .secrets()
        .values()
        .map(|s| s.expose_secret())
        .collect();
    sanitize::diagnostic_tail(stderr, &secrets, DIAGNOSTIC_TAIL_BYTES)
}

fn mount(host: &Path, container: &str, read_only: bool) -> String {
    let suffix = if read_only { ":ro" } else { "" };
    format!("{}:{}{}", host.display(), container, suffix)
}

/// A stream being read into a capped buffer. Bytes beyond the cap are read
/// and discarded so the child never blocks on a full pipe.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(stream: Option<R>, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            let room = cap.saturating_sub(buf.len());
                            buf.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Waits briefly for the reader, then returns whatever was captured.
    async fn finish(self) -> String {
        let Capture { buffer, mut task } = self;
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        let bytes = buffer.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sandbox::{EntryPoint, API_KEY_ENV};
    use secrecy::SecretString;
    use std::path::PathBuf;

    fn sandbox(script: &str) -> ProcessSandbox {
        let settings = SandboxSettings {
            backend: SandboxBackend::Local {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".to_string(), script.to_string(), "sandbox".to_string()],
            },
            max_capture_bytes: 64,
            ..Default::default()
        };
        ProcessSandbox::new(&settings)
    }

    fn invocation(timeout: Duration) -> SandboxInvocation {
        SandboxInvocation::new(EntryPoint::GenerateArticle, timeout)
    }

    #[tokio::test]
    async fn test_success_writes_output_and_sees_env() {
        let sb = sandbox(
            r#"printf '%s|%s' "$1" "$DOCSMITH_API_KEY" > "$SANDBOX_OUTPUT_DIR/title.txt""#,
        );
        let ws = SandboxWorkspace::create(None).unwrap();
        let inv = invocation(Duration::from_secs(10))
            .secret(API_KEY_ENV, Some(SecretString::from("key-123")))
            .require(API_KEY_ENV);

        sb.execute(&inv, &ws).await.unwrap();
        let title = std::fs::read_to_string(ws.output_dir().join("title.txt")).unwrap();
        assert_eq!(title, "generate-article|key-123");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_local_backend_clears_ambient_environment() {
        std::env::set_var("DOCSMITH_AMBIENT_LEAK", "leaked");
        let sb = sandbox(r#"printf '%s' "${DOCSMITH_AMBIENT_LEAK:-clean}" > "$SANDBOX_OUTPUT_DIR/env.txt""#);
        let ws = SandboxWorkspace::create(None).unwrap();
        sb.execute(&invocation(Duration::from_secs(10)), &ws)
            .await
            .unwrap();
        std::env::remove_var("DOCSMITH_AMBIENT_LEAK");
        let value = std::fs::read_to_string(ws.output_dir().join("env.txt")).unwrap();
        assert_eq!(value, "clean");
    }

    #[tokio::test]
    async fn test_local_backend_cannot_modify_input() {
        let sb = sandbox(
            r#"echo tampered > "$SANDBOX_INPUT_DIR/context.json"; echo extra > "$SANDBOX_INPUT_DIR/extra.txt"; exit 0"#,
        );
        let ws = SandboxWorkspace::create(None).unwrap();
        std::fs::write(ws.input_dir().join("context.json"), "{}").unwrap();

        // Permission bits do not bind a privileged user; only assert on the
        // sandbox's writes where they bind this process too.
        ws.seal_input().unwrap();
        let enforced = std::fs::OpenOptions::new()
            .append(true)
            .open(ws.input_dir().join("context.json"))
            .is_err();

        sb.execute(&invocation(Duration::from_secs(10)), &ws)
            .await
            .unwrap();

        let context = ws.input_dir().join("context.json");
        assert!(std::fs::metadata(&context).unwrap().permissions().readonly());
        if enforced {
            assert_eq!(std::fs::read_to_string(&context).unwrap(), "{}");
            assert!(!ws.input_dir().join("extra.txt").exists());
        }
    }

    #[tokio::test]
    async fn test_missing_secret_fails_before_spawn() {
        let marker = tempfile::tempdir().unwrap();
        let script = format!("touch {}/ran", marker.path().display());
        let sb = sandbox(&script);
        let ws = SandboxWorkspace::create(None).unwrap();
        let inv = invocation(Duration::from_secs(10)).require(API_KEY_ENV);

        let err = sb.execute(&inv, &ws).await.unwrap_err();
        assert!(matches!(err, SandboxError::Configuration { ref missing, .. } if missing == &vec![API_KEY_ENV.to_string()]));
        assert!(!marker.path().join("ran").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr_tail() {
        let sb = sandbox("echo 'model overloaded' >&2; exit 3");
        let ws = SandboxWorkspace::create(None).unwrap();
        let err = sb
            .execute(&invocation(Duration::from_secs(10)), &ws)
            .await
            .unwrap_err();
        match err {
            SandboxError::NonZeroExit {
                code, stderr_tail, ..
            } => {
                assert_eq!(code, Some(3));
                assert!(stderr_tail.contains("model overloaded"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let sb = sandbox("exec sleep 30");
        let ws = SandboxWorkspace::create(None).unwrap();
        let start = Instant::now();
        let err = sb
            .execute(&invocation(Duration::from_millis(200)), &ws)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_capture_is_capped() {
        let sb = sandbox("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done");
        let ws = SandboxWorkspace::create(None).unwrap();
        let report = sb
            .execute(&invocation(Duration::from_secs(10)), &ws)
            .await
            .unwrap();
        assert_eq!(report.stdout.len(), 64);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let settings = SandboxSettings {
            backend: SandboxBackend::Local {
                program: PathBuf::from("/nonexistent/generator"),
                args: Vec::new(),
            },
            ..Default::default()
        };
        let sb = ProcessSandbox::new(&settings);
        let ws = SandboxWorkspace::create(None).unwrap();
        let err = sb
            .execute(&invocation(Duration::from_secs(1)), &ws)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[test]
    fn test_docker_command_keeps_secret_values_off_the_command_line() {
        let sb = ProcessSandbox::new(&SandboxSettings::default());
        let ws = SandboxWorkspace::create(None).unwrap();
        let inv = invocation(Duration::from_secs(1))
            .secret(API_KEY_ENV, Some(SecretString::from("top-secret")));
        let cmd = sb.command(&inv, &ws, "docsmith-test");

        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.iter().all(|a| !a.contains("top-secret")));
        assert!(args.windows(2).any(|w| w[0] == "-e" && w[1] == API_KEY_ENV));
        assert_eq!(args.last().map(String::as_str), Some("generate-article"));
        assert!(args.iter().any(|a| a.ends_with(":/sandbox/input:ro")));
    }
}
