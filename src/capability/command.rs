use crate::capability::output_parse::parse_capability_reply;
use crate::capability::{
    io_error, timeout_ms, Capability, CapabilityError, CapabilityRequest, CapabilityResponse,
};
use crate::config::{CapabilityCommandConfig, DEFAULT_LOW_CONFIDENCE_THRESHOLD};
use crate::coordination::task::{CapabilityKind, StepStatus};
use serde::Serialize;
use std::io::{BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    task_id: &'a str,
    kind: CapabilityKind,
    input: &'a str,
    context: Vec<ContextEntry<'a>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextEntry<'a> {
    kind: CapabilityKind,
    status: StepStatus,
    summary: &'a str,
}

/// Runs an external program for one capability kind. The request is written to
/// stdin as JSON and the reply is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    kind: CapabilityKind,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    low_confidence_threshold: u8,
}

impl CommandCapability {
    pub fn new(kind: CapabilityKind, program: impl Into<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(crate::config::DEFAULT_CAPABILITY_TIMEOUT_SECONDS),
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn from_config(
        kind: CapabilityKind,
        config: &CapabilityCommandConfig,
        low_confidence_threshold: u8,
    ) -> Self {
        Self::new(kind, config.program.clone())
            .with_args(config.args.clone())
            .with_timeout(Duration::from_secs(config.timeout_seconds))
            .with_low_confidence_threshold(low_confidence_threshold)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_low_confidence_threshold(mut self, threshold: u8) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn render_request(&self, request: &CapabilityRequest<'_>) -> Result<Vec<u8>, CapabilityError> {
        let body = CommandRequest {
            task_id: request.task_id,
            kind: request.kind,
            input: request.focused_input,
            context: request
                .context
                .iter()
                .map(|result| ContextEntry {
                    kind: result.step.kind,
                    status: result.status,
                    summary: &result.summary,
                })
                .collect(),
        };
        serde_json::to_vec(&body).map_err(|err| CapabilityError::InvalidOutput {
            kind: self.kind,
            reason: format!("failed to encode request: {err}"),
        })
    }
}

impl Capability for CommandCapability {
    fn invoke(
        &self,
        request: &CapabilityRequest<'_>,
    ) -> Result<CapabilityResponse, CapabilityError> {
        let input = self.render_request(request)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CapabilityError::MissingProgram {
                    kind: self.kind,
                    program: self.program.clone(),
                })
            }
            Err(err) => return Err(io_error(&self.program, err)),
        };

        let mut stdin = child.stdin.take().ok_or_else(|| {
            io_error(&self.program, std::io::Error::other("missing stdin pipe"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            io_error(&self.program, std::io::Error::other("missing stdout pipe"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io_error(&self.program, std::io::Error::other("missing stderr pipe"))
        })?;

        // A program that exits without reading stdin closes the pipe early.
        let stdin_writer = thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });
        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = BufReader::new(stdout);
            let _ = reader.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buf);
            buf
        });

        let start = Instant::now();
        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait().map_err(|e| io_error(&self.program, e))?;
                        let _ = stdin_writer.join();
                        let _stdout = stdout_reader.join().unwrap_or_default();
                        let _stderr = stderr_reader.join().unwrap_or_default();
                        return Err(CapabilityError::Timeout {
                            kind: self.kind,
                            timeout_ms: timeout_ms(self.timeout),
                        });
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(io_error(&self.program, err)),
            }
        };

        let _ = stdin_writer.join();
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !exit_status.success() {
            return Err(CapabilityError::NonZeroExit {
                kind: self.kind,
                exit_code: exit_status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_capability_reply(self.kind, &stdout, self.low_confidence_threshold)
    }
}
