use super::{
    io_error, ChatMessage, ChatRequest, ChatResponse, FinishReason, Provider, ProviderError, Role,
};
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(120);

/// Side-channel adapter for a locally installed LM command-line tool.
/// The message list collapses into a single prompt passed as the final
/// argument; stdout becomes the assistant message. No tool calls.
pub struct CliProvider {
    name: String,
    binary: String,
    base_args: Vec<String>,
    timeout: Duration,
    enabled: bool,
}

impl CliProvider {
    pub fn new(name: &str, binary: &str, base_args: &[String]) -> Self {
        Self {
            name: name.to_string(),
            binary: binary.to_string(),
            base_args: base_args.to_vec(),
            timeout: DEFAULT_CLI_TIMEOUT,
            enabled: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flatten_prompt(messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let label = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool result",
            };
            prompt.push_str(label);
            prompt.push_str(":\n");
            prompt.push_str(&message.content);
            prompt.push_str("\n\n");
        }
        prompt.trim_end().to_string()
    }

    fn run(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.base_args)
            .arg(prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::MissingBinary {
                    provider: self.name.clone(),
                    binary: self.binary.clone(),
                })
            }
            Err(err) => return Err(io_error(Path::new(&self.binary), err)),
        };

        let stdout = child.stdout.take().ok_or_else(|| {
            io_error(
                Path::new(&self.binary),
                std::io::Error::other("missing stdout pipe"),
            )
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io_error(
                Path::new(&self.binary),
                std::io::Error::other("missing stderr pipe"),
            )
        })?;

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
                        let _ = child.wait();
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        return Err(ProviderError::Timeout {
                            provider: self.name.clone(),
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => return Err(io_error(Path::new(&self.binary), err)),
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !exit_status.success() {
            return Err(ProviderError::NonZeroExit {
                provider: self.name.clone(),
                exit_code: exit_status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(stdout.trim_end().to_string())
    }
}

impl Provider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        self.enabled
    }

    fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let prompt = Self::flatten_prompt(&request.messages);
        let output = self.run(&prompt)?;
        Ok(ChatResponse {
            provider: self.name.clone(),
            model: self.binary.clone(),
            message: ChatMessage::assistant(output),
            usage: None,
            finish: FinishReason::Stop,
        })
    }
}
