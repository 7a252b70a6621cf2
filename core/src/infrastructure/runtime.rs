// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandbox runtime adapters. `DockerRuntime` is the default production
//! adapter; `ProcessRuntime` exists for local and test use where a Docker
//! daemon is not available.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use dashmap::DashMap;
use futures::StreamExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::runtime::{
    InstanceId, InstanceStatus, SandboxConfig, SandboxError, SandboxInput, SandboxOutput, SandboxRuntime, ToolCallHandler,
    ToolCallRequest, APPROVAL_DENIED_PREFIX, TOOL_CALL_PREFIX,
};

/// Consumes one line of a sandboxed process's stdout. A tool-call-protocol
/// line is routed to `handler` and its outcome serialized into the reply to
/// write back; everything else is ordinary program output, accumulated into
/// `stdout_buf` verbatim.
async fn handle_protocol_line(line: &str, run_id: &str, handler: &dyn ToolCallHandler, stdout_buf: &mut String) -> Option<String> {
    let Some(json) = line.strip_prefix(TOOL_CALL_PREFIX) else {
        stdout_buf.push_str(line);
        stdout_buf.push('\n');
        return None;
    };
    let Ok(mut request) = serde_json::from_str::<ToolCallRequest>(json) else {
        return None;
    };
    request.run_id = run_id.to_string();
    let outcome = handler.handle(request).await;
    serde_json::to_string(&outcome).ok().map(|s| format!("{s}\n"))
}

/// Generates the self-contained Node entrypoint `ProcessRuntime` runs: a
/// `tools` proxy that round-trips every call through the stdout/stdin
/// tool-call wire protocol, wrapping the user's code in an async IIFE whose
/// return value is printed as `result: <json>`.
fn build_node_entrypoint(code: &str) -> String {
    const TEMPLATE: &str = r##"
const readline = require('readline');
const __rl = readline.createInterface({ input: process.stdin, terminal: false });
const __buffered = [];
const __waiters = [];
__rl.on('line', (line) => {
  const waiter = __waiters.shift();
  if (waiter) waiter(line);
  else __buffered.push(line);
});
function __nextLine() {
  return new Promise((resolve) => {
    if (__buffered.length) resolve(__buffered.shift());
    else __waiters.push(resolve);
  });
}
let __callSeq = 0;
function __toolsProxy(path) {
  return new Proxy(function () {}, {
    get(_t, prop) {
      if (typeof prop !== 'string') return undefined;
      return __toolsProxy(path ? path + '.' + prop : prop);
    },
    apply(_t, _thisArg, args) {
      const callId = 'c' + (++__callSeq);
      const request = { call_id: callId, tool_path: path, input: args[0] ?? {} };
      process.stdout.write(__TOOL_CALL_PREFIX__ + JSON.stringify(request) + '\n');
      return __nextLine().then((line) => {
        const outcome = JSON.parse(line);
        if (outcome.kind === 'ok') return outcome.value;
        if (outcome.kind === 'denied') throw new Error(__APPROVAL_DENIED_PREFIX__ + outcome.reason);
        throw new Error(outcome.error);
      });
    },
  });
}
const tools = __toolsProxy('');

(async () => {
  try {
    const __result = await (async () => {
__USER_CODE__
    })();
    process.stdout.write('result: ' + JSON.stringify(__result === undefined ? null : __result) + '\n');
    process.exit(0);
  } catch (err) {
    process.stderr.write(String(err && err.message ? err.message : err) + '\n');
    process.exit(1);
  }
})();
"##;

    TEMPLATE
        .replace("__TOOL_CALL_PREFIX__", &serde_json::to_string(TOOL_CALL_PREFIX).unwrap())
        .replace("__APPROVAL_DENIED_PREFIX__", &serde_json::to_string(APPROVAL_DENIED_PREFIX).unwrap())
        .replace("__USER_CODE__", code)
}

/// Docker-backed sandbox runtime. One container per spawned instance, torn
/// down on `terminate` or timeout.
pub struct DockerRuntime {
    docker: Docker,
    image: String,
}

impl DockerRuntime {
    pub fn new(docker: Docker, image: impl Into<String>) -> Self {
        Self {
            docker,
            image: image.into(),
        }
    }

    pub fn connect_with_socket(socket_path: &str, image: impl Into<String>) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_unix(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| SandboxError::SpawnFailed(e.to_string()))?;
        Ok(Self::new(docker, image))
    }

    pub async fn healthcheck(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::SpawnFailed(format!("docker daemon unreachable: {e}")))
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn spawn(&self, config: &SandboxConfig) -> Result<InstanceId, SandboxError> {
        let name = format!("codebroker-task-{}", uuid::Uuid::new_v4());
        let container_config = Config {
            image: Some(self.image.clone()),
            tty: Some(false),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(config.resources.memory_bytes as i64),
                nano_cpus: Some((config.resources.cpu_millis as i64) * 1_000_000),
                network_mode: Some("none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), container_config)
            .await
            .map_err(|e| SandboxError::SpawnFailed(e.to_string()))?;

        if let Err(e) = self.docker.start_container(&name, None::<StartContainerOptions<String>>).await {
            let _ = self.docker.remove_container(&name, Some(RemoveContainerOptions { force: true, ..Default::default() })).await;
            return Err(SandboxError::SpawnFailed(e.to_string()));
        }

        Ok(InstanceId(name))
    }

    async fn execute(&self, instance: &InstanceId, input: SandboxInput) -> Result<SandboxOutput, SandboxError> {
        // The container's entrypoint reads `{runId, code}` from stdin, then
        // speaks the same tool-call wire protocol as `ProcessRuntime`'s
        // generated harness over the rest of the attached stream.
        let AttachContainerResults { mut output, mut input: stdin } = self
            .docker
            .attach_container(
                &instance.0,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;

        let envelope = serde_json::json!({ "runId": input.run_id, "code": input.code });
        stdin
            .write_all(format!("{envelope}\n").as_bytes())
            .await
            .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let mut pending_stdout = String::new();

        while let Some(frame) = output.next().await {
            let frame = frame.map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;
            match frame {
                LogOutput::StdOut { message } => {
                    pending_stdout.push_str(&String::from_utf8_lossy(&message));
                    while let Some(idx) = pending_stdout.find('\n') {
                        let line: String = pending_stdout.drain(..=idx).collect();
                        let line = line.trim_end_matches('\n').to_string();
                        if let Some(reply) = handle_protocol_line(&line, &input.run_id, input.handler.as_ref(), &mut stdout_buf).await {
                            if stdin.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                LogOutput::StdErr { message } => stderr_buf.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }

        let inspect = self
            .docker
            .inspect_container(&instance.0, None)
            .await
            .map_err(|_| SandboxError::InstanceNotFound(instance.0.clone()))?;

        let exit_code = inspect
            .state
            .and_then(|s| s.exit_code)
            .unwrap_or(0) as i32;

        Ok(SandboxOutput {
            exit_code,
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }

    async fn terminate(&self, instance: &InstanceId) -> Result<(), SandboxError> {
        let _ = self
            .docker
            .stop_container(&instance.0, Some(StopContainerOptions { t: 5 }))
            .await;
        self.docker
            .remove_container(&instance.0, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
            .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))
    }

    async fn status(&self, instance: &InstanceId) -> Result<InstanceStatus, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(&instance.0, None)
            .await
            .map_err(|_| SandboxError::InstanceNotFound(instance.0.clone()))?;

        let running = inspect.state.and_then(|s| s.running).unwrap_or(false);
        Ok(if running { InstanceStatus::Running } else { InstanceStatus::Exited })
    }
}

struct ProcessInstance {
    child: tokio::sync::Mutex<Option<tokio::process::Child>>,
}

/// Bare-process sandbox runtime for local development and tests, executing
/// code with a plain subprocess instead of a container.
pub struct ProcessRuntime {
    interpreter: String,
    instances: DashMap<String, ProcessInstance>,
}

impl ProcessRuntime {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            instances: DashMap::new(),
        }
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new("node")
    }
}

#[async_trait]
impl SandboxRuntime for ProcessRuntime {
    async fn spawn(&self, _config: &SandboxConfig) -> Result<InstanceId, SandboxError> {
        let id = InstanceId(uuid::Uuid::new_v4().to_string());
        self.instances.insert(
            id.0.clone(),
            ProcessInstance {
                child: tokio::sync::Mutex::new(None),
            },
        );
        Ok(id)
    }

    async fn execute(&self, instance: &InstanceId, input: SandboxInput) -> Result<SandboxOutput, SandboxError> {
        let entry = self
            .instances
            .get(&instance.0)
            .ok_or_else(|| SandboxError::InstanceNotFound(instance.0.clone()))?;

        let script = build_node_entrypoint(&input.code);

        let mut child = Command::new(&self.interpreter)
            .arg("--eval")
            .arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::SpawnFailed(e.to_string()))?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");
        *entry.child.lock().await = Some(child);

        let mut lines = BufReader::new(stdout).lines();
        let mut stdout_buf = String::new();

        let pump = async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(reply) = handle_protocol_line(&line, &input.run_id, input.handler.as_ref(), &mut stdout_buf).await {
                    if stdin.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            let _ = stdin.shutdown().await;
        };

        let mut stderr_buf = Vec::new();
        let drain_stderr = stderr_pipe.read_to_end(&mut stderr_buf);

        let (_, stderr_result) = tokio::join!(pump, drain_stderr);
        stderr_result.map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?;

        let status = {
            let mut guard = entry.child.lock().await;
            let child = guard.as_mut().ok_or_else(|| SandboxError::InstanceNotFound(instance.0.clone()))?;
            timeout(Duration::from_secs(60), child.wait())
                .await
                .map_err(|_| SandboxError::TimedOut)?
                .map_err(|e| SandboxError::ExecutionFailed(e.to_string()))?
        };

        *entry.child.lock().await = None;

        Ok(SandboxOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout_buf,
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        })
    }

    async fn terminate(&self, instance: &InstanceId) -> Result<(), SandboxError> {
        if let Some((_, entry)) = self.instances.remove(&instance.0) {
            if let Some(mut child) = entry.child.into_inner() {
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    async fn status(&self, instance: &InstanceId) -> Result<InstanceStatus, SandboxError> {
        if self.instances.contains_key(&instance.0) {
            Ok(InstanceStatus::Running)
        } else {
            Err(SandboxError::InstanceNotFound(instance.0.clone()))
        }
    }
}
