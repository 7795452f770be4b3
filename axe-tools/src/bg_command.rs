//! `bg_command`: manage long-running background processes.
//!
//! Each process gets a capped ring buffer for its combined output and a
//! collector task that marks it done on exit. Processes outlive the turn;
//! they are only killed through the `stop` action.

use crate::{is_dangerous, parse_input, ConfirmFn, Tool};
use axe_core::error::ToolError;
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;

/// Ring-buffer cap per process.
const MAX_BG_OUTPUT: usize = 64 * 1024;

/// Byte buffer that discards the oldest data past its cap.
pub struct CappedBuffer {
    max_size: usize,
    buf: Mutex<Vec<u8>>,
}

impl CappedBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buf: Mutex::new(Vec::new()),
        }
    }

    pub fn write(&self, data: &[u8]) {
        let Ok(mut buf) = self.buf.lock() else {
            return;
        };
        buf.extend_from_slice(data);
        if buf.len() > self.max_size {
            let excess = buf.len() - self.max_size;
            buf.drain(..excess);
        }
    }

    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct BgProc {
    id: u64,
    cmd: String,
    started: String,
    output: Arc<CappedBuffer>,
    done: AtomicBool,
    exit: Mutex<Option<String>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

pub struct BgCommand {
    confirm: Option<ConfirmFn>,
    procs: Mutex<Vec<Arc<BgProc>>>,
    seq: AtomicU64,
}

#[derive(Deserialize)]
struct Params {
    action: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    id: u64,
}

impl BgCommand {
    pub fn new(confirm: Option<ConfirmFn>) -> Self {
        Self {
            confirm,
            procs: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    fn find(&self, id: u64) -> Option<Arc<BgProc>> {
        self.procs
            .lock()
            .ok()
            .and_then(|procs| procs.iter().find(|p| p.id == id).cloned())
    }

    fn start(&self, command: &str) -> Result<String, ToolError> {
        if command.is_empty() {
            return Err(ToolError::InvalidArguments(
                "command is required for start".to_string(),
            ));
        }
        if is_dangerous(command) {
            return Err(ToolError::DangerousCommand(command.to_string()));
        }
        if let Some(confirm) = &self.confirm {
            if !confirm(command) {
                return Err(ToolError::UserRejected);
            }
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::execution(format!("start failed: {e}")))?;

        let output = Arc::new(CappedBuffer::new(MAX_BG_OUTPUT));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();

        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let proc = Arc::new(BgProc {
            id,
            cmd: command.to_string(),
            started: Local::now().format("%H:%M:%S").to_string(),
            output: Arc::clone(&output),
            done: AtomicBool::new(false),
            exit: Mutex::new(None),
            kill: Mutex::new(Some(kill_tx)),
        });
        if let Ok(mut procs) = self.procs.lock() {
            procs.push(Arc::clone(&proc));
        }

        // Collector: drain both pipes into the ring buffer, then reap.
        tokio::spawn(async move {
            let pumps = async {
                tokio::join!(
                    pump(stdout, Arc::clone(&output)),
                    pump(stderr, Arc::clone(&output)),
                );
            };
            tokio::pin!(pumps);
            let mut kill_rx = kill_rx;
            tokio::select! {
                _ = &mut pumps => {}
                _ = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("kill background process {id}: {e}");
                    }
                }
            }
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    if let Ok(mut exit) = proc.exit.lock() {
                        *exit = Some(status.to_string());
                    }
                }
                Err(e) => {
                    if let Ok(mut exit) = proc.exit.lock() {
                        *exit = Some(e.to_string());
                    }
                }
            }
            proc.done.store(true, Ordering::SeqCst);
        });

        Ok(format!("Started background process [{id}]: {command}"))
    }

    fn status(&self) -> String {
        let procs = match self.procs.lock() {
            Ok(procs) => procs,
            Err(_) => return "No background processes.".to_string(),
        };
        if procs.is_empty() {
            return "No background processes.".to_string();
        }
        let lines: Vec<String> = procs
            .iter()
            .map(|p| {
                let status = if p.done.load(Ordering::SeqCst) {
                    match p.exit.lock().ok().and_then(|e| e.clone()) {
                        Some(err) => format!("exited ({err})"),
                        None => "stopped".to_string(),
                    }
                } else {
                    "running".to_string()
                };
                format!("[{}] {} - {} (since {})", p.id, p.cmd, status, p.started)
            })
            .collect();
        format!("{} processes:\n{}", procs.len(), lines.join("\n"))
    }

    fn stop(&self, id: u64) -> Result<String, ToolError> {
        let proc = self
            .find(id)
            .ok_or_else(|| ToolError::execution(format!("process [{id}] not found")))?;
        if proc.done.load(Ordering::SeqCst) {
            return Ok(format!("Process [{id}] already stopped."));
        }
        let sender = proc.kill.lock().ok().and_then(|mut k| k.take());
        match sender {
            Some(tx) => {
                let _ = tx.send(());
                Ok(format!("Killed process [{id}]: {}", proc.cmd))
            }
            None => Ok(format!("Process [{id}] already stopped.")),
        }
    }

    fn logs(&self, id: u64) -> Result<String, ToolError> {
        let proc = self
            .find(id)
            .ok_or_else(|| ToolError::execution(format!("process [{id}] not found")))?;
        let out = proc.output.contents();
        if out.is_empty() {
            return Ok("(no output yet)".to_string());
        }
        Ok(out)
    }
}

async fn pump(reader: Option<impl AsyncReadExt + Unpin>, buf: Arc<CappedBuffer>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.write(&chunk[..n]),
        }
    }
}

#[async_trait::async_trait]
impl Tool for BgCommand {
    fn name(&self) -> &str {
        "bg_command"
    }

    fn description(&self) -> &str {
        "Start a background process (e.g. dev server). Use action=start to launch, action=status to check, action=stop to kill, action=logs to read output."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["start", "status", "stop", "logs"],
                    "description": "Action to perform"
                },
                "command": {"type": "string", "description": "Shell command (for start)"},
                "id": {"type": "integer", "description": "Process ID (for stop/logs)"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: &Value) -> Result<String, ToolError> {
        let params: Params = parse_input(input)?;
        match params.action.as_str() {
            "start" => self.start(&params.command),
            "status" => Ok(self.status()),
            "stop" => self.stop(params.id),
            "logs" => self.logs(params.id),
            other => Err(ToolError::InvalidArguments(format!(
                "unknown action: {other}"
            ))),
        }
    }
}
