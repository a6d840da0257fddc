//! In-process language server speaking the framed protocol over OS pipes.

use std::collections::HashMap;
use std::io::{self, PipeReader, PipeWriter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::connection::{Connector, StdioConnector};
use crate::process::{ServerProcess, ServerStreams};
use crate::transport::{FrameReader, FrameWriter};

static NEXT_PID: AtomicU32 = AtomicU32::new(10_000);

/// How the scripted server answers.
#[derive(Debug, Clone, Default)]
pub struct FakeServerBehaviour {
    /// Requests answered with an internal error.
    pub error_methods: Vec<String>,
    /// Requests never answered.
    pub silent_methods: Vec<String>,
    /// Ignore `exit` and stdin closing, so only a kill ends the process.
    pub ignores_exit: bool,
}

/// A message the server received.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Method name.
    pub method: String,
    /// Parameters, `Null` when absent.
    pub params: Value,
}

#[derive(Default)]
struct ServerState {
    writer: Mutex<Option<FrameWriter<PipeWriter>>>,
    received: Mutex<Vec<ReceivedMessage>>,
    replies: Mutex<HashMap<i64, Value>>,
    changed: Condvar,
    exited: AtomicBool,
}

impl ServerState {
    fn send(&self, message: &Value) {
        let payload = serde_json::to_vec(message).expect("encode server message");
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = writer.as_mut() {
            // The client may already have gone away.
            drop(writer.write_frame(&payload));
        }
    }

    fn record(&self, method: &str, params: Value) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReceivedMessage {
                method: method.to_owned(),
                params,
            });
        self.changed.notify_all();
    }

    fn store_reply(&self, id: i64, reply: Value) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, reply);
        self.changed.notify_all();
    }

    fn exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Handle to a running scripted server.
#[derive(Clone)]
pub struct ScriptedServer {
    pid: u32,
    state: Arc<ServerState>,
    client: Arc<Mutex<Option<ServerStreams>>>,
}

impl ScriptedServer {
    /// Starts the server thread.
    pub fn spawn(behaviour: FakeServerBehaviour) -> Self {
        let (client_stdout, server_stdout) = io::pipe().expect("stdout pipe");
        let (server_stdin, client_stdin) = io::pipe().expect("stdin pipe");

        let state = Arc::new(ServerState::default());
        *state.writer.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(FrameWriter::new(server_stdout));

        let serving = Arc::clone(&state);
        thread::Builder::new()
            .name(String::from("scripted-server"))
            .spawn(move || serve(server_stdin, &serving, &behaviour))
            .expect("spawn scripted server");

        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            state,
            client: Arc::new(Mutex::new(Some(ServerStreams {
                stdin: Box::new(client_stdin),
                stdout: Box::new(client_stdout),
            }))),
        }
    }

    /// Connector over the client ends of the pipes. Callable once.
    pub fn connector(&self) -> Box<dyn Connector> {
        let streams = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .expect("connector already taken");
        Box::new(StdioConnector::new(streams))
    }

    /// Process view of this server for a [`crate::process::ProcessHandle`].
    pub fn process(&self) -> FakeProcess {
        FakeProcess {
            pid: self.pid,
            state: Arc::clone(&self.state),
        }
    }

    /// Fake PID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Ends the server as an external kill would.
    pub fn kill(&self) {
        self.state.exit();
    }

    /// Whether the server has exited.
    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::SeqCst)
    }

    /// Sends an unsolicited notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        self.state.send(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }));
    }

    /// Sends a server-initiated request to the client.
    pub fn request(&self, id: i64, method: &str) {
        self.state.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        }));
    }

    /// Waits for the client's reply to a server-initiated request.
    pub fn wait_for_reply(&self, id: i64, timeout: Duration) -> Option<Value> {
        let replies = self.state.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut replies, _) = self
            .state
            .changed
            .wait_timeout_while(replies, timeout, |replies| !replies.contains_key(&id))
            .unwrap_or_else(PoisonError::into_inner);
        replies.remove(&id)
    }

    /// Methods received so far, in arrival order.
    pub fn received_methods(&self) -> Vec<String> {
        self.received().into_iter().map(|message| message.method).collect()
    }

    /// Messages received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.state
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until `method` has been received, returning whether it was.
    pub fn wait_for_method(&self, method: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut received = self.state.received.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if received.iter().any(|message| message.method == method) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            received = self
                .state
                .changed
                .wait_timeout(received, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// [`ServerProcess`] backed by a scripted server.
#[derive(Clone)]
pub struct FakeProcess {
    pid: u32,
    state: Arc<ServerState>,
}

impl ServerProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.state.exited.load(Ordering::SeqCst))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.state.exit();
        Ok(())
    }
}

fn serve(input: PipeReader, state: &ServerState, behaviour: &FakeServerBehaviour) {
    let mut frames = FrameReader::new(input);
    while let Ok(Some(payload)) = frames.read_frame() {
        let Ok(message) = serde_json::from_slice::<Value>(&payload) else {
            continue;
        };
        let method = message.get("method").and_then(Value::as_str).map(str::to_owned);
        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match (method, id) {
            (Some(method), Some(id)) => {
                state.record(&method, params.clone());
                answer(state, behaviour, &method, id, params);
            }
            (Some(method), None) => {
                state.record(&method, params);
                if method == "exit" && !behaviour.ignores_exit {
                    state.exit();
                }
            }
            (None, Some(id)) => {
                if let Some(id) = id.as_i64() {
                    state.store_reply(id, message);
                }
            }
            (None, None) => {}
        }
    }
    if !behaviour.ignores_exit {
        state.exit();
    }
}

fn answer(state: &ServerState, behaviour: &FakeServerBehaviour, method: &str, id: Value, params: Value) {
    if behaviour.silent_methods.iter().any(|silent| silent == method) {
        return;
    }
    let reply = if behaviour.error_methods.iter().any(|failing| failing == method) {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32603, "message": format!("{method} failed") },
        })
    } else {
        let result = match method {
            "initialize" => json!({ "capabilities": { "definitionProvider": true } }),
            "shutdown" => Value::Null,
            _ => json!({ "method": method, "params": params }),
        };
        json!({ "jsonrpc": "2.0", "id": id, "result": result })
    };
    state.send(&reply);
}
