//! Framed message channel to the server.
//!
//! A [`Connection`] owns two background threads:
//!
//! - the reader, which performs the [`Connector`] step, signals that the
//!   server is connected, then reads frames until the stream ends, fails, or
//!   the connection is closed. Responses resolve pending requests and
//!   server-initiated requests are refused with "method not found".
//! - the dispatcher, which hands unsolicited notifications to the
//!   [`NotificationSink`] so slow handlers never stall response matching.
//!
//! [`Connection::stop`] ends notification dispatch only; responses keep
//! flowing so a graceful `shutdown` can still be answered. [`Connection::close`]
//! ends the reader too. Both flags are checked between messages, never in the
//! middle of a frame.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::errors::ConnectionError;
use crate::jsonrpc::{
    ErrorReply, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::process::ServerStreams;
use crate::sync::{Event, lock};
use crate::transport::{FrameReader, FrameWriter};

/// Log target for connection operations.
pub(crate) const CONNECTION_TARGET: &str = "vls_host::connection";

/// Establishes the byte streams to the server.
///
/// Runs on the reader thread; a connector that never returns keeps the
/// handshake from completing.
pub trait Connector: Send {
    /// Blocks until the streams are usable.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that prevented the connection.
    fn connect(self: Box<Self>) -> io::Result<ServerStreams>;
}

/// Connector for a process's stdio pipes, which are usable immediately.
pub struct StdioConnector {
    streams: ServerStreams,
}

impl StdioConnector {
    /// Wraps already-open pipes.
    #[must_use]
    pub fn new(streams: ServerStreams) -> Self {
        Self { streams }
    }
}

impl Connector for StdioConnector {
    fn connect(self: Box<Self>) -> io::Result<ServerStreams> {
        Ok(self.streams)
    }
}

/// Receives notifications on the dispatch thread.
pub trait NotificationSink: Send + Sync {
    /// Handles one unsolicited notification.
    fn handle_notification(&self, notification: JsonRpcNotification);
}

/// Callback invoked on the reader thread when a response arrives.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, ConnectionError>) + Send>;

enum Responder {
    Channel(Sender<Result<Value, ConnectionError>>),
    Callback(ResponseCallback),
}

impl Responder {
    fn resolve(self, outcome: Result<Value, ConnectionError>) {
        match self {
            // A dropped receiver means the caller stopped waiting.
            Self::Channel(sender) => drop(sender.send(outcome)),
            Self::Callback(callback) => callback(outcome),
        }
    }
}

enum Dispatch {
    Notification(JsonRpcNotification),
    Stop,
}

type Writer = FrameWriter<Box<dyn Write + Send>>;

#[derive(Default)]
struct Shared {
    writer: Mutex<Option<Writer>>,
    pending: Mutex<HashMap<i64, Responder>>,
    connected: Event,
    stopped: AtomicBool,
    closed: AtomicBool,
    disconnected: AtomicBool,
}

impl Shared {
    fn write(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = lock(&self.writer);
        let writer = writer.as_mut().ok_or(ConnectionError::Closed)?;
        writer.write_frame(payload)?;
        Ok(())
    }

    fn register(&self, id: i64, responder: Responder) {
        lock(&self.pending).insert(id, responder);
    }

    fn take_pending(&self, id: i64) -> Option<Responder> {
        lock(&self.pending).remove(&id)
    }

    fn fail_pending(&self) {
        let pending: Vec<Responder> = lock(&self.pending).drain().map(|(_, r)| r).collect();
        for responder in pending {
            responder.resolve(Err(ConnectionError::Closed));
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn disconnect(&self) {
        // Set before failing pending requests so late registrations notice.
        self.disconnected.store(true, Ordering::SeqCst);
        self.fail_pending();
    }
}

/// A response that has been requested but not necessarily received.
#[must_use = "a pending response does nothing unless waited on"]
pub struct PendingResponse {
    id: i64,
    receiver: Receiver<Result<Value, ConnectionError>>,
    shared: Arc<Shared>,
}

impl PendingResponse {
    /// Request id this response belongs to.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Blocks up to `timeout` for the response's `result`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Timeout`] when the deadline passes,
    /// [`ConnectionError::Closed`] when the connection goes away, or
    /// [`ConnectionError::Server`] when the server answered with an error.
    pub fn wait(self, timeout: Duration) -> Result<Value, ConnectionError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                self.shared.take_pending(self.id);
                Err(ConnectionError::timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Closed),
        }
    }
}

/// Cloneable handle for sending notifications outside the owning thread.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    /// Sends a notification over the originating connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once that connection has closed.
    pub fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        write_notification(&self.shared, method, params)
    }
}

fn write_notification(
    shared: &Shared,
    method: &str,
    params: Option<Value>,
) -> Result<(), ConnectionError> {
    let payload = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
    debug!(target: CONNECTION_TARGET, method, "sending notification");
    shared.write(&payload)
}

/// Message channel over the server's streams.
pub struct Connection {
    shared: Arc<Shared>,
    connector: Mutex<Option<Box<dyn Connector>>>,
    sink: Arc<dyn NotificationSink>,
    dispatch: Option<Sender<Dispatch>>,
}

impl Connection {
    /// Builds a connection; no thread runs until [`Connection::start`].
    #[must_use]
    pub fn new(connector: Box<dyn Connector>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            connector: Mutex::new(Some(connector)),
            sink,
            dispatch: None,
        }
    }

    /// Starts the reader and dispatch threads. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ThreadSpawn`] if a thread cannot be created.
    pub fn start(&mut self) -> Result<(), ConnectionError> {
        let connector = self
            .connector
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(connector) = connector else {
            return Ok(());
        };

        let (dispatch_tx, dispatch_rx) = mpsc::channel();
        let sink = Arc::clone(&self.sink);
        let dispatch_shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(String::from("vls-dispatch"))
            .spawn(move || run_dispatcher(&dispatch_rx, sink.as_ref(), &dispatch_shared))
            .map_err(ConnectionError::ThreadSpawn)?;

        let reader_shared = Arc::clone(&self.shared);
        let reader_dispatch = dispatch_tx.clone();
        self.dispatch = Some(dispatch_tx);
        thread::Builder::new()
            .name(String::from("vls-reader"))
            .spawn(move || run_reader(connector, &reader_shared, &reader_dispatch))
            .map_err(ConnectionError::ThreadSpawn)?;

        debug!(target: CONNECTION_TARGET, "connection threads started");
        Ok(())
    }

    /// Blocks until the server is connected or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Timeout`] on expiry.
    pub fn await_server_connection(&self, timeout: Duration) -> Result<(), ConnectionError> {
        if self.shared.connected.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(ConnectionError::timeout(timeout))
        }
    }

    /// Whether the connection step has completed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.is_set()
    }

    /// Sends a request and returns a handle for its response.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be encoded or written.
    pub fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingResponse, ConnectionError> {
        let (sender, receiver) = mpsc::channel();
        let id = self.write_request(method, params, Responder::Channel(sender))?;
        Ok(PendingResponse {
            id,
            receiver,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Sends a request whose response is handed to `callback` on the reader
    /// thread.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be encoded or written; the
    /// callback is not invoked in that case.
    pub fn send_request_with_callback(
        &self,
        method: &str,
        params: Option<Value>,
        callback: ResponseCallback,
    ) -> Result<i64, ConnectionError> {
        self.write_request(method, params, Responder::Callback(callback))
    }

    fn write_request(
        &self,
        method: &str,
        params: Option<Value>,
        responder: Responder,
    ) -> Result<i64, ConnectionError> {
        let request = JsonRpcRequest::new(method, params);
        let id = request.id;
        let payload = serde_json::to_vec(&request)?;

        debug!(target: CONNECTION_TARGET, method, id, "sending request");
        self.shared.register(id, responder);
        if self.shared.is_disconnected() {
            self.shared.take_pending(id);
            return Err(ConnectionError::Closed);
        }
        if let Err(error) = self.shared.write(&payload) {
            self.shared.take_pending(id);
            return Err(error);
        }
        Ok(id)
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns an error when the notification cannot be encoded or written.
    pub fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        write_notification(&self.shared, method, params)
    }

    /// Returns a handle that can send notifications from response callbacks.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        Notifier {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops notification dispatch without touching the streams.
    ///
    /// Requests and their responses keep working until [`Connection::close`].
    /// Safe when the server is already dead.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(dispatch) = &self.dispatch {
            // The dispatcher may already have exited.
            drop(dispatch.send(Dispatch::Stop));
        }
        debug!(target: CONNECTION_TARGET, "notification dispatch stopped");
    }

    /// Stops both threads, closes the server's stdin and fails pending
    /// requests.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.stop();
        let writer = lock(&self.shared.writer).take();
        if writer.is_some() {
            debug!(target: CONNECTION_TARGET, "closed server stdin");
        }
        drop(writer);
        self.shared.fail_pending();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_dispatcher(receiver: &Receiver<Dispatch>, sink: &dyn NotificationSink, shared: &Shared) {
    while let Ok(Dispatch::Notification(notification)) = receiver.recv() {
        if shared.is_stopped() {
            break;
        }
        trace!(
            target: CONNECTION_TARGET,
            method = %notification.method,
            "dispatching notification"
        );
        sink.handle_notification(notification);
    }
    debug!(target: CONNECTION_TARGET, "dispatch loop finished");
}

fn run_reader(connector: Box<dyn Connector>, shared: &Shared, dispatch: &Sender<Dispatch>) {
    let streams = match connector.connect() {
        Ok(streams) => streams,
        Err(error) => {
            warn!(target: CONNECTION_TARGET, %error, "failed to connect to language server");
            shared.disconnect();
            return;
        }
    };
    if shared.is_closed() {
        shared.disconnect();
        return;
    }

    *lock(&shared.writer) = Some(FrameWriter::new(streams.stdin));
    shared.connected.set();
    debug!(target: CONNECTION_TARGET, "language server connected");

    read_messages(streams.stdout, shared, dispatch);

    shared.disconnect();
    debug!(target: CONNECTION_TARGET, "reader loop finished");
}

fn read_messages(stdout: Box<dyn Read + Send>, shared: &Shared, dispatch: &Sender<Dispatch>) {
    let mut frames = FrameReader::new(stdout);
    while !shared.is_closed() {
        match frames.read_frame() {
            Ok(Some(payload)) => handle_payload(&payload, shared, dispatch),
            Ok(None) => {
                debug!(target: CONNECTION_TARGET, "language server closed stdout");
                return;
            }
            Err(error) => {
                if !shared.is_closed() {
                    warn!(target: CONNECTION_TARGET, %error, "failed to read from language server");
                }
                return;
            }
        }
    }
}

fn handle_payload(payload: &[u8], shared: &Shared, dispatch: &Sender<Dispatch>) {
    let message = match JsonRpcMessage::from_bytes(payload) {
        Ok(message) => message,
        Err(error) => {
            warn!(target: CONNECTION_TARGET, %error, "ignoring malformed message");
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => resolve_response(response, shared),
        JsonRpcMessage::ServerRequest(request) => {
            debug!(
                target: CONNECTION_TARGET,
                method = %request.method,
                "refusing server-initiated request"
            );
            let reply = ErrorReply::method_not_found(&request);
            let outcome = serde_json::to_vec(&reply)
                .map_err(ConnectionError::from)
                .and_then(|bytes| shared.write(&bytes));
            if let Err(error) = outcome {
                warn!(target: CONNECTION_TARGET, %error, "failed to answer server request");
            }
        }
        JsonRpcMessage::Notification(notification) => {
            if shared.is_stopped() {
                trace!(
                    target: CONNECTION_TARGET,
                    method = %notification.method,
                    "dropping notification after stop"
                );
            } else {
                // The dispatcher has gone away only once we are stopping.
                drop(dispatch.send(Dispatch::Notification(notification)));
            }
        }
    }
}

fn resolve_response(response: JsonRpcResponse, shared: &Shared) {
    let Some(id) = response.id else {
        warn!(target: CONNECTION_TARGET, "ignoring response without id");
        return;
    };
    let Some(responder) = shared.take_pending(id) else {
        debug!(target: CONNECTION_TARGET, id, "ignoring response for unknown request");
        return;
    };
    let outcome = match response.error {
        Some(error) => Err(ConnectionError::Server {
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    responder.resolve(outcome);
}
