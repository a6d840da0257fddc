//! Generic protocol-client behaviour shared by every session.
//!
//! [`ProtocolClient`] owns the pieces of protocol state that outlive a single
//! connection: the handshake-complete flag, the open-document versions and the
//! queue of unsolicited notifications. The session resets it on every cleanup.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lsp_types::{
    ClientCapabilities, ClientInfo, CodeActionContext, CodeActionParams,
    DidChangeTextDocumentParams, DidOpenTextDocumentParams, DocumentFormattingParams,
    FormattingOptions, GotoDefinitionParams, InitializeParams, PartialResultParams, Position,
    Range, ReferenceContext, ReferenceParams, RenameParams, TextDocumentContentChangeEvent,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams, Uri,
    VersionedTextDocumentIdentifier, WorkDoneProgressParams, WorkspaceFolder,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::connection::{Connection, NotificationSink};
use crate::errors::{CommandError, ConnectionError, ShutdownError};
use crate::jsonrpc::JsonRpcNotification;
use crate::sync::lock;

const PROTOCOL_TARGET: &str = "vls_host::protocol";

/// Upper bound on notifications held between polls; the oldest are dropped.
pub const MAX_QUEUED_NOTIFICATIONS: usize = 250;

/// Language identifier announced when opening documents.
const LANGUAGE_ID: &str = "vue";

/// What the editor knows about the request being served.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// Absolute path of the current buffer.
    pub filepath: PathBuf,
    /// Editor file type of the buffer.
    pub filetype: String,
    /// 1-based cursor line.
    pub line_num: u32,
    /// 1-based cursor column.
    pub column_num: u32,
    /// Current buffer contents.
    pub contents: String,
    /// Project directory, if the editor supplied one.
    pub working_dir: Option<PathBuf>,
    /// Indentation width for formatting requests.
    pub tab_size: u32,
    /// Whether formatting should indent with spaces.
    pub insert_spaces: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            filepath: PathBuf::new(),
            filetype: String::from(LANGUAGE_ID),
            line_num: 1,
            column_num: 1,
            contents: String::new(),
            working_dir: None,
            tab_size: 2,
            insert_spaces: true,
        }
    }
}

impl RequestContext {
    /// Builds a context for `filepath` with the cursor at the start.
    #[must_use]
    pub fn for_file(filepath: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            contents: contents.into(),
            ..Self::default()
        }
    }

    /// Moves the cursor to a 1-based line and column.
    #[must_use]
    pub fn at(mut self, line_num: u32, column_num: u32) -> Self {
        self.line_num = line_num;
        self.column_num = column_num;
        self
    }

    /// Cursor converted to a 0-based protocol position.
    #[must_use]
    pub fn position(&self) -> Position {
        Position::new(
            self.line_num.saturating_sub(1),
            self.column_num.saturating_sub(1),
        )
    }

    fn project_root(&self) -> Option<&Path> {
        self.working_dir.as_deref().or_else(|| self.filepath.parent())
    }
}

/// Protocol requests forwarded verbatim to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolOperation {
    /// `textDocument/definition`.
    Definition,
    /// `textDocument/references`.
    References,
    /// `textDocument/rename`; takes the new name as first argument.
    Rename,
    /// `textDocument/formatting`.
    Format,
    /// `textDocument/codeAction` at the cursor.
    CodeActions,
}

impl ProtocolOperation {
    /// Protocol method name.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Definition => "textDocument/definition",
            Self::References => "textDocument/references",
            Self::Rename => "textDocument/rename",
            Self::Format => "textDocument/formatting",
            Self::CodeActions => "textDocument/codeAction",
        }
    }
}

/// Default notification sink: a bounded queue drained by polling.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    queue: Mutex<VecDeque<JsonRpcNotification>>,
}

impl NotificationQueue {
    /// Removes and returns every queued notification, oldest first.
    pub fn drain(&self) -> Vec<JsonRpcNotification> {
        lock(&self.queue).drain(..).collect()
    }

    /// Number of queued notifications.
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    fn clear(&self) {
        lock(&self.queue).clear();
    }
}

impl NotificationSink for NotificationQueue {
    fn handle_notification(&self, notification: JsonRpcNotification) {
        if matches!(
            notification.method.as_str(),
            "window/logMessage" | "window/showMessage"
        ) {
            let message = notification
                .params
                .as_ref()
                .and_then(|params| params.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            debug!(target: PROTOCOL_TARGET, method = %notification.method, message, "server message");
        } else {
            trace!(target: PROTOCOL_TARGET, method = %notification.method, "queued notification");
        }

        let mut queue = lock(&self.queue);
        if queue.len() >= MAX_QUEUED_NOTIFICATIONS {
            queue.pop_front();
        }
        queue.push_back(notification);
    }
}

/// Readiness flag plus the connection generation it belongs to.
///
/// `generation` is locked for the whole of a handshake completion and of a
/// reset, so readiness is never set for a connection that was reset.
#[derive(Debug, Default)]
struct HandshakeState {
    initialized: AtomicBool,
    generation: Mutex<u64>,
}

impl HandshakeState {
    fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    fn reset(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.initialized.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct OpenDocument {
    version: i32,
    text: String,
}

/// Protocol state and request building shared across connections.
#[derive(Debug, Default)]
pub struct ProtocolClient {
    handshake: Arc<HandshakeState>,
    notifications: Arc<NotificationQueue>,
    documents: Mutex<HashMap<PathBuf, OpenDocument>>,
}

impl ProtocolClient {
    /// Creates a client with nothing initialised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink handed to every new connection.
    #[must_use]
    pub fn default_notification_sink(&self) -> Arc<dyn NotificationSink> {
        Arc::clone(&self.notifications) as Arc<dyn NotificationSink>
    }

    /// Queue behind [`ProtocolClient::default_notification_sink`].
    #[must_use]
    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    /// Whether the server answered `initialize` on the current connection.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.handshake.initialized.load(Ordering::SeqCst)
    }

    /// Sends `initialize` without waiting for the answer.
    ///
    /// The response is handled on the connection's reader thread: it sends
    /// `initialized` and marks the client ready. Answers that arrive after a
    /// [`ProtocolClient::reset`] are ignored.
    ///
    /// # Errors
    ///
    /// Returns the error raised while writing the request.
    pub fn send_initialize(
        &self,
        connection: &Connection,
        context: &RequestContext,
    ) -> Result<(), ConnectionError> {
        let params = serde_json::to_value(initialize_params(context))?;
        let handshake = Arc::clone(&self.handshake);
        let generation = handshake.generation();
        let notifier = connection.notifier();

        let id = connection.send_request_with_callback(
            "initialize",
            Some(params),
            Box::new(move |outcome| match outcome {
                Ok(result) => {
                    let current = lock(&handshake.generation);
                    if *current != generation {
                        debug!(target: PROTOCOL_TARGET, "ignoring stale initialize response");
                        return;
                    }
                    if let Err(error) = notifier.send_notification("initialized", Some(json!({})))
                    {
                        warn!(target: PROTOCOL_TARGET, %error, "failed to send initialized");
                        return;
                    }
                    handshake.initialized.store(true, Ordering::SeqCst);
                    drop(current);
                    info!(
                        target: PROTOCOL_TARGET,
                        has_capabilities = result.get("capabilities").is_some(),
                        "language server initialised"
                    );
                }
                Err(error) => {
                    warn!(target: PROTOCOL_TARGET, %error, "initialize request failed");
                }
            }),
        )?;
        debug!(target: PROTOCOL_TARGET, id, "sent initialize");
        Ok(())
    }

    /// Requests a graceful shutdown: `shutdown`, then `exit`.
    ///
    /// `exit` is sent even when `shutdown` fails; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Request`] or [`ShutdownError::Exit`].
    pub fn shutdown_server(
        &self,
        connection: &Connection,
        timeout: Duration,
    ) -> Result<(), ShutdownError> {
        let request = connection
            .send_request("shutdown", None)
            .and_then(|pending| pending.wait(timeout))
            .map(drop)
            .map_err(ShutdownError::Request);
        let exit = connection
            .send_notification("exit", None)
            .map_err(ShutdownError::Exit);
        request.and(exit)
    }

    /// Sends `didOpen` for a new document or `didChange` when its contents
    /// differ from what the server last saw.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidPath`] for paths that cannot become
    /// URIs, or the connection error raised while sending.
    pub fn sync_document(
        &self,
        connection: &Connection,
        context: &RequestContext,
    ) -> Result<(), CommandError> {
        let uri = document_uri(&context.filepath)?;
        let mut documents = lock(&self.documents);

        match documents.get_mut(&context.filepath) {
            None => {
                let params = DidOpenTextDocumentParams {
                    text_document: TextDocumentItem {
                        uri,
                        language_id: String::from(LANGUAGE_ID),
                        version: 1,
                        text: context.contents.clone(),
                    },
                };
                connection.send_notification(
                    "textDocument/didOpen",
                    Some(serde_json::to_value(params).map_err(ConnectionError::from)?),
                )?;
                documents.insert(
                    context.filepath.clone(),
                    OpenDocument {
                        version: 1,
                        text: context.contents.clone(),
                    },
                );
            }
            Some(document) if document.text != context.contents => {
                let version = document.version + 1;
                let params = DidChangeTextDocumentParams {
                    text_document: VersionedTextDocumentIdentifier { uri, version },
                    content_changes: vec![TextDocumentContentChangeEvent {
                        range: None,
                        range_length: None,
                        text: context.contents.clone(),
                    }],
                };
                connection.send_notification(
                    "textDocument/didChange",
                    Some(serde_json::to_value(params).map_err(ConnectionError::from)?),
                )?;
                document.version = version;
                document.text.clone_from(&context.contents);
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Forwards `operation` for the document and cursor in `context`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::MissingArgument`] when a rename has no new
    /// name, [`CommandError::InvalidPath`] for unusable paths, or
    /// [`CommandError::Request`] when the server fails or does not answer
    /// within `timeout`.
    pub fn request(
        &self,
        connection: &Connection,
        operation: ProtocolOperation,
        context: &RequestContext,
        args: &[String],
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        let params = build_params(operation, context, args)?;
        self.sync_document(connection, context)?;
        debug!(target: PROTOCOL_TARGET, method = operation.method(), "forwarding request");
        let response = connection
            .send_request(operation.method(), Some(params))?
            .wait(timeout)?;
        Ok(response)
    }

    /// Forgets all per-connection state.
    pub fn reset(&self) {
        self.handshake.reset();
        lock(&self.documents).clear();
        self.notifications.clear();
    }
}

fn build_params(
    operation: ProtocolOperation,
    context: &RequestContext,
    args: &[String],
) -> Result<Value, CommandError> {
    let uri = document_uri(&context.filepath)?;
    let position = TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position: context.position(),
    };

    let value = match operation {
        ProtocolOperation::Definition => serde_json::to_value(GotoDefinitionParams {
            text_document_position_params: position,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        }),
        ProtocolOperation::References => serde_json::to_value(ReferenceParams {
            text_document_position: position,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: true,
            },
        }),
        ProtocolOperation::Rename => {
            let new_name = args.first().ok_or(CommandError::MissingArgument {
                command: "RefactorRename",
                argument: "new name",
            })?;
            serde_json::to_value(RenameParams {
                text_document_position: position,
                new_name: new_name.clone(),
                work_done_progress_params: WorkDoneProgressParams::default(),
            })
        }
        ProtocolOperation::Format => serde_json::to_value(DocumentFormattingParams {
            text_document: TextDocumentIdentifier { uri },
            options: FormattingOptions {
                tab_size: context.tab_size,
                insert_spaces: context.insert_spaces,
                ..FormattingOptions::default()
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        }),
        ProtocolOperation::CodeActions => serde_json::to_value(CodeActionParams {
            text_document: TextDocumentIdentifier { uri },
            range: Range::new(context.position(), context.position()),
            context: CodeActionContext::default(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        }),
    };
    value.map_err(|error| CommandError::Request(ConnectionError::from(error)))
}

fn initialize_params(context: &RequestContext) -> InitializeParams {
    let workspace_folders = context
        .project_root()
        .and_then(|root| document_uri(root).ok().map(|uri| (root, uri)))
        .map(|(root, uri)| {
            vec![WorkspaceFolder {
                uri,
                name: root
                    .file_name()
                    .map_or_else(|| String::from("workspace"), |name| name.to_string_lossy().into_owned()),
            }]
        });

    InitializeParams {
        process_id: Some(std::process::id()),
        capabilities: ClientCapabilities::default(),
        workspace_folders,
        client_info: Some(ClientInfo {
            name: String::from(env!("CARGO_PKG_NAME")),
            version: Some(String::from(env!("CARGO_PKG_VERSION"))),
        }),
        ..Default::default()
    }
}

/// Converts an absolute filesystem path to a `file://` URI.
///
/// # Errors
///
/// Returns [`CommandError::InvalidPath`] for relative or otherwise unusable
/// paths.
pub fn document_uri(path: &Path) -> Result<Uri, CommandError> {
    let url = Url::from_file_path(path).map_err(|()| CommandError::InvalidPath(path.to_path_buf()))?;
    Uri::from_str(url.as_str()).map_err(|_| CommandError::InvalidPath(path.to_path_buf()))
}
