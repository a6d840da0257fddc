//! Tests driving the session and completer against scripted servers.

pub(crate) mod support;
