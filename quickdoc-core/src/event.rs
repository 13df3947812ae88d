//! Lifecycle events
//!
//! Events a database handle emits. Connection events are forwarded as the
//! store connection reports them; `Ready` is emitted by the handle itself
//! once its collection binding exists.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum LifecycleEvent {
    Ready,
    Connecting,
    Connected,
    Open,
    Disconnecting,
    Disconnected,
    Close,
    Reconnected,
    Error(String),
    #[serde(rename = "fullsetup")]
    FullSetup,
    ReconnectFailed,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Ready => EventKind::Ready,
            LifecycleEvent::Connecting => EventKind::Connecting,
            LifecycleEvent::Connected => EventKind::Connected,
            LifecycleEvent::Open => EventKind::Open,
            LifecycleEvent::Disconnecting => EventKind::Disconnecting,
            LifecycleEvent::Disconnected => EventKind::Disconnected,
            LifecycleEvent::Close => EventKind::Close,
            LifecycleEvent::Reconnected => EventKind::Reconnected,
            LifecycleEvent::Error(_) => EventKind::Error,
            LifecycleEvent::FullSetup => EventKind::FullSetup,
            LifecycleEvent::ReconnectFailed => EventKind::ReconnectFailed,
        }
    }
}

/// Discriminant of [`LifecycleEvent`], used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Ready,
    Connecting,
    Connected,
    Open,
    Disconnecting,
    Disconnected,
    Close,
    Reconnected,
    Error,
    #[serde(rename = "fullsetup")]
    FullSetup,
    ReconnectFailed,
}

impl EventKind {
    /// Every kind, in emission-name order.
    pub const ALL: [EventKind; 11] = [
        EventKind::Ready,
        EventKind::Connecting,
        EventKind::Connected,
        EventKind::Open,
        EventKind::Disconnecting,
        EventKind::Disconnected,
        EventKind::Close,
        EventKind::Reconnected,
        EventKind::Error,
        EventKind::FullSetup,
        EventKind::ReconnectFailed,
    ];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Connecting => "connecting",
            EventKind::Connected => "connected",
            EventKind::Open => "open",
            EventKind::Disconnecting => "disconnecting",
            EventKind::Disconnected => "disconnected",
            EventKind::Close => "close",
            EventKind::Reconnected => "reconnected",
            EventKind::Error => "error",
            EventKind::FullSetup => "fullsetup",
            EventKind::ReconnectFailed => "reconnectFailed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Error(message) => write!(f, "error: {message}"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}
