// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance status, per-instance state machine, and outbound message types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::session::SessionEvent;

/// Chat suffix for individual (non-group) WhatsApp addresses.
pub const USER_CHAT_SUFFIX: &str = "@c.us";

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// No live session on this process.
    Disconnected,
    /// Session created, connection sequence running.
    Initializing,
    /// A QR code is waiting to be scanned.
    QrPending,
    /// A restored session authenticated without a QR and awaits readiness.
    Authenticated,
    /// Session is ready to send messages.
    Connected,
    /// Authentication was rejected; the session was torn down.
    AuthFailed,
}

impl InstanceStatus {
    /// Status string exposed by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::QrPending => "qr_pending",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
            Self::AuthFailed => "auth_failed",
        }
    }

    /// Status string written to the store.
    ///
    /// The CMS reads `qr_code` for a pending QR; every other status is
    /// stored under its API name.
    pub fn store_str(&self) -> &'static str {
        match self {
            Self::QrPending => "qr_code",
            other => other.as_str(),
        }
    }

    /// Whether a session in this status is still owned by the registry.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::QrPending | Self::Authenticated | Self::Connected
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown instance status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for InstanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "initializing" => Ok(Self::Initializing),
            "qr_pending" | "qr_code" => Ok(Self::QrPending),
            "authenticated" => Ok(Self::Authenticated),
            "connected" => Ok(Self::Connected),
            "auth_failed" => Ok(Self::AuthFailed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// What an event did to an instance's state.
///
/// The manager uses this to decide which store write and which teardown,
/// if any, follow the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A QR code was issued (or replaced an earlier one).
    QrIssued {
        /// The renderable QR payload.
        qr_code: String,
        /// True when an earlier QR was replaced.
        refreshed: bool,
    },
    /// The session became ready.
    Connected,
    /// The session authenticated; readiness follows separately.
    Authenticated,
    /// Authentication failed; the session must be torn down.
    AuthFailed {
        /// Failure reason reported by the session.
        reason: String,
    },
    /// The session disconnected; it must be torn down.
    Disconnected {
        /// Disconnect reason reported by the session.
        reason: String,
    },
    /// Observability-only event, no state change.
    Observed,
}

impl Transition {
    /// Whether this transition ends the session's life in the registry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthFailed { .. } | Self::Disconnected { .. })
    }
}

/// In-memory state of one instance.
///
/// `qr_code` is `Some` exactly when `status` is [`InstanceStatus::QrPending`];
/// every transition goes through [`InstanceState::apply`] or
/// [`InstanceState::retire`], which keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    status: InstanceStatus,
    qr_code: Option<String>,
}

impl InstanceState {
    /// State of a freshly created session.
    pub fn initializing() -> Self {
        Self {
            status: InstanceStatus::Initializing,
            qr_code: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Current QR payload, present only while a QR is pending.
    pub fn qr_code(&self) -> Option<&str> {
        self.qr_code.as_deref()
    }

    /// Apply a session event and report the resulting transition.
    ///
    /// Once the state has left the active statuses (teardown or a terminal
    /// event), further events are observed only.
    pub fn apply(&mut self, event: &SessionEvent) -> Transition {
        if !self.status.is_active() {
            return Transition::Observed;
        }

        match event {
            SessionEvent::QrIssued(qr_code) => {
                let refreshed = self.status == InstanceStatus::QrPending;
                self.status = InstanceStatus::QrPending;
                self.qr_code = Some(qr_code.clone());
                Transition::QrIssued {
                    qr_code: qr_code.clone(),
                    refreshed,
                }
            }
            SessionEvent::Ready => {
                self.status = InstanceStatus::Connected;
                self.qr_code = None;
                Transition::Connected
            }
            SessionEvent::Authenticated => {
                // A pending QR stays pending until ready arrives.
                if self.status == InstanceStatus::Initializing {
                    self.status = InstanceStatus::Authenticated;
                }
                Transition::Authenticated
            }
            SessionEvent::AuthFailed(reason) => {
                self.status = InstanceStatus::AuthFailed;
                self.qr_code = None;
                Transition::AuthFailed {
                    reason: reason.clone(),
                }
            }
            SessionEvent::Disconnected(reason) => {
                self.retire();
                Transition::Disconnected {
                    reason: reason.clone(),
                }
            }
            SessionEvent::LoadingProgress { .. } | SessionEvent::Error(_) => Transition::Observed,
        }
    }

    /// Move to `disconnected` outside the event stream (explicit teardown).
    pub fn retire(&mut self) {
        self.status = InstanceStatus::Disconnected;
        self.qr_code = None;
    }
}

impl Default for InstanceState {
    fn default() -> Self {
        Self::initializing()
    }
}

/// Kind of an outbound message, as recorded in the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image fetched from a URL.
    Image,
    /// Document fetched from a URL.
    Document,
}

impl MessageKind {
    /// Log/store string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Image, sent with an optional caption.
    Image,
    /// Document, sent with an optional file name.
    Document,
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MessageKind::Image,
            MediaKind::Document => MessageKind::Document,
        }
    }
}

/// A media message referencing remote content by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMessage {
    /// Image or document.
    pub kind: MediaKind,
    /// Where the session fetches the media from.
    pub url: String,
    /// Caption shown under an image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// File name presented for a document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl MediaMessage {
    /// An image message.
    pub fn image(url: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
            caption,
            filename: None,
        }
    }

    /// A document message.
    pub fn document(url: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            kind: MediaKind::Document,
            url: url.into(),
            caption: None,
            filename,
        }
    }

    /// Content descriptor written to the message log.
    pub fn descriptor(&self) -> String {
        match self.kind {
            MediaKind::Image => format!(
                "Image: {} | Caption: {}",
                self.url,
                self.caption.as_deref().unwrap_or("N/A")
            ),
            MediaKind::Document => format!(
                "Document: {} | Filename: {}",
                self.url,
                self.filename.as_deref().unwrap_or("N/A")
            ),
        }
    }
}

/// Normalize a destination to the chat id form the session expects.
///
/// Bare numbers get the user-chat suffix; addresses that already carry a
/// domain (`@c.us`, `@g.us`) pass through.
pub fn normalize_chat_id(address: &str) -> String {
    let address = address.trim();
    if address.contains('@') {
        address.to_string()
    } else {
        format!("{}{}", address, USER_CHAT_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_qr_invariant(state: &InstanceState) {
        assert_eq!(
            state.qr_code().is_some(),
            state.status() == InstanceStatus::QrPending,
            "qr_code must be present iff status is qr_pending: {:?}",
            state
        );
    }

    #[test]
    fn test_status_round_trips_through_store_string() {
        for status in [
            InstanceStatus::Disconnected,
            InstanceStatus::Initializing,
            InstanceStatus::QrPending,
            InstanceStatus::Authenticated,
            InstanceStatus::Connected,
            InstanceStatus::AuthFailed,
        ] {
            assert_eq!(status.store_str().parse::<InstanceStatus>(), Ok(status));
            assert_eq!(status.as_str().parse::<InstanceStatus>(), Ok(status));
        }
        assert_eq!(InstanceStatus::QrPending.store_str(), "qr_code");
        assert!("ready".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_qr_then_ready() {
        let mut state = InstanceState::initializing();

        let t = state.apply(&SessionEvent::QrIssued("qr-1".into()));
        assert_eq!(
            t,
            Transition::QrIssued {
                qr_code: "qr-1".into(),
                refreshed: false
            }
        );
        assert_eq!(state.qr_code(), Some("qr-1"));

        let t = state.apply(&SessionEvent::QrIssued("qr-2".into()));
        assert!(matches!(t, Transition::QrIssued { refreshed: true, .. }));
        assert_eq!(state.qr_code(), Some("qr-2"));

        let t = state.apply(&SessionEvent::Ready);
        assert_eq!(t, Transition::Connected);
        assert_eq!(state.status(), InstanceStatus::Connected);
        assert_eq!(state.qr_code(), None);
    }

    #[test]
    fn test_authenticated_keeps_qr_pending_until_ready() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::QrIssued("qr".into()));

        assert_eq!(
            state.apply(&SessionEvent::Authenticated),
            Transition::Authenticated
        );
        assert_eq!(state.status(), InstanceStatus::QrPending);

        state.apply(&SessionEvent::Ready);
        assert_eq!(state.status(), InstanceStatus::Connected);
    }

    #[test]
    fn test_restored_session_goes_straight_to_connected() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::Authenticated);
        assert_eq!(state.status(), InstanceStatus::Authenticated);
        state.apply(&SessionEvent::Ready);
        assert_eq!(state.status(), InstanceStatus::Connected);
        assert_eq!(state.qr_code(), None);
    }

    #[test]
    fn test_auth_failure_after_ready_reenters_auth_failed() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::Ready);

        let t = state.apply(&SessionEvent::AuthFailed("re-auth rejected".into()));
        assert!(t.is_terminal());
        assert_eq!(state.status(), InstanceStatus::AuthFailed);
    }

    #[test]
    fn test_retired_state_ignores_further_events() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::QrIssued("qr".into()));
        state.retire();

        for event in [
            SessionEvent::QrIssued("late".into()),
            SessionEvent::Ready,
            SessionEvent::Authenticated,
            SessionEvent::AuthFailed("late".into()),
            SessionEvent::Disconnected("late".into()),
        ] {
            assert_eq!(state.apply(&event), Transition::Observed);
            assert_eq!(state.status(), InstanceStatus::Disconnected);
            assert_eq!(state.qr_code(), None);
        }
    }

    #[test]
    fn test_auth_failed_is_final() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::AuthFailed("bad".into()));

        assert_eq!(
            state.apply(&SessionEvent::QrIssued("qr".into())),
            Transition::Observed
        );
        assert_eq!(state.status(), InstanceStatus::AuthFailed);
    }

    #[test]
    fn test_observability_events_do_not_transition() {
        let mut state = InstanceState::initializing();
        state.apply(&SessionEvent::QrIssued("qr".into()));
        let before = state.clone();

        let t = state.apply(&SessionEvent::LoadingProgress {
            percent: 40,
            message: "WhatsApp".into(),
        });
        assert_eq!(t, Transition::Observed);
        assert_eq!(
            state.apply(&SessionEvent::Error("boom".into())),
            Transition::Observed
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_qr_invariant_holds_for_every_event_sequence() {
        let events = [
            SessionEvent::QrIssued("a".into()),
            SessionEvent::Ready,
            SessionEvent::Authenticated,
            SessionEvent::AuthFailed("x".into()),
            SessionEvent::Disconnected("y".into()),
            SessionEvent::LoadingProgress {
                percent: 1,
                message: String::new(),
            },
            SessionEvent::Error("e".into()),
        ];

        // Every sequence of length 3 over the event alphabet.
        for a in &events {
            for b in &events {
                for c in &events {
                    let mut state = InstanceState::initializing();
                    assert_qr_invariant(&state);
                    for event in [a, b, c] {
                        state.apply(event);
                        assert_qr_invariant(&state);
                    }
                }
            }
        }
    }

    #[test]
    fn test_normalize_chat_id() {
        assert_eq!(normalize_chat_id("5511999999999"), "5511999999999@c.us");
        assert_eq!(normalize_chat_id(" 5511999999999 "), "5511999999999@c.us");
        assert_eq!(normalize_chat_id("5511999999999@c.us"), "5511999999999@c.us");
        assert_eq!(
            normalize_chat_id("120363000000000000@g.us"),
            "120363000000000000@g.us"
        );
    }

    #[test]
    fn test_media_descriptors() {
        let image = MediaMessage::image("https://x/y.png", None);
        assert_eq!(image.descriptor(), "Image: https://x/y.png | Caption: N/A");

        let image = MediaMessage::image("https://x/y.png", Some("hi".into()));
        assert_eq!(image.descriptor(), "Image: https://x/y.png | Caption: hi");

        let doc = MediaMessage::document("https://x/a.pdf", Some("a.pdf".into()));
        assert_eq!(
            doc.descriptor(),
            "Document: https://x/a.pdf | Filename: a.pdf"
        );
        assert_eq!(MessageKind::from(doc.kind), MessageKind::Document);
    }
}
