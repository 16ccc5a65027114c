// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock session backend for testing.
//!
//! Simulates WhatsApp sessions in-process: a scripted event sequence is
//! played after `initialize`, and tests can push further events by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::traits::*;

/// Behavior shared by every session a [`MockSessionFactory`] creates.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Events played after `initialize`, each after its delay (relative to the previous one).
    pub script: Vec<(Duration, SessionEvent)>,
    /// How long `initialize` takes before returning.
    pub initialize_delay: Duration,
    /// If true, `initialize` fails.
    pub fail_initialize: bool,
    /// If true, `send_message` fails.
    pub fail_send: bool,
}

/// Mock session.
pub struct MockSession {
    instance_id: i64,
    options: SessionOptions,
    events: EventSink,
    behavior: MockBehavior,
    ready: Arc<AtomicBool>,
    destroyed: Arc<AtomicBool>,
    next_message_id: AtomicU64,
    sent: Mutex<Vec<(String, OutboundMessage)>>,
}

impl MockSession {
    /// Push an event as if the session emitted it. Returns false once the
    /// manager has stopped listening.
    pub fn emit(&self, event: SessionEvent) -> bool {
        emit(&self.events, &self.ready, event)
    }

    /// Options the session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Whether `destroy` was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Messages delivered so far, with their chat ids.
    pub async fn sent_messages(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().await.clone()
    }
}

fn emit(events: &EventSink, ready: &AtomicBool, event: SessionEvent) -> bool {
    match &event {
        SessionEvent::Ready => ready.store(true, Ordering::SeqCst),
        SessionEvent::Disconnected(_) | SessionEvent::AuthFailed(_) => {
            ready.store(false, Ordering::SeqCst)
        }
        _ => {}
    }
    events.send(event).is_ok()
}

#[async_trait]
impl MessagingSession for MockSession {
    fn instance_id(&self) -> i64 {
        self.instance_id
    }

    async fn initialize(&self) -> Result<()> {
        if !self.behavior.initialize_delay.is_zero() {
            tokio::time::sleep(self.behavior.initialize_delay).await;
        }

        if self.behavior.fail_initialize {
            return Err(SessionError::StartFailed("Mock failure".to_string()));
        }

        if !self.behavior.script.is_empty() {
            let script = self.behavior.script.clone();
            let events = self.events.clone();
            let ready = self.ready.clone();
            let destroyed = self.destroyed.clone();

            tokio::spawn(async move {
                for (delay, event) in script {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if destroyed.load(Ordering::SeqCst) || !emit(&events, &ready, event) {
                        break;
                    }
                }
            });
        }

        Ok(())
    }

    async fn connection_state(&self) -> Result<String> {
        if self.is_destroyed() {
            return Err(SessionError::Closed);
        }
        let state = if self.ready.load(Ordering::SeqCst) {
            "CONNECTED"
        } else {
            "OPENING"
        };
        Ok(state.to_string())
    }

    async fn send_message(&self, chat_id: &str, message: &OutboundMessage) -> Result<SentMessage> {
        if self.is_destroyed() {
            return Err(SessionError::Closed);
        }
        if self.behavior.fail_send {
            return Err(SessionError::Remote("Mock send failure".to_string()));
        }

        let n = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .await
            .push((chat_id.to_string(), message.clone()));

        Ok(SentMessage {
            id: format!("true_{}_mock{}", chat_id, n),
            timestamp: Some(chrono::Utc::now().timestamp()),
        })
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock session factory for testing.
#[derive(Default)]
pub struct MockSessionFactory {
    /// Behavior of created sessions.
    pub behavior: MockBehavior,
    created: AtomicUsize,
    sessions: DashMap<i64, Arc<MockSession>>,
}

impl MockSessionFactory {
    /// Create a factory whose sessions stay silent after `initialize`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory whose sessions behave as described.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Create a factory whose sessions play `script` after `initialize`.
    pub fn with_script(script: Vec<(Duration, SessionEvent)>) -> Self {
        Self::with_behavior(MockBehavior {
            script,
            ..MockBehavior::default()
        })
    }

    /// Create a factory whose sessions fail to initialize.
    pub fn failing() -> Self {
        Self::with_behavior(MockBehavior {
            fail_initialize: true,
            ..MockBehavior::default()
        })
    }

    /// Number of sessions constructed so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Most recent session created for an instance.
    pub fn session(&self, instance_id: i64) -> Option<Arc<MockSession>> {
        self.sessions.get(&instance_id).map(|s| s.value().clone())
    }

    /// Push an event into the most recent session of an instance.
    pub fn emit(&self, instance_id: i64, event: SessionEvent) -> bool {
        self.session(instance_id)
            .map(|session| session.emit(event))
            .unwrap_or(false)
    }
}

impl SessionFactory for MockSessionFactory {
    fn backend(&self) -> &'static str {
        "mock"
    }

    fn create(
        &self,
        options: SessionOptions,
        events: EventSink,
    ) -> Result<Arc<dyn MessagingSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);

        let session = Arc::new(MockSession {
            instance_id: options.instance_id,
            options,
            events,
            behavior: self.behavior.clone(),
            ready: Arc::new(AtomicBool::new(false)),
            destroyed: Arc::new(AtomicBool::new(false)),
            next_message_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
        });
        self.sessions.insert(session.instance_id, session.clone());

        Ok(session)
    }
}
