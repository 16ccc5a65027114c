// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle manager.
//!
//! Owns the registry of live sessions (instance id -> [`InstanceHandle`]) and is
//! the only component that creates, transitions, or removes entries.
//!
//! Each registered instance gets one event pump: a task draining the session's
//! event queue in emission order, applying every event to the instance's
//! [`InstanceState`] and mirroring the resulting transition to the store.
//! Pumps of different instances run independently.
//!
//! Removing an entry from the registry claims its teardown: whoever removes
//! it (an explicit disconnect, a terminal event, or shutdown) destroys the
//! session and writes the final status. Mirror writes for one instance are
//! serialized, and a pump never mirrors for an entry that is no longer
//! current, so a late event cannot overwrite a teardown's final status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::instance::{
    InstanceState, InstanceStatus, MediaMessage, Transition, normalize_chat_id,
};
use crate::qr;
use crate::session::{
    MessagingSession, OutboundMessage, SentMessage, SessionEvent, SessionFactory, SessionOptions,
    session_name,
};
use crate::store::{MessageLogEntry, SessionStore, StatusUpdate};

/// Configuration for the [`InstanceManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory of the per-instance session directories.
    pub sessions_root: PathBuf,
    /// Default budget for [`InstanceManager::await_qr_code`] callers.
    pub qr_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sessions_root: PathBuf::from("./sessions"),
            qr_timeout: Duration::from_secs(30),
        }
    }
}

/// A registry entry: one live session and its state.
pub struct InstanceHandle {
    id: i64,
    session: Arc<dyn MessagingSession>,
    state: watch::Sender<InstanceState>,
    shutdown: Arc<Notify>,
    mirror_lock: Mutex<()>,
}

impl InstanceHandle {
    fn new(id: i64, session: Arc<dyn MessagingSession>) -> Self {
        let (state, _) = watch::channel(InstanceState::initializing());
        Self {
            id,
            session,
            state,
            shutdown: Arc::new(Notify::new()),
            mirror_lock: Mutex::new(()),
        }
    }

    /// Instance id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> InstanceStatus {
        self.state.borrow().status()
    }

    /// Pending QR payload, if any.
    pub fn qr_code(&self) -> Option<String> {
        self.state.borrow().qr_code().map(str::to_owned)
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    fn retire(&self) {
        self.state.send_modify(InstanceState::retire);
        self.shutdown.notify_one();
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Result of [`InstanceManager::get_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// In-memory status; `disconnected` when no session is registered.
    pub status: InstanceStatus,
    /// Live connection state reported by the session, when it answered.
    pub state: Option<String>,
    /// Pending QR payload.
    pub qr_code: Option<String>,
    /// Whether a session is registered on this process.
    pub active: bool,
}

impl StatusReport {
    fn inactive() -> Self {
        Self {
            status: InstanceStatus::Disconnected,
            state: None,
            qr_code: None,
            active: false,
        }
    }
}

/// State shared between the manager and its event pumps.
struct Shared {
    registry: DashMap<i64, Arc<InstanceHandle>>,
    store: Arc<dyn SessionStore>,
}

impl Shared {
    fn is_current(&self, handle: &Arc<InstanceHandle>) -> bool {
        self.registry
            .get(&handle.id)
            .map(|entry| Arc::ptr_eq(entry.value(), handle))
            .unwrap_or(false)
    }

    /// Remove `handle` from the registry if it is still the current entry.
    fn release(&self, handle: &Arc<InstanceHandle>) -> bool {
        self.registry
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    async fn mirror(&self, handle: &InstanceHandle, update: StatusUpdate) {
        let _guard = handle.mirror_lock.lock().await;
        self.write_status(handle.id, &update).await;
    }

    async fn mirror_if_current(&self, handle: &Arc<InstanceHandle>, update: StatusUpdate) {
        let _guard = handle.mirror_lock.lock().await;
        if !self.is_current(handle) {
            debug!(
                instance_id = handle.id,
                status = %update.status,
                "Skipping status mirror for retired session"
            );
            return;
        }
        self.write_status(handle.id, &update).await;
    }

    async fn write_status(&self, id: i64, update: &StatusUpdate) {
        match self.store.update_status(id, update).await {
            Ok(()) => info!(instance_id = id, status = %update.status, "Instance status mirrored"),
            Err(e) => warn!(
                instance_id = id,
                status = %update.status,
                error = %e,
                "Failed to mirror instance status"
            ),
        }
    }

    async fn record(&self, entry: MessageLogEntry) {
        if let Err(e) = self.store.append_message_log(&entry).await {
            warn!(
                instance_id = entry.instance_id,
                address = %entry.address,
                error = %e,
                "Failed to record message log entry"
            );
        }
    }

    /// Apply one event. Returns false once the session's life has ended.
    async fn reconcile(&self, handle: &Arc<InstanceHandle>, event: SessionEvent) -> bool {
        let id = handle.id;
        let Some(event) = render_qr(id, event) else {
            return true;
        };

        let mut transition = Transition::Observed;
        handle.state.send_if_modified(|state| {
            transition = state.apply(&event);
            transition != Transition::Observed
        });
        let terminal = transition.is_terminal();

        match transition {
            Transition::QrIssued { qr_code, refreshed } => {
                if refreshed {
                    debug!(instance_id = id, "QR code refreshed");
                } else {
                    info!(instance_id = id, "QR code issued");
                }
                self.mirror_if_current(handle, StatusUpdate::qr_pending(qr_code, Utc::now()))
                    .await;
            }
            Transition::Connected => {
                info!(instance_id = id, "Instance connected and ready");
                self.mirror_if_current(
                    handle,
                    StatusUpdate::connected(session_name(id), Utc::now()),
                )
                .await;
            }
            Transition::Authenticated => {
                info!(instance_id = id, "Instance authenticated");
            }
            Transition::AuthFailed { reason } => {
                warn!(instance_id = id, reason = %reason, "Instance authentication failed");
                self.end(handle, StatusUpdate::auth_failed()).await;
            }
            Transition::Disconnected { reason } => {
                info!(instance_id = id, reason = %reason, "Instance disconnected");
                self.end(handle, StatusUpdate::disconnected()).await;
            }
            Transition::Observed => match &event {
                SessionEvent::LoadingProgress { percent, message } => {
                    debug!(instance_id = id, percent, message = %message, "Instance loading")
                }
                SessionEvent::Error(message) => {
                    warn!(instance_id = id, error = %message, "Session reported an error")
                }
                other => debug!(instance_id = id, event = other.name(), "Event ignored"),
            },
        }

        !terminal
    }

    /// Terminal transition from the event stream.
    async fn end(&self, handle: &Arc<InstanceHandle>, update: StatusUpdate) {
        if !self.release(handle) {
            return;
        }
        self.mirror(handle, update).await;
        if let Err(e) = handle.session.destroy().await {
            warn!(instance_id = handle.id, error = %e, "Session teardown failed");
        }
    }
}

/// Replace a raw QR payload with its rendered image.
fn render_qr(id: i64, event: SessionEvent) -> Option<SessionEvent> {
    match event {
        SessionEvent::QrIssued(payload) => match qr::to_data_url(&payload) {
            Ok(data_url) => Some(SessionEvent::QrIssued(data_url)),
            Err(e) => {
                warn!(instance_id = id, error = %e, "Dropping QR code that cannot be rendered");
                None
            }
        },
        other => Some(other),
    }
}

/// The instance lifecycle manager.
pub struct InstanceManager {
    shared: Arc<Shared>,
    factory: Arc<dyn SessionFactory>,
    config: ManagerConfig,
}

impl InstanceManager {
    /// Create a manager.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn SessionStore>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: DashMap::new(),
                store,
            }),
            factory,
            config,
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The session store the manager mirrors into.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.shared.store
    }

    /// Number of registered instances.
    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Registry entry of an instance.
    pub fn instance(&self, id: i64) -> Option<Arc<InstanceHandle>> {
        self.shared.registry.get(&id).map(|e| e.value().clone())
    }

    /// Start a session for `id`, or return the one already registered.
    ///
    /// The entry is registered before the session starts connecting, so
    /// concurrent calls for the same id share one session. If the session
    /// fails to start, the entry is removed and the error returned.
    pub async fn initialize_instance(&self, id: i64, token: &str) -> Result<Arc<InstanceHandle>> {
        let (handle, events) = match self.shared.registry.entry(id) {
            Entry::Occupied(entry) => {
                debug!(instance_id = id, "Instance already active");
                return Ok(entry.get().clone());
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let options = SessionOptions::new(id, token, &self.config.sessions_root);
                let session = self
                    .factory
                    .create(options, tx)
                    .map_err(|source| GatewayError::SessionInit {
                        instance_id: id,
                        source,
                    })?;
                let handle = Arc::new(InstanceHandle::new(id, session));
                entry.insert(handle.clone());
                (handle, rx)
            }
        };

        info!(
            instance_id = id,
            backend = self.factory.backend(),
            "Initializing instance"
        );
        self.spawn_event_pump(handle.clone(), events);

        if let Err(source) = handle.session.initialize().await {
            error!(instance_id = id, error = %source, "Failed to initialize instance");
            let claimed = self.shared.release(&handle);
            handle.retire();
            if let Err(e) = handle.session.destroy().await {
                debug!(instance_id = id, error = %e, "Cleanup after failed start failed");
            }
            // A QR issued before the failure may already be mirrored.
            if claimed {
                self.shared.mirror(&handle, StatusUpdate::disconnected()).await;
            }
            return Err(GatewayError::SessionInit {
                instance_id: id,
                source,
            });
        }

        info!(instance_id = id, "Session started");
        Ok(handle)
    }

    fn spawn_event_pump(
        &self,
        handle: Arc<InstanceHandle>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let shared = self.shared.clone();
        let shutdown = handle.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                if !shared.is_current(&handle) {
                    break;
                }
                if !shared.reconcile(&handle, event).await {
                    break;
                }
            }
            debug!(instance_id = handle.id, "Event pump stopped");
        });
    }

    /// Wait until `id` has a QR code, up to `timeout`.
    ///
    /// Returns `None` on timeout, when the instance is not registered, or when
    /// it connects or goes away without issuing one.
    pub async fn await_qr_code(&self, id: i64, timeout: Duration) -> Option<String> {
        let mut rx = self.instance(id)?.subscribe();

        let wait = rx.wait_for(|state| {
            state.qr_code().is_some()
                || state.status() == InstanceStatus::Connected
                || !state.status().is_active()
        });

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => state.qr_code().map(str::to_owned),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(instance_id = id, "Timed out waiting for QR code");
                None
            }
        }
    }

    /// Pending QR code of a registered instance.
    pub fn current_qr(&self, id: i64) -> Option<String> {
        self.instance(id).and_then(|h| h.qr_code())
    }

    /// Status of `id`. An unregistered instance reports `disconnected`.
    pub async fn get_status(&self, id: i64) -> StatusReport {
        let Some(handle) = self.instance(id) else {
            return StatusReport::inactive();
        };

        let state = match handle.session.connection_state().await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(instance_id = id, error = %e, "Connection state unavailable");
                None
            }
        };

        StatusReport {
            status: handle.status(),
            state,
            qr_code: handle.qr_code(),
            active: true,
        }
    }

    /// Tear down the session of `id` and mirror `disconnected`.
    ///
    /// Fails with [`GatewayError::NotActive`] when nothing is registered.
    pub async fn disconnect_instance(&self, id: i64) -> Result<()> {
        self.teardown(id, StatusUpdate::disconnected().clear_session())
            .await?;
        info!(instance_id = id, "Instance disconnected on request");
        Ok(())
    }

    async fn teardown(&self, id: i64, update: StatusUpdate) -> Result<()> {
        let Some((_, handle)) = self.shared.registry.remove(&id) else {
            return Err(GatewayError::NotActive(id));
        };

        handle.retire();
        if let Err(e) = handle.session.destroy().await {
            warn!(instance_id = id, error = %e, "Session teardown failed");
        }
        self.shared.mirror(&handle, update).await;

        Ok(())
    }

    /// Send a text message.
    pub async fn send_text(&self, id: i64, address: &str, text: &str) -> Result<SentMessage> {
        self.send(
            id,
            address,
            OutboundMessage::Text {
                body: text.to_string(),
            },
        )
        .await
    }

    /// Send an image or document by URL.
    pub async fn send_media(
        &self,
        id: i64,
        address: &str,
        media: MediaMessage,
    ) -> Result<SentMessage> {
        self.send(id, address, OutboundMessage::Media(media)).await
    }

    async fn send(&self, id: i64, address: &str, message: OutboundMessage) -> Result<SentMessage> {
        let kind = message.kind();

        let handle = match self.instance(id) {
            Some(handle) => handle,
            None => {
                let err = GatewayError::NotActive(id);
                warn!(instance_id = id, kind = %kind, "Send rejected, instance not active");
                self.shared
                    .record(MessageLogEntry::failure(id, address, &message, &err))
                    .await;
                return Err(err);
            }
        };

        let status = handle.status();
        if status != InstanceStatus::Connected {
            let err = GatewayError::InstanceNotConnected {
                instance_id: id,
                status,
            };
            warn!(instance_id = id, kind = %kind, status = %status, "Send rejected, instance not connected");
            self.shared
                .record(MessageLogEntry::failure(id, address, &message, &err))
                .await;
            return Err(err);
        }

        let chat_id = normalize_chat_id(address);
        match handle.session.send_message(&chat_id, &message).await {
            Ok(sent) => {
                info!(
                    instance_id = id,
                    kind = %kind,
                    message_id = %sent.id,
                    "Message sent"
                );
                self.shared
                    .record(MessageLogEntry::success(id, address, &message, &sent))
                    .await;
                Ok(sent)
            }
            Err(source) => {
                error!(instance_id = id, kind = %kind, error = %source, "Failed to send message");
                self.shared
                    .record(MessageLogEntry::failure(id, address, &message, &source))
                    .await;
                Err(GatewayError::Send {
                    instance_id: id,
                    source,
                })
            }
        }
    }

    /// Tear down every registered session and mirror `disconnected`.
    ///
    /// Session ids are kept so the sessions can be restored after a restart.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.shared.registry.iter().map(|e| *e.key()).collect();
        info!(count = ids.len(), "Shutting down active instances");

        join_all(ids.into_iter().map(|id| async move {
            if let Err(e) = self.teardown(id, StatusUpdate::disconnected()).await {
                debug!(instance_id = id, error = %e, "Instance already gone at shutdown");
            }
        }))
        .await;

        info!("All instances shut down");
    }
}
