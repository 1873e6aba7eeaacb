use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tabpilot_agents::{BrowserLink, Outbound};
use tabpilot_common::{BrowserResultPayload, Error, Message, MessageType, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type MessageHandler = Arc<dyn Fn(Message) -> Result<()> + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct Peer {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// The single browser-extension connection, plus routing of its inbound messages.
///
/// Outbound text frames go to whichever peer is currently attached. Inbound frames are parsed
/// and handed to the handler registered for their type; `browser.result` frames instead resolve
/// the matching in-flight [`Transport::send_browser_command`] call.
pub struct Transport {
    peer: RwLock<Option<Peer>>,
    next_peer: AtomicU64,
    handlers: RwLock<HashMap<MessageType, MessageHandler>>,
    on_connect: RwLock<Vec<ConnectionCallback>>,
    on_disconnect: RwLock<Vec<ConnectionCallback>>,
    pending: DashMap<String, oneshot::Sender<Message>>,
    command_timeout: Duration,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl Transport {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            peer: RwLock::new(None),
            next_peer: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            on_connect: RwLock::new(Vec::new()),
            on_disconnect: RwLock::new(Vec::new()),
            pending: DashMap::new(),
            command_timeout,
        }
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn on_message<F>(&self, kind: MessageType, handler: F)
    where
        F: Fn(Message) -> Result<()> + Send + Sync + 'static,
    {
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(handler));
        if previous.is_some() {
            debug!("replaced handler for {kind}");
        }
    }

    pub fn on_connect<F>(&self, callback: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.on_connect
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.on_disconnect
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.peer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| !p.tx.is_closed())
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Make `tx` the addressable peer and return its connection id.
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .peer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Peer { id, tx });
        match previous {
            Some(old) => info!("peer {id} connected, replacing peer {}", old.id),
            None => info!("peer {id} connected"),
        }
        run_callbacks(&self.on_connect, "connect");
        id
    }

    /// Forget peer `id`. A connection that was already replaced leaves the current peer alone.
    pub fn detach(&self, id: u64) {
        {
            let mut peer = self.peer.write().unwrap_or_else(PoisonError::into_inner);
            if peer.as_ref().is_none_or(|p| p.id != id) {
                debug!("stale peer {id} closed");
                return;
            }
            *peer = None;
        }
        info!("peer {id} disconnected");
        run_callbacks(&self.on_disconnect, "disconnect");
    }

    /// Fire-and-forget. Dropped when no peer is attached.
    pub fn send(&self, message: Message) {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize {} message: {e}", message.kind);
                return;
            }
        };

        let peer = self.peer.read().unwrap_or_else(PoisonError::into_inner);
        match peer.as_ref() {
            Some(peer) => {
                if peer.tx.send(json).is_err() {
                    warn!("peer {} is closing, dropped {} message", peer.id, message.kind);
                }
            }
            None => debug!("no peer connected, dropped {} message", message.kind),
        }
    }

    /// Route one inbound text frame. Malformed frames are logged and dropped.
    pub fn dispatch(&self, raw: &str) {
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping unparsable message: {e}");
                return;
            }
        };

        if message.kind == MessageType::BrowserResult {
            self.resolve_pending(message);
            return;
        }

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.kind)
            .cloned();
        let Some(handler) = handler else {
            warn!("no handler for message type {}", message.kind);
            return;
        };

        let kind = message.kind;
        if let Err(e) = handler(message) {
            warn!("{kind} handler failed: {e}");
        }
    }

    fn resolve_pending(&self, message: Message) {
        let payload = match message.parse_payload::<BrowserResultPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping malformed browser.result: {e}");
                return;
            }
        };
        match self.pending.remove(&payload.command_id) {
            Some((_, tx)) => {
                if tx.send(message).is_err() {
                    debug!("caller for command {} went away", payload.command_id);
                }
            }
            None => debug!("ignoring result for unknown command {}", payload.command_id),
        }
    }

    /// Send a `browser.command` and wait for the `browser.result` whose `commandId` matches
    /// `message.id`. Fails with a timeout when no reply arrives in time, including when the peer
    /// disconnects or was never connected.
    pub async fn send_browser_command(&self, message: Message) -> Result<Message> {
        let id = message.id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        self.send(message);

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport(format!("browser command {id} was abandoned"))),
            Err(_) => {
                warn!("browser command {id} timed out");
                Err(Error::Timeout("Browser command timed out".to_string()))
            }
        }
    }
}

/// Removes the pending entry however the wait ends. A no-op once the reply path took it.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<Message>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

fn run_callbacks(callbacks: &RwLock<Vec<ConnectionCallback>>, what: &str) {
    let callbacks = callbacks
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for callback in callbacks {
        if let Err(e) = callback() {
            warn!("{what} callback failed: {e}");
        }
    }
}

impl Outbound for Transport {
    fn send(&self, message: Message) {
        Transport::send(self, message);
    }
}

#[async_trait]
impl BrowserLink for Transport {
    fn is_connected(&self) -> bool {
        Transport::is_connected(self)
    }

    async fn send_browser_command(&self, message: Message) -> Result<Message> {
        Transport::send_browser_command(self, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tabpilot_common::{
        BrowserCommandName, BrowserCommandPayload, SYSTEM_SESSION, SessionMessagePayload,
    };

    fn command() -> Message {
        Message::new(
            SYSTEM_SESSION,
            &BrowserCommandPayload {
                command: BrowserCommandName::GetUrl,
                args: json!({}),
            },
        )
    }

    fn reply_for(id: &str, success: bool) -> String {
        Message::new(
            SYSTEM_SESSION,
            &BrowserResultPayload {
                command_id: id.to_string(),
                success,
                data: json!("https://example.com/"),
                error: None,
            },
        )
        .to_json()
        .unwrap()
    }

    #[test]
    fn send_without_peer_is_dropped() {
        let transport = Transport::default();
        assert!(!transport.is_connected());
        transport.send(command());
    }

    #[test]
    fn send_reaches_attached_peer() {
        let transport = Transport::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(tx);
        assert!(transport.is_connected());

        let msg = command();
        transport.send(msg.clone());
        let raw = rx.try_recv().unwrap();
        assert_eq!(Message::parse(&raw).unwrap(), msg);
    }

    #[test]
    fn new_peer_replaces_old_and_stale_detach_is_ignored() {
        let transport = Transport::default();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = disconnects.clone();
        transport.on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let old = transport.attach(old_tx);
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        let new = transport.attach(new_tx);

        transport.detach(old);
        assert!(transport.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 0);

        transport.send(command());
        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());

        transport.detach(new);
        assert!(!transport.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_routes_by_type_and_survives_garbage() {
        let transport = Transport::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.on_message(MessageType::SessionMessage, move |msg| {
            sink.lock().unwrap().push(msg.parse_payload::<SessionMessagePayload>()?.content);
            Ok(())
        });

        transport.dispatch("not json");
        transport.dispatch(r#"{"id":"1","sessionId":"s","type":"nope","payload":{},"timestamp":0}"#);
        transport.dispatch(
            &Message::new("s", &SessionMessagePayload { content: "hi".into() })
                .to_json()
                .unwrap(),
        );
        // handler errors are contained
        transport.dispatch(r#"{"id":"2","sessionId":"s","type":"session.message","payload":{},"timestamp":0}"#);

        assert_eq!(*seen.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[test]
    fn re_registering_a_handler_replaces_it() {
        let transport = Transport::default();
        let hits = Arc::new(AtomicUsize::new(0));
        transport.on_message(MessageType::SessionCancel, |_| {
            Err(Error::Session("old handler".into()))
        });
        let counter = hits.clone();
        transport.on_message(MessageType::SessionCancel, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        transport.dispatch(
            r#"{"id":"1","sessionId":"s","type":"session.cancel","payload":{},"timestamp":0}"#,
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_connect_callback_does_not_stop_others() {
        let transport = Transport::default();
        let hits = Arc::new(AtomicUsize::new(0));
        transport.on_connect(|| Err(Error::Transport("boom".into())));
        let counter = hits.clone();
        transport.on_connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        transport.attach(tx);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn browser_command_resolves_on_matching_result() {
        let transport = Arc::new(Transport::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(tx);

        let msg = command();
        let id = msg.id.clone();
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_browser_command(msg).await })
        };

        let sent = Message::parse(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent.id, id);
        assert_eq!(transport.pending_commands(), 1);

        transport.dispatch(&reply_for("someone-else", true));
        transport.dispatch(&reply_for(&id, true));
        // duplicate is ignored
        transport.dispatch(&reply_for(&id, false));

        let reply = waiter.await.unwrap().unwrap();
        let payload: BrowserResultPayload = reply.parse_payload().unwrap();
        assert!(payload.success);
        assert_eq!(transport.pending_commands(), 0);
    }

    #[tokio::test]
    async fn browser_command_times_out_and_late_reply_is_ignored() {
        let transport = Transport::new(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.attach(tx);

        let msg = command();
        let id = msg.id.clone();
        let err = transport.send_browser_command(msg).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(err.to_string(), "Browser command timed out");
        assert_eq!(transport.pending_commands(), 0);

        transport.dispatch(&reply_for(&id, true));
        assert_eq!(transport.pending_commands(), 0);
    }

    #[tokio::test]
    async fn browser_command_without_peer_times_out() {
        let transport = Transport::new(Duration::from_millis(50));
        let err = transport.send_browser_command(command()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn dropped_caller_clears_its_pending_entry() {
        let transport = Arc::new(Transport::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(tx);

        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send_browser_command(command()).await })
        };
        rx.recv().await.unwrap();
        assert_eq!(transport.pending_commands(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(transport.pending_commands(), 0);
    }
}
