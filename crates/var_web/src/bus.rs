//! Typed in-process publish/subscribe hub bridging the system to operator
//! browsers.
//!
//! Topics are registered with an emitter closure that produces the current
//! snapshot on demand; subscriptions are scoped to one websocket connection.
//! Commands are registered with a typed payload and dispatched by name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::model::{InboundMessage, OutboundMessage};

/// Settings for the user-facing control and status panels.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Swap the red and blue score panels. The default matches the view
    /// from the scoring table.
    pub swap_red_blue: bool,
}

/// Identifies one connected operator client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

type Emitter = Box<dyn Fn() -> serde_json::Value + Send + Sync>;
type CommandFn = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync>;

struct Notifier {
    emitter: Emitter,
    subscribers: HashSet<ClientId>,
}

#[derive(Default)]
struct BusInner {
    notifiers: HashMap<String, Notifier>,
    commands: HashMap<String, CommandFn>,
    clients: HashMap<ClientId, mpsc::UnboundedSender<String>>,
    next_client_id: u64,
}

/// The publish/subscribe hub.
pub struct Bus {
    inner: Mutex<BusInner>,
}

impl Bus {
    pub fn new(ui_settings: UiSettings) -> Self {
        let bus = Self {
            inner: Mutex::new(BusInner::default()),
        };
        bus.add_event_type("ui_settings", move || {
            serde_json::to_value(ui_settings).unwrap_or_default()
        });
        bus
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().expect("bus lock poisoned")
    }

    /// Register a topic with an emitter producing its current snapshot.
    ///
    /// Panics if the topic already exists; registration happens once at
    /// startup.
    pub fn add_event_type<F>(&self, event_type: &str, emitter: F)
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        debug!(event_type, "registering event type");
        let mut inner = self.lock();
        assert!(
            !inner.notifiers.contains_key(event_type),
            "event type '{event_type}' already exists"
        );
        inner.notifiers.insert(
            event_type.to_string(),
            Notifier {
                emitter: Box::new(emitter),
                subscribers: HashSet::new(),
            },
        );
    }

    /// Register a command handler with a typed payload.
    ///
    /// Payloads that fail validation are logged and dropped without a reply.
    pub fn add_command_handler<T, F>(&self, command: &str, handler: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        debug!(command, "registering command handler");
        let name = command.to_string();
        let wrapped: CommandFn = Arc::new(move |value: serde_json::Value| {
            match serde_json::from_value::<T>(value) {
                Ok(data) => handler(data),
                Err(e) => {
                    error!(command = %name, error = %e, "invalid command payload");
                    futures::future::ready(()).boxed()
                }
            }
        });
        let mut inner = self.lock();
        assert!(
            !inner.commands.contains_key(command),
            "command handler for '{command}' already exists"
        );
        inner.commands.insert(command.to_string(), wrapped);
    }

    /// Publish a topic update to all its subscribers.
    ///
    /// When `data` is `None` the topic's emitter supplies the snapshot.
    /// Subscribers whose connection has gone away are evicted from the
    /// topic; one failing subscriber never blocks delivery to the rest.
    pub fn notify(&self, event_type: &str, data: Option<serde_json::Value>) {
        let (text, recipients) = {
            let inner = self.lock();
            let Some(notifier) = inner.notifiers.get(event_type) else {
                warn!(event_type, "notify for unknown event type");
                return;
            };
            let data = data.unwrap_or_else(|| (notifier.emitter)());
            let message = OutboundMessage::Event {
                event_type: event_type.to_string(),
                data,
            };
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(event_type, error = %e, "failed to serialize event");
                    return;
                }
            };
            let recipients: Vec<(ClientId, mpsc::UnboundedSender<String>)> = notifier
                .subscribers
                .iter()
                .filter_map(|id| inner.clients.get(id).map(|tx| (*id, tx.clone())))
                .collect();
            (text, recipients)
        };

        debug!(event_type, subscribers = recipients.len(), "notifying subscribers");
        let mut failed = Vec::new();
        for (client_id, tx) in recipients {
            if tx.send(text.clone()).is_err() {
                failed.push(client_id);
            }
        }
        if !failed.is_empty() {
            let mut inner = self.lock();
            if let Some(notifier) = inner.notifiers.get_mut(event_type) {
                for client_id in failed {
                    notifier.subscribers.remove(&client_id);
                }
            }
        }
    }

    /// Ask every connected client to reload its page.
    pub fn reload_clients(&self) {
        info!("requesting reload on all clients");
        let text = match serde_json::to_string(&OutboundMessage::Reload) {
            Ok(text) => text,
            Err(_) => return,
        };
        let clients: Vec<(ClientId, mpsc::UnboundedSender<String>)> = {
            let inner = self.lock();
            inner.clients.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };
        let mut failed = Vec::new();
        for (client_id, tx) in clients {
            if tx.send(text.clone()).is_err() {
                failed.push(client_id);
            }
        }
        if !failed.is_empty() {
            let mut inner = self.lock();
            for client_id in failed {
                inner.clients.remove(&client_id);
            }
        }
    }

    fn register_client(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_client_id += 1;
        let client_id = ClientId(inner.next_client_id);
        inner.clients.insert(client_id, tx);
        (client_id, rx)
    }

    fn unregister_client(&self, client_id: ClientId, subscriptions: &HashSet<String>) {
        let mut inner = self.lock();
        inner.clients.remove(&client_id);
        for event_type in subscriptions {
            if let Some(notifier) = inner.notifiers.get_mut(event_type) {
                notifier.subscribers.remove(&client_id);
            }
        }
    }

    /// Process a subscribe request, returning the serialized response.
    fn subscribe_client(
        &self,
        client_id: ClientId,
        event_types: Vec<String>,
        request_id: Option<i64>,
        subscriptions: &mut HashSet<String>,
    ) -> Option<String> {
        debug!(?event_types, "processing subscription request");
        let mut inner = self.lock();
        let mut initial_data = BTreeMap::new();
        for event_type in event_types {
            let Some(notifier) = inner.notifiers.get_mut(&event_type) else {
                warn!(event_type = %event_type, "unknown event type in subscription request");
                continue;
            };
            initial_data.insert(event_type.clone(), (notifier.emitter)());
            notifier.subscribers.insert(client_id);
            subscriptions.insert(event_type);
        }
        serde_json::to_string(&OutboundMessage::Subscribe {
            initial_data,
            request_id,
        })
        .ok()
    }

    /// Process an unsubscribe request, returning the serialized response.
    fn unsubscribe_client(
        &self,
        client_id: ClientId,
        event_types: Vec<String>,
        request_id: Option<i64>,
        subscriptions: &mut HashSet<String>,
    ) -> Option<String> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        for event_type in event_types {
            if subscriptions.remove(&event_type) {
                if let Some(notifier) = inner.notifiers.get_mut(&event_type) {
                    notifier.subscribers.remove(&client_id);
                }
                removed.push(event_type);
            }
        }
        serde_json::to_string(&OutboundMessage::Unsubscribe {
            unsubscribed_event_types: removed,
            request_id,
        })
        .ok()
    }

    /// Dispatch a command to its registered handler.
    async fn dispatch_command(&self, command: &str, data: serde_json::Value) {
        let handler = {
            let inner = self.lock();
            inner.commands.get(command).cloned()
        };
        match handler {
            Some(handler) => handler(data).await,
            None => error!(command, "unknown command"),
        }
    }

    /// Serve one operator websocket connection until it disconnects.
    pub async fn serve_client(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (client_id, mut rx) = self.register_client();
        info!(?client_id, "websocket client connected");

        let send_task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let mut subscriptions = HashSet::new();
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    debug!(?client_id, error = %e, "websocket receive error");
                    break;
                }
            };
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let inbound: InboundMessage = match serde_json::from_str(text.as_str()) {
                Ok(inbound) => inbound,
                Err(e) => {
                    error!(?client_id, error = %e, "invalid websocket message");
                    continue;
                }
            };

            let reply = match inbound {
                InboundMessage::Subscribe {
                    event_types,
                    request_id,
                } => self.subscribe_client(client_id, event_types, request_id, &mut subscriptions),
                InboundMessage::Unsubscribe {
                    event_types,
                    request_id,
                } => {
                    self.unsubscribe_client(client_id, event_types, request_id, &mut subscriptions)
                }
                InboundMessage::Command { command, data } => {
                    self.dispatch_command(&command, data).await;
                    None
                }
            };
            if let Some(reply) = reply {
                let tx = {
                    let inner = self.lock();
                    inner.clients.get(&client_id).cloned()
                };
                let delivered = tx.map(|tx| tx.send(reply).is_ok()).unwrap_or(false);
                if !delivered {
                    break;
                }
            }
        }

        info!(?client_id, "websocket client disconnected");
        self.unregister_client(client_id, &subscriptions);
        send_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn subscribe(
        bus: &Bus,
        client_id: ClientId,
        types: &[&str],
        subs: &mut HashSet<String>,
    ) -> serde_json::Value {
        let reply = bus
            .subscribe_client(
                client_id,
                types.iter().map(|t| t.to_string()).collect(),
                Some(1),
                subs,
            )
            .unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn subscribe_returns_initial_data_and_skips_unknown_topics() {
        let bus = Bus::new(UiSettings::default());
        bus.add_event_type("arena_connection", || json!({"connected": false}));

        let (client_id, _rx) = bus.register_client();
        let mut subs = HashSet::new();
        let reply = subscribe(
            &bus,
            client_id,
            &["arena_connection", "ui_settings", "mystery_topic"],
            &mut subs,
        );

        assert_eq!(reply["type"], "subscribe");
        assert_eq!(reply["initial_data"]["arena_connection"]["connected"], false);
        assert_eq!(reply["initial_data"]["ui_settings"]["swap_red_blue"], false);
        assert!(reply["initial_data"].get("mystery_topic").is_none());
        assert_eq!(subs.len(), 2);
    }

    #[tokio::test]
    async fn notify_reaches_only_subscribers() {
        let bus = Bus::new(UiSettings::default());
        bus.add_event_type("match_list", || json!({}));

        let (subscriber, mut sub_rx) = bus.register_client();
        let (_other, mut other_rx) = bus.register_client();
        let mut subs = HashSet::new();
        subscribe(&bus, subscriber, &["match_list"], &mut subs);

        bus.notify("match_list", Some(json!({"Q1": {"clip_available": true}})));

        let text = sub_rx.try_recv().unwrap();
        let event: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(event["type"], "event");
        assert_eq!(event["event_type"], "match_list");
        assert_eq!(event["data"]["Q1"]["clip_available"], true);

        assert!(other_rx.try_recv().is_err());
        // Exactly one delivery per notify call
        assert!(sub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_uses_emitter_when_no_data_given() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bus = Bus::new(UiSettings::default());
        let emitted = counter.clone();
        bus.add_event_type("controller_status", move || {
            emitted.fetch_add(1, Ordering::SeqCst);
            json!({"recording": true})
        });

        let (client_id, mut rx) = bus.register_client();
        let mut subs = HashSet::new();
        subscribe(&bus, client_id, &["controller_status"], &mut subs);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "initial data emission");

        bus.notify("controller_status", None);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        let text = rx.recv().await.unwrap();
        assert!(text.contains("\"recording\":true"));
    }

    #[tokio::test]
    async fn dead_subscribers_are_evicted() {
        let bus = Bus::new(UiSettings::default());
        bus.add_event_type("match_timing", || json!({}));

        let (client_id, rx) = bus.register_client();
        let mut subs = HashSet::new();
        subscribe(&bus, client_id, &["match_timing"], &mut subs);
        drop(rx);

        bus.notify("match_timing", None);
        let inner = bus.lock();
        assert!(inner.notifiers["match_timing"].subscribers.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_reports_removed_types() {
        let bus = Bus::new(UiSettings::default());
        bus.add_event_type("a", || json!(1));
        bus.add_event_type("b", || json!(2));

        let (client_id, _rx) = bus.register_client();
        let mut subs = HashSet::new();
        subscribe(&bus, client_id, &["a", "b"], &mut subs);

        let reply = bus
            .unsubscribe_client(
                client_id,
                vec!["a".to_string(), "never_subscribed".to_string()],
                None,
                &mut subs,
            )
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["unsubscribed_event_types"], json!(["a"]));
        assert_eq!(subs.len(), 1);
        assert!(subs.contains("b"));
    }

    #[tokio::test]
    async fn commands_validate_and_dispatch() {
        #[derive(Deserialize)]
        struct TestCommand {
            value: u32,
        }

        let bus = Bus::new(UiSettings::default());
        let received = Arc::new(AtomicUsize::new(0));
        let sink = received.clone();
        bus.add_command_handler("test_command", move |cmd: TestCommand| {
            let sink = sink.clone();
            async move {
                sink.fetch_add(cmd.value as usize, Ordering::SeqCst);
            }
            .boxed()
        });

        bus.dispatch_command("test_command", json!({"value": 5})).await;
        assert_eq!(received.load(Ordering::SeqCst), 5);

        // Invalid payload: logged and dropped
        bus.dispatch_command("test_command", json!({"value": "nope"}))
            .await;
        assert_eq!(received.load(Ordering::SeqCst), 5);

        // Unknown command: logged and dropped
        bus.dispatch_command("no_such_command", json!({})).await;
        assert_eq!(received.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn reload_reaches_all_clients() {
        let bus = Bus::new(UiSettings::default());
        let (_c1, mut rx1) = bus.register_client();
        let (_c2, mut rx2) = bus.register_client();

        bus.reload_clients();
        assert_eq!(rx1.try_recv().unwrap(), r#"{"type":"reload"}"#);
        assert_eq!(rx2.try_recv().unwrap(), r#"{"type":"reload"}"#);
    }
}
