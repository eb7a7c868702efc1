use axum::extract::ws::{Message, WebSocket};
use axum::body::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, timeout, Instant};

use crate::config::WsConfig;
use crate::ws::broadcast::DeliveryGateway;
use crate::ws::hub::{HubError, HubHandle};
use crate::ws::protocol::{self, ClientEvent, MessageRead, ServerEvent};
use crate::ws::ConnectionId;

/// Drive one authenticated WebSocket until either side goes away.
///
/// The connection is split into two pumps:
/// - Writer task: owns the sink, drains the hub mailbox and sends heartbeats
/// - Reader: decodes client frames and dispatches them
///
/// Whichever pump stops first ends the connection. Cleanup always
/// unregisters from the hub, which closes the mailbox and lets the writer
/// flush a close frame.
pub async fn run_connection(socket: WebSocket, hub: HubHandle, settings: WsConfig, user_id: String) {
    let welcome = ServerEvent::connected(&user_id);
    let registration = match hub.register_with_greeting(&user_id, &welcome).await {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Could not register connection");
            return;
        }
    };
    let id = registration.id;

    tracing::info!(
        user_id = %user_id,
        conn_id = id,
        "WebSocket connection started"
    );

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(
        sink,
        registration.mailbox,
        hub.clone(),
        settings.clone(),
        id,
    ));

    let reader = Reader {
        id,
        user_id: &user_id,
        hub: &hub,
        local: registration.local,
        settings: &settings,
    };

    tokio::select! {
        result = reader.run(stream) => {
            if let Err(e) = result {
                tracing::warn!(user_id = %user_id, conn_id = id, error = %e, "Dropping connection");
            }
        }
        _ = &mut writer => {}
    }

    hub.unregister(id);

    // Give the writer one write deadline to flush its close frame.
    if timeout(settings.write_timeout(), &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(
        user_id = %user_id,
        conn_id = id,
        "WebSocket connection stopped"
    );
}

/// Forward mailbox frames to the socket and ping on every heartbeat tick.
/// Every write is bounded by the write deadline.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: mpsc::Receiver<Message>,
    hub: HubHandle,
    settings: WsConfig,
    id: ConnectionId,
) {
    let period = settings.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        let frame = tokio::select! {
            biased;
            frame = mailbox.recv() => match frame {
                Some(frame) => frame,
                None => {
                    // Hub dropped us; say goodbye and stop.
                    let _ = timeout(settings.write_timeout(), sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = heartbeat.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(settings.write_timeout(), sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn_id = id, error = %e, "WebSocket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(conn_id = id, "WebSocket write timed out");
                break;
            }
        }
    }

    hub.unregister(id);
}

struct Reader<'a> {
    id: ConnectionId,
    user_id: &'a str,
    hub: &'a HubHandle,
    local: mpsc::WeakSender<Message>,
    settings: &'a WsConfig,
}

impl Reader<'_> {
    /// Read until close, error, idle timeout or a reply that cannot be queued.
    async fn run(&self, mut stream: SplitStream<WebSocket>) -> Result<(), HubError> {
        loop {
            let next = match timeout(self.settings.read_timeout(), stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::info!(user_id = %self.user_id, conn_id = self.id, "WebSocket read timed out");
                    return Ok(());
                }
            };

            match next {
                Some(Ok(Message::Text(text))) => self.dispatch(text.as_str())?,
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(conn_id = self.id, "Ignoring binary frame");
                }
                // The transport queues the matching pong itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        user_id = %self.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    return Ok(());
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = %self.user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    return Ok(());
                }
                None => {
                    tracing::info!(user_id = %self.user_id, "WebSocket stream ended");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&self, text: &str) -> Result<(), HubError> {
        let event = match protocol::decode_client_frame(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "Discarding client frame");
                return Ok(());
            }
        };

        match event {
            ClientEvent::Subscribe { channel } => {
                self.reply_event(&ServerEvent::subscribed(&channel, self.user_id))
            }
            ClientEvent::SubscribeChat { chat_id } => {
                self.reply_event(&ServerEvent::chat_subscribed(&chat_id, self.user_id))
            }
            ClientEvent::TypingStart { chat_id } => {
                self.hub.typing_start(&chat_id, self.user_id);
                Ok(())
            }
            ClientEvent::TypingEnd { chat_id } => {
                self.hub.typing_end(&chat_id, self.user_id);
                Ok(())
            }
            ClientEvent::MessageRead {
                chat_id,
                message_ids,
            } => {
                self.hub.message_read(MessageRead {
                    chat_id,
                    user_id: self.user_id.to_string(),
                    message_ids,
                    timestamp: protocol::unix_now(),
                });
                Ok(())
            }
            ClientEvent::Ping => self.reply_event(&ServerEvent::pong()),
            ClientEvent::Unknown(kind) => {
                tracing::debug!(user_id = %self.user_id, kind = %kind, "Unknown message type");
                Ok(())
            }
        }
    }

    fn reply_event(&self, event: &ServerEvent) -> Result<(), HubError> {
        match event.encode() {
            Ok(json) => self.reply(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "Failed to encode reply");
                Ok(())
            }
        }
    }

    /// Queue a frame for this connection only. The mailbox shares its bound
    /// with broadcasts; overflowing it ends the connection.
    fn reply(&self, frame: Message) -> Result<(), HubError> {
        let Some(mailbox) = self.local.upgrade() else {
            return Ok(());
        };
        match mailbox.try_send(frame) {
            Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
            Err(TrySendError::Full(_)) => Err(HubError::MailboxFull(self.id)),
        }
    }
}
