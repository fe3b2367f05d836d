//! Message bus: one inbound and one outbound bounded channel, a
//! channel-name → handler table, a streaming bypass, and the dispatcher.
//!
//! Delivery is best-effort with no retries: a missing handler drops the
//! message with a warning, a failing handler is logged and skipped.
//! Stream chunks do not go through the outbound queue: `stream_to`
//! invokes the handler directly, and per-chat ordering of those calls is
//! the channel adapter's responsibility.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use janus_domain::{InboundMessage, OutboundKind, OutboundMessage, Result};

use crate::channel::BoundedChannel;

/// Default queue capacity for both bus directions.
pub const DEFAULT_CAPACITY: usize = 100;

/// A channel adapter's delivery callback.
#[async_trait::async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn handle(&self, msg: OutboundMessage) -> Result<()>;
}

pub struct MessageBus {
    inbound: BoundedChannel<InboundMessage>,
    outbound: BoundedChannel<OutboundMessage>,
    handlers: RwLock<HashMap<String, Arc<dyn ChannelHandler>>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inbound: BoundedChannel::new(capacity),
            outbound: BoundedChannel::new(capacity),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    // ── Queues ────────────────────────────────────────────────────

    pub async fn publish_inbound(
        &self,
        msg: InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.inbound.publish(msg, cancel).await
    }

    pub async fn consume_inbound(&self, cancel: &CancellationToken) -> Result<InboundMessage> {
        self.inbound.consume(cancel).await
    }

    pub async fn publish_outbound(
        &self,
        msg: OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.outbound.publish(msg, cancel).await
    }

    pub async fn consume_outbound(&self, cancel: &CancellationToken) -> Result<OutboundMessage> {
        self.outbound.consume(cancel).await
    }

    pub fn inbound_depth(&self) -> usize {
        self.inbound.depth()
    }

    pub fn outbound_depth(&self) -> usize {
        self.outbound.depth()
    }

    // ── Handlers ──────────────────────────────────────────────────

    pub fn register_handler(&self, channel: &str, handler: Arc<dyn ChannelHandler>) {
        self.handlers.write().insert(channel.to_string(), handler);
    }

    pub fn has_handler(&self, channel: &str) -> bool {
        self.handlers.read().contains_key(channel)
    }

    fn handler_for(&self, channel: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.read().get(channel).cloned()
    }

    /// Bypass emit for high-frequency stream chunks: invokes the
    /// registered handler directly, skipping the outbound queue.
    pub async fn stream_to(
        &self,
        channel: &str,
        chat_id: &str,
        kind: OutboundKind,
        content: &str,
    ) -> Result<()> {
        let Some(handler) = self.handler_for(channel) else {
            tracing::warn!(channel, "stream_to: no handler registered, dropping chunk");
            return Ok(());
        };
        handler
            .handle(OutboundMessage::new(channel, chat_id, content, kind))
            .await
    }

    // ── Dispatcher ────────────────────────────────────────────────

    /// Consume the outbound queue and deliver to registered handlers
    /// until the token fires.
    pub async fn run_dispatcher(&self, cancel: CancellationToken) {
        loop {
            let msg = match self.consume_outbound(&cancel).await {
                Ok(msg) => msg,
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("dispatcher stopping");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "dispatcher consume failed");
                    return;
                }
            };

            let Some(handler) = self.handler_for(&msg.channel) else {
                tracing::warn!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    "no handler registered, dropping outbound message"
                );
                continue;
            };

            if let Err(e) = handler.handle(msg.clone()).await {
                tracing::error!(
                    channel = %msg.channel,
                    chat_id = %msg.chat_id,
                    error = %e,
                    "outbound handler failed"
                );
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_domain::Error;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait::async_trait]
    impl ChannelHandler for Recorder {
        async fn handle(&self, msg: OutboundMessage) -> Result<()> {
            self.seen.lock().push(msg);
            if self.fail {
                Err(Error::Other("handler exploded".into()))
            } else {
                Ok(())
            }
        }
    }

    fn outbound(channel: &str, content: &str) -> OutboundMessage {
        OutboundMessage::new(channel, "chat", content, OutboundKind::Message)
    }

    #[tokio::test]
    async fn dispatcher_delivers_to_registered_handler() {
        let bus = Arc::new(MessageBus::new(8));
        let handler = Recorder::new(false);
        bus.register_handler("cli", handler.clone());

        let cancel = CancellationToken::new();
        let bus2 = bus.clone();
        let cancel2 = cancel.clone();
        let dispatcher = tokio::spawn(async move { bus2.run_dispatcher(cancel2).await });

        bus.publish_outbound(outbound("cli", "hello"), &cancel)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.seen.lock().len(), 1);
        assert_eq!(handler.seen.lock()[0].content, "hello");

        cancel.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn dispatcher_drops_without_handler_and_continues() {
        let bus = Arc::new(MessageBus::new(8));
        let handler = Recorder::new(false);
        bus.register_handler("cli", handler.clone());

        let cancel = CancellationToken::new();
        let bus2 = bus.clone();
        let cancel2 = cancel.clone();
        let dispatcher = tokio::spawn(async move { bus2.run_dispatcher(cancel2).await });

        bus.publish_outbound(outbound("ghost", "lost"), &cancel)
            .await
            .unwrap();
        bus.publish_outbound(outbound("cli", "kept"), &cancel)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = handler.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content, "kept");
        drop(seen);

        cancel.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn dispatcher_survives_handler_errors() {
        let bus = Arc::new(MessageBus::new(8));
        let handler = Recorder::new(true);
        bus.register_handler("cli", handler.clone());

        let cancel = CancellationToken::new();
        let bus2 = bus.clone();
        let cancel2 = cancel.clone();
        let dispatcher = tokio::spawn(async move { bus2.run_dispatcher(cancel2).await });

        bus.publish_outbound(outbound("cli", "a"), &cancel)
            .await
            .unwrap();
        bus.publish_outbound(outbound("cli", "b"), &cancel)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.seen.lock().len(), 2);

        cancel.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn stream_to_bypasses_queue() {
        let bus = MessageBus::new(8);
        let handler = Recorder::new(false);
        bus.register_handler("telegram", handler.clone());

        bus.stream_to("telegram", "42", OutboundKind::Chunk, "partial")
            .await
            .unwrap();

        assert_eq!(bus.outbound_depth(), 0);
        let seen = handler.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, OutboundKind::Chunk);
    }

    #[tokio::test]
    async fn stream_to_without_handler_is_dropped() {
        let bus = MessageBus::new(8);
        bus.stream_to("nowhere", "1", OutboundKind::Chunk, "x")
            .await
            .unwrap();
    }
}
