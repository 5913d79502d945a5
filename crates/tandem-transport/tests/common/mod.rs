//! Shared helpers for transport integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::RpcMessage;
use tandem_transport::{
    ClientContext, ClientEventHandler, ServerEventHandler, TransportConfig, TransportError,
};
use tokio::sync::mpsc;

pub const STEP: Duration = Duration::from_secs(5);

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Keep-alives every 50 ms, dead after 300 ms of silence.
pub fn fast_config() -> TransportConfig {
    TransportConfig {
        keep_alive_interval_ms: 50,
        missed_keep_alive_limit: 6,
        connect_timeout_ms: 1_000,
        ..Default::default()
    }
}

/// No keep-alives and no dead-peer detection, so nothing is written to a
/// socket unless the test writes it.
pub fn quiet_config() -> TransportConfig {
    TransportConfig {
        keep_alive_interval_ms: 0,
        connect_timeout_ms: 1_000,
        ..Default::default()
    }
}

#[derive(Debug)]
pub enum Event {
    Connected,
    Disconnected,
    ClientConnected(ClientContext),
    ClientDisconnected(ClientContext),
    Message(RpcMessage, Option<ClientContext>),
    Shutdown,
    Error(String, Option<ClientContext>),
}

/// Handler that forwards every callback into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), Events { rx })
    }

    fn record(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Events {
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(STEP, self.rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("recorder dropped")
    }

    /// Skip events until one matches.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&Event) -> bool) -> Event {
        loop {
            let event = self.next().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn assert_no_errors(&mut self) {
        let errors: Vec<_> = self
            .drain()
            .into_iter()
            .filter(|e| matches!(e, Event::Error(..)))
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }
}

#[async_trait]
impl ClientEventHandler for Recorder {
    async fn on_connected(&self) {
        self.record(Event::Connected);
    }

    async fn on_message(&self, message: RpcMessage) {
        self.record(Event::Message(message, None));
    }

    async fn on_disconnected(&self) {
        self.record(Event::Disconnected);
    }

    fn on_error(&self, error: &TransportError) {
        self.record(Event::Error(format!("{error:?}"), None));
    }
}

#[async_trait]
impl ServerEventHandler for Recorder {
    async fn on_client_connected(&self, context: &ClientContext) {
        self.record(Event::ClientConnected(context.clone()));
    }

    async fn on_message(&self, message: RpcMessage, context: &ClientContext) {
        self.record(Event::Message(message, Some(context.clone())));
    }

    async fn on_client_disconnected(&self, context: &ClientContext) {
        self.record(Event::ClientDisconnected(context.clone()));
    }

    async fn on_shutdown(&self) {
        self.record(Event::Shutdown);
    }

    fn on_error(&self, error: &TransportError, context: Option<&ClientContext>) {
        self.record(Event::Error(format!("{error:?}"), context.cloned()));
    }
}
