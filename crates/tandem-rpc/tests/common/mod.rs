//! Services and helpers shared by the end-to-end tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tandem_rpc::{
    ClientCommunicator, ClientContext, CommunicatorBuilder, ConnectionEvent, MethodTable, Proxy,
    Serializer, ServerCommunicator, ServiceCaller, ServiceFault, ServiceInterface,
    SharedInstance, TransportConfig,
};
use tokio::sync::{broadcast, Notify};

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

/// Nothing is written unless a call writes it.
pub fn quiet_config() -> TransportConfig {
    TransportConfig {
        keep_alive_interval_ms: 0,
        connect_timeout_ms: 1_000,
        ..Default::default()
    }
}

tandem_rpc::service! {
    /// Served by the server in every test.
    pub trait Calculator as "Calculator" {
        fn sum(&self, number1: i32, number2: i32) -> i32 as "Sum";
        fn concat(&self, a: String, b: String) -> String as "Concat";
        fn fail(&self, message: String) -> i32 as "Fail";
        fn explode(&self) -> () as "Explode";
        fn reset(&self) -> () as "Reset";
        fn find(&self, key: String) -> Option<i32> as "Find";
        fn calls(&self) -> usize as "Calls";
    }
    pub proxy CalculatorProxy;
}

#[derive(Default)]
pub struct Calc {
    calls: AtomicUsize,
}

impl Calc {
    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Calculator for Calc {
    fn sum(&self, number1: i32, number2: i32) -> Result<i32, ServiceFault> {
        self.tick();
        Ok(number1 + number2)
    }

    fn concat(&self, a: String, b: String) -> Result<String, ServiceFault> {
        self.tick();
        Ok(a + &b)
    }

    fn fail(&self, message: String) -> Result<i32, ServiceFault> {
        self.tick();
        Err(ServiceFault::new(message))
    }

    fn explode(&self) -> Result<(), ServiceFault> {
        panic!("listener exploded")
    }

    fn reset(&self) -> Result<(), ServiceFault> {
        self.calls.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn find(&self, key: String) -> Result<Option<i32>, ServiceFault> {
        self.tick();
        Ok(key.parse().ok())
    }

    fn calls(&self) -> Result<usize, ServiceFault> {
        Ok(self.calls.load(Ordering::SeqCst))
    }
}

tandem_rpc::service! {
    /// Served by the client, called back by the server.
    pub trait Notifier as "Notifier" {
        fn notify(&self, text: String) -> usize as "Notify";
    }
    pub proxy NotifierProxy;
}

#[derive(Default)]
pub struct Inbox {
    pub received: Mutex<Vec<String>>,
}

impl Notifier for Inbox {
    fn notify(&self, text: String) -> Result<usize, ServiceFault> {
        let mut received = self.received.lock();
        received.push(text);
        Ok(received.len())
    }
}

/// Holds a call open until released, so tests can act mid-call.
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
    pub finished: Notify,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            finished: Notify::new(),
        })
    }
}

impl ServiceInterface for Gate {
    const NAME: &'static str = "Gate";

    fn describe<S: Serializer>(table: &mut MethodTable<Self, S>) {
        table.async_method("Hold", |gate: Arc<Gate>, (value,): (u64,)| async move {
            gate.entered.notify_one();
            gate.release.notified().await;
            gate.finished.notify_one();
            Ok::<_, ServiceFault>(value)
        });
    }
}

/// Hand-written stub for [`Gate`].
pub struct GateProxy<S: Serializer> {
    caller: ServiceCaller<S>,
}

impl<S: Serializer> Proxy<S> for GateProxy<S> {
    type Interface = Gate;

    fn from_caller(caller: ServiceCaller<S>) -> Self {
        Self { caller }
    }
}

impl<S: Serializer> GateProxy<S> {
    pub async fn hold(&self, value: u64) -> tandem_rpc::Result<u64> {
        self.caller.call("Hold", (value,)).await
    }
}

/// Server listener that calls back into whichever client called it.
pub struct Relay {
    context: ClientContext,
    server: Arc<OnceLock<Weak<ServerCommunicator>>>,
}

impl ServiceInterface for Relay {
    const NAME: &'static str = "Relay";

    fn describe<S: Serializer>(table: &mut MethodTable<Self, S>) {
        table.async_method("Bounce", |relay: Arc<Relay>, (text,): (String,)| async move {
            let server = relay
                .server
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| ServiceFault::new("server not ready"))?;
            let notifier: NotifierProxy = server
                .proxy(&relay.context)
                .map_err(|e| ServiceFault::new(e.to_string()))?;
            notifier
                .notify(format!("bounced {text}"))
                .await
                .map_err(|e| ServiceFault::new(e.to_string()))
        });
    }
}

pub struct RelayStub<S: Serializer> {
    caller: ServiceCaller<S>,
}

impl<S: Serializer> Proxy<S> for RelayStub<S> {
    type Interface = Relay;

    fn from_caller(caller: ServiceCaller<S>) -> Self {
        Self { caller }
    }
}

impl<S: Serializer> RelayStub<S> {
    pub async fn bounce(&self, text: &str) -> tandem_rpc::Result<usize> {
        self.caller.call("Bounce", (text.to_string(),)).await
    }
}

/// A started server with every test service registered.
pub struct Fixture {
    pub server: Arc<ServerCommunicator>,
    pub calculator: Arc<Calc>,
    pub gate: Arc<Gate>,
    pub port: u16,
}

impl Fixture {
    pub async fn start(config: TransportConfig) -> anyhow::Result<Self> {
        init_test_logging();
        let calculator = Arc::new(Calc::default());
        let gate = Gate::new();
        let slot: Arc<OnceLock<Weak<ServerCommunicator>>> = Arc::new(OnceLock::new());

        let shared: Arc<dyn Calculator> = calculator.clone();
        let relay_slot = slot.clone();
        let server = CommunicatorBuilder::new()
            .with_config(config)
            .register_listener::<dyn Calculator, _>(SharedInstance::new(shared))?
            .register_listener::<Gate, _>(SharedInstance::new(gate.clone()))?
            .register_listener::<Relay, _>(move |context: Option<&ClientContext>| {
                Arc::new(Relay {
                    context: context.cloned().unwrap_or_default(),
                    server: relay_slot.clone(),
                })
            })?
            .register_proxy::<dyn Notifier>()?
            .build_server();
        let server = Arc::new(server);
        let _ = slot.set(Arc::downgrade(&server));

        let addr = server.start("127.0.0.1", 0).await?;
        Ok(Self {
            server,
            calculator,
            gate,
            port: addr.port(),
        })
    }

    /// Connect a client with the matching proxies and a [`Notifier`] listener.
    pub async fn connect(&self, config: TransportConfig) -> anyhow::Result<(ClientCommunicator, Arc<Inbox>)> {
        let inbox = Arc::new(Inbox::default());
        let shared: Arc<dyn Notifier> = inbox.clone();
        let client = CommunicatorBuilder::new()
            .with_config(config)
            .register_proxy::<dyn Calculator>()?
            .register_proxy::<Gate>()?
            .register_proxy::<Relay>()?
            .register_listener::<dyn Notifier, _>(SharedInstance::new(shared))?
            .build_client();
        client.connect("127.0.0.1", self.port).await?;
        Ok((client, inbox))
    }

    /// Connect and wait until the server has registered the client.
    pub async fn connect_and_identify(
        &self,
        config: TransportConfig,
    ) -> anyhow::Result<(ClientCommunicator, Arc<Inbox>, ClientContext)> {
        let mut events = self.server.subscribe_events();
        let (client, inbox) = self.connect(config).await?;
        let context = wait_for_event(&mut events, |e| match e {
            ConnectionEvent::ClientConnected(context) => Some(context.clone()),
            _ => None,
        })
        .await;
        Ok((client, inbox, context))
    }

    pub async fn stop(self) {
        self.server.stop().await;
    }
}

/// Skip events until `pick` returns a value.
pub async fn wait_for_event<T>(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    mut pick: impl FnMut(&ConnectionEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(STEP, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(value) = pick(&event) {
                        return value;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for connection event")
}
