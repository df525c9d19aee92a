//! Runtime tests against scripted mock channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use neorestore::Restored;
use serde_json::Value;
use serde_json::json;
use tokio::time::Instant;

use crate::api::ApiError;
use crate::api::RelayedError;
use crate::bind::BindError;
use crate::channel;
use crate::channel::CallHandler;
use crate::channel::Channel;
use crate::channel::ChannelError;
use crate::channel::Listener;
use crate::config::Config;
use crate::expose::ExposeError;
use crate::naming::ApiRegistration;
use crate::naming::DISCOVERY_REPLY;
use crate::naming::DISCOVERY_REQUEST;
use crate::naming::ONEWAY_DISCOVERY_REPLY;
use crate::naming::ONEWAY_DISCOVERY_REQUEST;
use crate::naming::discovery_reply;
use crate::naming::discovery_request;
use crate::naming::to_channel_name;
use crate::proxy::CallError;
use crate::proxy::Mode;
use crate::runtime;
use crate::runtime::EndpointId;
use crate::runtime::Runtime;

// ============================================================================
//  Fixtures
// ============================================================================

struct Greeter;

impl Greeter {
    async fn hello(&self, name: String) -> Result<String, ApiError> {
        if name.is_empty() {
            return Err(RelayedError::from("bad name").into());
        }
        Ok(format!("Hi, {name}"))
    }

    async fn explode(&self) -> Result<(), ApiError> {
        Err(anyhow::anyhow!("boiler pressure exceeded").into())
    }

    async fn _rotate(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

crate::api!(impl Greeter as "Greeter" {
    async fn hello(&self, name: String) -> String;
    async fn explode(&self);
    async fn _rotate(&self);
});

/// Records one-way pushes in arrival order.
#[derive(Default)]
struct Tally {
    seen: Mutex<Vec<u32>>,
}

impl Tally {
    async fn push(&self, n: u32) -> Result<(), ApiError> {
        // Give later messages a chance to overtake.
        tokio::task::yield_now().await;
        self.seen.lock().unwrap().push(n);
        Ok(())
    }
}

crate::api!(impl Tally as "Tally" {
    async fn push(&self, n: u32);
});

/// Mock channel that records outbound traffic and lets tests play the remote.
///
/// Listeners and handlers installed on it are run by [`MockChannel::deliver`]
/// and [`MockChannel::invoke`]. Outbound calls answer with `reply`. A
/// handler for the name in `refuse` is rejected as if something else owned it.
#[derive(Default)]
struct MockChannel {
    sent: Mutex<Vec<(String, Vec<Value>)>>,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    handlers: Mutex<HashMap<String, CallHandler>>,
    reply: Mutex<Option<channel::Result<Value>>>,
    refuse: Mutex<Option<String>>,
}

impl MockChannel {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn replying(reply: channel::Result<Value>) -> Arc<Self> {
        let mock = Self::default();
        *mock.reply.lock().unwrap() = Some(reply);
        Arc::new(mock)
    }

    fn refusing(name: &str) -> Arc<Self> {
        let mock = Self::default();
        *mock.refuse.lock().unwrap() = Some(name.to_string());
        Arc::new(mock)
    }

    fn sent_on(&self, name: &str) -> Vec<Vec<Value>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(channel, _)| channel == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn has_handler(&self, name: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(name)
    }

    fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().unwrap().get(name).map_or(0, Vec::len)
    }

    /// Plays a one-way message from the remote.
    fn deliver(&self, name: &str, args: Vec<Value>) {
        let listeners = self.listeners.lock().unwrap().get(name).cloned().unwrap_or_default();
        for listener in listeners {
            listener(args.clone());
        }
    }

    /// Plays a call from the remote.
    async fn invoke(&self, name: &str, args: Vec<Value>) -> channel::Result<Value> {
        let handler = self.handlers.lock().unwrap().get(name).cloned();
        match handler {
            Some(handler) => handler(args).await,
            None => Err(ChannelError::NoHandler(name.to_string())),
        }
    }

    /// Plays the remote announcing a registration exposed in `mode`.
    fn announce(&self, mode: Mode, registration: &ApiRegistration) {
        self.deliver(discovery_reply(mode), vec![serde_json::to_value(registration).unwrap()]);
    }
}

#[async_trait::async_trait]
impl Channel for MockChannel {
    fn endpoint_name(&self) -> &str {
        "mock"
    }

    async fn call(&self, channel: &str, args: Vec<Value>) -> channel::Result<Value> {
        self.sent.lock().unwrap().push((channel.to_string(), args));
        self.reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(ChannelError::NoHandler(channel.to_string())))
    }

    fn send(&self, channel: &str, args: Vec<Value>) -> channel::Result<()> {
        self.sent.lock().unwrap().push((channel.to_string(), args));
        Ok(())
    }

    fn handle(&self, channel: &str, handler: CallHandler) -> channel::Result<()> {
        if self.refuse.lock().unwrap().as_deref() == Some(channel) {
            return Err(ChannelError::HandlerExists(channel.to_string()));
        }
        self.handlers.lock().unwrap().insert(channel.to_string(), handler);
        Ok(())
    }

    fn on(&self, channel: &str, listener: Listener) {
        self.listeners
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    fn remove_handler(&self, channel: &str) {
        self.handlers.lock().unwrap().remove(channel);
    }

    fn remove_all_listeners(&self, channel: &str) {
        self.listeners.lock().unwrap().remove(channel);
    }
}

fn greeter_registration() -> ApiRegistration {
    ApiRegistration::new("Greeter", ["hello", "explode"])
}

fn quick_config() -> Config {
    Config::default()
        .with_bind_timeout(Duration::from_millis(300))
        .with_retry_interval(Duration::from_millis(50))
}

// ============================================================================
//  Exposure
// ============================================================================

#[tokio::test]
async fn test_expose_installs_public_methods_only() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());

    rt.expose(Arc::new(Greeter), None).unwrap();

    assert!(mock.has_handler(&to_channel_name("Greeter", "hello")));
    assert!(mock.has_handler(&to_channel_name("Greeter", "explode")));
    assert!(!mock.has_handler(&to_channel_name("Greeter", "_rotate")));
    assert!(rt.is_exposed("Greeter", Mode::Call));
    assert!(!rt.is_exposed("Greeter", Mode::Send));
}

#[tokio::test]
async fn test_expose_announces_registration() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());

    rt.expose(Arc::new(Greeter), None).unwrap();

    let announced = mock.sent_on(DISCOVERY_REPLY);
    assert_eq!(announced.len(), 1);
    let registration: ApiRegistration = serde_json::from_value(announced[0][0].clone()).unwrap();
    assert_eq!(registration, greeter_registration());
}

#[tokio::test]
async fn test_expose_twice_is_a_noop() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());

    rt.expose(Arc::new(Greeter), None).unwrap();
    let handlers_before = mock.handlers.lock().unwrap().len();
    rt.expose(Arc::new(Greeter), None).unwrap();

    assert_eq!(mock.handlers.lock().unwrap().len(), handlers_before);
    assert_eq!(mock.sent_on(DISCOVERY_REPLY).len(), 1);
}

#[tokio::test]
async fn test_late_attach_receives_existing_exposures() {
    let rt = Runtime::new();
    rt.expose(Arc::new(Greeter), None).unwrap();

    let mock = MockChannel::new();
    rt.attach(mock.clone());

    assert!(mock.has_handler(&to_channel_name("Greeter", "hello")));
    assert_eq!(mock.sent_on(DISCOVERY_REPLY).len(), 1);
}

#[tokio::test]
async fn test_expose_oneway_installs_listeners() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());

    rt.expose_oneway(Arc::new(Greeter), None).unwrap();

    assert_eq!(mock.listener_count(&to_channel_name("Greeter", "hello")), 1);
    assert!(!mock.has_handler(&to_channel_name("Greeter", "hello")));
    assert_eq!(mock.sent_on(ONEWAY_DISCOVERY_REPLY).len(), 1);
    assert!(mock.sent_on(DISCOVERY_REPLY).is_empty());
}

#[tokio::test]
async fn test_refused_handler_is_reported() {
    let rt = Runtime::new();
    let explode = to_channel_name("Greeter", "explode");
    let mock = MockChannel::refusing(&explode);
    let id = rt.attach(mock.clone());

    let err = rt.expose(Arc::new(Greeter), None).unwrap_err();
    match err {
        ExposeError::Install { endpoint, ref class_name, source: ChannelError::HandlerExists(ref name) } => {
            assert_eq!(endpoint, id);
            assert_eq!(class_name, "Greeter");
            assert_eq!(name, &explode);
        }
        _ => panic!("Expected Install(HandlerExists), got {:?}", err),
    }

    // Nothing of the failed exposure is left behind.
    assert!(!rt.is_exposed("Greeter", Mode::Call));
    assert!(!mock.has_handler(&to_channel_name("Greeter", "hello")));
    assert!(mock.sent_on(DISCOVERY_REPLY).is_empty());
    mock.deliver(DISCOVERY_REQUEST, vec![json!("Greeter")]);
    assert!(mock.sent_on(DISCOVERY_REPLY).is_empty());
}

#[tokio::test]
async fn test_failed_exposure_can_be_retried() {
    let rt = Runtime::new();
    let mock = MockChannel::refusing(&to_channel_name("Greeter", "explode"));
    let healthy = MockChannel::new();
    rt.attach(healthy.clone());
    rt.attach(mock.clone());

    rt.expose(Arc::new(Greeter), None).unwrap_err();
    assert!(healthy.handlers.lock().unwrap().is_empty());
    assert!(healthy.sent_on(DISCOVERY_REPLY).is_empty());

    *mock.refuse.lock().unwrap() = None;
    rt.expose(Arc::new(Greeter), None).unwrap();

    assert!(rt.is_exposed("Greeter", Mode::Call));
    for channel in [&mock, &healthy] {
        assert!(channel.has_handler(&to_channel_name("Greeter", "explode")));
        assert_eq!(channel.sent_on(DISCOVERY_REPLY).len(), 1);
    }
    let reply = mock
        .invoke(&to_channel_name("Greeter", "hello"), vec![json!("Ada")])
        .await
        .unwrap();
    assert_eq!(reply, json!("Hi, Ada"));
}

// ============================================================================
//  Handlers
// ============================================================================

#[tokio::test]
async fn test_handler_returns_encoded_reply() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    let reply = mock
        .invoke(&to_channel_name("Greeter", "hello"), vec![json!("Ada")])
        .await
        .unwrap();
    assert_eq!(reply, json!("Hi, Ada"));
}

#[tokio::test]
async fn test_handler_relays_as_successful_reply() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    let reply = mock
        .invoke(&to_channel_name("Greeter", "hello"), vec![json!("")])
        .await
        .unwrap();
    assert_eq!(reply, json!({ "__isRelayedError": true, "payload": "bad name" }));
}

#[tokio::test]
async fn test_handler_fault_reaches_logger_once() {
    let faults = Arc::new(Mutex::new(Vec::new()));
    let sink = faults.clone();
    let rt = Runtime::builder()
        .error_logger(move |report| {
            sink.lock()
                .unwrap()
                .push((report.class_name.to_string(), report.method.to_string(), report.error.to_string()));
        })
        .build();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    let channel_name = to_channel_name("Greeter", "explode");
    let err = mock.invoke(&channel_name, vec![]).await.unwrap_err();

    match err {
        ChannelError::HandlerFailed(ref msg) => {
            assert!(msg.contains(&channel_name));
            assert!(msg.contains("boiler pressure exceeded"));
        }
        _ => panic!("Expected HandlerFailed, got {:?}", err),
    }

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, "Greeter");
    assert_eq!(faults[0].1, "explode");
    assert_eq!(faults[0].2, "boiler pressure exceeded");
}

#[tokio::test]
async fn test_bad_argument_is_a_fault() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let rt = Runtime::builder()
        .error_logger(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    let err = mock
        .invoke(&to_channel_name("Greeter", "hello"), vec![json!(42)])
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::HandlerFailed(_)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_oneway_fault_reaches_logger() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let rt = Runtime::builder()
        .error_logger(move |report| {
            let _ = tx.send(report.method.to_string());
        })
        .build();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose_oneway(Arc::new(Greeter), None).unwrap();

    mock.deliver(&to_channel_name("Greeter", "explode"), vec![]);

    let method = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(method.as_deref(), Some("explode"));
}

#[tokio::test]
async fn test_oneway_messages_run_in_delivery_order() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    let tally = Arc::new(Tally::default());
    rt.expose_oneway(tally.clone(), None).unwrap();

    let channel_name = to_channel_name("Tally", "push");
    for n in 0..50u32 {
        mock.deliver(&channel_name, vec![json!(n)]);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while tally.seen.lock().unwrap().len() < 50 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*tally.seen.lock().unwrap(), (0..50).collect::<Vec<u32>>());
}

// ============================================================================
//  Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_request_answered_for_exposed_class() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    mock.deliver(DISCOVERY_REQUEST, vec![json!("Greeter")]);

    // One announcement at exposure, one answer.
    let replies = mock.sent_on(DISCOVERY_REPLY);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[1][0]["className"], json!("Greeter"));

    // Greeter is not exposed one-way.
    mock.deliver(ONEWAY_DISCOVERY_REQUEST, vec![json!("Greeter")]);
    assert!(mock.sent_on(ONEWAY_DISCOVERY_REPLY).is_empty());
}

#[tokio::test]
async fn test_discovery_request_ignored_for_unknown_class() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    rt.attach(mock.clone());

    mock.deliver(DISCOVERY_REQUEST, vec![json!("Nobody")]);
    mock.deliver(DISCOVERY_REQUEST, vec![]);

    assert!(mock.sent_on(DISCOVERY_REPLY).is_empty());
}

#[tokio::test]
async fn test_malformed_registration_is_ignored() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());

    mock.deliver(DISCOVERY_REPLY, vec![json!({ "className": 7 })]);
    mock.deliver(DISCOVERY_REPLY, vec![]);

    assert_eq!(rt.discovered(id, "7", Mode::Call), None);
}

// ============================================================================
//  Binding
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_bind_times_out_within_one_interval() {
    let rt = Runtime::with_config(quick_config());
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());

    let started = Instant::now();
    let err = rt.bind(id, "Greeter", None).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        BindError::Timeout { ref class_name, endpoint, .. } => {
            assert_eq!(class_name, "Greeter");
            assert_eq!(endpoint, id);
        }
        _ => panic!("Expected Timeout, got {:?}", err),
    }
    assert!(elapsed >= Duration::from_millis(300), "gave up early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(350), "gave up late: {elapsed:?}");
    assert_eq!(mock.sent_on(DISCOVERY_REQUEST), vec![vec![json!("Greeter")]]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_binds_share_one_discovery() {
    let rt = Runtime::with_config(quick_config());
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());

    let remote = mock.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        remote.announce(Mode::Call, &greeter_registration());
    });

    let (a, b) = tokio::join!(rt.bind(id, "Greeter", None), rt.bind(id, "Greeter", None));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.ptr_eq(&b));
    assert_eq!(mock.sent_on(DISCOVERY_REQUEST).len(), 1);

    // Later binds hit the cache without touching the channel.
    let c = rt.bind(id, "Greeter", None).await.unwrap();
    assert!(a.ptr_eq(&c));
    assert_eq!(mock.sent_on(DISCOVERY_REQUEST).len(), 1);
}

#[tokio::test]
async fn test_bind_uses_announced_registration() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());

    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    assert!(mock.sent_on(DISCOVERY_REQUEST).is_empty());
    assert_eq!(proxy.class_name(), "Greeter");
    assert_eq!(proxy.method_names(), &["hello".to_string(), "explode".to_string()]);
    assert_eq!(proxy.endpoint(), id);
}

#[tokio::test]
async fn test_call_and_send_bindings_are_distinct() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    mock.announce(Mode::Send, &greeter_registration());

    let call = rt.bind(id, "Greeter", None).await.unwrap();
    let send = rt.bind_oneway(id, "Greeter", None).await.unwrap();

    assert!(!call.ptr_eq(&send));
    assert_eq!(call.mode(), Mode::Call);
    assert_eq!(send.mode(), Mode::Send);
}

#[tokio::test(start_paused = true)]
async fn test_call_bind_ignores_oneway_registration() {
    let rt = Runtime::with_config(quick_config());
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Send, &greeter_registration());

    let err = rt.bind(id, "Greeter", None).await.unwrap_err();
    assert!(matches!(err, BindError::Timeout { .. }), "got {err:?}");
    assert_eq!(mock.sent_on(DISCOVERY_REQUEST), vec![vec![json!("Greeter")]]);
    assert_eq!(rt.discovered(id, "Greeter", Mode::Call), None);

    let oneway = rt.bind_oneway(id, "Greeter", None).await.unwrap();
    assert_eq!(oneway.mode(), Mode::Send);
    assert!(mock.sent_on(ONEWAY_DISCOVERY_REQUEST).is_empty());
}

#[tokio::test]
async fn test_bind_unknown_endpoint() {
    let rt = Runtime::new();
    let err = rt.bind(EndpointId(99), "Greeter", None).await.unwrap_err();
    assert_eq!(err, BindError::Runtime(runtime::Error::EndpointNotFound(EndpointId(99))));
}

#[tokio::test(start_paused = true)]
async fn test_config_change_applies_to_later_binds() {
    let rt = Runtime::new();
    rt.set_config(Config::default().with_bind_timeout(Duration::from_millis(40)));
    let id = rt.attach(MockChannel::new());

    let started = Instant::now();
    rt.bind(id, "Greeter", None).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_interval_still_waits() {
    let rt = Runtime::with_config(Config {
        bind_timeout: Duration::from_millis(100),
        retry_interval: Duration::ZERO,
    });
    let id = rt.attach(MockChannel::new());

    let started = Instant::now();
    let err = rt.bind(id, "Greeter", None).await.unwrap_err();
    assert!(matches!(err, BindError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

// ============================================================================
//  Proxy
// ============================================================================

#[tokio::test]
async fn test_unknown_method_never_touches_channel() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Ok(json!("unused")));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let err = proxy.call("_rotate", ()).await.unwrap_err();
    match err {
        CallError::UnknownMethod { ref method, .. } => assert_eq!(method, "_rotate"),
        _ => panic!("Expected UnknownMethod, got {:?}", err),
    }
    assert!(mock.sent_on(&to_channel_name("Greeter", "_rotate")).is_empty());
}

#[tokio::test]
async fn test_call_encodes_arguments() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Ok(json!("Hi, Ada")));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let reply: String = proxy.call_as("hello", ("Ada".to_string(),)).await.unwrap();

    assert_eq!(reply, "Hi, Ada");
    assert_eq!(mock.sent_on(&to_channel_name("Greeter", "hello")), vec![vec![json!("Ada")]]);
}

#[tokio::test]
async fn test_relayed_reply_rejects() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Ok(neorestore::encode_relayed(json!("bad name"))));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let err = proxy.call("hello", ("".to_string(),)).await.unwrap_err();
    assert_eq!(err.relayed(), Some(&Restored::from("bad name")));
    assert_eq!(err.to_string(), "bad name");
}

#[tokio::test]
async fn test_transport_failure_propagates() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Err(ChannelError::ConnectionLost("gone".into())));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let err = proxy.call("hello", vec![json!("Ada")]).await.unwrap_err();
    match err {
        CallError::Channel(ChannelError::ConnectionLost(_)) => {}
        _ => panic!("Expected Channel(ConnectionLost), got {:?}", err),
    }
}

#[tokio::test]
async fn test_reply_restore_failure() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Ok(json!(12)));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let err = proxy.call_as::<String>("hello", ("Ada".to_string(),)).await.unwrap_err();
    assert!(matches!(err, CallError::Restore(_)));
}

#[tokio::test]
async fn test_non_finite_argument_fails_before_sending() {
    let rt = Runtime::new();
    let mock = MockChannel::replying(Ok(Value::Null));
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Call, &greeter_registration());
    let proxy = rt.bind(id, "Greeter", None).await.unwrap();

    let err = proxy.call("hello", (1.0f64, f64::NAN)).await.unwrap_err();
    match err {
        CallError::Encode { index, .. } => assert_eq!(index, 1),
        _ => panic!("Expected Encode, got {:?}", err),
    }
    assert!(mock.sent_on(&to_channel_name("Greeter", "hello")).is_empty());
}

#[tokio::test]
async fn test_mode_mismatch() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());
    mock.announce(Mode::Send, &greeter_registration());

    let oneway = rt.bind_oneway(id, "Greeter", None).await.unwrap();
    let err = oneway.call("hello", ()).await.unwrap_err();
    assert!(matches!(err, CallError::ModeMismatch { bound: Mode::Send, attempted: Mode::Call, .. }));

    oneway.send("hello", ("Ada".to_string(),)).unwrap();
    assert_eq!(mock.sent_on(&to_channel_name("Greeter", "hello")).len(), 1);
}

// ============================================================================
//  Lifecycle
// ============================================================================

#[tokio::test]
async fn test_detach_removes_installs_and_evicts() {
    let rt = Runtime::new();
    let mock = MockChannel::new();
    let id = rt.attach(mock.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();
    mock.announce(Mode::Call, &greeter_registration());
    rt.bind(id, "Greeter", None).await.unwrap();

    rt.detach(id).unwrap();

    assert!(mock.handlers.lock().unwrap().is_empty());
    for mode in [Mode::Call, Mode::Send] {
        assert_eq!(mock.listener_count(discovery_request(mode)), 0);
        assert_eq!(mock.listener_count(discovery_reply(mode)), 0);
    }
    assert_eq!(rt.discovered(id, "Greeter", Mode::Call), None);
    assert!(rt.endpoints().is_empty());

    let err = rt.bind(id, "Greeter", None).await.unwrap_err();
    assert!(matches!(err, BindError::Runtime(runtime::Error::EndpointNotFound(_))));
    assert_eq!(rt.detach(id), Err(runtime::Error::EndpointNotFound(id)));
}

#[tokio::test]
async fn test_close_forgets_everything() {
    let rt = Runtime::new();
    let a = MockChannel::new();
    let b = MockChannel::new();
    rt.attach(a.clone());
    rt.attach(b.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();

    rt.close();

    assert!(rt.endpoints().is_empty());
    assert!(!rt.is_exposed("Greeter", Mode::Call));
    assert!(a.handlers.lock().unwrap().is_empty());
    assert!(b.handlers.lock().unwrap().is_empty());

    // Exposing again after close starts from scratch.
    let c = MockChannel::new();
    rt.attach(c.clone());
    rt.expose(Arc::new(Greeter), None).unwrap();
    assert!(c.has_handler(&to_channel_name("Greeter", "hello")));
}

#[tokio::test]
async fn test_listeners_go_quiet_after_runtime_drop() {
    let mock = MockChannel::new();
    {
        let rt = Runtime::new();
        rt.attach(mock.clone());
    }
    // The runtime is gone; delivering must neither panic nor reply.
    mock.deliver(DISCOVERY_REQUEST, vec![json!("Greeter")]);
    assert!(mock.sent_on(DISCOVERY_REPLY).is_empty());
}
