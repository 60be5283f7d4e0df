//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use nylas_connect::{
    ConnectClient, ConnectConfig, ConnectError, ConnectEvent, EventSubscription,
    MemoryTokenStorage, OpenerRelay, PopupDriver, PopupGeometry, PopupMessage, SessionData,
    TransactionState,
};
use serde_json::json;
use wiremock::MockServer;

/// A test client wired to a mock server and an inspectable storage backend.
pub struct TestHarness {
    pub client: ConnectClient,
    pub storage: Arc<MemoryTokenStorage>,
    pub events: EventLog,
    _subscription: EventSubscription,
}

static TRACING: Once = Once::new();

/// Initialize test-writer tracing once per binary. `RUST_LOG` filters as
/// usual.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Build a harness whose API base is the mock server.
pub fn harness(server: &MockServer, mutate: impl FnOnce(&mut ConnectConfig)) -> TestHarness {
    init_tracing();
    let storage = MemoryTokenStorage::shared();
    let mut config = ConnectConfig {
        client_id: "client-1".to_string(),
        redirect_uri: "https://app.example.com/auth/callback".to_string(),
        api_url: Some(server.uri()),
        storage: Some(storage.clone() as Arc<dyn nylas_connect::TokenStorage>),
        ..ConnectConfig::default()
    };
    mutate(&mut config);

    let client = ConnectClient::new(config).expect("client config should be valid");
    let events = EventLog::default();
    let subscription = events.attach(&client);
    TestHarness { client, storage, events, _subscription: subscription }
}

/// Recorded lifecycle events.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ConnectEvent>>>,
}

impl EventLog {
    pub fn attach(&self, client: &ConnectClient) -> EventSubscription {
        let events = Arc::clone(&self.events);
        client.on_connect_state_change(move |event, _session| {
            events.lock().expect("event log lock").push(event.clone());
        })
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().expect("event log lock").iter().map(ConnectEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| **k == kind).count()
    }

    pub fn snapshot(&self) -> Vec<ConnectEvent> {
        self.events.lock().expect("event log lock").clone()
    }
}

/// Build an unsigned identity token carrying the given claims.
pub fn make_id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\",\"typ\":\"JWT\"}");
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.signature")
}

/// Standard token endpoint success body.
pub fn token_success_body(grant_id: &str) -> serde_json::Value {
    json!({
        "access_token": format!("access-{grant_id}"),
        "id_token": make_id_token(json!({
            "sub": format!("sub-{grant_id}"),
            "email": "user@example.com",
            "name": "Test User",
            "provider": "google",
        })),
        "token_type": "bearer",
        "expires_in": 3600,
        "scope": "email.read",
        "grant_id": grant_id,
    })
}

/// Read the stored transaction state for the harness client.
pub async fn stored_transaction(storage: &MemoryTokenStorage) -> Option<TransactionState> {
    use nylas_connect::TokenStorage as _;
    let raw = storage
        .get(&nylas_connect::auth_state_key("client-1"))
        .await
        .expect("storage read")?;
    Some(serde_json::from_str(&raw).expect("transaction state parses"))
}

/// Build the callback URL the authorization server would redirect to.
pub fn callback_url(code: &str, state: &str) -> String {
    format!("https://app.example.com/auth/callback?code={code}&state={state}")
}

/// Drive an inline flow to the point where the callback can be invoked,
/// returning the callback URL for the given code.
pub async fn start_inline_flow(harness: &TestHarness, code: &str) -> String {
    use nylas_connect::{ConnectOptions, ConnectOutcome};
    let outcome =
        harness.client.connect(ConnectOptions::default()).await.expect("connect should start");
    match outcome {
        ConnectOutcome::Redirect(_) => {}
        ConnectOutcome::Session(session) => {
            panic!("expected a redirect, found an existing session for {}", session.grant_id)
        }
    }
    let transaction =
        stored_transaction(&harness.storage).await.expect("transaction state is stored");
    callback_url(code, &transaction.state)
}

/// Popup driver that immediately completes the flow with a fixed code,
/// echoing the state it finds in the opened authorization URL.
#[derive(Default)]
pub struct AutoApprovePopupDriver {
    pub code: String,
    pub opened_url: Mutex<Option<String>>,
    pub closed: AtomicBool,
}

impl AutoApprovePopupDriver {
    pub fn new(code: &str) -> Arc<Self> {
        Arc::new(Self { code: code.to_string(), ..Self::default() })
    }
}

#[async_trait]
impl PopupDriver for AutoApprovePopupDriver {
    async fn open(&self, url: &str, _geometry: PopupGeometry) -> Result<(), ConnectError> {
        *self.opened_url.lock().expect("driver lock") = Some(url.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<PopupMessage, ConnectError> {
        let url = self
            .opened_url
            .lock()
            .expect("driver lock")
            .clone()
            .expect("recv is called after open");
        let parsed = url::Url::parse(&url).expect("authorization URL parses");
        let state = parsed
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("authorization URL carries state");
        Ok(PopupMessage::Success { code: self.code.clone(), state })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Popup driver whose window is closed before any message arrives.
#[derive(Default)]
pub struct ClosedPopupDriver {
    pub closed: AtomicBool,
}

#[async_trait]
impl PopupDriver for ClosedPopupDriver {
    async fn open(&self, _url: &str, _geometry: PopupGeometry) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn recv(&self) -> Result<PopupMessage, ConnectError> {
        Err(ConnectError::popup("Popup was closed before authentication completed"))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opener relay that records posted messages.
#[derive(Default)]
pub struct RecordingRelay {
    pub posts: Mutex<Vec<(PopupMessage, String)>>,
    pub closed: AtomicUsize,
}

impl OpenerRelay for RecordingRelay {
    fn post(&self, message: &PopupMessage, target_origin: &str) {
        self.posts.lock().expect("relay lock").push((message.clone(), target_origin.to_string()));
    }

    fn close_window(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Assert the session looks like one minted from [`token_success_body`].
pub fn assert_standard_session(session: &SessionData, grant_id: &str) {
    assert_eq!(session.grant_id, grant_id);
    assert_eq!(session.access_token, format!("access-{grant_id}"));
    assert_eq!(session.scope, "email.read");
    let info = session.grant_info.as_ref().expect("grant info decoded from id token");
    assert_eq!(info.email, "user@example.com");
    assert_eq!(info.provider, "google");
}
