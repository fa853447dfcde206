//! Stub authorization server and scripted user agents for tests

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Form, State};
use axum::http::{StatusCode, Uri};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::browser::BrowserLauncher;
use crate::config::ClientConfig;

/// One form POST received by the stub.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub path: String,
    pub form: HashMap<String, String>,
}

/// Canned responses as (status, JSON body).
#[derive(Debug, Clone)]
pub(crate) struct StubServerConfig {
    pub exchange: (u16, Value),
    pub refresh: (u16, Value),
    pub revoke_status: u16,
}

impl Default for StubServerConfig {
    fn default() -> Self {
        Self {
            exchange: (
                200,
                json!({"access_token": "tok1", "token_type": "Bearer", "expires_in": 3600}),
            ),
            refresh: (
                200,
                json!({"access_token": "tok2", "token_type": "Bearer", "expires_in": 3600}),
            ),
            revoke_status: 200,
        }
    }
}

struct StubState {
    config: StubServerConfig,
    calls: Mutex<Vec<RecordedCall>>,
}

/// Authorization server stub serving `{base}/token/` and
/// `{base}/revoke_token/` under the `/oauth` prefix.
pub(crate) struct StubServer {
    pub base_url: String,
    state: Arc<StubState>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(config: StubServerConfig) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(StubState {
            config,
            calls: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/oauth/token/", post(token_handler))
            .route("/oauth/revoke_token/", post(revoke_handler))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/oauth"),
            state,
            handle,
        }
    }

    pub fn client_config<const N: usize>(&self, scopes: [&str; N]) -> ClientConfig {
        ClientConfig::new("test-app", &self.base_url, "client-abc", scopes).unwrap()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, suffix: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.path.ends_with(suffix))
            .collect()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn record(state: &StubState, uri: &Uri, form: HashMap<String, String>) {
    state.calls.lock().unwrap().push(RecordedCall {
        path: uri.path().to_string(),
        form,
    });
}

async fn token_handler(
    State(state): State<Arc<StubState>>,
    uri: Uri,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, axum::Json<Value>) {
    let (status, body) = match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => state.config.refresh.clone(),
        _ => state.config.exchange.clone(),
    };
    record(&state, &uri, form);
    (StatusCode::from_u16(status).unwrap(), axum::Json(body))
}

async fn revoke_handler(
    State(state): State<Arc<StubState>>,
    uri: Uri,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    record(&state, &uri, form);
    StatusCode::from_u16(state.config.revoke_status).unwrap()
}

/// What the scripted browser does with an authorization URL.
#[derive(Debug, Clone)]
pub(crate) enum BrowserScript {
    /// Approve: redirect with this code and the state from the URL.
    Approve { code: String },
    /// Redirect with this code but a forged state.
    ForgeState { code: String },
    /// Redirect with `error=<value>`.
    Deny { error: String },
    /// Never redirect.
    Ignore,
    /// Fail to launch.
    Broken,
}

/// Browser stand-in that records opened URLs and plays the user's part.
#[derive(Clone)]
pub(crate) struct ScriptedBrowser {
    script: BrowserScript,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBrowser {
    pub fn new(script: BrowserScript) -> Self {
        Self {
            script,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn approving(code: &str) -> Self {
        Self::new(BrowserScript::Approve { code: code.into() })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

/// Query parameters of a URL as a map.
pub(crate) fn query_map(url: &str) -> HashMap<String, String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

impl BrowserLauncher for ScriptedBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());

        let params = query_map(url);
        let redirect_uri = params.get("redirect_uri").cloned().unwrap_or_default();
        let state = params.get("state").cloned().unwrap_or_default();

        let query = match &self.script {
            BrowserScript::Approve { code } => format!("code={code}&state={state}"),
            BrowserScript::ForgeState { code } => format!("code={code}&state=forged"),
            BrowserScript::Deny { error } => format!("error={error}&state={state}"),
            BrowserScript::Ignore => return Ok(()),
            BrowserScript::Broken => {
                return Err(std::io::Error::other("no browser available"));
            }
        };

        let target = format!("{redirect_uri}?{query}");
        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}
