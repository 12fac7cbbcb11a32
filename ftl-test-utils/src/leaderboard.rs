use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use ftl_core::RawEntry;
use http::{Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const API_PREFIX: &str = "/bapi/futures";
/// How long [`MockLeaderboard::shutdown`] lets open connections drain.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);
const POSITION_PATH: &str = "/v1/public/future/leaderboard/getOtherPosition";
const BASE_INFO_PATH: &str = "/v2/public/future/leaderboard/getOtherLeaderboardBaseInfo";
const SEARCH_PATH: &str = "/v1/public/future/leaderboard/searchNickname";

/// One scripted answer to a `getOtherPosition` request.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    /// Successful response listing these entries; empty serializes as `null`.
    Positions(Vec<RawEntry>),
    /// Bare HTTP failure with the given status.
    Status(u16),
    /// `success: false` envelope.
    Rejected { code: String, message: String },
    /// A 200 response whose body is not JSON.
    Malformed,
}

/// A request the mock received, kept for assertions.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path: String,
    pub body: Value,
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct ProfileFixture {
    pub nickname: String,
    pub follower_count: u64,
    pub position_shared: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MockLeaderboardConfig {
    scripts: HashMap<String, VecDeque<ScriptedResponse>>,
    profiles: HashMap<String, ProfileFixture>,
    nicknames: HashMap<String, Vec<(String, String)>>,
}

impl MockLeaderboardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses served to `uid` in order; the last one repeats once reached.
    #[must_use]
    pub fn with_script(mut self, uid: impl Into<String>, script: Vec<ScriptedResponse>) -> Self {
        self.scripts.insert(uid.into(), script.into());
        self
    }

    #[must_use]
    pub fn with_profile(mut self, uid: impl Into<String>, profile: ProfileFixture) -> Self {
        self.profiles.insert(uid.into(), profile);
        self
    }

    /// Register a search hit: `nickname` resolves to `uid`.
    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>, uid: impl Into<String>) -> Self {
        let nickname = nickname.into();
        self.nicknames
            .entry(nickname.clone())
            .or_default()
            .push((uid.into(), nickname));
        self
    }
}

#[derive(Default)]
struct MockState {
    config: MockLeaderboardConfig,
    requests: Vec<RecordedRequest>,
}

impl MockState {
    fn next_position_response(&mut self, uid: &str) -> ScriptedResponse {
        match self.config.scripts.get_mut(uid) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(ScriptedResponse::Positions(Vec::new())),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or(ScriptedResponse::Positions(Vec::new())),
            None => ScriptedResponse::Positions(Vec::new()),
        }
    }
}

/// In-process HTTP server speaking the public futures leaderboard API.
pub struct MockLeaderboard {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockLeaderboard {
    pub async fn start(config: MockLeaderboardConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind mock leaderboard")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(MockState {
            config,
            requests: Vec::new(),
        }));

        let service_state = state.clone();
        let make_service = make_service_fn(move |_conn| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_request(state, req).await) }
                }))
            }
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = Server::from_tcp(listener)?
            .serve(make_service)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "mock leaderboard stopped with error");
            }
        });
        debug!(%addr, "mock leaderboard listening");

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Base URL to hand to the leaderboard client.
    pub fn base_url(&self) -> String {
        format!("http://{}{API_PREFIX}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Number of position polls received for `uid`.
    pub fn position_requests(&self, uid: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|req| req.path.ends_with(POSITION_PATH))
            .filter(|req| req.body["encryptedUid"] == uid)
            .count()
    }

    /// Stop serving. Connections still held open by a client's pool are cut
    /// once [`SHUTDOWN_GRACE`] has passed.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                debug!("mock leaderboard still draining connections, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

impl Drop for MockLeaderboard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn handle_request(state: Arc<Mutex<MockState>>, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::POST {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    let path = req.uri().path().to_string();
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => return plain(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let mut state = lock(&state);
    state.requests.push(RecordedRequest {
        path: path.clone(),
        body: body.clone(),
        headers,
    });

    let Some(route) = path.strip_prefix(API_PREFIX) else {
        return plain(StatusCode::NOT_FOUND, "not found");
    };
    match route {
        POSITION_PATH => {
            let uid = body["encryptedUid"].as_str().unwrap_or_default().to_string();
            position_response(state.next_position_response(&uid))
        }
        BASE_INFO_PATH => {
            let uid = body["encryptedUid"].as_str().unwrap_or_default();
            match state.config.profiles.get(uid) {
                Some(profile) => success(json!({
                    "nickName": profile.nickname,
                    "userPhotoUrl": null,
                    "positionShared": profile.position_shared,
                    "deliveryPositionShared": false,
                    "followingCount": 0,
                    "followerCount": profile.follower_count,
                    "twitterUrl": null,
                    "introduction": null,
                })),
                None => rejected("000002", "user not found"),
            }
        }
        SEARCH_PATH => {
            let nickname = body["nickname"].as_str().unwrap_or_default();
            let hits: Vec<Value> = state
                .config
                .nicknames
                .get(nickname)
                .map(|hits| {
                    hits.iter()
                        .map(|(uid, nickname)| {
                            json!({
                                "encryptedUid": uid,
                                "nickname": nickname,
                                "followerCount": 0,
                                "userPhotoUrl": null,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            success(Value::Array(hits))
        }
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    }
}

fn position_response(response: ScriptedResponse) -> Response<Body> {
    match response {
        ScriptedResponse::Positions(entries) => {
            let list = if entries.is_empty() {
                Value::Null
            } else {
                Value::Array(entries.iter().map(entry_json).collect())
            };
            success(json!({
                "otherPositionRetList": list,
                "updateTimeStamp": entries.iter().filter_map(|entry| entry.update_timestamp).max(),
            }))
        }
        ScriptedResponse::Status(status) => plain(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "scripted failure",
        ),
        ScriptedResponse::Rejected { code, message } => rejected(&code, &message),
        ScriptedResponse::Malformed => plain(StatusCode::OK, "<html>maintenance</html>"),
    }
}

fn entry_json(entry: &RawEntry) -> Value {
    json!({
        "symbol": entry.symbol,
        "entryPrice": number(entry.entry_price),
        "markPrice": number(entry.mark_price),
        "pnl": number(entry.pnl),
        "roe": number(entry.roe),
        "amount": number(entry.amount),
        "updateTimeStamp": entry.update_timestamp,
        "yellow": false,
        "tradeBefore": false,
        "leverage": entry.leverage,
    })
}

fn number(value: Decimal) -> Value {
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn success(data: Value) -> Response<Body> {
    json_response(json!({
        "code": "000000",
        "message": null,
        "messageDetail": null,
        "data": data,
        "success": true,
    }))
}

fn rejected(code: &str, message: &str) -> Response<Body> {
    json_response(json!({
        "code": code,
        "message": message,
        "messageDetail": null,
        "data": null,
        "success": false,
    }))
}

fn json_response(body: Value) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn plain(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
