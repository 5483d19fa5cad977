use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use parking_lot::{Condvar, Mutex};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000/api";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the refreshed credential: a genuine
    /// authorization failure, not retried.
    #[error("api: unauthorized")]
    Auth,
    #[error("api: token refresh failed: {0}")]
    Refresh(String),
    #[error("api: persist session: {0}")]
    Persist(String),
    #[error("api: network: {0}")]
    Network(#[from] reqwest::Error),
    /// Any non-401 HTTP failure, passed through unchanged.
    #[error("api: http {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("api: decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api: invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Posts,
    Tweets,
    Comments,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Posts => "posts",
            FeedKind::Tweets => "tweets",
            FeedKind::Comments => "comments",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(FeedKind::Posts),
            "tweets" => Ok(FeedKind::Tweets),
            "comments" => Ok(FeedKind::Comments),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub create_time: String,
    pub author: Author,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub collect_count: i64,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_collected: bool,
    /// Set on comment replies: the comment being answered.
    #[serde(default)]
    pub parent: Option<Box<FeedItem>>,
}

/// One page of a feed, in server-supplied order, plus the opaque pointer to
/// the next page (`None` = exhausted).
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    posts: Vec<FeedItem>,
    #[serde(default)]
    tweets: Vec<FeedItem>,
    #[serde(default)]
    comments: Vec<FeedItem>,
    #[serde(default)]
    next: Option<String>,
}

impl RawPage {
    fn into_page(self) -> FeedPage {
        let items = if !self.posts.is_empty() {
            self.posts
        } else if !self.tweets.is_empty() {
            self.tweets
        } else {
            self.comments
        };
        FeedPage {
            items,
            next: self.next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Likes,
    Collects,
}

impl ToggleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleAction::Likes => "likes",
            ToggleAction::Collects => "collects",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "likes" => Some(ToggleAction::Likes),
            "collects" => Some(ToggleAction::Collects),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleMethod {
    Post,
    Delete,
}

impl ToggleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleMethod::Post => "post",
            ToggleMethod::Delete => "delete",
        }
    }

    pub fn from_attr(attr: &str) -> Option<Self> {
        match attr {
            "post" => Some(ToggleMethod::Post),
            "delete" => Some(ToggleMethod::Delete),
            _ => None,
        }
    }

    pub fn http(self) -> Method {
        match self {
            ToggleMethod::Post => Method::POST,
            ToggleMethod::Delete => Method::DELETE,
        }
    }
}

/// Server response to a like/collect toggle. `method` is the *next* method
/// for the element, so "delete is next" means the item is now active.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ToggleOutcome {
    pub method: ToggleMethod,
    pub count: i64,
}

impl ToggleOutcome {
    pub fn is_active(&self) -> bool {
        self.method == ToggleMethod::Delete
    }
}

/// Partial profile edit; unset fields are left untouched server-side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_me: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenEcho {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Authenticated transport: stamps the current bearer token onto every
/// outgoing request and coordinates a single shared refresh when concurrent
/// requests hit 401.
pub struct Client {
    http: HttpClient,
    base_url: String,
    user_agent: String,
    session: Arc<session::Manager>,
    gate: RefreshGate,
}

struct RefreshGate {
    state: Mutex<GateState>,
    settled: Condvar,
}

#[derive(Default)]
struct GateState {
    in_flight: bool,
    /// Bumped each time a refresh settles. A 401 whose request was stamped
    /// under the current epoch starts (or joins) a refresh; one stamped
    /// under an older epoch adopts that refresh's recorded outcome instead.
    epoch: u64,
    outcome: Option<Result<(), String>>,
}

impl Client {
    pub fn new(session: Arc<session::Manager>, config: ClientConfig) -> anyhow::Result<Self> {
        let base_url = if config.base_url.trim().is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            bail!("api: client user agent required");
        } else {
            config.user_agent
        };
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            base_url,
            user_agent,
            session,
            gate: RefreshGate {
                state: Mutex::new(GateState::default()),
                settled: Condvar::new(),
            },
        })
    }

    /// Obtains a first token with basic-auth credentials and stores the
    /// resulting session. Does not go through the 401/refresh path.
    pub fn login(&self, email: &str, password: &str) -> Result<session::AuthSession, ApiError> {
        let url = self.endpoint("/tokens")?;
        let resp = self
            .http
            .post(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, "application/json")
            .basic_auth(email, Some(password))
            .send()?;
        let status = resp.status();
        let body = resp.bytes()?.to_vec();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let payload: TokenResponse = serde_json::from_slice(&body)?;
        self.session
            .set_session(&payload.token, payload.user_id)
            .map_err(|err| ApiError::Persist(err.to_string()))?;
        Ok(session::AuthSession {
            token: payload.token,
            user_id: payload.user_id,
        })
    }

    pub fn posts(&self) -> Result<FeedPage, ApiError> {
        self.fetch_page_path("/posts")
    }

    pub fn tweets(&self) -> Result<FeedPage, ApiError> {
        self.fetch_page_path("/tweets")
    }

    pub fn comments(&self, parent_kind: FeedKind, parent_id: i64) -> Result<FeedPage, ApiError> {
        self.fetch_page_path(&format!("/{}/{}/comments", parent_kind.as_str(), parent_id))
    }

    /// Fetches a page at an absolute cursor URL handed back by the server.
    pub fn page(&self, url: &str) -> Result<FeedPage, ApiError> {
        self.fetch_page(Url::parse(url)?)
    }

    pub fn toggle(
        &self,
        kind: FeedKind,
        id: i64,
        action: ToggleAction,
        method: ToggleMethod,
    ) -> Result<ToggleOutcome, ApiError> {
        let url = self.endpoint(&format!("/{}/{}/{}", kind.as_str(), id, action.as_str()))?;
        let resp = self.send(&ApiRequest {
            method: method.http(),
            url,
            body: None,
        })?;
        Ok(serde_json::from_slice(&resp.body)?)
    }

    pub fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("/users/{}", user_id))?;
        let body = serde_json::to_value(update)?;
        self.send(&ApiRequest {
            method: Method::PUT,
            url,
            body: Some(body),
        })?;
        Ok(())
    }

    /// Sends an authenticated request. On 401, joins the single-flight token
    /// refresh and replays the request exactly once; a second 401 surfaces
    /// as [`ApiError::Auth`].
    pub fn send(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let seen = self.gate.state.lock().epoch;
        let resp = self.dispatch(req)?;
        if resp.status != StatusCode::UNAUTHORIZED {
            return self.conclude(resp);
        }

        self.join_refresh(seen)?;

        let resp = self.dispatch(req)?;
        if resp.status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth);
        }
        self.conclude(resp)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    fn fetch_page_path(&self, path: &str) -> Result<FeedPage, ApiError> {
        let url = self.endpoint(path)?;
        self.fetch_page(url)
    }

    fn fetch_page(&self, url: Url) -> Result<FeedPage, ApiError> {
        let resp = self.send(&ApiRequest::get(url))?;
        let raw: RawPage = serde_json::from_slice(&resp.body)?;
        Ok(raw.into_page())
    }

    fn dispatch(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .http
            .request(req.method.clone(), req.url.clone())
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, "application/json");
        // The token is read at dispatch time, not enqueue time: a request
        // replayed after a refresh carries the refreshed credential.
        if let Some(token) = self.session.token() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send()?;
        let status = resp.status();
        let body = resp.bytes()?.to_vec();
        Ok(ApiResponse { status, body })
    }

    fn conclude(&self, resp: ApiResponse) -> Result<ApiResponse, ApiError> {
        if !resp.status.is_success() {
            return Err(ApiError::Status {
                status: resp.status,
                body: String::from_utf8_lossy(&resp.body).into_owned(),
            });
        }
        // Side-channel rotation: any successful payload that echoes a token
        // field becomes the current credential, not just /tokens responses.
        if let Ok(echo) = serde_json::from_slice::<TokenEcho>(&resp.body) {
            if let Some(token) = echo.token {
                if !token.is_empty() {
                    let _ = self.session.set_token(&token);
                }
            }
        }
        Ok(resp)
    }

    /// At most one refresh runs at a time. The caller passes the epoch it
    /// observed before dispatching; if a refresh has settled since, the
    /// caller adopts that outcome instead of issuing `POST /tokens` again.
    fn join_refresh(&self, seen: u64) -> Result<(), ApiError> {
        let mut state = self.gate.state.lock();
        loop {
            if state.epoch != seen {
                return match &state.outcome {
                    Some(Err(msg)) => Err(ApiError::Refresh(msg.clone())),
                    _ => Ok(()),
                };
            }
            if state.in_flight {
                self.gate.settled.wait(&mut state);
                continue;
            }
            state.in_flight = true;
            break;
        }
        drop(state);

        let result = self.request_token();

        let mut state = self.gate.state.lock();
        state.in_flight = false;
        state.epoch += 1;
        state.outcome = Some(match &result {
            Ok(()) => Ok(()),
            Err(err) => Err(err.to_string()),
        });
        self.gate.settled.notify_all();
        drop(state);

        result
    }

    fn request_token(&self) -> Result<(), ApiError> {
        let url = self.endpoint("/tokens")?;
        let resp = self
            .dispatch(&ApiRequest {
                method: Method::POST,
                url,
                body: None,
            })
            .map_err(|err| ApiError::Refresh(err.to_string()))?;
        if !resp.status.is_success() {
            return Err(ApiError::Refresh(format!(
                "http {}: {}",
                resp.status,
                String::from_utf8_lossy(&resp.body)
            )));
        }
        let payload: TokenResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| ApiError::Refresh(err.to_string()))?;
        // The new credential must be visible before the epoch advances, so
        // no caller can observe the new epoch with the old token.
        self.session
            .set_token(&payload.token)
            .map_err(|err| ApiError::Refresh(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Manager;
    use crate::storage::{Options, Store};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::{tempdir, TempDir};
    use tiny_http::{Header, Response, Server};

    fn json_response(body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string(body).with_header(
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("valid header"),
        )
    }

    fn bearer(request: &tiny_http::Request) -> Option<String> {
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv("Authorization"))
            .map(|h| h.value.as_str().trim_start_matches("Bearer ").to_string())
    }

    fn new_client(base: &str, dir: &TempDir, token: Option<&str>) -> (Arc<Client>, Arc<Manager>) {
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let session = Arc::new(Manager::new(store).unwrap());
        if let Some(token) = token {
            session.set_token(token).unwrap();
        }
        let client = Client::new(
            session.clone(),
            ClientConfig {
                base_url: base.to_string(),
                user_agent: "firefly-client-tests/0".into(),
                ..Default::default()
            },
        )
        .unwrap();
        (Arc::new(client), session)
    }

    #[test]
    fn concurrent_401s_share_one_refresh() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                if request.method() == &tiny_http::Method::Post
                    && request.url() == "/api/tokens"
                {
                    // Hold the refresh open so the other callers pile up
                    // behind it instead of racing past.
                    thread::sleep(Duration::from_millis(50));
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = request.respond(json_response(r#"{"token":"fresh"}"#));
                } else if bearer(&request).as_deref() == Some("fresh") {
                    let _ = request.respond(json_response(r#"{"posts":[],"next":null}"#));
                } else {
                    let _ =
                        request.respond(Response::from_string("unauthorized").with_status_code(401));
                }
            }
        });

        let dir = tempdir().unwrap();
        let (client, session) = new_client(&base, &dir, Some("stale"));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            handles.push(thread::spawn(move || client.posts()));
        }
        for handle in handles {
            let result = handle.join().unwrap();
            assert!(result.is_ok(), "request failed: {:?}", result.err());
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(session.token().as_deref(), Some("fresh"));
    }

    #[test]
    fn second_401_after_refresh_propagates() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        thread::spawn(move || {
            for request in server.incoming_requests() {
                if request.method() == &tiny_http::Method::Post
                    && request.url() == "/api/tokens"
                {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = request.respond(json_response(r#"{"token":"fresh"}"#));
                } else {
                    // The resource rejects even the refreshed credential.
                    let _ =
                        request.respond(Response::from_string("unauthorized").with_status_code(401));
                }
            }
        });

        let dir = tempdir().unwrap();
        let (client, _session) = new_client(&base, &dir, Some("stale"));
        let err = client.posts().unwrap_err();
        assert!(matches!(err, ApiError::Auth), "got {err:?}");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_failure_rejects_and_leaves_token() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                if request.method() == &tiny_http::Method::Post
                    && request.url() == "/api/tokens"
                {
                    let _ = request.respond(Response::from_string("boom").with_status_code(500));
                } else {
                    let _ =
                        request.respond(Response::from_string("unauthorized").with_status_code(401));
                }
            }
        });

        let dir = tempdir().unwrap();
        let (client, session) = new_client(&base, &dir, Some("stale"));
        let err = client.posts().unwrap_err();
        assert!(matches!(err, ApiError::Refresh(_)), "got {err:?}");
        assert_eq!(session.token().as_deref(), Some("stale"));
    }

    #[test]
    fn successful_response_rotates_echoed_token() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let _ = request.respond(json_response(
                    r#"{"posts":[],"next":null,"token":"rotated"}"#,
                ));
            }
        });

        let dir = tempdir().unwrap();
        let (client, session) = new_client(&base, &dir, Some("old"));
        client.posts().unwrap();
        assert_eq!(session.token().as_deref(), Some("rotated"));
    }

    #[test]
    fn non_401_status_passes_through() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let _ = request.respond(Response::from_string("gone").with_status_code(404));
            }
        });

        let dir = tempdir().unwrap();
        let (client, _session) = new_client(&base, &dir, Some("tok"));
        match client.posts().unwrap_err() {
            ApiError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "gone");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn toggle_decodes_next_method_and_count() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                assert_eq!(request.url(), "/api/posts/42/likes");
                assert_eq!(request.method(), &tiny_http::Method::Post);
                let _ = request.respond(json_response(r#"{"method":"delete","count":10}"#));
            }
        });

        let dir = tempdir().unwrap();
        let (client, _session) = new_client(&base, &dir, Some("tok"));
        let outcome = client
            .toggle(FeedKind::Posts, 42, ToggleAction::Likes, ToggleMethod::Post)
            .unwrap();
        assert_eq!(outcome.method, ToggleMethod::Delete);
        assert_eq!(outcome.count, 10);
        assert!(outcome.is_active());
    }

    #[test]
    fn update_profile_puts_partial_payload() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for mut request in server.incoming_requests() {
                assert_eq!(request.url(), "/api/users/9");
                assert_eq!(request.method(), &tiny_http::Method::Put);
                let mut body = String::new();
                request.as_reader().read_to_string(&mut body).unwrap();
                let value: serde_json::Value = serde_json::from_str(&body).unwrap();
                assert_eq!(value["name"], "Ada");
                assert!(value.get("location").is_none());
                let _ = request.respond(json_response("{}"));
            }
        });

        let dir = tempdir().unwrap();
        let (client, _session) = new_client(&base, &dir, Some("tok"));
        client
            .update_profile(
                9,
                &ProfileUpdate {
                    name: Some("Ada".into()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn pages_decode_from_kind_keyed_payload() {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}/api", server.server_addr());
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let _ = request.respond(json_response(
                    r#"{"tweets":[{"id":7,"body":"hi","author":{"username":"ada"}}],
                        "next":"http://example/api/tweets?max_id=7"}"#,
                ));
            }
        });

        let dir = tempdir().unwrap();
        let (client, _session) = new_client(&base, &dir, Some("tok"));
        let page = client.tweets().unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 7);
        assert_eq!(page.items[0].author.username, "ada");
        assert_eq!(page.next.as_deref(), Some("http://example/api/tweets?max_id=7"));
    }

    #[test]
    fn feed_kind_round_trips_from_attrs() {
        assert_eq!("posts".parse::<FeedKind>(), Ok(FeedKind::Posts));
        assert_eq!("tweets".parse::<FeedKind>(), Ok(FeedKind::Tweets));
        assert!("stories".parse::<FeedKind>().is_err());
        assert_eq!(ToggleAction::from_tag("share"), None);
        assert_eq!(ToggleMethod::from_attr("delete"), Some(ToggleMethod::Delete));
    }
}
