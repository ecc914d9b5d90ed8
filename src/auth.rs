pub mod oauth;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{info, warn};

use self::oauth::{Credentials, OAuthConfig};
use crate::codec::decode::decode_user_details;
use crate::data::user::UserDetails;
use crate::errors::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::transport::{HttpRequest, Method, Transport};

/// The interactive part of the credential handshake (browser redirect, user
/// consent, token exchange). Supplied by the embedding application.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn handshake(&self, api_url: &str, config: &OAuthConfig) -> Result<Credentials>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticating,
    Authenticated,
}

type Handshake = Shared<BoxFuture<'static, Result<Credentials>>>;

struct SessionState {
    api_url: String,
    oauth: OAuthConfig,
    credentials: Option<Credentials>,
    user_details: Option<UserDetails>,
    /// Bumped whenever cached user details are invalidated, so a lookup that
    /// raced an invalidation does not repopulate the cache.
    generation: u64,
    pending: Option<Handshake>,
}

impl SessionState {
    fn invalidate_user_details(&mut self) {
        self.user_details = None;
        self.generation += 1;
    }
}

/// Authenticated access to one API server.
pub struct AuthSession {
    transport: Arc<dyn Transport>,
    exchange: Arc<dyn CredentialExchange>,
    events: EventBus,
    state: Mutex<SessionState>,
}

impl AuthSession {
    pub fn new(
        api_url: &str,
        oauth: OAuthConfig,
        transport: Arc<dyn Transport>,
        exchange: Arc<dyn CredentialExchange>,
        events: EventBus,
    ) -> Self {
        AuthSession {
            transport,
            exchange,
            events,
            state: Mutex::new(SessionState {
                api_url: api_url.trim_end_matches('/').to_string(),
                oauth,
                credentials: None,
                user_details: None,
                generation: 0,
                pending: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn api_url(&self) -> String {
        self.lock().api_url.clone()
    }

    pub fn state(&self) -> AuthState {
        let state = self.lock();
        if state.pending.is_some() {
            AuthState::Authenticating
        } else if state.credentials.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().credentials.is_some()
    }

    /// Runs the credential handshake. Callers that arrive while a handshake is
    /// already running wait for that one and get its outcome.
    pub async fn authenticate(&self) -> Result<Credentials> {
        let (handshake, started) = {
            let mut state = self.lock();
            if let Some(pending) = state.pending.clone() {
                (pending, false)
            } else {
                state.invalidate_user_details();
                let exchange = Arc::clone(&self.exchange);
                let api_url = state.api_url.clone();
                let oauth = state.oauth.clone();
                let handshake = async move { exchange.handshake(&api_url, &oauth).await }
                    .boxed()
                    .shared();
                state.pending = Some(handshake.clone());
                (handshake, true)
            }
        };
        if started {
            info!(api_url = self.api_url().as_str(); "Starting authentication");
            self.events.emit(SyncEvent::Authenticating);
        }

        let result = handshake.clone().await;

        let finished_here = {
            let mut state = self.lock();
            let current = state.pending.as_ref().is_some_and(|pending| pending.ptr_eq(&handshake));
            if current {
                state.pending = None;
                state.credentials = result.as_ref().ok().cloned();
            }
            current
        };
        if finished_here {
            match &result {
                Ok(_) => info!("Authenticated"),
                Err(err) => warn!(err = err.message.as_str(); "Authentication failed"),
            }
            self.events.emit(SyncEvent::Authenticated);
            self.events.emit(SyncEvent::Auth);
        }
        result
    }

    /// Restores credentials obtained earlier, skipping the handshake.
    pub fn set_credentials(&self, credentials: Credentials) {
        {
            let mut state = self.lock();
            state.credentials = Some(credentials);
            state.invalidate_user_details();
        }
        self.events.emit(SyncEvent::Auth);
    }

    pub fn logout(&self) {
        {
            let mut state = self.lock();
            state.credentials = None;
            state.pending = None;
            state.invalidate_user_details();
        }
        info!("Logged out");
        self.events.emit(SyncEvent::Auth);
    }

    /// Points the session at another server. Credentials belong to a server, so
    /// they are dropped along with any handshake in progress.
    pub fn switch_server(&self, api_url: &str, oauth: OAuthConfig) {
        {
            let mut state = self.lock();
            state.api_url = api_url.trim_end_matches('/').to_string();
            state.oauth = oauth;
            state.credentials = None;
            state.pending = None;
            state.invalidate_user_details();
        }
        info!(api_url = api_url; "Switched server");
        self.events.emit(SyncEvent::Auth);
    }

    pub fn invalidate_user_details(&self) {
        self.lock().invalidate_user_details();
    }

    /// Sends a request signed with the session credentials. `path` is relative
    /// to the API server, e.g. `/api/0.6/user/details`.
    pub async fn signed_request(&self, method: Method, path: &str, body: Option<String>) -> Result<String> {
        let request = {
            let state = self.lock();
            let credentials = state
                .credentials
                .as_ref()
                .ok_or_else(|| Error::auth(format!("{} {path} requires authentication", method.as_str())))?;
            let url = format!("{}{path}", state.api_url);
            let header = oauth::authorization_header(&state.oauth, credentials, method, &url)?;
            HttpRequest {
                method,
                url,
                headers: vec![("Authorization".to_string(), header)],
                body,
            }
        };
        self.transport.send(request).await
    }

    /// Details of the authenticated user, fetched once and cached until invalidated.
    pub async fn user_details(&self) -> Result<UserDetails> {
        let generation = {
            let state = self.lock();
            if let Some(details) = &state.user_details {
                return Ok(details.clone());
            }
            state.generation
        };

        let body = self.signed_request(Method::Get, "/api/0.6/user/details", None).await?;
        let details = decode_user_details(&body)?;

        let mut state = self.lock();
        if state.generation == generation {
            state.user_details = Some(details.clone());
        }
        Ok(details)
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::errors::ErrorKind;
    use crate::events::drain;
    use crate::transport::mock::{MockTransport, Reply};

    /// Hands out `token-N` credentials, or fails when built with `failing`.
    pub struct StaticExchange {
        pub calls: AtomicUsize,
        fail: bool,
    }

    impl StaticExchange {
        pub fn new() -> Self {
            StaticExchange {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            StaticExchange {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl CredentialExchange for StaticExchange {
        async fn handshake(&self, _api_url: &str, _config: &OAuthConfig) -> Result<Credentials> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if self.fail {
                return Err(Error::auth("user denied access"));
            }
            Ok(Credentials {
                token: format!("token-{call}"),
                token_secret: "secret".to_string(),
            })
        }
    }

    pub fn oauth_config() -> OAuthConfig {
        OAuthConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
        }
    }

    fn session(transport: Arc<MockTransport>, exchange: Arc<StaticExchange>) -> (AuthSession, EventBus) {
        let events = EventBus::new();
        let session = AuthSession::new("https://api.test/", oauth_config(), transport, exchange, events.clone());
        (session, events)
    }

    const USER: &str = r#"<osm><user id="7" display_name="mapper"/></osm>"#;

    #[tokio::test]
    async fn overlapping_authenticate_calls_share_one_handshake() {
        let exchange = Arc::new(StaticExchange::new());
        let (session, events) = session(Arc::new(MockTransport::new()), Arc::clone(&exchange));
        let mut receiver = events.subscribe();

        let (a, b) = tokio::join!(session.authenticate(), session.authenticate());

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(session.state(), AuthState::Authenticated);
        assert_eq!(
            drain(&mut receiver),
            vec![SyncEvent::Authenticating, SyncEvent::Authenticated, SyncEvent::Auth]
        );
    }

    #[tokio::test]
    async fn failed_handshake_leaves_session_anonymous() {
        let (session, events) = session(Arc::new(MockTransport::new()), Arc::new(StaticExchange::failing()));
        let mut receiver = events.subscribe();

        let err = session.authenticate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(session.state(), AuthState::Anonymous);
        assert!(drain(&mut receiver).contains(&SyncEvent::Auth));
    }

    #[tokio::test]
    async fn signed_request_requires_credentials() {
        let transport = Arc::new(MockTransport::new());
        let (session, _) = session(Arc::clone(&transport), Arc::new(StaticExchange::new()));

        let err = session.signed_request(Method::Get, "/api/0.6/user/details", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(transport.requests().is_empty());

        session.authenticate().await.unwrap();
        session.signed_request(Method::Get, "/api/0.6/user/details", None).await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api.test/api/0.6/user/details");
        assert!(requests[0].header("authorization").unwrap().starts_with("OAuth "));
    }

    #[tokio::test]
    async fn user_details_are_cached_until_invalidated() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Get, "/user/details", Reply::Body(USER.to_string()));
        let (session, _) = session(Arc::clone(&transport), Arc::new(StaticExchange::new()));
        session.authenticate().await.unwrap();

        assert_eq!(session.user_details().await.unwrap().display_name, "mapper");
        session.user_details().await.unwrap();
        assert_eq!(transport.count("/user/details"), 1);

        session.invalidate_user_details();
        session.user_details().await.unwrap();
        assert_eq!(transport.count("/user/details"), 2);
    }

    #[tokio::test]
    async fn logout_clears_credentials_and_notifies() {
        let (session, events) = session(Arc::new(MockTransport::new()), Arc::new(StaticExchange::new()));
        session.authenticate().await.unwrap();
        let mut receiver = events.subscribe();

        session.logout();
        assert!(!session.is_authenticated());
        assert_eq!(drain(&mut receiver), vec![SyncEvent::Auth]);
    }

    #[tokio::test]
    async fn switch_server_drops_credentials() {
        let (session, events) = session(Arc::new(MockTransport::new()), Arc::new(StaticExchange::new()));
        session.authenticate().await.unwrap();
        let mut receiver = events.subscribe();

        session.switch_server("https://dev.api.test", oauth_config());
        assert_eq!(session.api_url(), "https://dev.api.test");
        assert_eq!(session.state(), AuthState::Anonymous);
        assert_eq!(drain(&mut receiver), vec![SyncEvent::Auth]);
    }
}
