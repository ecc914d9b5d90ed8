use std::collections::HashSet;
use std::sync::Arc;

use log::info;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::oauth::{Credentials, OAuthConfig};
use crate::auth::{AuthSession, AuthState, CredentialExchange};
use crate::codec::decode::{decode_api_status, decode_changesets};
use crate::config::ClientConfig;
use crate::data::changeset::{ChangesetId, ChangesetMetadata, ChangesetSummary, EditDiff};
use crate::data::geo::Loc;
use crate::data::osm::{Entity, EntityId};
use crate::data::user::UserDetails;
use crate::errors::Result;
use crate::events::{EventBus, SyncEvent};
use crate::fetch::{BatchCallback, FetchManager, TileCallback};
use crate::tiles::Viewport;
use crate::transport::{HttpRequest, Transport};
use crate::upload::{ChangesetUploader, EditHistory, TagDiscardPolicy};

/// One client's view of one API server: auth session, tile and entity
/// fetching, changeset upload and the event stream they all publish to.
pub struct Connection {
    transport: Arc<dyn Transport>,
    events: EventBus,
    auth: Arc<AuthSession>,
    fetch: FetchManager,
    uploader: ChangesetUploader,
}

impl Connection {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>, exchange: Arc<dyn CredentialExchange>) -> Self {
        let events = EventBus::new();
        let auth = Arc::new(AuthSession::new(
            &config.api_url,
            config.oauth.clone(),
            Arc::clone(&transport),
            exchange,
            events.clone(),
        ));
        if let Some(credentials) = &config.credentials {
            auth.set_credentials(credentials.clone());
        }
        let fetch = FetchManager::new(&config.api_url, Arc::clone(&transport), events.clone());
        fetch.set_tile_zoom(config.tile_zoom);
        let uploader = ChangesetUploader::new(Arc::clone(&auth), config.settle_delay());

        Connection {
            transport,
            events,
            auth,
            fetch,
            uploader,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn api_url(&self) -> String {
        self.auth.api_url()
    }

    pub fn changeset_url(&self, changeset_id: ChangesetId) -> String {
        format!("{}/changeset/{changeset_id}", self.api_url())
    }

    /// History page around `center`; coordinates get more decimals the further in `zoom` is.
    pub fn changesets_url(&self, center: Loc, zoom: f64) -> String {
        let precision = zoom.log2().ceil().max(0.0) as usize;
        format!(
            "{}/history#map={}/{:.prec$}/{:.prec$}",
            self.api_url(),
            zoom.floor(),
            center.lat,
            center.lon,
            prec = precision
        )
    }

    pub fn entity_url(&self, entity: &Entity) -> String {
        format!("{}/{}/{}", self.api_url(), entity.kind(), entity.osm_id())
    }

    pub fn user_url(&self, username: &str) -> String {
        format!("{}/user/{username}", self.api_url())
    }

    // Tiles and entities

    pub fn load_tiles(&self, viewport: &Viewport, callback: TileCallback) {
        self.fetch.load_tiles(viewport, callback)
    }

    pub async fn load_from_url(&self, url: &str) -> Result<Vec<Entity>> {
        self.fetch.load_from_url(url).await
    }

    pub async fn load_entity(&self, id: EntityId) -> Result<Vec<Entity>> {
        self.fetch.load_entity(id).await
    }

    pub async fn load_entity_version(&self, id: EntityId, version: u64) -> Result<Vec<Entity>> {
        self.fetch.load_entity_version(id, version).await
    }

    pub fn load_multiple(&self, ids: &[EntityId], callback: BatchCallback) -> Vec<JoinHandle<()>> {
        self.fetch.load_multiple(ids, callback)
    }

    pub fn toggle(&self, enabled: bool) {
        self.fetch.toggle(enabled)
    }

    pub fn tile_zoom(&self) -> u32 {
        self.fetch.tile_zoom()
    }

    pub fn set_tile_zoom(&self, tile_zoom: u32) {
        self.fetch.set_tile_zoom(tile_zoom)
    }

    pub fn loaded_tiles(&self) -> HashSet<String> {
        self.fetch.loaded_tiles()
    }

    pub fn is_data_loaded(&self, loc: Loc) -> bool {
        self.fetch.is_data_loaded(loc)
    }

    /// Forgets everything fetched from the current server.
    pub fn flush(&self) {
        self.fetch.reset();
        self.auth.invalidate_user_details();
    }

    pub fn switch_server(&self, api_url: &str, oauth: OAuthConfig) {
        self.auth.switch_server(api_url, oauth);
        self.fetch.set_api_url(api_url);
        self.flush();
    }

    // Session

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub async fn authenticate(&self) -> Result<Credentials> {
        self.auth.authenticate().await
    }

    pub fn logout(&self) {
        self.auth.logout();
        self.fetch.reset();
    }

    pub async fn user_details(&self) -> Result<UserDetails> {
        self.auth.user_details().await
    }

    pub async fn user_changesets(&self) -> Result<Vec<ChangesetSummary>> {
        let user = self.auth.user_details().await?;
        let url = format!("{}/api/0.6/changesets?user={}", self.api_url(), user.id);
        let body = self.transport.send(HttpRequest::get(url)).await?;
        decode_changesets(&body)
    }

    /// `online`, `readonly` or `offline`, as reported by the server.
    pub async fn status(&self) -> Result<String> {
        let url = format!("{}/api/capabilities", self.api_url());
        let body = self.transport.send(HttpRequest::get(url)).await?;
        decode_api_status(&body)
    }

    // Upload

    pub async fn put_changeset(&self, diff: &EditDiff, metadata: &ChangesetMetadata) -> Result<ChangesetId> {
        self.uploader.put_changeset(diff, metadata).await
    }

    /// Uploads the edits in `history`, minus whatever `policy` discards.
    pub async fn save(
        &self,
        history: &dyn EditHistory,
        policy: &dyn TagDiscardPolicy,
        metadata: &ChangesetMetadata,
    ) -> Result<ChangesetId> {
        let diff = policy.apply(history.difference());
        info!(changes = diff.len(); "Saving edits");
        self.uploader.put_changeset(&diff, metadata).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::auth::tests::{oauth_config, StaticExchange};
    use crate::data::osm::{Node, Way};
    use crate::errors::ErrorKind;
    use crate::events::drain;
    use crate::tiles::{MercatorProjection, Tile};
    use crate::transport::mock::{MockTransport, Reply};
    use crate::transport::Method;
    use crate::upload::DiscardTags;

    fn config(credentials: Option<Credentials>) -> ClientConfig {
        ClientConfig {
            api_url: "https://api.test".to_string(),
            oauth: oauth_config(),
            credentials,
            tile_zoom: 16,
            settle_delay_ms: 2500,
            request_timeout_secs: 30,
            log_level: "info".to_string(),
            viewport: None,
            output_dir: PathBuf::from("output"),
        }
    }

    fn connection(transport: &Arc<MockTransport>, credentials: Option<Credentials>) -> Connection {
        Connection::new(
            &config(credentials),
            Arc::clone(transport) as Arc<dyn Transport>,
            Arc::new(StaticExchange::new()),
        )
    }

    fn credentials() -> Credentials {
        Credentials {
            token: "token".to_string(),
            token_secret: "secret".to_string(),
        }
    }

    async fn wait_for(receiver: &mut broadcast::Receiver<SyncEvent>, event: SyncEvent) {
        while receiver.recv().await.unwrap() != event {}
    }

    #[test]
    fn urls() {
        let transport = Arc::new(MockTransport::new());
        let connection = connection(&transport, None);

        assert_eq!(connection.changeset_url(42), "https://api.test/changeset/42");
        assert_eq!(connection.user_url("mapper"), "https://api.test/user/mapper");
        assert_eq!(
            connection.entity_url(&Way::new(12, vec![]).into()),
            "https://api.test/way/12"
        );
        assert_eq!(
            connection.changesets_url(Loc::new(-0.12345, 51.98765), 16.5),
            "https://api.test/history#map=16/51.98765/-0.12345"
        );
        assert_eq!(
            connection.changesets_url(Loc::new(-0.12345, 51.98765), 2.0),
            "https://api.test/history#map=2/52.0/-0.1"
        );
    }

    #[tokio::test]
    async fn switching_server_refetches_tiles_from_the_new_one() {
        let transport = Arc::new(MockTransport::new());
        let connection = connection(&transport, None);
        let mut receiver = connection.subscribe();
        let projection = MercatorProjection::centered(Loc::new(-0.1276, 51.5072), 17.0, [256.0, 256.0]);
        let viewport = Viewport::new(&projection, [256.0, 256.0]);
        let noop: TileCallback = Arc::new(|_: &Tile, _: Result<Vec<Entity>>| {});

        connection.load_tiles(&viewport, Arc::clone(&noop));
        wait_for(&mut receiver, SyncEvent::Loaded).await;
        let first = transport.count("https://api.test/api/0.6/map");
        assert!(first > 0);

        connection.switch_server("https://dev.test/", oauth_config());
        assert!(connection.loaded_tiles().is_empty());
        connection.load_tiles(&viewport, noop);
        wait_for(&mut receiver, SyncEvent::Loaded).await;
        assert_eq!(transport.count("https://dev.test/api/0.6/map"), first);
    }

    #[tokio::test]
    async fn user_changesets_use_the_authenticated_user() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            "/user/details",
            Reply::Body(r#"<osm><user id="7" display_name="mapper"/></osm>"#.to_string()),
        );
        transport.on(
            Method::Get,
            "/changesets?user=7",
            Reply::Body(r#"<osm><changeset id="1"><tag k="comment" v="first"/></changeset></osm>"#.to_string()),
        );
        let connection = connection(&transport, Some(credentials()));

        let changesets = connection.user_changesets().await.unwrap();
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].tags["comment"], "first");
    }

    #[tokio::test]
    async fn status_reads_capabilities() {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            "/api/capabilities",
            Reply::Body(r#"<osm><api><status database="online" api="readonly"/></api></osm>"#.to_string()),
        );
        let connection = connection(&transport, None);
        assert_eq!(connection.status().await.unwrap(), "readonly");
    }

    #[tokio::test]
    async fn logout_resets_session_and_tiles() {
        let transport = Arc::new(MockTransport::new());
        let connection = connection(&transport, Some(credentials()));
        let mut receiver = connection.subscribe();
        assert!(connection.is_authenticated());

        connection.logout();
        assert_eq!(connection.auth_state(), AuthState::Anonymous);
        assert!(drain(&mut receiver).contains(&SyncEvent::Auth));
        let err = connection.user_details().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    struct FixedHistory(EditDiff);

    impl EditHistory for FixedHistory {
        fn difference(&self) -> EditDiff {
            self.0.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn save_filters_tags_before_upload() {
        let transport = Arc::new(MockTransport::new());
        transport.on(Method::Put, "/changeset/create", Reply::Body("9".to_string()));
        let connection = connection(&transport, Some(credentials()));

        let mut node = Node::new(-1, Loc::new(0.0, 0.0));
        node.tags.insert("amenity".to_string(), "bench".to_string());
        node.tags.insert("odbl".to_string(), "clean".to_string());
        let history = FixedHistory(EditDiff {
            created: vec![node.into()],
            ..Default::default()
        });
        assert_eq!(history.change_count(), 1);

        let id = connection
            .save(&history, &DiscardTags::new(["odbl"]), &ChangesetMetadata::new("1.0"))
            .await
            .unwrap();
        assert_eq!(id, 9);

        let uploaded = transport.requests();
        let body = uploaded[1].body.as_deref().unwrap();
        assert!(body.contains(r#"k="amenity""#));
        assert!(!body.contains(r#"k="odbl""#));
    }
}
