use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::decode::decode_entities;
use crate::data::geo::{Extent, Loc};
use crate::data::osm::{Entity, EntityId, EntityType, OsmId};
use crate::errors::Result;
use crate::events::{EventBus, SyncEvent};
use crate::tiles::{plan_tiles, Tile, Viewport, DEFAULT_TILE_ZOOM};
use crate::transport::{HttpRequest, Transport};

/// Most ids the bulk endpoints accept in one request.
pub const MAX_BATCH_SIZE: usize = 150;

/// Called once per finished tile with the decoded entities or the failure.
/// Never called for a cancelled tile.
pub type TileCallback = Arc<dyn Fn(&Tile, Result<Vec<Entity>>) + Send + Sync>;

/// Called once per bulk-fetch batch.
pub type BatchCallback = Arc<dyn Fn(Result<Vec<Entity>>) + Send + Sync>;

struct FetchState {
    api_url: String,
    tile_zoom: u32,
    off: bool,
    loaded: HashMap<String, Extent>,
    inflight: HashMap<String, CancellationToken>,
    /// Finished tiles whose callback is still running.
    delivering: usize,
    /// A `Loading` event went out and its `Loaded` has not yet.
    busy: bool,
}

impl FetchState {
    /// Emits the falling edge once nothing is left in flight or being delivered.
    fn settle(&mut self, events: &EventBus) {
        if self.busy && self.inflight.is_empty() && self.delivering == 0 {
            self.busy = false;
            info!(loaded_tiles = self.loaded.len(); "Tile loading finished");
            events.emit(SyncEvent::Loaded);
        }
    }

    fn cancel(&mut self, tile_id: &str) {
        if let Some(token) = self.inflight.remove(tile_id) {
            debug!(tile_id = tile_id; "Cancelling tile request");
            token.cancel();
        }
    }
}

fn lock(state: &Mutex<FetchState>) -> MutexGuard<'_, FetchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loads map data tile by tile as the viewport moves, and entities by id.
///
/// Owns the loaded and in-flight tile sets; they change only through
/// [`FetchManager::load_tiles`], [`FetchManager::reset`] and finishing requests.
pub struct FetchManager {
    transport: Arc<dyn Transport>,
    events: EventBus,
    state: Arc<Mutex<FetchState>>,
}

impl FetchManager {
    pub fn new(api_url: &str, transport: Arc<dyn Transport>, events: EventBus) -> Self {
        FetchManager {
            transport,
            events,
            state: Arc::new(Mutex::new(FetchState {
                api_url: api_url.trim_end_matches('/').to_string(),
                tile_zoom: DEFAULT_TILE_ZOOM,
                off: false,
                loaded: HashMap::new(),
                inflight: HashMap::new(),
                delivering: 0,
                busy: false,
            })),
        }
    }

    pub fn set_api_url(&self, api_url: &str) {
        lock(&self.state).api_url = api_url.trim_end_matches('/').to_string();
    }

    pub fn tile_zoom(&self) -> u32 {
        lock(&self.state).tile_zoom
    }

    pub fn set_tile_zoom(&self, tile_zoom: u32) {
        lock(&self.state).tile_zoom = tile_zoom;
    }

    /// Enables or disables tile loading. Loaded and in-flight tiles are kept.
    pub fn toggle(&self, enabled: bool) {
        lock(&self.state).off = !enabled;
    }

    pub fn loaded_tiles(&self) -> HashSet<String> {
        lock(&self.state).loaded.keys().cloned().collect()
    }

    pub fn inflight_tiles(&self) -> HashSet<String> {
        lock(&self.state).inflight.keys().cloned().collect()
    }

    /// Whether `loc` falls inside a tile that finished loading.
    pub fn is_data_loaded(&self, loc: Loc) -> bool {
        lock(&self.state).loaded.values().any(|extent| extent.contains(loc))
    }

    /// Brings tile requests in line with the viewport.
    ///
    /// In-flight requests for tiles outside the viewport are cancelled first.
    /// Then every wanted tile that is neither loaded nor in flight is requested.
    /// `callback` gets each tile's entities. A failed tile is not marked loaded,
    /// so the next call requests it again. Must be called from within a Tokio runtime.
    pub fn load_tiles(&self, viewport: &Viewport, callback: TileCallback) {
        let mut state = lock(&self.state);
        if state.off {
            return;
        }

        let tiles = plan_tiles(viewport, state.tile_zoom);
        let wanted: HashSet<&str> = tiles.iter().map(|tile| tile.id.as_str()).collect();
        let stale: Vec<String> = state
            .inflight
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for tile_id in &stale {
            state.cancel(tile_id);
        }

        for tile in tiles {
            if state.loaded.contains_key(&tile.id) || state.inflight.contains_key(&tile.id) {
                continue;
            }
            if !state.busy {
                state.busy = true;
                info!("Tile loading started");
                self.events.emit(SyncEvent::Loading);
            }

            let token = CancellationToken::new();
            state.inflight.insert(tile.id.clone(), token.clone());
            let url = format!("{}/api/0.6/map?bbox={}", state.api_url, tile.extent.to_param());
            debug!(tile_id = tile.id.as_str(), url = url.as_str(); "Requesting tile");

            tokio::spawn(fetch_tile(
                Arc::clone(&self.transport),
                Arc::clone(&self.state),
                self.events.clone(),
                tile,
                url,
                token,
                Arc::clone(&callback),
            ));
        }

        state.settle(&self.events);
    }

    /// Cancels every in-flight tile and forgets which tiles were loaded.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        let inflight: Vec<String> = state.inflight.keys().cloned().collect();
        for tile_id in &inflight {
            state.cancel(tile_id);
        }
        state.loaded.clear();
        state.settle(&self.events);
        info!(cancelled = inflight.len(); "Tile state reset");
    }

    pub async fn load_from_url(&self, url: &str) -> Result<Vec<Entity>> {
        let body = self.transport.send(HttpRequest::get(url)).await?;
        decode_entities(&body)
    }

    /// One entity; ways and relations come with everything they reference.
    pub async fn load_entity(&self, id: EntityId) -> Result<Vec<Entity>> {
        let full = if id.kind == EntityType::Node { "" } else { "/full" };
        let url = format!("{}/api/0.6/{}/{}{full}", self.api_url(), id.kind, id.osm_id);
        self.load_from_url(&url).await
    }

    pub async fn load_entity_version(&self, id: EntityId, version: u64) -> Result<Vec<Entity>> {
        let url = format!("{}/api/0.6/{}/{}/{version}", self.api_url(), id.kind, id.osm_id);
        self.load_from_url(&url).await
    }

    /// Fetches many entities with one request per type and batch of at most
    /// [`MAX_BATCH_SIZE`] ids. Batches run independently and each reports to
    /// `callback` on its own; a failed batch does not affect the others.
    pub fn load_multiple(&self, ids: &[EntityId], callback: BatchCallback) -> Vec<JoinHandle<()>> {
        let api_url = self.api_url();
        plan_batches(ids)
            .into_iter()
            .map(|(kind, batch)| {
                let ids = batch.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
                let url = format!("{api_url}/api/0.6/{0}?{0}={ids}", kind.plural());
                let transport = Arc::clone(&self.transport);
                let callback = Arc::clone(&callback);
                tokio::spawn(async move {
                    let result = match transport.send(HttpRequest::get(url)).await {
                        Ok(body) => decode_entities(&body),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = &result {
                        warn!(kind = kind.as_str(), ids = batch.len(), err = err.message.as_str(); "Batch fetch failed");
                    }
                    callback(result);
                })
            })
            .collect()
    }

    fn api_url(&self) -> String {
        lock(&self.state).api_url.clone()
    }
}

async fn fetch_tile(
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<FetchState>>,
    events: EventBus,
    tile: Tile,
    url: String,
    token: CancellationToken,
    callback: TileCallback,
) {
    let response = tokio::select! {
        _ = token.cancelled() => return,
        response = transport.send(HttpRequest::get(url)) => response,
    };
    let result = response.and_then(|body| decode_entities(&body));

    {
        let mut state = lock(&state);
        // Cancelled while the response was being decoded or the lock was held.
        if token.is_cancelled() {
            return;
        }
        state.inflight.remove(&tile.id);
        state.delivering += 1;
        match &result {
            Ok(entities) => {
                debug!(tile_id = tile.id.as_str(), entities = entities.len(); "Tile loaded");
                state.loaded.insert(tile.id.clone(), tile.extent);
            },
            Err(err) => {
                warn!(tile_id = tile.id.as_str(), err = err.message.as_str(); "Tile request failed");
            },
        }
    }

    callback(&tile, result);

    let mut state = lock(&state);
    state.delivering -= 1;
    state.settle(&events);
}

/// Groups ids by type in order of first appearance, drops duplicates and
/// splits each group into batches of at most [`MAX_BATCH_SIZE`].
pub fn plan_batches(ids: &[EntityId]) -> Vec<(EntityType, Vec<OsmId>)> {
    let mut seen: HashSet<EntityId> = HashSet::new();
    let mut groups: Vec<(EntityType, Vec<OsmId>)> = Vec::new();
    for id in ids {
        if !seen.insert(*id) {
            continue;
        }
        match groups.iter_mut().find(|(kind, _)| *kind == id.kind) {
            Some((_, group)) => group.push(id.osm_id),
            None => groups.push((id.kind, vec![id.osm_id])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(kind, group)| {
            group
                .chunks(MAX_BATCH_SIZE)
                .map(|chunk| (kind, chunk.to_vec()))
                .collect::<Vec<_>>()
        })
        .collect()
}
