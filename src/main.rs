use std::fs::{self, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{error, info};
use structured_logger::json::new_writer;
use structured_logger::Builder;
use tokio::sync::broadcast::error::TryRecvError;

use osm_sync::auth::oauth::{Credentials, OAuthConfig};
use osm_sync::auth::CredentialExchange;
use osm_sync::config::{load_config, ClientConfig};
use osm_sync::connection::Connection;
use osm_sync::data::osm::Entity;
use osm_sync::data::OsmMapData;
use osm_sync::errors::{Error, Result};
use osm_sync::events::SyncEvent;
use osm_sync::fetch::TileCallback;
use osm_sync::tiles::{MercatorProjection, Tile, Viewport};
use osm_sync::transport::HttpTransport;

const DEFAULT_CONFIG_PATH: &str = "config/osm-sync.json";

/// The binary only reads, so it never runs the interactive handshake;
/// stored credentials come from the config file.
struct NoInteractiveLogin;

#[async_trait]
impl CredentialExchange for NoInteractiveLogin {
    async fn handshake(&self, _api_url: &str, _config: &OAuthConfig) -> Result<Credentials> {
        Err(Error::auth("interactive login is not available; put credentials in the config file"))
    }
}

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn create_output_dir(config: &ClientConfig) -> Result<PathBuf> {
    create_dir_all(&config.output_dir)?;
    Ok(config.output_dir.clone())
}

/// Loads every tile covering the configured viewport into `store`.
async fn fetch_viewport(connection: &Connection, config: &ClientConfig, store: Arc<Mutex<OsmMapData>>) -> Result<()> {
    let viewport_config = config.viewport.as_ref().ok_or("config has no viewport to fetch")?;
    let dimensions = viewport_config.dimensions();
    let projection = MercatorProjection::centered(viewport_config.center(), viewport_config.zoom, dimensions);
    let viewport = Viewport::new(&projection, dimensions);

    let callback: TileCallback = Arc::new(move |tile: &Tile, result: Result<Vec<Entity>>| match result {
        Ok(entities) => {
            let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
            store.merge(entities);
        },
        Err(err) => error!(tile_id = tile.id.as_str(), err = err.message.as_str(); "Tile failed"),
    });

    let mut receiver = connection.subscribe();
    connection.load_tiles(&viewport, callback);

    // Loading is emitted synchronously, so it is already queued if anything was requested.
    match receiver.try_recv() {
        Ok(SyncEvent::Loading) => (),
        Ok(_) | Err(TryRecvError::Empty) => return Ok(()),
        Err(err) => return Err(Error::from(err.to_string())),
    }
    loop {
        match receiver.recv().await {
            Ok(SyncEvent::Loaded) => return Ok(()),
            Ok(_) => (),
            Err(err) => return Err(Error::from(err.to_string())),
        }
    }
}

fn write_snapshot(data: &OsmMapData, output_dir: &Path) -> Result<()> {
    let bytes = rkyv::to_bytes::<_, 256>(data).map_err(|err| err.to_string())?;
    let output_path = output_dir.join("osm_elements.rkyv");
    fs::write(&output_path, &bytes)?;
    info!(path = output_path.display().to_string().as_str(), bytes = bytes.len(); "Snapshot written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(Path::new(&config_path))?;
    setup_logging(&config.log_level);

    let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
    let connection = Connection::new(&config, transport, Arc::new(NoInteractiveLogin));

    let store = Arc::new(Mutex::new(OsmMapData::default()));
    fetch_viewport(&connection, &config, Arc::clone(&store)).await?;

    let output_dir = create_output_dir(&config)?;
    let data = store.lock().unwrap_or_else(PoisonError::into_inner).clone();
    info!(
        nodes = data.nodes.len(),
        ways = data.ways.len(),
        relations = data.relations.len(),
        tiles = connection.loaded_tiles().len();
        "Fetched viewport"
    );
    write_snapshot(&data, &output_dir)
}
