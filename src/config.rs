use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::auth::oauth::{Credentials, OAuthConfig};
use crate::data::geo::Loc;
use crate::errors::{Error, Result};
use crate::tiles::{DEFAULT_TILE_ZOOM, MAX_TILE_ZOOM};

pub const DEFAULT_API_URL: &str = "https://www.openstreetmap.org";

/// Web mercator is undefined towards the poles; it is clipped at this latitude.
const MAX_MERCATOR_LAT: f64 = 85.0511;

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_tile_zoom() -> u32 {
    DEFAULT_TILE_ZOOM
}

fn default_settle_delay_ms() -> u64 {
    2500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Area to fetch when running the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewportConfig {
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl ViewportConfig {
    pub fn center(&self) -> Loc {
        Loc::new(self.center_lon, self.center_lat)
    }

    pub fn dimensions(&self) -> [f64; 2] {
        [self.width_px as f64, self.height_px as f64]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub oauth: OAuthConfig,
    /// Token from an earlier handshake, if any.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_tile_zoom")]
    pub tile_zoom: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub viewport: Option<ViewportConfig>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl ClientConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(self) -> Result<Self> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(Error::from(format!("api_url must be an http(s) URL, got {:?}", self.api_url)));
        }
        if self.tile_zoom > MAX_TILE_ZOOM {
            return Err(Error::from(format!("tile_zoom must be at most {MAX_TILE_ZOOM}, got {}", self.tile_zoom)));
        }
        if let Some(viewport) = &self.viewport {
            let in_bounds = (-180.0..=180.0).contains(&viewport.center_lon)
                && (-MAX_MERCATOR_LAT..=MAX_MERCATOR_LAT).contains(&viewport.center_lat);
            if !in_bounds {
                return Err("viewport center is outside lon/lat bounds".into());
            }
            if viewport.width_px == 0 || viewport.height_px == 0 {
                return Err("viewport must have a non-zero size".into());
            }
        }
        Ok(self)
    }
}

pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let file = File::open(path).map_err(|err| Error::from(format!("could not open {}: {err}", path.display())))?;
    let config: ClientConfig = serde_json::from_reader(BufReader::new(file))?;
    config.validate()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::errors::ErrorKind;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn fills_in_defaults() {
        let file = write_config(r#"{"oauth": {"consumer_key": "k", "consumer_secret": "s"}}"#);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.tile_zoom, 16);
        assert_eq!(config.settle_delay(), Duration::from_millis(2500));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert!(config.credentials.is_none());
        assert!(config.viewport.is_none());
    }

    #[test]
    fn reads_viewport_and_credentials() {
        let file = write_config(
            r#"{
                "api_url": "https://api06.dev.openstreetmap.org",
                "oauth": {"consumer_key": "k", "consumer_secret": "s"},
                "credentials": {"token": "t", "token_secret": "ts"},
                "tile_zoom": 15,
                "viewport": {"center_lon": -0.1276, "center_lat": 51.5072, "zoom": 17, "width_px": 800, "height_px": 600}
            }"#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.tile_zoom, 15);
        assert_eq!(config.credentials.unwrap().token, "t");
        let viewport = config.viewport.unwrap();
        assert_eq!(viewport.center(), Loc::new(-0.1276, 51.5072));
        assert_eq!(viewport.dimensions(), [800.0, 600.0]);
    }

    #[test]
    fn rejects_bad_values() {
        let missing_oauth = write_config(r#"{"api_url": "https://example.com"}"#);
        assert_eq!(load_config(missing_oauth.path()).unwrap_err().kind, ErrorKind::Config);

        let bad_url = write_config(r#"{"api_url": "ftp://x", "oauth": {"consumer_key": "k", "consumer_secret": "s"}}"#);
        assert_eq!(load_config(bad_url.path()).unwrap_err().kind, ErrorKind::Config);

        let empty_viewport = write_config(
            r#"{"oauth": {"consumer_key": "k", "consumer_secret": "s"},
                "viewport": {"center_lon": 0, "center_lat": 0, "zoom": 17, "width_px": 0, "height_px": 600}}"#,
        );
        assert_eq!(load_config(empty_viewport.path()).unwrap_err().kind, ErrorKind::Config);

        let deep_tiles = write_config(r#"{"oauth": {"consumer_key": "k", "consumer_secret": "s"}, "tile_zoom": 64}"#);
        let err = load_config(deep_tiles.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.message.contains("tile_zoom"));
    }

    #[test]
    fn viewport_center_must_be_projectable() {
        for (lon, lat) in [(0.0, 95.0), (0.0, -86.0), (181.0, 0.0)] {
            let file = write_config(&format!(
                r#"{{"oauth": {{"consumer_key": "k", "consumer_secret": "s"}},
                    "viewport": {{"center_lon": {lon}, "center_lat": {lat}, "zoom": 17, "width_px": 800, "height_px": 600}}}}"#
            ));
            let err = load_config(file.path()).unwrap_err();
            assert!(err.message.contains("outside lon/lat bounds"));
        }

        let edge = write_config(
            r#"{"oauth": {"consumer_key": "k", "consumer_secret": "s"},
                "viewport": {"center_lon": -180, "center_lat": 85.05, "zoom": 17, "width_px": 800, "height_px": 600}}"#,
        );
        assert!(load_config(edge.path()).is_ok());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config(Path::new("/nonexistent/osm-sync.json")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert!(err.message.contains("/nonexistent/osm-sync.json"));
    }
}
