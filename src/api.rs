use crate::engine::map::{LoadRequest, LoadResponse, SourceLoader};
use crate::model::EventType;
use geojson::FeatureCollection;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

pub const VENUES_PATH: &str = "/api/venues";
pub const EVENT_TYPES_PATH: &str = "/api/event-types";
pub const PARKING_PATH: &str = "/api/parking-lots-occupancy";
pub const CONGESTION_PATH: &str = "/api/congestion";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] Box<ureq::Error>),
    #[error("server answered {0} for {1}")]
    Status(u16, String),
    #[error("invalid response body: {0}")]
    Decode(#[from] simd_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of raw API payloads
pub trait Backend: Send + Sync {
    fn get(&self, path: &str) -> Result<Vec<u8>, ApiError>;
}

/// Strip the `/api` prefix and join the remainder onto `base_url`.
/// Paths outside `/api` are joined unchanged.
pub fn rewrite_api_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let rest = match path.strip_prefix("/api") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => rest,
        _ => path,
    };
    if rest.is_empty() || rest.starts_with('?') {
        format!("{}/{}", base, rest)
    } else {
        format!("{}{}", base, rest)
    }
}

pub struct HttpBackend {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("venue-map/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            base_url: base_url.to_string(),
            agent,
        }
    }
}

impl Backend for HttpBackend {
    fn get(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let url = rewrite_api_path(&self.base_url, path);
        log::debug!("GET {}", url);
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(ApiError::Status(code, url)),
            Err(err) => return Err(ApiError::Http(Box::new(err))),
        };
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        Ok(body)
    }
}

/// Reads `<dir>/<name>.json` for `/api/<name>?...`; the query is ignored
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, path: &str) -> PathBuf {
        let path = path.split('?').next().unwrap_or_default();
        let name = path.strip_prefix("/api/").unwrap_or(path).trim_matches('/');
        self.dir.join(format!("{}.json", name))
    }
}

impl Backend for FileBackend {
    fn get(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let file = self.file_for(path);
        log::debug!("reading {}", file.display());
        Ok(std::fs::read(file)?)
    }
}

fn fetch_json<T: DeserializeOwned>(backend: &dyn Backend, path: &str) -> Result<T, ApiError> {
    let mut body = backend.get(path)?;
    Ok(simd_json::serde::from_slice(&mut body)?)
}

pub fn fetch_features(backend: &dyn Backend, path: &str) -> Result<FeatureCollection, ApiError> {
    fetch_json(backend, path)
}

pub fn fetch_venues(backend: &dyn Backend) -> Result<FeatureCollection, ApiError> {
    fetch_features(backend, VENUES_PATH)
}

pub fn fetch_event_types(backend: &dyn Backend) -> Result<Vec<EventType>, ApiError> {
    fetch_json(backend, EVENT_TYPES_PATH)
}

/// Reference data fetched once per session
pub struct Startup {
    pub venues: Result<FeatureCollection, ApiError>,
    pub event_types: Result<Vec<EventType>, ApiError>,
}

/// Fetch venues and event types concurrently in the background
pub fn spawn_startup(backend: Arc<dyn Backend>) -> Receiver<Startup> {
    let (tx, rx) = mpsc::channel();
    rayon::spawn(move || {
        let (venues, event_types) = rayon::join(|| fetch_venues(&*backend), || fetch_event_types(&*backend));
        let _ = tx.send(Startup { venues, event_types });
    });
    rx
}

/// Map source loader backed by the API
pub struct ApiLoader {
    backend: Arc<dyn Backend>,
    tx: Sender<LoadResponse>,
    rx: Receiver<LoadResponse>,
}

impl ApiLoader {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { backend, tx, rx }
    }
}

impl SourceLoader for ApiLoader {
    fn request(&mut self, request: LoadRequest) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        rayon::spawn(move || {
            let result = fetch_features(&*backend, &request.url).map_err(|err| {
                log::warn!("fetching {} failed: {}", request.url, err);
                err.to_string()
            });
            let _ = tx.send(LoadResponse {
                source: request.source,
                generation: request.generation,
                result,
            });
        });
    }

    fn poll(&mut self) -> Vec<LoadResponse> {
        self.rx.try_iter().collect()
    }
}
