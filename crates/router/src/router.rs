use crate::assets::Shell;
use crate::error::{ErrorKind, Result};
use crate::query::Query;
use crate::response::{self, Resource};
use crate::routes::{self, Route};
use http::{HeaderMap, Request, Response};
use stash_catalog::CatalogHandle;
use stash_config::Config;
use stash_library::Locator;
use stash_storage::{BackendHandle, validate_path};
use stash_transcode::{CacheKey, TranscodeCoordinator, raster};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::instrument;
use url::Url;

enum Reply {
    Resource(Resource),
    NotModified(Resource),
    Asset { content_type: String, data: Vec<u8> },
}

/// Dispatches custom-scheme URIs.
///
/// Only configured schemes and hosts are answered. Each host serves the
/// embedded shell rooted at its entry document's directory, and every host
/// can serve resource bytes.
pub struct SchemeRouter {
    schemes: Vec<String>,
    hosts: BTreeMap<String, PathBuf>,
    max_age: u64,
    catalog: CatalogHandle,
    locator: Locator,
    coordinator: TranscodeCoordinator,
}

impl SchemeRouter {
    /// Fails if a host's entry document is not part of the embedded shell.
    pub fn new(
        config: &Config,
        catalog: CatalogHandle,
        backend: BackendHandle,
        coordinator: TranscodeCoordinator,
    ) -> Result<Self> {
        for (host, entry) in &config.hosts {
            if !Shell::exists(entry) {
                exn::bail!(ErrorKind::Misconfigured(format!(
                    "entry document for host {host:?} is not embedded: {}",
                    entry.display()
                )));
            }
        }
        Ok(Self {
            schemes: config.schemes.clone(),
            hosts: config.hosts.clone(),
            max_age: config.max_age,
            locator: Locator::new(backend, catalog.clone()),
            catalog,
            coordinator,
        })
    }

    /// Answer a bare URI.
    pub async fn route(&self, uri: &str) -> Response<Vec<u8>> {
        self.respond(uri, &HeaderMap::new()).await
    }

    /// Answer a request, honouring `If-None-Match` / `If-Modified-Since`.
    pub async fn route_request<B>(&self, request: &Request<B>) -> Response<Vec<u8>> {
        self.respond(&request.uri().to_string(), request.headers()).await
    }

    #[instrument(level = "debug", skip(self, headers))]
    async fn respond(&self, uri: &str, headers: &HeaderMap) -> Response<Vec<u8>> {
        match self.dispatch(uri, headers).await {
            Ok(Reply::NotModified(resource)) => response::not_modified(&resource, self.max_age),
            Ok(Reply::Resource(resource)) if resource.is_fresh(headers) => response::not_modified(&resource, self.max_age),
            Ok(Reply::Resource(resource)) => response::resource(resource, self.max_age),
            Ok(Reply::Asset { content_type, data }) => response::asset(&content_type, data),
            Err(err) => {
                match err.status().is_server_error() {
                    true => tracing::warn!(error = ?err, "Request failed"),
                    false => tracing::debug!(error = ?err, "Request rejected"),
                }
                response::error(&err)
            },
        }
    }

    async fn dispatch(&self, uri: &str, headers: &HeaderMap) -> Result<Reply> {
        let url = Url::parse(uri).map_err(|e| ErrorKind::InvalidRequest(format!("malformed URI: {e}")))?;
        if !self.schemes.iter().any(|scheme| scheme == url.scheme()) {
            exn::bail!(ErrorKind::InvalidRequest(format!("unknown scheme: {}", url.scheme())));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let Some(entry) = self.hosts.get(&host) else {
            exn::bail!(ErrorKind::InvalidRequest(format!("unknown host: {host}")));
        };
        let query = Query::parse(&url)?;
        let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
        match routes::resolve(&segments, query.raw) {
            Some(Route::EntryDocument) => asset(entry, Path::new("")),
            Some(Route::Resource { kind, id }) => {
                tracing::debug!(%kind, %id, "Serving resource");
                self.resource(&id, &query, headers).await
            },
            Some(Route::Asset(path)) => asset(entry, &path),
            None => exn::bail!(ErrorKind::NotFound),
        }
    }

    #[instrument(level = "debug", skip(self, query, headers))]
    async fn resource(&self, id: &str, query: &Query, headers: &HeaderMap) -> Result<Reply> {
        let record = match self.catalog.read_resource(id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(error = ?err, "Catalog lookup failed, treating resource as missing");
                exn::bail!(ErrorKind::NotFound);
            },
        };
        // The validators of a live record do not depend on the file, so a
        // client that is already current costs no disk or worker time.
        if let Some(record) = record.as_ref().filter(|record| !record.deleted) {
            let validators = Resource::validators(id, response::system_time(record.updated_at));
            if validators.is_fresh(headers) {
                tracing::debug!("Conditional request answered from the catalog");
                return Ok(Reply::NotModified(validators));
            }
        }
        let located = self.locator.locate(id, record.as_ref()).await.map_err(ErrorKind::library)?;
        let last_modified = record.as_ref().map_or(located.modified, |record| record.updated_at);

        let transcodable = !query.params.is_empty()
            && raster::sniff(&located.bytes).is_some()
            && !raster::is_animated(&located.bytes);
        let bytes = match transcodable {
            true => {
                let key = CacheKey::new(id, &query.params);
                self.coordinator.transcode(&key, &located.full_path, &query.params).await.map_err(ErrorKind::transcode)?
            },
            false => located.bytes,
        };

        let content_type = match raster::content_type(&bytes) {
            Some(image) => image.to_string(),
            None => match &record {
                Some(record) => mime_guess::from_ext(record.kind.extension()).first_or_octet_stream().to_string(),
                None => mime_guess::from_path(&located.path).first_or_octet_stream().to_string(),
            },
        };
        let last_modified = response::system_time(last_modified);
        Ok(Reply::Resource(Resource { id: id.to_string(), bytes, content_type, last_modified }))
    }
}

/// Serve `path` from the directory holding `entry`. An empty path serves the
/// entry document itself.
fn asset(entry: &Path, path: &Path) -> Result<Reply> {
    let root = entry.parent().unwrap_or(Path::new(""));
    let target = match path.as_os_str().is_empty() {
        true => entry.to_path_buf(),
        false => validate_path(root.join(path)).map_err(|_| ErrorKind::Forbidden)?,
    };
    if !target.starts_with(root) {
        exn::bail!(ErrorKind::Forbidden);
    }
    let data = Shell::load(&target)?.into_owned();
    Ok(Reply::Asset { content_type: Shell::content_type(&target), data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LAST_MODIFIED};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use stash_catalog::{Catalog, MemoryCatalog, ResourceKind, ResourceRecord};
    use stash_storage::backend::LocalBackend;
    use stash_transcode::error::Result as TranscodeResult;
    use stash_transcode::{ImageTranscoder, Transcoder, TransformParameters};
    use std::io::Cursor;
    use std::sync::Arc;

    struct Fixture {
        dir: tempfile::TempDir,
        catalog: Arc<MemoryCatalog>,
        coordinator: TranscodeCoordinator,
        router: SchemeRouter,
    }

    fn fixture(files: &[(&str, &[u8])], records: Vec<ResourceRecord>) -> Fixture {
        fixture_with(files, records, Arc::new(ImageTranscoder))
    }

    fn fixture_with(files: &[(&str, &[u8])], records: Vec<ResourceRecord>, transcoder: Arc<dyn Transcoder>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, data) in files {
            std::fs::write(dir.path().join(name), data).unwrap();
        }
        let config = Config { library: dir.path().to_path_buf(), ..Config::default() };
        let catalog = Arc::new(MemoryCatalog::with_records(records));
        let backend: BackendHandle = Arc::new(LocalBackend::new("library", &config.library).unwrap());
        let coordinator = TranscodeCoordinator::new(config.cache_dir(), transcoder, config.idle_teardown());
        let router = SchemeRouter::new(&config, catalog.clone(), backend, coordinator.clone()).unwrap();
        Fixture { dir, catalog, coordinator, router }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn image_record(id: &str) -> ResourceRecord {
        ResourceRecord::new(id, ResourceKind::Image)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transcoded_image_end_to_end() {
        let source = png(64, 32);
        let f = fixture(&[("img-123.png", &source[..])], vec![image_record("123")]);

        let response = f.router.route("stash://app/image/123?raw=1&quality=70").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[ETAG], "\"123\"");
        assert_eq!(headers[CACHE_CONTROL], "max-age=31536000");
        assert_eq!(headers[CONTENT_TYPE], "image/jpeg");
        assert!(headers.contains_key(LAST_MODIFIED));

        let cached = std::fs::read(f.dir.path().join("cache/123_quality-70")).unwrap();
        assert_eq!(response.body(), &cached);
        // The current-scheme file was not recorded yet.
        let record = f.catalog.read_resource("123").await.unwrap().unwrap();
        assert_eq!(record.stored_path.as_deref(), Some("img-123.png"));

        // Served from the cache the second time round.
        let again = f.router.route("stash://app/image/123?raw=1&quality=70").await;
        assert_eq!(again.body(), &cached);
        assert_eq!(f.coordinator.stats().jobs_submitted, 1);
    }

    #[tokio::test]
    async fn test_raw_without_parameters_returns_original() {
        let source = png(8, 8);
        let f = fixture(&[("img-5.png", &source[..])], vec![image_record("5")]);
        let response = f.router.route("stash://app/image/5?raw=1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &source);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(f.coordinator.stats().workers_spawned, 0);
    }

    #[tokio::test]
    async fn test_legacy_pdf_is_migrated() {
        let f = fixture(&[("42", &b"%PDF-1.7 legacy"[..])], vec![ResourceRecord::new("42", ResourceKind::Pdf)]);
        let response = f.router.route("stash://viewer/pdf/42?raw=1&quality=10").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), b"%PDF-1.7 legacy");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
        assert!(!f.dir.path().join("42").exists());
        assert!(f.dir.path().join("pdf-42.pdf").exists());
        assert_eq!(f.coordinator.stats().workers_spawned, 0);
    }

    #[tokio::test]
    async fn test_animated_gif_bypasses_transcoding() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        let f = fixture(&[("img-7.png", &gif[..])], vec![image_record("7")]);
        let response = f.router.route("stash://app/image/7?raw&quality=50").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &gif);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/gif");
        assert!(!f.dir.path().join("cache/7_quality-50").exists());
    }

    #[tokio::test]
    async fn test_entry_documents_and_assets() {
        let f = fixture(&[], vec![]);
        for uri in ["stash://app", "stash://app/", "stash://app/image/123", "stash://APP/image/123?raw=0"] {
            let response = f.router.route(uri).await;
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            assert_eq!(response.headers()[CONTENT_TYPE], "text/html", "{uri}");
            assert!(String::from_utf8_lossy(response.body()).contains("stash-app"));
        }
        let viewer = f.router.route("stash://viewer/").await;
        assert!(String::from_utf8_lossy(viewer.body()).contains("stash-viewer"));

        let css = f.router.route("stash://app/image/123/app.css").await;
        assert_eq!(css.status(), StatusCode::OK);
        assert_eq!(css.headers()[CONTENT_TYPE], "text/css");
        assert_eq!(f.router.route("stash://viewer/viewer.css").await.status(), StatusCode::OK);
        // Hosts only see their own directory.
        assert_eq!(f.router.route("stash://viewer/app.css").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(f.router.route("stash://app/nope.js").await.status(), StatusCode::NOT_FOUND);
    }

    #[rstest::rstest]
    #[case("https://app/image/1?raw=1", StatusCode::BAD_REQUEST)]
    #[case("stash://elsewhere/image/1?raw=1", StatusCode::BAD_REQUEST)]
    #[case("not a uri", StatusCode::BAD_REQUEST)]
    #[case("stash://app/image/1?raw=1&quality=500", StatusCode::BAD_REQUEST)]
    #[case("stash://app/image/1?raw=1&maxDimension=0", StatusCode::BAD_REQUEST)]
    #[case("stash://app/image/missing?raw=1", StatusCode::NOT_FOUND)]
    #[case("stash://app/image/gone?raw=1", StatusCode::NOT_FOUND)]
    #[case("stash://app/image/evil?raw=1", StatusCode::FORBIDDEN)]
    #[tokio::test]
    async fn test_error_statuses(#[case] uri: &str, #[case] status: StatusCode) {
        let gone = ResourceRecord { deleted: true, ..image_record("gone") };
        let evil = image_record("evil").with_stored_path("../../etc/passwd.png");
        let f = fixture(&[("img-gone.png", &b"x"[..])], vec![gone, evil]);
        let response = f.router.route(uri).await;
        assert_eq!(response.status(), status);
        assert!(!String::from_utf8_lossy(response.body()).contains("passwd"));
    }

    #[tokio::test]
    async fn test_catalog_outage_is_not_found() {
        let f = fixture(&[("img-1.png", &b"x"[..])], vec![image_record("1")]);
        f.catalog.set_available(false);
        assert_eq!(f.router.route("stash://app/image/1?raw=1").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_crash_is_service_unavailable() {
        struct Crashing;
        impl Transcoder for Crashing {
            fn transcode(&self, _source: &Path, _params: &TransformParameters) -> TranscodeResult<Vec<u8>> {
                panic!("decoder crashed");
            }
        }
        let source = png(4, 4);
        let f = fixture_with(&[("img-9.png", &source[..])], vec![image_record("9")], Arc::new(Crashing));
        let response = f.router.route("stash://app/image/9?raw=1&maxDimension=2").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!String::from_utf8_lossy(response.body()).contains("decoder"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_corrupt_image_is_transcode_failure() {
        // PNG magic followed by garbage.
        let corrupt = b"\x89PNG\r\n\x1a\n\0\0\0\0garbage".to_vec();
        let f = fixture(&[("img-8.png", &corrupt[..])], vec![image_record("8")]);
        let response = f.router.route("stash://app/image/8?raw=1&quality=30").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The worker survives a per-job failure.
        assert_eq!(f.coordinator.stats().workers_spawned, 1);
    }

    #[tokio::test]
    async fn test_conditional_request() {
        let f = fixture(&[("img-3.png", &png(2, 2)[..])], vec![image_record("3")]);
        let request = Request::builder().uri("stash://app/image/3?raw=1").header(IF_NONE_MATCH, "\"3\"").body(()).unwrap();
        let response = f.router.route_request(&request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[ETAG], "\"3\"");
        assert!(response.body().is_empty());

        let request = Request::builder().uri("stash://app/image/3?raw=1").header(IF_NONE_MATCH, "\"4\"").body(()).unwrap();
        assert_eq!(f.router.route_request(&request).await.status(), StatusCode::OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_conditional_request_skips_lookup_and_transcoding() {
        let f = fixture(&[("3", &png(4, 4)[..])], vec![image_record("3")]);
        let uri = "stash://app/image/3?raw=1&quality=40";
        let request = Request::builder().uri(uri).header(IF_NONE_MATCH, "\"3\"").body(()).unwrap();
        let response = f.router.route_request(&request).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[ETAG], "\"3\"");
        assert!(response.headers().contains_key(LAST_MODIFIED));
        // Nothing was migrated or transcoded.
        assert!(f.dir.path().join("3").exists());
        assert!(!f.dir.path().join("img-3.png").exists());
        assert_eq!(f.catalog.updates(), 0);
        assert_eq!(f.coordinator.stats().jobs_submitted, 0);

        // A deleted record is never answered with 304.
        let gone = ResourceRecord { deleted: true, ..image_record("4") };
        let f = fixture(&[], vec![gone]);
        let request = Request::builder().uri("stash://app/image/4?raw=1").header(IF_NONE_MATCH, "*").body(()).unwrap();
        assert_eq!(f.router.route_request(&request).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unembedded_entry_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config { library: dir.path().to_path_buf(), ..Config::default() };
        config.hosts.insert("docs".to_string(), PathBuf::from("docs/index.html"));
        let backend: BackendHandle = Arc::new(LocalBackend::new("library", dir.path()).unwrap());
        let coordinator = TranscodeCoordinator::new(config.cache_dir(), Arc::new(ImageTranscoder), config.idle_teardown());
        let result = SchemeRouter::new(&config, Arc::new(MemoryCatalog::default()), backend, coordinator);
        assert_eq!(result.map(|_| ()).unwrap_err().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
