//! End-to-end tests: dispatcher, pipeline, and HTTP surface with in-memory
//! fakes standing in for pdfium, the object store, and the VLM.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use pdf2md_server::document::{BoundingBox, PageSize};
use pdf2md_server::pipeline::detect::{DetectedBox, RegionDetector};
use pdf2md_server::pipeline::encode::EncodedImage;
use pdf2md_server::pipeline::engine::VlmEngine;
use pdf2md_server::pipeline::inference::{
    BackendHealth, HealthError, InferenceBackend, Transcription,
};
use pdf2md_server::pipeline::regions::{PageContext, RegionOcr};
use pdf2md_server::pipeline::render::{PageImage, Rasterizer};
use pdf2md_server::server::{build_state, create_router};
use pdf2md_server::{
    ConversionPipeline, Dispatcher, ErrorKind, JobId, JobState, PipelineProgress, RegionError,
    RemoteStore, ResourcePath, ServiceConfig, ServiceError, Stage, StoreError, StoreErrorKind,
    StoreRegistry,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fakes ────────────────────────────────────────────────────────────────

/// Object store backed by a map of `bucket/key` → bytes.
#[derive(Default)]
struct MemStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    upload_delays: Mutex<HashMap<String, Duration>>,
}

impl MemStore {
    fn delay_upload(&self, bucket: &str, key: &str, delay: Duration) {
        self.upload_delays
            .lock()
            .insert(format!("{bucket}/{key}"), delay);
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .insert(format!("{bucket}/{key}"), bytes.to_vec());
    }

    fn get(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .get(&format!("{bucket}/{key}"))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

#[async_trait]
impl RemoteStore for MemStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn download(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let bytes = self
            .objects
            .lock()
            .get(&format!("{bucket}/{key}"))
            .cloned()
            .ok_or_else(|| StoreError::new(StoreErrorKind::NotFound, format!("{bucket}/{key}")))?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::from_io(&e, parent))?;
        }
        tokio::fs::write(local, bytes)
            .await
            .map_err(|e| StoreError::from_io(&e, local))
    }

    async fn upload(&self, bucket: &str, key: &str, local: &Path) -> Result<(), StoreError> {
        let delay = self.upload_delays.lock().get(&format!("{bucket}/{key}")).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| StoreError::from_io(&e, local))?;
        self.put(bucket, key, &bytes);
        Ok(())
    }
}

/// Pages of 100×100 points rendered at 1 px per point. A staged file
/// reading `%PDF <n>` has `n` pages, anything else has one.
struct FakeRasterizer {
    delay: Duration,
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn page_count(&self, path: &Path) -> Result<usize, ServiceError> {
        let staged = tokio::fs::read_to_string(path).await.unwrap_or_default();
        Ok(staged
            .trim_start_matches("%PDF")
            .trim()
            .parse()
            .unwrap_or(1))
    }

    async fn render_page(
        &self,
        _path: &Path,
        index: usize,
        _scale: f32,
    ) -> Result<PageImage, ServiceError> {
        tokio::time::sleep(self.delay).await;
        Ok(PageImage::new(
            index,
            DynamicImage::ImageRgba8(RgbaImage::new(100, 100)),
            PageSize {
                width: 100.0,
                height: 100.0,
            },
        ))
    }
}

/// Fixed boxes for every page.
struct FixedDetector(Vec<BoundingBox>);

#[async_trait]
impl RegionDetector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn detect(&self, _page: &PageImage) -> Result<Vec<DetectedBox>, ServiceError> {
        Ok(self
            .0
            .iter()
            .map(|bbox| DetectedBox {
                bbox: *bbox,
                label: None,
                score: None,
            })
            .collect())
    }
}

/// Answers `w<width>` after a per-width delay; widths in `broken` always fail.
struct ScriptedBackend {
    delays: HashMap<u32, Duration>,
    broken: Vec<u32>,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedBackend {
    fn new(delays: &[(u32, u64)], broken: &[u32]) -> Self {
        Self {
            delays: delays
                .iter()
                .map(|(w, ms)| (*w, Duration::from_millis(*ms)))
                .collect(),
            broken: broken.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn transcribe(&self, image: &EncodedImage) -> Result<Transcription, RegionError> {
        if let Some(delay) = self.delays.get(&image.width) {
            tokio::time::sleep(*delay).await;
        }
        self.calls.lock().push(image.width);
        if self.broken.contains(&image.width) {
            return Err(RegionError::Network("connection reset".into()));
        }
        Ok(Transcription {
            text: format!("w{}", image.width),
            ..Default::default()
        })
    }

    async fn health(&self) -> Result<BackendHealth, HealthError> {
        Ok(BackendHealth {
            status: 200,
            body: "ok".into(),
            content_type: None,
        })
    }
}

/// Records the Fetch-start and Publish-end instants of every job.
#[derive(Default)]
struct Intervals(Mutex<HashMap<JobId, (Option<Instant>, Option<Instant>)>>);

impl Intervals {
    fn get(&self, job: JobId) -> (Instant, Instant) {
        let map = self.0.lock();
        let (start, end) = map[&job];
        (start.unwrap(), end.unwrap())
    }
}

impl PipelineProgress for Intervals {
    fn on_stage_start(&self, job: JobId, stage: Stage) {
        if stage == Stage::Fetch {
            self.0.lock().entry(job).or_default().0 = Some(Instant::now());
        }
    }

    fn on_stage_complete(&self, job: JobId, stage: Stage) {
        if stage == Stage::Publish {
            self.0.lock().entry(job).or_default().1 = Some(Instant::now());
        }
    }
}

fn overlaps(a: (Instant, Instant), b: (Instant, Instant)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn whole_page() -> Vec<BoundingBox> {
    vec![BoundingBox::new(0.0, 0.0, 100.0, 100.0)]
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<MemStore>,
    intervals: Arc<Intervals>,
    dispatcher: Dispatcher,
}

fn harness(
    workers: usize,
    page_delay: Duration,
    detector: FixedDetector,
    backend: Arc<ScriptedBackend>,
    cancel_on_timeout: bool,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::default());
    let intervals = Arc::new(Intervals::default());

    let ocr = RegionOcr::new(Arc::new(detector), backend)
        .concurrency(4)
        .max_retries(1)
        .retry_backoff_ms(1);
    let pipeline = ConversionPipeline::builder(
        StoreRegistry::new().with("s3", store.clone()),
        Arc::new(FakeRasterizer { delay: page_delay }),
        Arc::new(VlmEngine::new("test", ocr)),
    )
    .input_root(dir.path().join("input"))
    .output_root(dir.path().join("output"))
    .progress(intervals.clone())
    .build();

    Harness {
        _dir: dir,
        store,
        intervals,
        dispatcher: Dispatcher::start(Arc::new(pipeline), workers, cancel_on_timeout),
    }
}

fn rp(s: &str) -> ResourcePath {
    ResourcePath::parse(s).unwrap()
}

fn simple_backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(&[], &[]))
}

// ── Concurrency properties ───────────────────────────────────────────────

#[tokio::test]
async fn disjoint_paths_run_in_parallel() {
    let h = harness(2, Duration::from_millis(200), FixedDetector(whole_page()), simple_backend(), true);
    h.store.put("b", "a.pdf", b"%PDF");
    h.store.put("b", "c.pdf", b"%PDF");

    let a = h.dispatcher.submit(rp("s3://b/a.pdf"), rp("s3://b/a-out")).unwrap();
    let c = h.dispatcher.submit(rp("s3://b/c.pdf"), rp("s3://b/c-out")).unwrap();
    let (ida, idc) = (a.id(), c.id());

    let (ra, rc) = tokio::join!(a.wait(Duration::from_secs(5)), c.wait(Duration::from_secs(5)));
    assert_eq!(ra.unwrap().markdown, "w100\n");
    rc.unwrap();

    assert!(overlaps(h.intervals.get(ida), h.intervals.get(idc)));
    assert_eq!(h.store.get("b", "a-out.md").as_deref(), Some("w100\n"));
    assert!(h.store.get("b", "c-out.json").is_some());
}

#[tokio::test]
async fn shared_path_jobs_never_overlap() {
    let h = harness(3, Duration::from_millis(100), FixedDetector(whole_page()), simple_backend(), true);
    h.store.put("b", "shared.pdf", b"%PDF");

    let handles: Vec<_> = (0..3)
        .map(|i| {
            h.dispatcher
                .submit(rp("s3://b/shared.pdf"), rp(&format!("s3://b/out-{i}")))
                .unwrap()
        })
        .collect();
    let ids: Vec<JobId> = handles.iter().map(|j| j.id()).collect();

    for result in futures::future::join_all(handles.into_iter().map(|j| j.wait(Duration::from_secs(10)))).await {
        result.unwrap();
    }

    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            assert!(
                !overlaps(h.intervals.get(ids[i]), h.intervals.get(ids[j])),
                "jobs {} and {} held the same path at once",
                i,
                j
            );
        }
    }
}

#[tokio::test]
async fn outputs_differing_by_extension_publish_their_own_artifacts() {
    let h = harness(2, Duration::ZERO, FixedDetector(whole_page()), simple_backend(), true);
    h.store.put("b", "a.pdf", b"%PDF 1");
    h.store.put("b", "c.pdf", b"%PDF 2");
    // Hold A's markdown upload until B has exported and published.
    h.store.delay_upload("b", "r.pdf.md", Duration::from_millis(300));

    let a = h.dispatcher.submit(rp("s3://b/a.pdf"), rp("s3://b/r.pdf")).unwrap();
    let c = h.dispatcher.submit(rp("s3://b/c.pdf"), rp("s3://b/r.png")).unwrap();
    let (ra, rc) = tokio::join!(a.wait(Duration::from_secs(5)), c.wait(Duration::from_secs(5)));
    let (ra, rc) = (ra.unwrap(), rc.unwrap());

    assert_eq!(ra.markdown, "w100\n");
    assert_eq!(rc.markdown, "w100\n\nw100\n");
    assert_eq!(h.store.get("b", "r.pdf.md").as_deref(), Some("w100\n"));
    assert_eq!(h.store.get("b", "r.png.md").as_deref(), Some("w100\n\nw100\n"));

    let pages = |key: &str| {
        let v: serde_json::Value = serde_json::from_str(&h.store.get("b", key).unwrap()).unwrap();
        v["document"]["pages"].as_array().unwrap().len()
    };
    assert_eq!(pages("r.pdf.json"), 1);
    assert_eq!(pages("r.png.json"), 2);
}

#[tokio::test]
async fn reversed_path_pairs_do_not_deadlock() {
    let h = harness(2, Duration::from_millis(20), FixedDetector(whole_page()), simple_backend(), true);
    h.store.put("b", "x.pdf", b"%PDF");
    h.store.put("b", "y.pdf", b"%PDF");

    for _ in 0..5 {
        let a = h.dispatcher.submit(rp("s3://b/x.pdf"), rp("s3://b/y.pdf")).unwrap();
        let b = h.dispatcher.submit(rp("s3://b/y.pdf"), rp("s3://b/x.pdf")).unwrap();
        let (ra, rb) = tokio::join!(a.wait(Duration::from_secs(5)), b.wait(Duration::from_secs(5)));
        ra.unwrap();
        rb.unwrap();
    }
}

// ── Timeout ──────────────────────────────────────────────────────────────

async fn wait_terminal(record: &pdf2md_server::dispatcher::SharedJob) -> JobState {
    for _ in 0..200 {
        let state = record.lock().state;
        if state.is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job never reached a terminal state");
}

#[tokio::test]
async fn timeout_returns_within_budget_and_job_still_finishes() {
    let h = harness(1, Duration::from_millis(400), FixedDetector(whole_page()), simple_backend(), false);
    h.store.put("b", "slow.pdf", b"%PDF");

    let handle = h.dispatcher.submit(rp("s3://b/slow.pdf"), rp("s3://b/slow.pdf")).unwrap();
    let record = handle.record();

    let started = Instant::now();
    let err = handle.wait(Duration::from_millis(50)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_millis(300));

    assert_eq!(wait_terminal(&record).await, JobState::Succeeded);
    assert!(h.store.get("b", "slow.pdf.md").is_some());
    assert_eq!(h.dispatcher.tracked(), 0);
}

#[tokio::test]
async fn timeout_cancels_the_job_when_configured() {
    let h = harness(1, Duration::from_millis(400), FixedDetector(whole_page()), simple_backend(), true);
    h.store.put("b", "slow.pdf", b"%PDF");

    let handle = h.dispatcher.submit(rp("s3://b/slow.pdf"), rp("s3://b/slow.pdf")).unwrap();
    let record = handle.record();
    handle.wait(Duration::from_millis(50)).await.unwrap_err();

    assert_eq!(wait_terminal(&record).await, JobState::Failed);
    let failure = record.lock().error.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert!(h.store.get("b", "slow.pdf.md").is_none());
}

// ── Region-level properties ──────────────────────────────────────────────

fn three_regions() -> FixedDetector {
    // Widths 10, 20, 30 px identify the regions to the backend.
    FixedDetector(vec![
        BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        BoundingBox::new(0.0, 20.0, 20.0, 30.0),
        BoundingBox::new(0.0, 40.0, 30.0, 50.0),
    ])
}

#[tokio::test]
async fn regions_merge_in_detection_order_regardless_of_completion() {
    let backend = Arc::new(ScriptedBackend::new(&[(10, 60), (20, 120), (30, 0)], &[]));
    let h = harness(1, Duration::ZERO, three_regions(), backend.clone(), true);
    h.store.put("b", "doc.pdf", b"%PDF");

    let out = h
        .dispatcher
        .submit(rp("s3://b/doc.pdf"), rp("s3://b/doc.pdf"))
        .unwrap()
        .wait(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(*backend.calls.lock(), [30, 10, 20]);
    assert_eq!(out.markdown, "w10\n\nw20\n\nw30\n");
    assert_eq!(out.stats.total_regions, 3);
}

#[tokio::test]
async fn failing_region_degrades_instead_of_failing_the_page() {
    let backend = Arc::new(ScriptedBackend::new(&[], &[20]));
    let h = harness(1, Duration::ZERO, three_regions(), backend.clone(), true);
    h.store.put("b", "doc.pdf", b"%PDF");

    let out = h
        .dispatcher
        .submit(rp("s3://b/doc.pdf"), rp("s3://b/doc.pdf"))
        .unwrap()
        .wait(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(out.markdown, "w10\n\nw30\n");
    assert_eq!(out.stats.degraded_regions, 1);
    // First attempt plus one retry.
    assert_eq!(backend.calls.lock().iter().filter(|w| **w == 20).count(), 2);

    let json: serde_json::Value =
        serde_json::from_str(&h.store.get("b", "doc.pdf.json").unwrap()).unwrap();
    let cells = json["document"]["pages"][0]["cells"].as_array().unwrap();
    assert_eq!(cells.len(), 3);
    assert_eq!(cells[1]["text"], "");
    assert_eq!(cells[1]["confidence"], 0.0);
}

#[tokio::test]
async fn page_without_regions_yields_no_cells() {
    let ocr = RegionOcr::new(Arc::new(FixedDetector(Vec::new())), simple_backend());
    let page = PageImage::new(
        0,
        DynamicImage::ImageRgba8(RgbaImage::new(10, 10)),
        PageSize {
            width: 10.0,
            height: 10.0,
        },
    );
    let cells = ocr.ocr_page(&page, &PageContext::detached()).await.unwrap();
    assert!(cells.is_empty());
}

// ── Health proxy ─────────────────────────────────────────────────────────

async fn health_status(config: ServiceConfig) -> (StatusCode, Duration) {
    let state = build_state(&config, StoreRegistry::new()).unwrap();
    let started = Instant::now();
    let resp = create_router(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    (resp.status(), started.elapsed())
}

#[tokio::test]
async fn health_is_503_when_backend_unreachable() {
    let config = ServiceConfig::builder()
        .inference_endpoint("http://127.0.0.1:1")
        .health_connect_timeout_ms(500)
        .build()
        .unwrap();
    let (status, elapsed) = health_status(config).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test]
async fn health_is_504_when_backend_is_slow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = ServiceConfig::builder()
        .inference_endpoint(server.uri())
        .health_timeout_ms(200)
        .build()
        .unwrap();
    let (status, _) = health_status(config).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn health_forwards_a_live_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":\"ok\"}"))
        .mount(&server)
        .await;

    let config = ServiceConfig::builder()
        .inference_endpoint(server.uri())
        .build()
        .unwrap();
    let (status, _) = health_status(config).await;
    assert_eq!(status, StatusCode::OK);
}
