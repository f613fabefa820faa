use avast_scan::function::config::Settings;
use avast_scan::function::runner::FakeRunner;
use avast_scan::function::scanner::SCAN_FLAGS;
use avast_scan::function::service::router;
use avast_scan::function::{AvastReport, ScanError, Scanner};
use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "avast-test-boundary";

/// 扫描输出由上传内容决定:
/// `clean` -> [OK], `garbage` -> 无法解析, `hang` -> 超时, 其余内容作为检测名
fn content_runner(seen: Arc<Mutex<Vec<PathBuf>>>) -> FakeRunner {
    FakeRunner::new(move |inv| {
        match inv.args.first().map(String::as_str) {
            Some("-v") => return Ok("2.1.2\n".into()),
            Some("-V") => return Ok("17101904\n".into()),
            Some(SCAN_FLAGS) => {}
            _ => return Ok(String::new()),
        }

        let path = PathBuf::from(&inv.args[1]);
        seen.lock().unwrap().push(path.clone());
        let content = std::fs::read_to_string(&path)?;
        match content.as_str() {
            "clean" => Ok(format!("{}\t[OK]\n", path.display())),
            "garbage" => Ok("scan: internal error".into()),
            "hang" => Err(ScanError::Timeout(inv.command_line())),
            label => Ok(format!("{}\t{}\n", path.display(), label)),
        }
    })
}

struct Harness {
    app: Router,
    runner: FakeRunner,
    seen: Arc<Mutex<Vec<PathBuf>>>,
    scratch: TempDir,
    _marker_dir: TempDir,
}

fn harness() -> Harness {
    let scratch = TempDir::new().unwrap();
    let marker_dir = TempDir::new().unwrap();

    let mut settings = Settings::default();
    settings.web.scratch_dir = scratch.path().to_path_buf();
    settings.tools.updated_marker = marker_dir.path().join("UPDATED");
    settings.build.build_time = "Thu, 19 Oct 2017 22:13:01 +0000".into();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let runner = content_runner(seen.clone());
    let scanner = Scanner::new(Arc::new(runner.clone()), Arc::new(settings));

    Harness {
        app: router(scanner),
        runner,
        seen,
        scratch,
        _marker_dir: marker_dir,
    }
}

fn upload(field: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"sample.bin\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .unwrap();
    body.extend_from_slice(content);
    write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();

    Request::builder()
        .method("POST")
        .uri("/scan")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn scratch_is_empty(h: &Harness) -> bool {
    std::fs::read_dir(h.scratch.path()).unwrap().next().is_none()
}

fn uploads_removed(h: &Harness) -> bool {
    h.seen.lock().unwrap().iter().all(|p| !p.exists())
}

#[tokio::test]
async fn infected_upload_returns_report() {
    let h = harness();
    let response = h.app.clone().oneshot(upload("malware", b"EICAR Test-NOT virus!!!")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json")
    );

    let report: AvastReport = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(report.avast.infected);
    assert_eq!(report.avast.result, "EICAR Test-NOT virus!!!");
    assert_eq!(report.avast.engine, "2.1.2");
    assert_eq!(report.avast.database, "17101904");
    assert_eq!(report.avast.updated, "20171019");

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with(h.scratch.path()));
    assert!(seen[0].file_name().unwrap().to_string_lossy().starts_with("web_"));
    assert!(uploads_removed(&h));
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn clean_upload() {
    let h = harness();
    let response = h.app.clone().oneshot(upload("malware", b"clean")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: AvastReport = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(!report.avast.infected);
    assert_eq!(report.avast.result, "");
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn missing_field_is_bad_request() {
    let h = harness();
    let response = h.app.clone().oneshot(upload("document", b"clean")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Please supply a valid file to scan."));
    assert!(h.runner.calls().is_empty());
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn non_multipart_body_is_bad_request() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/scan")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn get_is_not_allowed() {
    let h = harness();
    let request = Request::builder().uri("/scan").body(Body::empty()).unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unparseable_output_retries_then_fails_and_cleans_up() {
    let h = harness();
    let response = h.app.clone().oneshot(upload("malware", b"garbage")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(h.runner.count("scan", SCAN_FLAGS), 2);
    assert!(uploads_removed(&h));
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn process_timeout_cleans_up() {
    let h = harness();
    let response = h.app.clone().oneshot(upload("malware", b"hang")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(h.runner.count("scan", SCAN_FLAGS), 1);
    assert!(uploads_removed(&h));
    assert!(scratch_is_empty(&h));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_keep_their_own_results() {
    let h = harness();

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let app = h.app.clone();
            tokio::spawn(async move {
                let label = format!("Win32:Sample-{i}");
                let response = app.oneshot(upload("malware", label.as_bytes())).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                let report: AvastReport = serde_json::from_str(&body_text(response).await).unwrap();
                (label, report)
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        let (label, report) = task.unwrap();
        assert!(report.avast.infected);
        assert_eq!(report.avast.result, label);
    }

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 10);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10, "每个请求都应该有独立的临时文件");
    assert!(uploads_removed(&h));
    assert!(scratch_is_empty(&h));
}
