//! Supervisor integration tests
//!
//! Launch real processes and probe a local HTTP server that answers with a
//! scripted sequence of status codes.

#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use galion_supervisor::{
    HealthCheck, ServiceSpec, ServiceState, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorSettings,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `script[i]` for the i-th connection; the last entry repeats.
async fn scripted_server(script: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (code, body) = script[n.min(script.len() - 1)];
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {code} Scripted\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), hits)
}

fn supervisor(log_dir: &Path) -> Supervisor {
    Supervisor::new(SupervisorSettings {
        log_dir: log_dir.to_path_buf(),
        ..SupervisorSettings::default()
    })
}

fn http_service(name: &str, url: String, retries: u32) -> ServiceSpec {
    ServiceSpec::new(name, "sleep 3", HealthCheck::http(url))
        .with_retries(retries, Duration::from_millis(20))
        .with_timeout(Duration::from_secs(2))
}

// ─── Scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_backend_and_frontend_healthy_first_try() {
    let logs = tempfile::tempdir().unwrap();
    let (backend_url, _) = scripted_server(vec![(200, "ok")]).await;
    let (frontend_url, _) = scripted_server(vec![(200, "<html></html>")]).await;

    let mut sup = supervisor(logs.path());
    sup.register(http_service("backend", format!("{backend_url}/health"), 5))
        .unwrap();
    sup.register(http_service("frontend", frontend_url, 5)).unwrap();

    let report = sup.run_all().await;
    assert_eq!(report.summary.healthy, 2);
    for name in ["backend", "frontend"] {
        let s = report.get(name).unwrap();
        assert_eq!(s.state, ServiceState::Healthy, "{name}: {}", s.detail);
        assert_eq!(s.attempts_made, 1);
        assert_eq!(s.detail, "HTTP 200");
        assert!(s.pid.is_some());
    }
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_bad_working_directory_fails_without_affecting_others() {
    let logs = tempfile::tempdir().unwrap();
    let (url, hits) = scripted_server(vec![(200, "ok")]).await;
    let missing = logs.path().join("no-such-studio-dir");

    let mut sup = supervisor(logs.path());
    sup.register(
        http_service("studio", url.clone(), 5).with_dir(&missing),
    )
    .unwrap();
    sup.register(http_service("backend", url, 5)).unwrap();

    let report = sup.run_all().await;
    let studio = report.get("studio").unwrap();
    assert_eq!(studio.state, ServiceState::Failed);
    assert_eq!(studio.attempts_made, 0);
    assert!(
        studio.detail.contains(&missing.display().to_string()),
        "{}",
        studio.detail
    );
    assert_eq!(report.get("backend").unwrap().state, ServiceState::Healthy);
    // only backend was probed
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_api_recovers_on_fifth_probe() {
    let logs = tempfile::tempdir().unwrap();
    let (url, hits) = scripted_server(vec![
        (500, ""),
        (500, ""),
        (500, ""),
        (500, ""),
        (200, "ok"),
    ])
    .await;

    let mut sup = supervisor(logs.path());
    sup.register(http_service("api", url, 5)).unwrap();

    let report = sup.run_all().await;
    let api = report.get("api").unwrap();
    assert_eq!(api.state, ServiceState::Healthy, "{}", api.detail);
    assert_eq!(api.attempts_made, 5);
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_worker_never_healthy_reports_last_status_and_log_tail() {
    let logs = tempfile::tempdir().unwrap();
    let (url, _) = scripted_server(vec![(500, "internal error")]).await;

    let mut sup = supervisor(logs.path());
    let worker = ServiceSpec::new(
        "worker",
        "sh -c 'echo worker-crashed-on-boot; sleep 3'",
        HealthCheck::http(url),
    )
    .with_retries(3, Duration::from_millis(50));
    sup.register(worker).unwrap();

    let report = sup.run_all().await;
    let w = report.get("worker").unwrap();
    assert_eq!(w.state, ServiceState::Unhealthy);
    assert_eq!(w.attempts_made, 3);
    assert!(w.detail.contains("HTTP 500"), "{}", w.detail);
    assert!(w.detail.contains("worker-crashed-on-boot"), "{}", w.detail);
    assert!(logs.path().join("worker.log").exists());
}

// ─── Probe semantics ─────────────────────────────────────────────

#[tokio::test]
async fn test_body_substring_gate() {
    let logs = tempfile::tempdir().unwrap();
    let (url, _) = scripted_server(vec![(200, "starting"), (200, "{\"status\":\"ready\"}")]).await;

    let mut sup = supervisor(logs.path());
    let spec = ServiceSpec::new(
        "kb",
        "sleep 3",
        HealthCheck::Http {
            url,
            expect_status: None,
            expect_body: Some("ready".into()),
        },
    )
    .with_retries(4, Duration::from_millis(20));
    sup.register(spec).unwrap();

    let report = sup.run_all().await;
    let kb = report.get("kb").unwrap();
    assert_eq!(kb.state, ServiceState::Healthy, "{}", kb.detail);
    assert_eq!(kb.attempts_made, 2);
}

#[tokio::test]
async fn test_connection_refused_counts_as_attempt() {
    let logs = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/health", listener.local_addr().unwrap());
    drop(listener);

    let mut sup = supervisor(logs.path());
    sup.register(http_service("billing", url.clone(), 2)).unwrap();

    let report = sup.run_all().await;
    let b = report.get("billing").unwrap();
    assert_eq!(b.state, ServiceState::Unhealthy);
    assert_eq!(b.attempts_made, 2);
    assert!(b.detail.starts_with(&format!("probe of {url} failed")), "{}", b.detail);
}

#[tokio::test]
async fn test_process_liveness_healthy() {
    let logs = tempfile::tempdir().unwrap();
    let mut sup = supervisor(logs.path());
    sup.register(
        ServiceSpec::new("voice", "sleep 3", HealthCheck::Process { name: None })
            .with_retries(3, Duration::from_millis(20)),
    )
    .unwrap();

    let report = sup.run_all().await;
    let v = report.get("voice").unwrap();
    assert_eq!(v.state, ServiceState::Healthy, "{}", v.detail);
    assert_eq!(v.attempts_made, 1);
    assert!(v.detail.contains("running"));
}

#[tokio::test]
async fn test_env_reaches_launched_process() {
    let logs = tempfile::tempdir().unwrap();
    let mut sup = supervisor(logs.path());
    sup.register(
        ServiceSpec::new(
            "flagged",
            r#"sh -c 'echo "$GALION_FLAG"; sleep 3'"#,
            HealthCheck::Process { name: None },
        )
        .with_env("GALION_FLAG", "set-by-env")
        .with_retries(3, Duration::from_millis(20)),
    )
    .unwrap();

    let report = sup.run_all().await;
    assert_eq!(report.get("flagged").unwrap().state, ServiceState::Healthy);

    let log_path = logs.path().join("flagged.log");
    let mut contents = String::new();
    for _ in 0..50 {
        contents = std::fs::read_to_string(&log_path).unwrap_or_default();
        if !contents.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(contents.trim(), "set-by-env");
}

#[tokio::test]
async fn test_missing_executable_is_failed() {
    let logs = tempfile::tempdir().unwrap();
    let mut sup = supervisor(logs.path());
    sup.register(
        ServiceSpec::new(
            "ide",
            "galion-ide-binary-that-does-not-exist",
            HealthCheck::Process { name: None },
        ),
    )
    .unwrap();

    let report = sup.run_all().await;
    let ide = report.get("ide").unwrap();
    assert_eq!(ide.state, ServiceState::Failed);
    assert_eq!(ide.attempts_made, 0);
    assert!(ide.detail.contains("not found"), "{}", ide.detail);
}

// ─── Reporting ───────────────────────────────────────────────────

#[tokio::test]
async fn test_order_preserved_under_concurrency() {
    let logs = tempfile::tempdir().unwrap();
    // slow first service finishes last, report order must not change
    let (slow, _) = scripted_server(vec![(503, ""), (503, ""), (503, ""), (200, "ok")]).await;
    let (fast, _) = scripted_server(vec![(200, "ok")]).await;

    let mut sup = supervisor(logs.path());
    sup.register(http_service("zeta", slow, 5)).unwrap();
    sup.register(http_service("alpha", fast.clone(), 5)).unwrap();
    sup.register(http_service("mid", fast, 5)).unwrap();

    let report = sup.run_all().await;
    let names: Vec<&str> = report.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    assert_eq!(report.get("zeta").unwrap().attempts_made, 4);
}

#[tokio::test]
async fn test_report_is_idempotent() {
    let logs = tempfile::tempdir().unwrap();
    let (url, hits) = scripted_server(vec![(200, "ok")]).await;

    let mut sup = supervisor(logs.path());
    sup.register(http_service("backend", url, 3)).unwrap();
    let ran = sup.run_all().await;

    let a = sup.report();
    let b = sup.report();
    assert_eq!(a, b);
    assert_eq!(a, ran);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Config file ─────────────────────────────────────────────────

#[tokio::test]
async fn test_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let (url, _) = scripted_server(vec![(204, "")]).await;
    std::fs::create_dir(dir.path().join("backend")).unwrap();
    let hcl = format!(
        r#"
supervisor {{
  log_dir = "logs"
}}

service "backend" {{
  cmd = "sleep 3"
  dir = "backend"

  health {{
    type     = "http"
    url      = "{url}/health"
    interval = "20ms"
    retries  = 3
  }}
}}

service "studio" {{
  cmd = "sleep 3"
  dir = "studio"

  health {{
    type = "process"
  }}
}}
"#
    );
    let path = dir.path().join("Supervisorfile.hcl");
    std::fs::write(&path, hcl).unwrap();

    let cfg = SupervisorConfig::from_file(&path).unwrap();
    let sup = Supervisor::from_config(&cfg).unwrap();
    let report = sup.run_all().await;

    assert_eq!(report.get("backend").unwrap().state, ServiceState::Healthy);
    assert_eq!(report.get("studio").unwrap().state, ServiceState::Failed);
    assert!(dir.path().join("logs/backend.log").exists());
    assert!(!dir.path().join("logs/studio.log").exists());
}

#[test]
fn test_duplicate_registration_surfaces_synchronously() {
    let mut sup = Supervisor::new(SupervisorSettings::default());
    sup.register(ServiceSpec::new("api", "sleep 1", HealthCheck::Process { name: None }))
        .unwrap();
    let err = sup
        .register(ServiceSpec::new("api", "sleep 2", HealthCheck::Process { name: None }))
        .unwrap_err();
    assert!(matches!(err, SupervisorError::DuplicateName(_)));
}
