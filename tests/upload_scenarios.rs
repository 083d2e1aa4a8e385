use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{post, put},
};
use media_upload::config::{HttpConfig, PreSignConfig};
use media_upload::uploader::client::http_client;
use media_upload::uploader::{
    DirectUploadStrategy, TransferOutcome, UploadCoordinator, UploadError,
};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const OBJECT_URL: &str = "https://cdn/x";
const TOKEN: &str = "token-123";

#[derive(Clone, Copy)]
enum PresignReply {
    Signed,
    EmptySignedUrl,
    MissingDestination,
    // signs a URL whose handler never reads the body
    Stalled,
    Status(StatusCode),
}

/// Stands in for both the application server and the signed-URL endpoint
struct MockServer {
    presign_reply: PresignReply,
    put_status: StatusCode,
    base_url: OnceLock<String>,
    presign_hits: AtomicUsize,
    put_hits: AtomicUsize,
    authorization: Mutex<Option<String>>,
    accept: Mutex<Option<String>>,
    content_length: Mutex<Option<String>>,
    received: Mutex<Vec<u8>>,
}

impl MockServer {
    async fn start(presign_reply: PresignReply, put_status: StatusCode) -> Arc<Self> {
        let mock = Arc::new(Self {
            presign_reply,
            put_status,
            base_url: OnceLock::new(),
            presign_hits: AtomicUsize::new(0),
            put_hits: AtomicUsize::new(0),
            authorization: Mutex::new(None),
            accept: Mutex::new(None),
            content_length: Mutex::new(None),
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/presign", post(presign))
            .route("/signed", put(signed_put))
            .route("/stalled", put(stalled_put))
            .with_state(Arc::clone(&mock));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        mock.base_url.set(format!("http://{}", addr)).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        mock
    }

    fn api_url(&self) -> String {
        format!("{}/presign", self.base_url.get().unwrap())
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

async fn presign(State(mock): State<Arc<MockServer>>, headers: HeaderMap) -> impl IntoResponse {
    mock.presign_hits.fetch_add(1, Ordering::SeqCst);
    *mock.authorization.lock().unwrap() = header_value(&headers, header::AUTHORIZATION);
    *mock.accept.lock().unwrap() = header_value(&headers, header::ACCEPT);

    let signed_url = format!("{}/signed", mock.base_url.get().unwrap());
    let (status, body) = match mock.presign_reply {
        PresignReply::Signed => (
            StatusCode::OK,
            format!(
                r#"{{"destinationUrl":"{}","signedUrl":"{}"}}"#,
                OBJECT_URL, signed_url
            ),
        ),
        PresignReply::EmptySignedUrl => (
            StatusCode::OK,
            format!(r#"{{"destinationUrl":"{}","signedUrl":""}}"#, OBJECT_URL),
        ),
        PresignReply::MissingDestination => {
            (StatusCode::OK, format!(r#"{{"signedUrl":"{}"}}"#, signed_url))
        }
        PresignReply::Stalled => (
            StatusCode::OK,
            format!(
                r#"{{"destinationUrl":"{}","signedUrl":"{}/stalled"}}"#,
                OBJECT_URL,
                mock.base_url.get().unwrap()
            ),
        ),
        PresignReply::Status(status) => (status, "token expired".to_string()),
    };
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}

async fn signed_put(
    State(mock): State<Arc<MockServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    mock.put_hits.fetch_add(1, Ordering::SeqCst);
    *mock.content_length.lock().unwrap() = header_value(&headers, header::CONTENT_LENGTH);
    mock.received.lock().unwrap().extend_from_slice(&body);
    mock.put_status
}

async fn stalled_put(State(mock): State<Arc<MockServer>>) -> StatusCode {
    mock.put_hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    StatusCode::OK
}

fn coordinator(api_url: String) -> UploadCoordinator {
    let client = http_client(&HttpConfig::default()).unwrap();
    UploadCoordinator::from_parts(
        Some((
            DirectUploadStrategy::new(client),
            PreSignConfig {
                api_url,
                access_token: TOKEN.to_string(),
            },
        )),
        None,
    )
}

fn media_file(len: usize) -> (NamedTempFile, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    (file, data)
}

async fn upload(coordinator: &UploadCoordinator, file: &NamedTempFile) -> Vec<TransferOutcome> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = coordinator.upload_pre_signed(file.path(), Arc::new(tx));
    handle.join().await.unwrap();
    collect(rx).await
}

async fn collect(mut rx: mpsc::UnboundedReceiver<TransferOutcome>) -> Vec<TransferOutcome> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

fn progress_of(events: &[TransferOutcome]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|ev| match ev {
            TransferOutcome::InProgress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

fn assert_single_terminal_last(events: &[TransferOutcome]) {
    let terminals = events.iter().filter(|ev| ev.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {:?}", events);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_direct_upload_completes_with_destination_url() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::OK).await;
    let (file, data) = media_file(1000);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_single_terminal_last(&events);
    let progress = progress_of(&events);
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert!(matches!(events.last(), Some(TransferOutcome::Completed(url)) if url == OBJECT_URL));

    assert_eq!(*mock.received.lock().unwrap(), data);
    assert_eq!(mock.content_length.lock().unwrap().as_deref(), Some("1000"));
    assert_eq!(
        mock.authorization.lock().unwrap().as_deref(),
        Some("Bearer token-123")
    );
    assert_eq!(
        mock.accept.lock().unwrap().as_deref(),
        Some("application/json")
    );
    assert_eq!(mock.presign_hits.load(Ordering::SeqCst), 1);
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_large_file_progress_is_monotonic() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::OK).await;
    let (file, data) = media_file(256 * 1024);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_single_terminal_last(&events);
    let progress = progress_of(&events);
    assert!(progress.len() > 1);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.iter().all(|p| *p <= 100));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(mock.received.lock().unwrap().len(), data.len());
}

#[tokio::test]
async fn test_rejected_put_fails_with_status() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::FORBIDDEN).await;
    let (file, _) = media_file(1000);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_single_terminal_last(&events);
    match events.last() {
        Some(TransferOutcome::Failed(err @ UploadError::ServerRejection { .. })) => {
            assert_eq!(err.status(), Some(403))
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_signed_url_skips_put() {
    let mock = MockServer::start(PresignReply::EmptySignedUrl, StatusCode::OK).await;
    let (file, _) = media_file(1000);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        TransferOutcome::Failed(UploadError::PreSign { .. })
    ));
    assert_eq!(mock.presign_hits.load(Ordering::SeqCst), 1);
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_destination_url_skips_put() {
    let mock = MockServer::start(PresignReply::MissingDestination, StatusCode::OK).await;
    let (file, _) = media_file(1000);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_eq!(events.len(), 1, "events: {:?}", events);
    assert!(matches!(
        events[0],
        TransferOutcome::Failed(UploadError::PreSign { .. })
    ));
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_stops_direct_upload_and_releases_listener() {
    let mock = MockServer::start(PresignReply::Stalled, StatusCode::OK).await;
    let (file, _) = media_file(4 * 1024 * 1024);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = coordinator(mock.api_url()).upload_pre_signed(file.path(), Arc::new(tx));

    let first = rx.recv().await;
    assert!(matches!(first, Some(TransferOutcome::InProgress(_))), "{:?}", first);
    handle.cancel();
    handle.join().await.unwrap();

    // the channel only closes once nothing holds the listener any more
    let events = timeout(Duration::from_secs(5), collect(rx))
        .await
        .expect("listener still referenced after join");
    assert_single_terminal_last(&events);
    assert!(matches!(
        events.last(),
        Some(TransferOutcome::Failed(UploadError::Canceled))
    ));
}

#[tokio::test]
async fn test_presign_rejection_carries_status() {
    let reply = PresignReply::Status(StatusCode::UNAUTHORIZED);
    let mock = MockServer::start(reply, StatusCode::OK).await;
    let (file, _) = media_file(1000);

    let events = upload(&coordinator(mock.api_url()), &file).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        TransferOutcome::Failed(err @ UploadError::PreSign { .. }) => {
            assert_eq!(err.status(), Some(401));
            assert!(err.to_string().contains("token expired"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_presign_transport_failure() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::OK).await;
    // grab a free port and close it so the pre-sign call is refused
    let closed: SocketAddr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (file, _) = media_file(1000);

    let events = upload(&coordinator(format!("http://{}/presign", closed)), &file).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        TransferOutcome::Failed(UploadError::Transport(_))
    ));
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_file_fails_after_presign() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::OK).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = coordinator(mock.api_url())
        .upload_pre_signed("/definitely/not/here.mp4", Arc::new(tx));
    handle.join().await.unwrap();

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, TransferOutcome::Failed(UploadError::Io(_))));
    assert!(rx.recv().await.is_none());
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_uploads_are_independent() {
    let mock = MockServer::start(PresignReply::Signed, StatusCode::OK).await;
    let coordinator = coordinator(mock.api_url());
    let (first, _) = media_file(4000);
    let (second, _) = media_file(9000);

    let (a, b) = tokio::join!(upload(&coordinator, &first), upload(&coordinator, &second));

    for events in [&a, &b] {
        assert_single_terminal_last(events);
        assert!(matches!(events.last(), Some(TransferOutcome::Completed(_))));
    }
    assert_eq!(mock.put_hits.load(Ordering::SeqCst), 2);
    assert_eq!(mock.received.lock().unwrap().len(), 13_000);
}
