use crate::config::{Config, Upstreams};
use http::{HeaderMap, StatusCode, Uri};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value as JsonValue;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

/// A request as seen by a mock upstream.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// Zero-based arrival index
    pub index: usize,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Decoded value of a query parameter, matched case-insensitively
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.into_owned())
    }
}

pub struct MockReply {
    status: StatusCode,
    body: String,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(value: JsonValue) -> Self {
        Self {
            status: StatusCode::OK,
            body: value.to_string(),
            delay: None,
        }
    }

    pub fn text(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: String::new(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Handle to a running mock upstream.
pub struct MockUpstream {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    pub fn url(&self, path_and_query: &str) -> Url {
        Url::parse(&format!("http://127.0.0.1:{}{}", self.port, path_and_query)).unwrap()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose path starts with `prefix`
    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path().starts_with(prefix))
            .collect()
    }
}

/// Start a mock HTTP server that answers every request through `respond`
pub async fn start_mock_upstream<F>(respond: F) -> MockUpstream
where
    F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let respond = respond.clone();
            let recorded = recorded.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let respond = respond.clone();
                    let recorded = recorded.clone();
                    async move {
                        let reply = {
                            let mut log = recorded.lock().unwrap();
                            let request = RecordedRequest {
                                index: log.len(),
                                uri: req.uri().clone(),
                                headers: req.headers().clone(),
                            };
                            let reply = respond(&request);
                            log.push(request);
                            reply
                        };

                        if let Some(delay) = reply.delay {
                            tokio::time::sleep(delay).await;
                        }

                        let mut response = Response::new(Full::new(Bytes::from(reply.body)));
                        *response.status_mut() = reply.status;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    MockUpstream { port, requests }
}

/// A local port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Config whose upstreams all point at `mock`, one path prefix per source
pub fn test_config(mock: &MockUpstream) -> Config {
    let upstreams = Upstreams {
        locatieserver: mock.url("/lookup"),
        ep_online: mock.url("/ep-online/AdresseerbaarObject"),
        polygonentool: mock.url("/polygonentool/wfs"),
        bag_wfs: mock.url("/bag/wfs"),
        kadaster_wms: mock.url("/kadaster/wms"),
        forward_proxy: mock.url("/proxy"),
        woningtype_wms: mock.url("/woningtype"),
        national_label: Some(mock.url("/natlab/adrescheck.json")),
        statistics: None,
    };

    let mut config: Config = serde_yaml::from_str(
        r#"
listener: {host: "127.0.0.1", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
timeouts: {http_timeout_secs: 5}
xml_retry: {retries: 2, delay_ms: 10}
auth: {token: "test-token"}
"#,
    )
    .unwrap();
    config.upstreams = upstreams;
    config
}

/// Log output captured by [`capture_logs`]
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Routes this thread's tracing events into a buffer until the guard drops
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
