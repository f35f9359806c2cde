use crate::errors::AggregatorError;
use crate::metrics_defs::REQUEST_DURATION;
use crate::pipeline::{Aggregator, RequestContext};
use http::header::{CONTENT_TYPE, HeaderValue};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{
    ResponseBody, apply_cors, full_body, make_error_response, make_json_error_response,
};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Query parameters in the order they map onto [`RequestContext`]
const PARAMS: [&str; 4] = ["target0", "target1", "target2", "target3"];

const INTERNAL_ERROR: &str = "Internal Server Error";

/// The aggregation endpoint.
///
/// Only `GET` on the configured path aggregates. `OPTIONS` is answered with
/// an empty 200 for CORS preflights, every response carries the CORS headers.
#[derive(Clone)]
pub struct AggregatorService {
    aggregator: Aggregator,
    path: Arc<str>,
}

impl AggregatorService {
    pub fn new(aggregator: Aggregator, path: &str) -> Self {
        Self {
            aggregator,
            path: Arc::from(path),
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody> {
        let started = Instant::now();
        let mut response = self.route(request).await;
        apply_cors(response.headers_mut());

        shared::histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_string())
            .record(started.elapsed().as_secs_f64());

        response
    }

    async fn route<B>(&self, request: Request<B>) -> Response<ResponseBody> {
        if request.uri().path() != &*self.path {
            return make_error_response(StatusCode::NOT_FOUND);
        }

        match *request.method() {
            Method::OPTIONS => return Response::new(shared::http::empty_body()),
            Method::GET => {}
            _ => return make_error_response(StatusCode::METHOD_NOT_ALLOWED),
        }

        let context = match parse_query(request.uri().query()) {
            Ok(context) => context,
            Err(missing) => {
                tracing::debug!(?missing, "Rejected request with missing parameters");
                return make_json_error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Missing required query parameters: {}", missing.join(", ")),
                );
            }
        };

        match self.aggregator.respond(&context).await {
            Ok(assembled) => {
                let mut response = Response::new(full_body(assembled.body));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(assembled.content_type));
                response
            }
            Err(e @ AggregatorError::DependentStageFailed { source_name }) => {
                tracing::error!(source = source_name, "{}", e);
                make_json_error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "Error handling request");
                make_json_error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
            }
        }
    }
}

/// Extracts the four identifiers, or the names of the absent or empty ones.
fn parse_query(query: Option<&str>) -> Result<RequestContext, Vec<&'static str>> {
    let mut values: [Option<String>; 4] = Default::default();

    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        if let Some(position) = PARAMS.iter().position(|name| *name == key) {
            // The first occurrence of a repeated parameter wins
            if values[position].is_none() && !value.is_empty() {
                values[position] = Some(value.into_owned());
            }
        }
    }

    let missing: Vec<_> = PARAMS
        .iter()
        .zip(values.iter())
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }

    let [location_id, object_id, coordinates, bbox] = values.map(Option::unwrap_or_default);
    Ok(RequestContext {
        location_id,
        object_id,
        coordinates,
        bbox,
    })
}

impl Service<Request<Incoming>> for AggregatorService {
    type Response = Response<ResponseBody>;
    type Error = AggregatorError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use crate::testutils::{MockReply, MockUpstream, start_mock_upstream, test_config};
    use http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
    use http_body_util::BodyExt;
    use serde_json::{Value as JsonValue, json};

    const FULL_QUERY: &str =
        "target0=adr-1&target1=A1&target2=100000%2C400000&target3=99990%2C399990%2C100010%2C400010";

    fn service(upstream: &MockUpstream, mode: ResponseMode) -> AggregatorService {
        let mut config = test_config(upstream);
        config.response_mode = mode;
        let aggregator = Aggregator::new(&config, config.auth.resolve()).unwrap();
        AggregatorService::new(aggregator, &config.path)
    }

    fn get(uri: &str) -> Request<String> {
        Request::builder().uri(uri).body(String::new()).unwrap()
    }

    async fn body_string(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn healthy_upstream(request: &crate::testutils::RecordedRequest) -> MockReply {
        match request.query_param("typeName").as_deref() {
            Some("bag:pand") => MockReply::json(json!({"features": [
                {"geometry": {"type": "Point"}, "properties": {"identificatie": "B1"}}
            ]})),
            Some("bag:verblijfsobject") => MockReply::json(json!({"features": [
                {"properties": {"identificatie": "A1", "pandidentificatie": "B1"}}
            ]})),
            _ if request.path() == "/proxy"
                && request
                    .query_param("url")
                    .unwrap_or_default()
                    .contains("woningtype") =>
            {
                MockReply::text("<xml/>")
            }
            _ => MockReply::json(json!({"ok": true})),
        }
    }

    #[tokio::test]
    async fn test_missing_parameters_are_rejected_without_upstream_calls() {
        let upstream = start_mock_upstream(healthy_upstream).await;
        let service = service(&upstream, ResponseMode::Multipart);

        for missing in PARAMS {
            let query: Vec<_> = FULL_QUERY
                .split('&')
                .filter(|pair| !pair.starts_with(&format!("{missing}=")))
                .collect();
            let response = service
                .handle(get(&format!("/api/get?{}", query.join("&"))))
                .await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
                "*"
            );
            let body: JsonValue = serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(
                body,
                json!({"error": format!("Missing required query parameters: {missing}")})
            );
        }

        let response = service.handle(get("/api/get?target0=&target2=1,2")).await;
        let body: JsonValue = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body["error"],
            "Missing required query parameters: target0, target1, target3"
        );

        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn test_options_not_found_and_method_not_allowed() {
        let upstream = start_mock_upstream(healthy_upstream).await;
        let service = service(&upstream, ResponseMode::Multipart);

        let options = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/get")
            .body(String::new())
            .unwrap();
        let response = service.handle(options).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));

        let response = service.handle(get("/elsewhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));

        let post = Request::builder()
            .method(Method::POST)
            .uri("/api/get")
            .body(String::new())
            .unwrap();
        assert_eq!(
            service.handle(post).await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );

        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn test_successful_multipart_response() {
        let upstream = start_mock_upstream(healthy_upstream).await;
        let service = service(&upstream, ResponseMode::Multipart);

        let response = service.handle(get(&format!("/api/get?{FULL_QUERY}"))).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "multipart/mixed; boundary=\"geofuse-boundary\""
        );
        let body = body_string(response).await;
        assert!(body.starts_with("--geofuse-boundary\r\n"));
        assert!(body.contains("<xml/>"));
        assert!(body.ends_with("--geofuse-boundary--\r\n"));
    }

    #[tokio::test]
    async fn test_successful_json_response() {
        let upstream = start_mock_upstream(healthy_upstream).await;
        let service = service(&upstream, ResponseMode::Json);

        let response = service.handle(get(&format!("/api/get?{FULL_QUERY}"))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let raw = body_string(response).await;
        let positions: Vec<_> = ["LOOKUP", "EPON", "NETB", "KADAS", "OBJECT", "NATLAB", "MERGED"]
            .iter()
            .map(|key| raw.find(&format!("\"{key}\":")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        let body: JsonValue = serde_json::from_str(&raw).unwrap();
        assert!(body.get("CBS").is_none());
        assert_eq!(body["MERGED"][0]["additionalData"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_dependent_stage_failure_is_500() {
        let upstream = start_mock_upstream(|request| {
            if request.path() == "/kadaster/wms" {
                MockReply::status(StatusCode::SERVICE_UNAVAILABLE)
            } else {
                healthy_upstream(request)
            }
        })
        .await;
        let service = service(&upstream, ResponseMode::Multipart);

        let response = service.handle(get(&format!("/api/get?{FULL_QUERY}"))).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: JsonValue = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body,
            json!({"error": "Error fetching data from the bbox or WFS API"})
        );
        // The radius searches never run once the cadastral lookup failed
        assert!(
            upstream
                .requests()
                .iter()
                .all(|r| r.query_param("typeName").as_deref() != Some("bag:pand"))
        );
    }

    #[test]
    fn test_parse_query() {
        let context = parse_query(Some(
            "target1=A%201&target0=x&target2=1,2&target3=a&target0=ignored&other=1",
        ))
        .unwrap();
        assert_eq!(
            context,
            RequestContext {
                location_id: "x".into(),
                object_id: "A 1".into(),
                coordinates: "1,2".into(),
                bbox: "a".into(),
            }
        );

        assert_eq!(parse_query(None).unwrap_err(), PARAMS.to_vec());
    }
}
