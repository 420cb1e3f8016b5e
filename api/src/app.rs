use std::sync::OnceLock;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info_span, Level, Span};

use crate::{
    routes::{accounts, health, sessions, tokens},
    state::AppState,
};

const REQUEST_ID: &str = "x-request-id";

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global Prometheus recorder, installed on first call.
pub fn prometheus_handle() -> PrometheusHandle {
    METRICS
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(err) = metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %err, "metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

pub fn build_router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    prometheus_handle();

    let api = Router::new()
        .merge(tokens::router())
        .merge(accounts::router())
        .merge(sessions::router());

    let request_id = HeaderName::from_static(REQUEST_ID);
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(cors(allowed_origins));

    Router::<AppState>::new()
        .route("/", get(|| async { "portfolio aggregator" }))
        .route("/metrics", get(|| async { prometheus_handle().render() }))
        .merge(health::router())
        .nest("/api", api)
        .with_state(state)
        .layer(middleware)
}

fn cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([CONTENT_TYPE]))
        .allow_origin(AllowOrigin::list(origins))
}

/// One span per request, tagged with the route template and request id.
fn request_span(request: &Request<Body>) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or("unmatched");
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");
    info_span!(
        "http_request",
        method = %request.method(),
        route,
        uri = %request.uri(),
        request_id
    )
}
