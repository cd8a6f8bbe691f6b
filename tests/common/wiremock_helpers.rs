use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rormatch::config::AppConfig;

use super::fixtures::load_json_fixture;

pub const REGISTRY_PATH: &str = "/organizations";
pub const FUNDER_PATH: &str = "/funders";

/// Embedded default config pointed at a mock server, without throttling or backoff delays
pub fn config_for(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::embedded().expect("embedded config should be valid");
    config.registry.base_url = format!("{}{}", server.uri(), REGISTRY_PATH);
    config.funder.base_url = format!("{}{}", server.uri(), FUNDER_PATH);
    config.http.max_retries = 0;
    config.http.backoff_base_delay_ms = 1;
    config.http.backoff_max_delay_ms = 5;
    config.http.request_timeout_secs = 5;
    config.analysis.dns_queries_per_second = 0;
    config.analysis.whois_queries_per_second = 0;
    config.analysis.http_requests_per_second = 0;
    config
}

/// Answer one registry query with the given search response body
pub async fn mock_registry_query(server: &MockServer, query: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(REGISTRY_PATH))
        .and(query_param("query.advanced", query))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answer one registry query from a JSON fixture file
pub async fn mock_registry_fixture(server: &MockServer, query: &str, fixture: &str) {
    mock_registry_query(server, query, load_json_fixture(fixture)).await;
}

/// Fail one registry query with an HTTP status
pub async fn mock_registry_error(server: &MockServer, query: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(REGISTRY_PATH))
        .and(query_param("query.advanced", query))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Empty search response for every query without a more specific mock
pub async fn mock_registry_empty_fallback(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(REGISTRY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(load_json_fixture::<Value>("ror/empty.json")))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Serve funder metadata for one id
pub async fn mock_funder(server: &MockServer, funder_id: &str, fixture: &str) {
    Mock::given(method("GET"))
        .and(path(format!("{}/{}", FUNDER_PATH, funder_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(load_json_fixture::<Value>(fixture)))
        .mount(server)
        .await;
}
