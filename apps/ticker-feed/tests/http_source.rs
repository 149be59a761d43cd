//! HTTP Polling Source Integration Tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rust_decimal::Decimal;
use ticker_feed::{FetchError, HttpTickerSource, TickerSource};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRICES_PATH: &str = "/api/v1/prices";

async fn source_for(server: &MockServer) -> HttpTickerSource {
    HttpTickerSource::new(
        format!("{}{PRICES_PATH}", server.uri()),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn fetches_a_bare_ticker_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"symbol": "btcusdt", "price": 67500.5, "change_24h": 2.5,
             "volume_24h": 1000, "high_24h": 68000, "low_24h": 66000},
            {"symbol": "ETHUSDT", "price": "3450", "change_24h": "-1.2",
             "volume_24h": "500", "high_24h": "3500", "low_24h": "3400"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let tickers = source_for(&server).await.fetch().await.unwrap();

    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0].symbol, "BTCUSDT");
    assert_eq!(tickers[0].price, Decimal::new(675_005, 1));
    assert_eq!(tickers[1].change_24h, Decimal::new(-12, 1));
}

#[tokio::test]
async fn fetches_an_enveloped_ticker_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"symbol": "SOLUSDT", "price": 145, "change24h": 5.8,
                 "volume24h": 2500, "high24h": 150, "low24h": 138}
            ]
        })))
        .mount(&server)
        .await;

    let tickers = source_for(&server).await.fetch().await.unwrap();

    assert_eq!(tickers.len(), 1);
    assert_eq!(tickers[0].symbol, "SOLUSDT");
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = source_for(&server).await.fetch().await.unwrap_err();
    assert_eq!(err, FetchError::Status { status: 503 });
}

#[tokio::test]
async fn undecodable_body_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = source_for(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidBody(_)));
}

#[tokio::test]
async fn negative_price_rejects_the_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"symbol": "BTCUSDT", "price": -1, "change_24h": 0,
             "volume_24h": 0, "high_24h": 0, "low_24h": 0}
        ])))
        .mount(&server)
        .await;

    let err = source_for(&server).await.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidBody(_)));
}

#[tokio::test]
async fn slow_endpoint_times_out_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PRICES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let source = HttpTickerSource::new(
        format!("{}{PRICES_PATH}", server.uri()),
        Duration::from_millis(200),
    )
    .unwrap();
    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source =
        HttpTickerSource::new(format!("http://{addr}{PRICES_PATH}"), Duration::from_secs(2))
            .unwrap();
    let err = source.fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
}
