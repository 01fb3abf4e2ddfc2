use candle_feed::{
    config::ApiConfig,
    error::FetchError,
    history::{HistoryLoader, HistoryOutcome, HistoryWindow, HttpHistoryLoader},
    indicator::{HttpIndicatorSource, IndicatorSource},
    model::{Candle, Symbol, Timeframe},
};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/// Serve exactly one HTTP response, resolving to the request line that was received.
async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buffer = [0_u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut buffer).await.unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&buffer[..read]);
        }

        let response = format!(
            "HTTP/1.1 {status} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        String::from_utf8_lossy(&request)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    });

    (base_url, task)
}

fn window() -> HistoryWindow {
    HistoryWindow::lookback(
        Timeframe::M1,
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn test_history_loader_requests_bounded_window() {
    let (base_url, server) = serve_once(
        200,
        r#"[
            {"timestamp":"2024-01-01T00:01:00Z","open":"101","high":"102","low":"100","close":"101.5","volume":"2"},
            {"timestamp":"2024-01-01T00:00:00Z","open":"100","high":"101","low":"99","close":"101","volume":"1"}
        ]"#,
    )
    .await;

    let loader = HttpHistoryLoader::new(ApiConfig::new(base_url));
    let outcome = loader
        .load(&Symbol::new("btc"), Timeframe::M1, window())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        HistoryOutcome::Loaded(vec![
            Candle::new(1_704_067_200, dec!(100), dec!(101), dec!(99), dec!(101), dec!(1)),
            Candle::new(1_704_067_260, dec!(101), dec!(102), dec!(100), dec!(101.5), dec!(2)),
        ])
    );

    let request_line = server.await.unwrap();
    assert!(request_line.starts_with("GET /api/market/candles/coinbase/BTC-USD?"));
    assert!(request_line.contains("start=2024-01-01T00%3A00%3A00Z"));
    assert!(request_line.contains("end=2024-01-02T00%3A00%3A00Z"));
    assert!(request_line.contains("timeframe=1m"));
    assert!(request_line.contains("max_points=2000"));
}

#[tokio::test]
async fn test_history_loader_response_shapes() {
    struct TestCase {
        status: u16,
        body: &'static str,
        expected: Result<HistoryOutcome, FetchError>,
    }

    let candle = Candle::new(1_704_067_200, dec!(1), dec!(1), dec!(1), dec!(1), dec!(0));

    let tests = vec![
        TestCase {
            // TC0: wrapped under candles, numeric fields, epoch seconds
            status: 200,
            body: r#"{"candles":[{"timestamp":1704067200,"open":1,"high":1,"low":1,"close":1,"volume":0}]}"#,
            expected: Ok(HistoryOutcome::Loaded(vec![candle])),
        },
        TestCase {
            // TC1: wrapped under data
            status: 200,
            body: r#"{"data":[{"timestamp":"2024-01-01T00:00:00Z","open":1,"high":1,"low":1,"close":1}]}"#,
            expected: Ok(HistoryOutcome::Loaded(vec![candle])),
        },
        TestCase {
            // TC2: empty array is no data
            status: 200,
            body: "[]",
            expected: Ok(HistoryOutcome::NoData),
        },
        TestCase {
            // TC3: only invalid rows is no data
            status: 200,
            body: r#"[{"timestamp":1704067200,"open":1,"high":0.5,"low":1,"close":1,"volume":1}]"#,
            expected: Ok(HistoryOutcome::NoData),
        },
        TestCase {
            // TC4: server error
            status: 500,
            body: r#"{"detail":"boom"}"#,
            expected: Err(FetchError::Status(500)),
        },
        TestCase {
            // TC5: not found
            status: 404,
            body: r#"{"detail":"Not Found"}"#,
            expected: Err(FetchError::Status(404)),
        },
        TestCase {
            // TC6: object without rows
            status: 200,
            body: r#"{"detail":"nothing here"}"#,
            expected: Err(FetchError::Decode("expected an array of candles".to_string())),
        },
    ];

    for (index, test) in tests.into_iter().enumerate() {
        let (base_url, server) = serve_once(test.status, test.body).await;
        let loader = HttpHistoryLoader::new(ApiConfig::new(base_url));

        let actual = loader.load(&Symbol::new("btc"), Timeframe::M1, window()).await;
        assert_eq!(actual, test.expected, "TC{} failed", index);

        server.await.unwrap();
    }
}

#[tokio::test]
async fn test_history_loader_undecodable_body() {
    let (base_url, server) = serve_once(200, "<html>oops</html>").await;
    let loader = HttpHistoryLoader::new(ApiConfig::new(base_url));

    let actual = loader.load(&Symbol::new("btc"), Timeframe::M1, window()).await;
    assert!(matches!(actual, Err(FetchError::Decode(_))), "{actual:?}");

    server.await.unwrap();
}

#[tokio::test]
async fn test_history_loader_unreachable_backend_is_retryable() {
    // Bind then release a port so nothing is listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    drop(listener);

    let loader = HttpHistoryLoader::new(ApiConfig::new(base_url));
    let error = loader
        .load(&Symbol::new("btc"), Timeframe::M1, window())
        .await
        .unwrap_err();

    assert!(matches!(error, FetchError::Request(_)), "{error:?}");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_indicator_source_polls_analysis() {
    let (base_url, server) = serve_once(
        200,
        r#"[
            {"timestamp":"2024-01-01T00:00:00","rsi":55.2,"macd":null,"macdsignal":0.4,"macdhist":-0.1},
            {"timestamp":"2024-01-01T00:01:00","rsi":57.0,"macd":1.1,"macdsignal":0.5,"macdhist":0.6}
        ]"#,
    )
    .await;

    let source = HttpIndicatorSource::new(ApiConfig::new(base_url));
    let points = source.poll(&Symbol::new("btc")).await.unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].time, 1_704_067_200);
    assert_eq!(points[0].values.get("rsi"), Some(&55.2));
    assert_eq!(points[0].values.get("macd"), None);
    assert_eq!(points[1].values.len(), 4);

    let request_line = server.await.unwrap();
    assert!(request_line.starts_with("GET /api/coin/BTC-USD/analysis "));
}

#[tokio::test]
async fn test_indicator_source_failures() {
    let (base_url, server) = serve_once(503, "").await;
    let source = HttpIndicatorSource::new(ApiConfig::new(base_url));

    let error = source.poll(&Symbol::new("eth")).await.unwrap_err();
    assert_eq!(error, FetchError::Status(503));
    assert!(error.is_retryable());
    server.await.unwrap();

    // Unexpected shapes are treated as no indicators
    let (base_url, server) = serve_once(200, r#"{"detail":"unknown symbol"}"#).await;
    let source = HttpIndicatorSource::new(ApiConfig::new(base_url));
    assert_eq!(source.poll(&Symbol::new("eth")).await.unwrap(), vec![]);
    server.await.unwrap();
}
