use candle_feed::{
    config::{FeedConfig, ReconnectPolicy},
    feed::{ConnectionState, FeedSubscription, TickSource},
    model::{Side, Symbol},
};
use futures::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

const SUBSCRIBE_BTC: &str =
    r#"{"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}"#;

fn ticker(price: &str, time: &str) -> Message {
    Message::text(format!(
        r#"{{"type":"ticker","product_id":"BTC-USD","price":"{price}","last_size":"0.5","side":"buy","time":"{time}","high_24h":"43000","low_24h":"41000","volume_24h":"1234.5"}}"#
    ))
}

fn fast_config(url: String) -> FeedConfig {
    FeedConfig::new(url).with_reconnect(ReconnectPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(100),
        multiplier: 2,
    })
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut websocket = accept_async(stream).await.unwrap();

    let subscribe = websocket.next().await.unwrap().unwrap();
    let subscribe = subscribe.to_text().unwrap().to_owned();

    (websocket, subscribe)
}

#[tokio::test]
async fn test_tick_source_subscribes_and_forwards_ticks() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, mut rx) = mpsc::channel(16);
    let source = TickSource::subscribe(fast_config(url), Symbol::new("btc"), tx);
    let mut state = source.state();

    let (mut websocket, subscribe) = timeout(WAIT, accept(&listener)).await.unwrap();
    assert_eq!(subscribe, SUBSCRIBE_BTC);

    timeout(WAIT, state.wait_for(|state| *state == ConnectionState::Subscribed))
        .await
        .unwrap()
        .unwrap();

    websocket
        .send(Message::text(
            r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#,
        ))
        .await
        .unwrap();
    websocket
        .send(ticker("42000.5", "2024-01-01T00:00:30Z"))
        .await
        .unwrap();
    // Malformed & unrelated frames are dropped without affecting the connection
    websocket.send(Message::text("garbage")).await.unwrap();
    websocket
        .send(Message::text(r#"{"type":"heartbeat","sequence":1}"#))
        .await
        .unwrap();
    websocket
        .send(ticker("42001", "2024-01-01T00:00:31Z"))
        .await
        .unwrap();

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.symbol, Symbol::new("btc"));
    assert_eq!(first.price, dec!(42000.5));
    assert_eq!(first.size, dec!(0.5));
    assert_eq!(first.side, Side::Buy);
    assert_eq!(first.time.timestamp(), 1_704_067_230);
    assert_eq!(first.stats.high_24h, Some(dec!(43000)));

    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.price, dec!(42001));
    assert_eq!(*state.borrow(), ConnectionState::Subscribed);

    source.shutdown().await;
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_tick_source_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, mut rx) = mpsc::channel(16);
    let source = TickSource::subscribe(fast_config(url), Symbol::new("btc"), tx);

    // First connection is dropped straight after the subscription arrives
    let (websocket, subscribe) = timeout(WAIT, accept(&listener)).await.unwrap();
    assert_eq!(subscribe, SUBSCRIBE_BTC);
    drop(websocket);

    // The subscription is re-sent on the new connection
    let (mut websocket, subscribe) = timeout(WAIT, accept(&listener)).await.unwrap();
    assert_eq!(subscribe, SUBSCRIBE_BTC);

    websocket
        .send(ticker("100", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();

    let tick = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(tick.price, dec!(100));

    source.shutdown().await;
}

#[tokio::test]
async fn test_tick_source_reconnects_after_silence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, _rx) = mpsc::channel(16);
    let config = fast_config(url).with_read_timeout(Duration::from_millis(100));
    let source = TickSource::subscribe(config, Symbol::new("btc"), tx);

    // Server keeps the first connection open but never sends anything
    let (_silent, _) = timeout(WAIT, accept(&listener)).await.unwrap();
    let (_second, subscribe) = timeout(WAIT, accept(&listener)).await.unwrap();
    assert_eq!(subscribe, SUBSCRIBE_BTC);

    source.shutdown().await;
}

#[tokio::test]
async fn test_closed_tick_source_releases_its_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, mut rx) = mpsc::channel(16);
    let mut source = TickSource::subscribe(fast_config(url), Symbol::new("btc"), tx);
    let state = source.state();

    let (_websocket, _) = timeout(WAIT, accept(&listener)).await.unwrap();

    source.close();
    source.close();
    assert_eq!(*state.borrow(), ConnectionState::Closed);

    // Once the connection task exits its sender is dropped
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_dropping_tick_source_closes_it() {
    let (tx, mut rx) = mpsc::channel(16);
    // Nothing listens on port 9, the source keeps retrying until dropped
    let source = TickSource::subscribe(
        fast_config("ws://127.0.0.1:9".to_string()),
        Symbol::new("eth"),
        tx,
    );
    let state = source.state();

    drop(source);

    assert_eq!(*state.borrow(), ConnectionState::Closed);
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn test_dropped_receiver_stops_without_closing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (tx, rx) = mpsc::channel(16);
    let mut source = TickSource::subscribe(fast_config(url), Symbol::new("btc"), tx);
    let mut state = source.state();

    let (mut websocket, _) = timeout(WAIT, accept(&listener)).await.unwrap();
    timeout(WAIT, state.wait_for(|state| *state == ConnectionState::Subscribed))
        .await
        .unwrap()
        .unwrap();

    // The next forwarded tick finds nobody listening
    drop(rx);
    websocket
        .send(ticker("100", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();

    timeout(WAIT, state.wait_for(|state| *state == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    // No reconnect is attempted
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    source.close();
    assert_eq!(*state.borrow(), ConnectionState::Closed);
}
