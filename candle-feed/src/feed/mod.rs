use self::{
    backoff::Backoff,
    coinbase::{CoinbaseEvent, SubscribeRequest},
    timeout::TimeoutStream,
};
use crate::{
    config::{FeedConfig, non_zero},
    error::{FeedError, ParseError},
    model::{Symbol, Tick},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Exponential reconnect backoff.
pub mod backoff;

/// Coinbase Exchange ticker channel wire format.
pub mod coinbase;

/// Read timeout wrapper detecting silent disconnections.
pub mod timeout;

/// Lifecycle of one live feed subscription.
///
/// `Closed` is terminal: once a subscription is closed no other state is ever published. Only
/// closing the [`TickSource`] leads to `Closed`. If the tick receiver is dropped the connection
/// task stops without reconnecting and the state stays `Disconnected` until the source is closed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
    Closed,
}

/// Source of live [`Tick`]s for a single symbol at a time.
///
/// Every call to [`TickFeed::subscribe`] produces an independent subscription that publishes into
/// its own channel, so ticks of a previous subscription can never reach a newer consumer.
pub trait TickFeed: Send + Sync + 'static {
    type Subscription: FeedSubscription;

    fn subscribe(&self, symbol: &Symbol, tx: mpsc::Sender<Tick>) -> Self::Subscription;
}

/// Handle to a running subscription. Closing must be idempotent.
pub trait FeedSubscription: Send + 'static {
    fn close(&mut self);
}

/// [`TickFeed`] backed by the Coinbase Exchange WebSocket ticker channel.
#[derive(Debug, Clone)]
pub struct CoinbaseFeed {
    config: FeedConfig,
}

impl CoinbaseFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

impl TickFeed for CoinbaseFeed {
    type Subscription = TickSource;

    fn subscribe(&self, symbol: &Symbol, tx: mpsc::Sender<Tick>) -> Self::Subscription {
        TickSource::subscribe(self.config.clone(), symbol.clone(), tx)
    }
}

/// Live ticker subscription for one [`Symbol`].
///
/// Owns a background connection task that connects, subscribes, forwards every ticker update
/// into the provided channel and reconnects with exponential backoff until closed. Dropping the
/// `TickSource` closes it.
#[derive(Debug)]
pub struct TickSource {
    symbol: Symbol,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TickSource {
    /// Start a subscription for `symbol`. Must be called from within a Tokio runtime.
    pub fn subscribe(config: FeedConfig, symbol: Symbol, tx: mpsc::Sender<Tick>) -> Self {
        let state_tx = Arc::new(watch::Sender::new(ConnectionState::Disconnected));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection_loop(
            config,
            symbol.clone(),
            tx,
            Arc::clone(&state_tx),
            shutdown_rx,
        ));

        Self {
            symbol,
            state_tx,
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Watch the [`ConnectionState`] of this subscription.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Close the subscription and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.close();

        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                error!(symbol = %self.symbol, %error, "ticker connection task failed");
            }
        }
    }

    fn close_inner(&mut self) {
        let newly_closed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });

        self.shutdown_tx.send_replace(true);

        if newly_closed {
            info!(symbol = %self.symbol, "closed ticker subscription");
        }
    }
}

impl FeedSubscription for TickSource {
    fn close(&mut self) {
        self.close_inner();
    }
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.close_inner();
    }
}

/// Why a single connection session ended.
#[derive(Debug)]
enum SessionEnd {
    ReceiverDropped,
    Disconnected(FeedError),
}

/// Publish `next` unless the subscription has already been closed.
fn transition(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == ConnectionState::Closed || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Resolves once shutdown is signalled or the owning [`TickSource`] is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let closed = *shutdown.borrow_and_update();
        if closed || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Connect, subscribe & forward ticks until shutdown, reconnecting with backoff.
async fn run_connection_loop(
    config: FeedConfig,
    symbol: Symbol,
    tx: mpsc::Sender<Tick>,
    state: Arc<watch::Sender<ConnectionState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let product_id = symbol.feed_product_id();
    let mut backoff = Backoff::new(config.reconnect);

    info!(url = %config.url, %symbol, %product_id, "starting ticker subscription");

    loop {
        transition(&state, ConnectionState::Connecting);

        let end = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            end = run_session(&config, &symbol, &product_id, &tx, &state, &mut backoff) => end,
        };

        match end {
            SessionEnd::ReceiverDropped => {
                // Only close() may publish Closed, park in Disconnected until the owner closes
                transition(&state, ConnectionState::Disconnected);
                debug!(%symbol, "tick receiver dropped, stopping subscription");
                return;
            }
            SessionEnd::Disconnected(error) => {
                warn!(%symbol, %error, "ticker connection lost");
            }
        }

        transition(&state, ConnectionState::Reconnecting);

        let delay = backoff.next_delay();
        debug!(%symbol, ?delay, "waiting before reconnecting");

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    transition(&state, ConnectionState::Closed);
    debug!(%symbol, "ticker connection task stopped");
}

async fn run_session(
    config: &FeedConfig,
    symbol: &Symbol,
    product_id: &str,
    tx: &mpsc::Sender<Tick>,
    state: &watch::Sender<ConnectionState>,
    backoff: &mut Backoff,
) -> SessionEnd {
    let websocket = match connect_async(config.url.as_str()).await {
        Ok((websocket, _)) => websocket,
        Err(error) => {
            return SessionEnd::Disconnected(FeedError::Connect {
                url: config.url.clone(),
                reason: error.to_string(),
            });
        }
    };

    debug!(url = %config.url, "connected to ticker feed");

    let (mut write, read) = websocket.split();

    let request = SubscribeRequest::ticker(product_id).to_json();
    if let Err(error) = write.send(Message::text(request)).await {
        return SessionEnd::Disconnected(FeedError::Subscribe(error.to_string()));
    }

    transition(state, ConnectionState::Subscribed);
    backoff.reset();
    info!(%symbol, product_id, "subscribed to ticker channel");

    let mut read = TimeoutStream::new(read, config.read_timeout);
    let ping_interval = non_zero(config.ping_interval);
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(error) = write.send(Message::Ping(vec![].into())).await {
                    return SessionEnd::Disconnected(FeedError::from(error));
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match coinbase::parse_message(text.as_str(), product_id, symbol, Utc::now()) {
                        Ok(CoinbaseEvent::Tick(tick)) => {
                            if tx.send(tick).await.is_err() {
                                return SessionEnd::ReceiverDropped;
                            }
                        }
                        Ok(CoinbaseEvent::Subscriptions) => {
                            debug!(%symbol, "subscription confirmed");
                        }
                        Ok(CoinbaseEvent::Error(reason)) => {
                            warn!(%symbol, %reason, "ticker feed reported an error");
                        }
                        Err(ParseError::Unsupported(kind)) => {
                            debug!(%symbol, %kind, "ignoring unsupported message");
                        }
                        Err(error) => {
                            debug!(
                                %symbol,
                                %error,
                                payload = %text.as_str(),
                                "dropping malformed ticker message"
                            );
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(%symbol, ?frame, "server closed connection");
                    return SessionEnd::Disconnected(FeedError::ClosedByPeer);
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return SessionEnd::Disconnected(error),
                None => return SessionEnd::Disconnected(FeedError::ClosedByPeer),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_never_leaves_closed() {
        struct TestCase {
            from: ConnectionState,
            to: ConnectionState,
            expected: ConnectionState,
        }

        let tests = vec![
            TestCase {
                // TC0: connecting to subscribed
                from: ConnectionState::Connecting,
                to: ConnectionState::Subscribed,
                expected: ConnectionState::Subscribed,
            },
            TestCase {
                // TC1: subscribed to reconnecting
                from: ConnectionState::Subscribed,
                to: ConnectionState::Reconnecting,
                expected: ConnectionState::Reconnecting,
            },
            TestCase {
                // TC2: closed is terminal
                from: ConnectionState::Closed,
                to: ConnectionState::Subscribed,
                expected: ConnectionState::Closed,
            },
            TestCase {
                // TC3: closed is terminal even for reconnects
                from: ConnectionState::Closed,
                to: ConnectionState::Connecting,
                expected: ConnectionState::Closed,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let state = watch::Sender::new(test.from);
            transition(&state, test.to);
            assert_eq!(*state.borrow(), test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let (tx, _rx) = mpsc::channel(8);
        // Nothing listens on port 9, so the task keeps reconnecting until closed
        let config = FeedConfig::new("ws://127.0.0.1:9");
        let mut source = TickSource::subscribe(config, Symbol::new("btc"), tx);
        let state = source.state();

        source.close();
        source.close();

        assert_eq!(*state.borrow(), ConnectionState::Closed);
        source.shutdown().await;
        assert_eq!(*state.borrow(), ConnectionState::Closed);
    }
}
