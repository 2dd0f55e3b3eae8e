//! End-to-end flows through the public connector API with a scripted socket

use std::sync::Arc;
use std::time::Duration;

use bfx_market_data::{
    ChannelKey, Connector, MarketEvent, RestClient, Result, SessionEvent, Side,
    SubscriptionState, Transport,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

/// Records outbound frames and lets the test play the exchange
#[derive(Clone, Default)]
struct ScriptedSocket {
    sent: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>>,
    starts: Arc<Mutex<usize>>,
}

impl ScriptedSocket {
    fn push(&self, frame: &str) {
        self.emit(SessionEvent::Message(frame.to_string()));
    }

    fn emit(&self, event: SessionEvent) {
        let events = self.events.lock();
        events
            .as_ref()
            .expect("session not started")
            .send(event)
            .expect("dispatch loop gone");
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl Transport for ScriptedSocket {
    fn start(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Result<()> {
        *self.starts.lock() += 1;
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn send(&self, frame: String) -> Result<()> {
        self.sent.lock().push(frame);
        Ok(())
    }
}

fn connector(socket: &ScriptedSocket) -> Connector<ScriptedSocket> {
    Connector::new(RestClient::new("http://127.0.0.1:9/v2"), socket.clone(), 64)
}

async fn next_event(rx: &mut broadcast::Receiver<MarketEvent>) -> MarketEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn trades_stream_from_snapshot_to_updates() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);
    let mut events = connector.events();

    assert!(connector.subscribe_trades("tBTCUSD", 50).unwrap());
    assert_eq!(
        socket.sent(),
        vec![r#"{"event":"subscribe","channel":"trades","symbol":"tBTCUSD"}"#.to_string()]
    );

    socket.push(r#"{"event":"info","version":2,"serverId":"abc","platform":{"status":1}}"#);
    socket.push(r#"{"event":"subscribed","channel":"trades","chanId":17,"symbol":"tBTCUSD","pair":"BTCUSD"}"#);
    socket.push(r#"[17,[[402,1672531260000,-0.5,16510],[401,1672531200000,0.25,16500]]]"#);
    socket.push(r#"[17,"hb"]"#);
    socket.push(r#"[17,"te",[403,1672531320000,0.1,16520]]"#);
    socket.push(r#"[17,"tu",[403,1672531320000,0.1,16520]]"#);

    match next_event(&mut events).await {
        MarketEvent::BuyTrade(trade) => {
            assert_eq!(trade.id, "401");
            assert_eq!(trade.price, dec!(16500));
            assert_eq!(trade.side(), Side::Buy);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        MarketEvent::SellTrade(trade) => {
            assert_eq!(trade.id, "402");
            assert_eq!(trade.amount, dec!(-0.5));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        MarketEvent::BuyTrade(trade) => assert_eq!(trade.id, "403"),
        other => panic!("unexpected event: {:?}", other),
    }

    settle().await;
    assert!(events.try_recv().is_err());
    assert_eq!(
        connector.registry().state(&ChannelKey::trades("tBTCUSD")),
        SubscriptionState::Bound(17)
    );
}

#[tokio::test]
async fn candles_keep_latest_value_per_bar() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);
    let mut events = connector.events();

    assert!(connector
        .subscribe_candles("tETHUSD", 60, None, None, Some(10))
        .unwrap());
    assert_eq!(
        socket.sent(),
        vec![r#"{"event":"subscribe","channel":"candles","key":"trade:1m:tETHUSD"}"#.to_string()]
    );

    socket.push(r#"{"event":"subscribed","channel":"candles","chanId":88,"key":"trade:1m:tETHUSD"}"#);
    socket.push(r#"[88,[[1672531260000,1200,1201,1202,1199,5],[1672531200000,1198,1200,1201,1197,3]]]"#);
    socket.push(r#"[88,[1672531260000,1200,1203,1204,1199,7.5]]"#);

    for _ in 0..3 {
        assert!(matches!(next_event(&mut events).await, MarketEvent::Candle(_)));
    }

    let bars = connector.candles("tETHUSD");
    assert_eq!(bars.len(), 2);
    assert!(bars[0].open_time < bars[1].open_time);
    assert_eq!(bars[1].close, dec!(1203));
    assert_eq!(bars[1].volume, dec!(7.5));
}

#[tokio::test]
async fn repeated_subscribe_starts_one_session() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);

    assert!(connector.subscribe_trades("tBTCUSD", 10).unwrap());
    assert!(!connector.subscribe_trades("tBTCUSD", 10).unwrap());
    assert!(connector.subscribe_trades("tETHUSD", 10).unwrap());

    assert_eq!(*socket.starts.lock(), 1);
    assert_eq!(socket.sent().len(), 2);
}

#[tokio::test]
async fn unsubscribe_releases_channel_after_confirmation() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);
    let mut events = connector.events();
    let key = ChannelKey::trades("tBTCUSD");

    connector.subscribe_trades("tBTCUSD", 10).unwrap();
    socket.push(r#"{"event":"subscribed","channel":"trades","chanId":5,"symbol":"tBTCUSD"}"#);
    settle().await;

    assert!(connector.unsubscribe_trades("tBTCUSD").unwrap());
    assert_eq!(
        socket.sent().last().map(String::as_str),
        Some(r#"{"event":"unsubscribe","chanId":"5"}"#)
    );

    socket.push(r#"{"event":"unsubscribed","status":"OK","chanId":5}"#);
    socket.push(r#"[5,"te",[9,1672531200000,1,16500]]"#);
    settle().await;

    assert_eq!(connector.registry().state(&key), SubscriptionState::Unbound);
    assert!(events.try_recv().is_err());
    assert!(!connector.unsubscribe_trades("tBTCUSD").unwrap());

    assert!(connector.subscribe_trades("tBTCUSD", 10).unwrap());
}

#[tokio::test]
async fn rejected_subscription_can_be_retried() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);
    let key = ChannelKey::trades("tNOPE");

    connector.subscribe_trades("tNOPE", 10).unwrap();
    socket.push(r#"{"event":"error","channel":"trades","symbol":"tNOPE","msg":"symbol: invalid","code":10300}"#);
    settle().await;

    assert_eq!(connector.registry().state(&key), SubscriptionState::Unbound);
    assert!(connector.subscribe_trades("tNOPE", 10).unwrap());
}

#[tokio::test]
async fn reconnect_requests_live_subscriptions_again() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);

    connector.subscribe_trades("tBTCUSD", 10).unwrap();
    connector
        .subscribe_candles("tBTCUSD", 3600, None, None, None)
        .unwrap();
    socket.push(r#"{"event":"subscribed","channel":"trades","chanId":1,"symbol":"tBTCUSD"}"#);
    socket.push(r#"{"event":"subscribed","channel":"candles","chanId":2,"key":"trade:1h:tBTCUSD"}"#);
    settle().await;

    connector.unsubscribe_candles("tBTCUSD").unwrap();
    socket.emit(SessionEvent::Reconnected);
    settle().await;

    let sent = socket.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(
        sent[3],
        r#"{"event":"subscribe","channel":"trades","symbol":"tBTCUSD"}"#
    );
    assert_eq!(
        connector.registry().state(&ChannelKey::trades("tBTCUSD")),
        SubscriptionState::Pending
    );
    assert_eq!(
        connector.registry().state(&ChannelKey::candles("tBTCUSD")),
        SubscriptionState::Unbound
    );

    socket.push(r#"{"event":"subscribed","channel":"trades","chanId":31,"symbol":"tBTCUSD"}"#);
    settle().await;
    assert_eq!(connector.registry().lookup_id(&ChannelKey::trades("tBTCUSD")), Some(31));
}

#[tokio::test]
async fn rejected_subscription_is_not_requested_after_reconnect() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);

    connector.subscribe_trades("tNOPE", 10).unwrap();
    socket.push(r#"{"event":"error","channel":"trades","symbol":"tNOPE","msg":"symbol: invalid","code":10300}"#);
    settle().await;
    socket.emit(SessionEvent::Reconnected);
    settle().await;

    assert_eq!(
        socket.sent(),
        vec![r#"{"event":"subscribe","channel":"trades","symbol":"tNOPE"}"#.to_string()]
    );
    assert_eq!(
        connector.registry().state(&ChannelKey::trades("tNOPE")),
        SubscriptionState::Unbound
    );
}

#[tokio::test]
async fn bare_pair_binds_to_venue_confirmation() {
    let socket = ScriptedSocket::default();
    let connector = connector(&socket);
    let mut events = connector.events();
    let key = ChannelKey::trades("BTCUSD");

    assert!(connector.subscribe_trades("BTCUSD", 10).unwrap());
    socket.push(r#"{"event":"subscribed","channel":"trades","chanId":19111,"symbol":"tBTCUSD","pair":"BTCUSD"}"#);
    socket.push(r#"[19111,"te",[1,1000,0.5,20000]]"#);

    match next_event(&mut events).await {
        MarketEvent::BuyTrade(trade) => assert_eq!(trade.pair, "BTCUSD"),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(connector.registry().state(&key), SubscriptionState::Bound(19111));
    assert!(!connector.subscribe_trades("BTCUSD", 10).unwrap());

    assert!(connector.unsubscribe_trades("BTCUSD").unwrap());
    assert_eq!(
        socket.sent().last().map(String::as_str),
        Some(r#"{"event":"unsubscribe","chanId":"19111"}"#)
    );

    socket.push(r#"{"event":"unsubscribed","status":"OK","chanId":19111}"#);
    settle().await;
    assert!(connector.subscribe_trades("BTCUSD", 10).unwrap());
}
