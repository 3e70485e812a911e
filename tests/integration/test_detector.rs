//! Detection flow: profitable cycles reach the executor, misses and
//! saturation do not

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tri_arbitrage::market::{OrderBookEvent, OrderKind, OrderSide, PriceLevel};
use tri_arbitrage::robot::{BookStore, CycleDirection, Detector, Executor, Tunables};

use crate::common::{test_triangle, MockPrivateClient};

fn book(symbol: &str, ask: f64, bid: f64) -> OrderBookEvent {
    OrderBookEvent {
        symbol: symbol.to_string(),
        asks: vec![PriceLevel {
            price: ask,
            quantity: 10.0,
        }],
        bids: vec![PriceLevel {
            price: bid,
            quantity: 10.0,
        }],
    }
}

/// Top-of-book set where BBS clears the threshold:
/// 0.0000100503 / (0.05 * 0.0002) - 0.003 = 1.00203 > 1.001
async fn publish_profitable_books(store: &BookStore) {
    store.publish(book("ETH+BTC", 0.05, 0.049)).await;
    store.publish(book("XRP+ETH", 0.0002, 0.00019)).await;
    store
        .publish(book("XRP+BTC", 0.0000102, 0.0000100503))
        .await;
}

#[tokio::test]
async fn test_profitable_bbs_executes_three_legs() {
    let store = Arc::new(BookStore::new());
    publish_profitable_books(&store).await;

    let client = MockPrivateClient::new();
    let tunables = Arc::new(Tunables::new(0.001, 100.0, 0.1));
    let executor = Arc::new(Executor::new(client.clone(), Arc::clone(&tunables)));

    let handle = Detector::new(
        test_triangle(),
        Arc::clone(&store),
        tunables,
        Arc::clone(&executor),
    )
    .spawn();

    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.stop().await;

    // The unchanged percent suppresses re-execution, so the profitable tick
    // fires exactly one triangle: BUY open, BUY open, SELL close.
    let orders = client.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(
        (orders[0].side, orders[0].kind),
        (OrderSide::Buy, OrderKind::Open)
    );
    assert_eq!(orders[0].symbol, "ETHBTC");
    assert_eq!(
        (orders[1].side, orders[1].kind),
        (OrderSide::Buy, OrderKind::Open)
    );
    assert_eq!(orders[1].symbol, "XRPETH");
    assert_eq!(
        (orders[2].side, orders[2].kind),
        (OrderSide::Sell, OrderKind::Close)
    );
    assert_eq!(orders[2].symbol, "XRPBTC");

    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_threshold_miss_places_no_orders() {
    let store = Arc::new(BookStore::new());
    store.publish(book("ETH+BTC", 0.05, 0.049)).await;
    store.publish(book("XRP+ETH", 0.0002, 0.00019)).await;
    // c = 0.00001 gives roughly 0.997, below 1.001.
    store.publish(book("XRP+BTC", 0.0000102, 0.00001)).await;

    let client = MockPrivateClient::new();
    let tunables = Arc::new(Tunables::new(0.001, 100.0, 0.1));
    let executor = Arc::new(Executor::new(client.clone(), Arc::clone(&tunables)));

    let handle = Detector::new(test_triangle(), store, tunables, executor).spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    assert!(client.orders().is_empty());
}

#[tokio::test]
async fn test_missing_book_places_no_orders() {
    let store = Arc::new(BookStore::new());
    store.publish(book("ETH+BTC", 0.05, 0.049)).await;
    store.publish(book("XRP+ETH", 0.0002, 0.00019)).await;
    // XRP+BTC never publishes: both directions evaluate to zero.

    let client = MockPrivateClient::new();
    let tunables = Arc::new(Tunables::new(0.001, 100.0, 0.1));
    let executor = Arc::new(Executor::new(client.clone(), Arc::clone(&tunables)));

    let handle = Detector::new(test_triangle(), store, tunables, executor).spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    assert!(client.orders().is_empty());
}

#[tokio::test]
async fn test_saturated_executor_skips_detection() {
    let store = Arc::new(BookStore::new());
    publish_profitable_books(&store).await;

    let gate = Arc::new(Semaphore::new(0));
    let client = MockPrivateClient::gated(Arc::clone(&gate));
    let tunables = Arc::new(Tunables::new(0.001, 100.0, 0.1));
    let executor = Arc::new(Executor::new(client.clone(), Arc::clone(&tunables)));

    // Pin three executions inside leg 1 to saturate the in-flight counter.
    for _ in 0..3 {
        let executor = Arc::clone(&executor);
        let triangle = test_triangle();
        tokio::spawn(async move {
            let _ = executor
                .execute_triangle(&triangle, CycleDirection::Bbs, 0.1)
                .await;
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.in_flight(), 3);

    let handle = Detector::new(
        test_triangle(),
        store,
        tunables,
        Arc::clone(&executor),
    )
    .spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.stop().await;

    // The detector saw the opportunity but refused to start a fourth
    // execution; nothing was placed while the gate held.
    assert_eq!(executor.in_flight(), 3);
    assert!(client.orders().is_empty());

    // Release the gate and let the pinned executions drain.
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(executor.in_flight(), 0);
    assert_eq!(client.orders().len(), 9);
}
