//! Three-leg execution: order sequencing, rollback and counter hygiene

use std::sync::Arc;

use tri_arbitrage::market::{OrderKind, OrderSide};
use tri_arbitrage::robot::{CycleDirection, Executor, Tunables};

use crate::common::{test_triangle, MockPrivateClient};

fn tunables(fee: f64) -> Arc<Tunables> {
    Arc::new(Tunables::new(0.001, 100.0, fee))
}

#[tokio::test]
async fn test_happy_bbs_places_three_legs_in_order() {
    let client = MockPrivateClient::with_fills(vec![Ok(0.5), Ok(2500.0), Ok(2500.0)]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    executor
        .execute_triangle(&triangle, CycleDirection::Bbs, 0.1)
        .await
        .unwrap();

    let orders = client.orders();
    assert_eq!(orders.len(), 3);

    // Leg 1: buy initial, lot formatted with the initial pair's price precision.
    assert_eq!(orders[0].symbol, "ETHBTC");
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].kind, OrderKind::Open);
    assert_eq!(orders[0].quantity, "0.100000");

    // Leg 2: buy middle with leg 1's fill, middle pair's price precision.
    assert_eq!(orders[1].symbol, "XRPETH");
    assert_eq!(orders[1].side, OrderSide::Buy);
    assert_eq!(orders[1].kind, OrderKind::Open);
    assert_eq!(orders[1].quantity, "0.50000000");

    // Leg 3: sell final with leg 2's fill, middle pair's base precision.
    assert_eq!(orders[2].symbol, "XRPBTC");
    assert_eq!(orders[2].side, OrderSide::Sell);
    assert_eq!(orders[2].kind, OrderKind::Close);
    assert_eq!(orders[2].quantity, "2500.0");

    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_leg_two_failure_compensates_leg_one() {
    let client = MockPrivateClient::with_fills(vec![
        Ok(0.5),
        Err("insufficient liquidity".to_string()),
    ]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    let err = executor
        .execute_triangle(&triangle, CycleDirection::Bbs, 0.1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("insufficient liquidity"));

    let orders = client.orders();
    assert_eq!(orders.len(), 3);

    // The compensating order sells back what leg 1 bought, with the same
    // quantity string that was sent to leg 2. No leg 3 attempt.
    assert_eq!(orders[2].symbol, "ETHBTC");
    assert_eq!(orders[2].side, OrderSide::Sell);
    assert_eq!(orders[2].kind, OrderKind::Close);
    assert_eq!(orders[2].quantity, "0.50000000");

    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_leg_three_failure_compensates_legs_two_then_one() {
    let client = MockPrivateClient::with_fills(vec![
        Ok(0.5),
        Ok(2500.0),
        Err("order rejected".to_string()),
    ]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    let err = executor
        .execute_triangle(&triangle, CycleDirection::Bbs, 0.1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("order rejected"));

    let orders = client.orders();
    assert_eq!(orders.len(), 5);

    assert_eq!(orders[3].symbol, "XRPETH");
    assert_eq!(orders[3].side, OrderSide::Sell);
    assert_eq!(orders[3].kind, OrderKind::Close);
    assert_eq!(orders[3].quantity, "2500.0");

    assert_eq!(orders[4].symbol, "ETHBTC");
    assert_eq!(orders[4].side, OrderSide::Sell);
    assert_eq!(orders[4].kind, OrderKind::Close);
    assert_eq!(orders[4].quantity, "0.50000000");

    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_compensation_failure_preserves_original_error() {
    let client = MockPrivateClient::with_fills(vec![
        Ok(0.5),
        Err("leg two down".to_string()),
        Err("compensation down".to_string()),
    ]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    let err = executor
        .execute_triangle(&triangle, CycleDirection::Bbs, 0.1)
        .await
        .unwrap_err();

    // The compensation failure is logged only; the caller sees leg 2's error.
    assert!(err.to_string().contains("leg two down"));
    assert_eq!(client.orders().len(), 3);
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_ssb_inflates_quantities_by_fee() {
    let client = MockPrivateClient::with_fills(vec![Ok(1000.0), Ok(2000.0), Ok(2000.0)]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    executor
        .execute_triangle(&triangle, CycleDirection::Ssb, 0.1)
        .await
        .unwrap();

    let orders = client.orders();
    assert_eq!(orders.len(), 3);

    assert_eq!(orders[0].side, OrderSide::Sell);
    assert_eq!(orders[0].kind, OrderKind::Open);
    assert_eq!(orders[0].quantity, "0.100000");

    // 1000 * (1 + 0.1/100) = 1001, middle price precision 8.
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[1].quantity, "1001.00000000");

    // 2000 * 1.001 = 2002, middle base precision 1.
    assert_eq!(orders[2].side, OrderSide::Buy);
    assert_eq!(orders[2].kind, OrderKind::Close);
    assert_eq!(orders[2].quantity, "2002.0");
}

#[tokio::test]
async fn test_ssb_leg_two_failure_compensates_with_buy() {
    let client =
        MockPrivateClient::with_fills(vec![Ok(1000.0), Err("leg two down".to_string())]);
    let executor = Executor::new(client.clone(), tunables(0.1));
    let triangle = test_triangle();

    let err = executor
        .execute_triangle(&triangle, CycleDirection::Ssb, 0.1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("leg two down"));

    let orders = client.orders();
    assert_eq!(orders.len(), 3);
    assert_eq!(orders[2].symbol, "ETHBTC");
    assert_eq!(orders[2].side, OrderSide::Buy);
    assert_eq!(orders[2].kind, OrderKind::Close);
    assert_eq!(orders[2].quantity, "1001.00000000");
}
