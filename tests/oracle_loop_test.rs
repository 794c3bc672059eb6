//! End-to-end tests for the polling loop with an in-memory ledger.

mod common;

use common::{test_config, MockLedger, ScriptedSensor, SensorBehavior, FIRST_BLOCK};
use freshchain_oracle::oracle::{LedgerError, LoopState, OracleBuilder, RejectKind, SensorOracle};
use freshchain_oracle::types::{AssetId, OracleEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn build_oracle(
    ledger: &Arc<MockLedger>,
    sensor: &Arc<ScriptedSensor>,
    events: Option<mpsc::Sender<OracleEvent>>,
) -> SensorOracle {
    let mut builder = OracleBuilder::new(test_config())
        .with_ledger(ledger.clone())
        .with_sensor(sensor.clone());
    if let Some(events) = events {
        builder = builder.with_event_sender(events);
    }
    builder.build().await.expect("oracle should build")
}

fn drain(rx: &mut mpsc::Receiver<OracleEvent>) -> Vec<OracleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_safe_readings_cause_no_ledger_traffic() {
    let ledger = Arc::new(MockLedger::new(0));
    let sensor = Arc::new(ScriptedSensor::new([
        (1, SensorBehavior::Value(5.0)),
        (2, SensorBehavior::Value(9.9)),
        (3, SensorBehavior::Value(-3.0)),
        // Exactly at the threshold is still safe.
        (4, SensorBehavior::Value(10.0)),
    ]));
    let oracle = build_oracle(&ledger, &sensor, None).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.evaluated, 4);
    assert_eq!(report.breaches, 0);
    assert_eq!(ledger.submission_traffic(), 0);
    // Only the startup nonce lookup.
    assert_eq!(ledger.nonce_calls(), 1);
    assert_eq!(
        sensor.reads(),
        vec![AssetId(1), AssetId(2), AssetId(3), AssetId(4)]
    );
}

#[tokio::test]
async fn test_breach_is_written_and_reported() {
    let ledger = Arc::new(MockLedger::new(7));
    let sensor = Arc::new(ScriptedSensor::new([(2, SensorBehavior::Value(12.5))]));
    let (tx, mut rx) = mpsc::channel(16);
    let oracle = build_oracle(&ledger, &sensor, Some(tx)).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.breaches, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(ledger.submitted_nonces(), vec![7]);
    assert_eq!(ledger.submitted()[0].asset, AssetId(2));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    match &events[0] {
        OracleEvent::BreachDetected { asset, reading, score } => {
            assert_eq!(*asset, AssetId(2));
            assert_eq!(reading.value, 12.5);
            assert_eq!(*score, 90);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        OracleEvent::Confirmed { asset, receipt, attempts } => {
            assert_eq!(*asset, AssetId(2));
            assert_eq!(receipt.block_number, FIRST_BLOCK);
            assert_eq!(*attempts, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        events[2],
        OracleEvent::RoundCompleted {
            round: 1,
            evaluated: 4,
            breaches: 1
        }
    ));

    let metrics = oracle.metrics().await;
    assert_eq!(metrics.breaches, 1);
    assert_eq!(metrics.confirmed, 1);
    assert_eq!(metrics.readings, 4);
    assert_eq!(metrics.rounds, 1);
}

#[tokio::test]
async fn test_faulty_asset_does_not_stop_the_round() {
    let ledger = Arc::new(MockLedger::new(0));
    let sensor = Arc::new(ScriptedSensor::new([
        (2, SensorBehavior::Fail),
        (3, SensorBehavior::Panic),
        (4, SensorBehavior::Value(14.0)),
    ]));
    let oracle = build_oracle(&ledger, &sensor, None).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.evaluated, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.faults, 1);
    assert_eq!(report.breaches, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(ledger.submitted()[0].asset, AssetId(4));

    let metrics = oracle.metrics().await;
    assert_eq!(metrics.sensor_failures, 1);
    assert_eq!(metrics.faults, 1);
}

#[tokio::test]
async fn test_non_finite_reading_is_skipped() {
    let ledger = Arc::new(MockLedger::new(0));
    let sensor = Arc::new(ScriptedSensor::new([(1, SensorBehavior::Value(f64::NAN))]));
    let oracle = build_oracle(&ledger, &sensor, None).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.evaluated, 3);
    assert_eq!(ledger.submission_traffic(), 0);
}

#[tokio::test]
async fn test_failed_submission_is_reported_and_next_round_runs() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script_submit(Err(LedgerError::Rejected {
        kind: RejectKind::Reverted,
        message: "execution reverted: Not an authorized oracle".to_string(),
    }));
    let sensor = Arc::new(ScriptedSensor::new([(1, SensorBehavior::Value(11.0))]));
    let (tx, mut rx) = mpsc::channel(16);
    let oracle = build_oracle(&ledger, &sensor, Some(tx)).await;
    let cancel = CancellationToken::new();

    let first = oracle.poll_round(1, &cancel).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.confirmed, 0);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, OracleEvent::SubmissionFailed { asset, .. } if *asset == AssetId(1))));

    let second = oracle.poll_round(2, &cancel).await.unwrap();
    assert_eq!(second.confirmed, 1);
    assert_eq!(ledger.submit_calls(), 2);
}

#[tokio::test]
async fn test_reverted_receipt_counts_as_reverted() {
    let ledger = Arc::new(MockLedger::new(0));
    ledger.script_receipt(Ok(false));
    let sensor = Arc::new(ScriptedSensor::new([(3, SensorBehavior::Value(20.0))]));
    let oracle = build_oracle(&ledger, &sensor, None).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.reverted, 1);
    assert_eq!(report.confirmed, 0);
    assert_eq!(ledger.submit_calls(), 1);
    assert_eq!(oracle.metrics().await.reverted, 1);
}

#[tokio::test]
async fn test_every_breach_in_a_round_gets_its_own_nonce() {
    let ledger = Arc::new(MockLedger::new(3).with_receipt_delay(Duration::from_millis(20)));
    let sensor = Arc::new(ScriptedSensor::new([
        (1, SensorBehavior::Value(11.0)),
        (2, SensorBehavior::Value(12.0)),
        (3, SensorBehavior::Value(13.0)),
        (4, SensorBehavior::Value(14.0)),
    ]));
    let oracle = build_oracle(&ledger, &sensor, None).await;

    let report = oracle.poll_round(1, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.confirmed, 4);
    let mut nonces = ledger.submitted_nonces();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn test_run_stops_promptly_on_cancel() {
    let ledger = Arc::new(MockLedger::new(0));
    let sensor = Arc::new(ScriptedSensor::safe());
    let oracle = Arc::new(build_oracle(&ledger, &sensor, None).await);
    let mut state = oracle.subscribe_state();
    let cancel = CancellationToken::new();

    let task = {
        let oracle = oracle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { oracle.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(70)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop should stop within the grace period")
        .unwrap()
        .unwrap();

    assert_eq!(*state.borrow_and_update(), LoopState::Stopped);
    assert_eq!(oracle.state(), LoopState::Stopped);
    assert!(oracle.metrics().await.rounds >= 1);
}

#[tokio::test]
async fn test_cancelled_before_start_polls_nothing() {
    let ledger = Arc::new(MockLedger::new(0));
    let sensor = Arc::new(ScriptedSensor::safe());
    let oracle = build_oracle(&ledger, &sensor, None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    oracle.run(cancel).await.unwrap();

    assert!(sensor.reads().is_empty());
    assert_eq!(oracle.metrics().await.rounds, 0);
    assert_eq!(oracle.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_run_cancelled_mid_round_records_broadcast_confirmation() {
    let ledger = Arc::new(MockLedger::new(0).with_receipt_delay(Duration::from_millis(200)));
    let sensor = Arc::new(ScriptedSensor::new([(2, SensorBehavior::Value(15.0))]));
    let (tx, mut rx) = mpsc::channel(16);
    let oracle = Arc::new(build_oracle(&ledger, &sensor, Some(tx)).await);
    let cancel = CancellationToken::new();

    let task = {
        let oracle = oracle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { oracle.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ledger.submit_calls(), 1);
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop should stop once the receipt arrives")
        .unwrap()
        .unwrap();

    assert_eq!(oracle.state(), LoopState::Stopped);
    assert_eq!(ledger.submit_calls(), 1);
    let metrics = oracle.metrics().await;
    assert_eq!(metrics.confirmed, 1);
    assert_eq!(metrics.rounds, 1);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        OracleEvent::Confirmed { asset, receipt, .. } if *asset == AssetId(2) && receipt.block_number == FIRST_BLOCK
    )));
}
