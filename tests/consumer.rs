// tests/consumer.rs

mod common;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use common::{
    eventually, fast_backoff, joins_in_time, ConsumeRig, Stall, StalledBroker, QUEUE, WINDOW,
};
use hookrelay::{Consumer, MemoryBroker, SessionSupply};

#[tokio::test]
async fn delivery_is_forwarded_then_acked() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("consume");
    let mut rig = ConsumeRig::start(&broker, 4);

    // ---
    // Act
    // ---
    broker.inject(QUEUE, "d-0");

    // ---
    // Assert
    // ---
    assert_eq!(rig.next_payload().await, "d-0");
    eventually("delivery acked", || broker.acked(QUEUE) == 1).await;
    assert_eq!(broker.ready_len(QUEUE), 0);

    rig.token.cancel();
}

#[tokio::test]
async fn full_sink_holds_back_the_ack() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("scenario-d");
    let mut rig = ConsumeRig::start(&broker, 1);
    rig.sink_tx.send(Bytes::from_static(b"filler")).await.unwrap();

    // ---
    // Act
    // ---
    broker.inject(QUEUE, "d-1");
    eventually("d-1 delivered to the consumer", || broker.ready_len(QUEUE) == 0).await;
    sleep(Duration::from_millis(30)).await;

    // ---
    // Assert
    // ---
    assert_eq!(broker.acked(QUEUE), 0, "not acked while the sink is full");

    assert_eq!(rig.next_payload().await, "filler");
    assert_eq!(rig.next_payload().await, "d-1");
    eventually("d-1 acked after forwarding", || broker.acked(QUEUE) == 1).await;

    rig.token.cancel();
}

#[tokio::test]
async fn resubscribes_after_session_loss() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("resubscribe");
    let mut rig = ConsumeRig::start(&broker, 4);

    broker.inject(QUEUE, "a");
    assert_eq!(rig.next_payload().await, "a");
    eventually("a acked", || broker.acked(QUEUE) == 1).await;
    let dials = broker.dial_attempts();

    // ---
    // Act
    // ---
    broker.sever();
    broker.inject(QUEUE, "b");

    // ---
    // Assert
    // ---
    assert_eq!(rig.next_payload().await, "b");
    eventually("b acked", || broker.acked(QUEUE) == 2).await;
    assert!(broker.dial_attempts() > dials);

    rig.token.cancel();
}

#[tokio::test]
async fn unacked_delivery_is_redelivered_after_session_loss() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("redeliver");
    let mut rig = ConsumeRig::start(&broker, 1);
    rig.sink_tx.send(Bytes::from_static(b"filler")).await.unwrap();

    broker.inject(QUEUE, "a");
    eventually("a delivered", || broker.ready_len(QUEUE) == 0).await;

    // ---
    // Act
    // ---
    broker.sever();
    eventually("a requeued", || broker.ready_len(QUEUE) == 1).await;

    // ---
    // Assert
    // ---
    assert_eq!(rig.next_payload().await, "filler");
    assert_eq!(rig.next_payload().await, "a");
    assert_eq!(rig.next_payload().await, "a", "redelivered copy");
    eventually("one ack for the redelivery", || broker.acked(QUEUE) == 1).await;

    rig.token.cancel();
}

#[tokio::test]
async fn cancel_stops_a_blocked_consumer() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("blocked");
    let rig = ConsumeRig::start(&broker, 1);
    rig.sink_tx.send(Bytes::from_static(b"filler")).await.unwrap();
    broker.inject(QUEUE, "stuck");
    eventually("stuck delivered", || broker.ready_len(QUEUE) == 0).await;

    // ---
    // Act
    // ---
    rig.token.cancel();

    // ---
    // Assert
    // ---
    joins_in_time("consumer", rig.consumer_task).await;
    joins_in_time("supply", rig.supply_task).await;
    assert_eq!(broker.acked(QUEUE), 0);
    assert_eq!(broker.ready_len(QUEUE), 1, "unacked delivery went back to the queue");
}

#[tokio::test]
async fn failed_ack_resubscribes_and_redelivers() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("ack-failure");
    broker.fail_acks(1);
    let mut rig = ConsumeRig::start(&broker, 4);

    // ---
    // Act
    // ---
    broker.inject(QUEUE, "a");

    // ---
    // Assert
    // ---
    assert_eq!(rig.next_payload().await, "a");
    assert_eq!(rig.next_payload().await, "a", "redelivered after the failed ack");
    eventually("redelivery acked", || broker.acked(QUEUE) == 1).await;
    assert!(broker.dial_attempts() >= 1);
    assert_eq!(broker.ready_len(QUEUE), 0);

    rig.token.cancel();
}

#[tokio::test]
async fn cancel_unblocks_stalled_session_calls() {
    // ---
    for stall in [Stall::Consume, Stall::Ack] {
        // ---
        // Arrange
        // ---
        let token = CancellationToken::new();
        let connector = StalledBroker::connector(stall);
        let (supply, supply_task) =
            SessionSupply::spawn(token.clone(), connector, QUEUE, fast_backoff());
        let (sink_tx, mut sink) = mpsc::channel(4);
        let consumer_task = Consumer::new(supply, sink_tx, QUEUE, token.clone()).spawn();

        if stall == Stall::Ack {
            let forwarded = tokio::time::timeout(WINDOW, sink.recv()).await.expect("forwarded");
            assert_eq!(forwarded, Some(Bytes::from_static(b"stalled")));
        } else {
            sleep(Duration::from_millis(30)).await;
        }

        // ---
        // Act
        // ---
        token.cancel();

        // ---
        // Assert
        // ---
        joins_in_time("consumer", consumer_task).await;
        joins_in_time("supply", supply_task).await;
    }
}
