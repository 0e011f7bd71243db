// tests/supply.rs

mod common;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use common::{eventually, fast_backoff, joins_in_time, ConsumeRig, PublishRig, QUEUE};
use hookrelay::{MemoryBroker, Message, SessionSupply};

#[tokio::test]
async fn unreachable_broker_is_retried_until_it_comes_back() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("late-broker");
    broker.set_reachable(false);
    let rig = PublishRig::start(&broker);

    let (message, mut outcome) = Message::new("waits-for-broker");
    rig.inbound.send(message).await.unwrap();

    // ---
    // Act
    // ---
    eventually("several dial attempts", || broker.dial_attempts() >= 3).await;
    assert_eq!(outcome.try_outcome(), None, "nothing resolved while unreachable");
    assert!(!rig.supply_task.is_finished());

    broker.set_reachable(true);

    // ---
    // Assert
    // ---
    let delivered = tokio::time::timeout(common::WINDOW, outcome.wait())
        .await
        .expect("outcome");
    assert!(delivered);

    rig.token.cancel();
}

#[tokio::test]
async fn cancel_during_backoff_stops_every_task() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("scenario-c");
    broker.set_reachable(false);

    let publisher = PublishRig::start(&broker);
    let consumer = ConsumeRig::start(&broker, 1);

    eventually("supplies are backing off", || broker.dial_attempts() >= 2).await;

    // ---
    // Act
    // ---
    publisher.token.cancel();
    consumer.token.cancel();

    // ---
    // Assert
    // ---
    joins_in_time("publisher", publisher.publisher_task).await;
    joins_in_time("publish supply", publisher.supply_task).await;
    joins_in_time("consumer", consumer.consumer_task).await;
    joins_in_time("consume supply", consumer.supply_task).await;
}

#[tokio::test]
async fn cancelling_twice_is_harmless() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("double-cancel");
    broker.set_reachable(false);
    let token = CancellationToken::new();
    let (supply, handle) =
        SessionSupply::spawn(token.clone(), broker.connector(), QUEUE, fast_backoff());

    let reader = tokio::spawn({
        let supply = supply.clone();
        async move { supply.next().await.is_none() }
    });
    sleep(Duration::from_millis(20)).await;

    // ---
    // Act
    // ---
    token.cancel();
    token.cancel();

    // ---
    // Assert
    // ---
    assert!(reader.await.unwrap(), "blocked reader sees the supply close");
    joins_in_time("supply", handle).await;

    token.cancel();
    assert!(supply.next().await.is_none());
    assert!(supply.is_closed());
}

#[tokio::test]
async fn reconnects_after_broker_restart() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("restart");
    let rig = PublishRig::start(&broker);
    assert!(rig.publish("before").await);
    let dials_before = broker.dial_attempts();

    // ---
    // Act
    // ---
    broker.sever();
    broker.refuse_dials(2);

    // The dead session is only noticed on the next publish; that message is
    // reported failed and retried on the new connection.
    let noticed = rig.publish("noticed").await;
    let after = rig.publish("after").await;

    // ---
    // Assert
    // ---
    assert!(!noticed);
    assert!(after);
    assert!(broker.dial_attempts() >= dials_before + 3);

    let accepted = broker.accepted(QUEUE);
    assert_eq!(accepted.len(), 3);
    assert_eq!(accepted[1], "noticed");

    rig.token.cancel();
}

#[tokio::test]
async fn extreme_multiplier_keeps_redialing() {
    // ---
    // Arrange
    // ---
    let broker = MemoryBroker::new("steep-backoff");
    broker.refuse_dials(4);

    let token = CancellationToken::new();
    let backoff = hookrelay::BackoffConfig {
        multiplier: f32::INFINITY,
        ..fast_backoff()
    };
    let (supply, supply_task) =
        SessionSupply::spawn(token.clone(), broker.connector(), QUEUE, backoff);

    // ---
    // Act
    // ---
    let session = tokio::time::timeout(common::WINDOW, supply.next())
        .await
        .expect("supply stuck");

    // ---
    // Assert
    // ---
    assert!(session.is_some(), "supply survived the backoff schedule");
    assert_eq!(broker.dial_attempts(), 5);
    assert!(!supply_task.is_finished());

    token.cancel();
    joins_in_time("supply", supply_task).await;
}
