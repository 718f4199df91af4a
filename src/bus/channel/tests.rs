use super::*;
use futures::StreamExt;
use std::time::Duration;

fn message(body: &'static [u8]) -> OutboundMessage {
    OutboundMessage::new(Bytes::from_static(body))
}

async fn next(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("timed out waiting for delivery")
        .expect("stream ended")
        .expect("delivery error")
}

#[tokio::test]
async fn test_publish_to_undeclared_queue_is_dropped() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();

    transport.publish("nowhere", message(b"{}")).await.unwrap();
    assert!(!broker.queue_exists("nowhere"));
}

#[tokio::test]
async fn test_publish_and_consume_preserves_properties() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();
    transport
        .declare_queue("shelterhub.auth", QueueKind::Durable)
        .await
        .unwrap();

    transport
        .publish(
            "shelterhub.auth",
            message(b"{\"action\":\"logout\"}")
                .with_correlation_id("c-1")
                .with_reply_to("reply-q"),
        )
        .await
        .unwrap();
    assert_eq!(broker.queue_depth("shelterhub.auth"), 1);

    let mut stream = transport
        .consume("shelterhub.auth", ConsumeOptions::default())
        .await
        .unwrap();
    let delivery = next(&mut stream).await;

    assert_eq!(delivery.correlation_id(), Some("c-1"));
    assert_eq!(delivery.reply_to(), Some("reply-q"));
    assert_eq!(&delivery.payload[..], b"{\"action\":\"logout\"}");
    assert_eq!(broker.queue_depth("shelterhub.auth"), 0);
    delivery.ack().await.unwrap();
}

#[tokio::test]
async fn test_prefetch_one_holds_next_until_settled() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();
    transport.declare_queue("q", QueueKind::Durable).await.unwrap();
    transport.publish("q", message(b"first")).await.unwrap();
    transport.publish("q", message(b"second")).await.unwrap();

    let mut stream = transport.consume("q", ConsumeOptions::default()).await.unwrap();
    let first = next(&mut stream).await;
    assert_eq!(&first.payload[..], b"first");

    let blocked = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(blocked.is_err(), "second delivery arrived before first was settled");

    first.ack().await.unwrap();
    let second = next(&mut stream).await;
    assert_eq!(&second.payload[..], b"second");
}

#[tokio::test]
async fn test_requeue_goes_to_back_with_count() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();
    transport.declare_queue("q", QueueKind::Durable).await.unwrap();
    transport.publish("q", message(b"a")).await.unwrap();
    transport.publish("q", message(b"b")).await.unwrap();

    let mut stream = transport.consume("q", ConsumeOptions::default()).await.unwrap();
    let a = next(&mut stream).await;
    a.requeue().await.unwrap();

    let b = next(&mut stream).await;
    assert_eq!(&b.payload[..], b"b");
    b.ack().await.unwrap();

    let again = next(&mut stream).await;
    assert_eq!(&again.payload[..], b"a");
    assert_eq!(again.redelivery_count(), 1);
}

#[tokio::test]
async fn test_reply_queue_is_exclusive_and_deleted_on_close() {
    let broker = ChannelBroker::new();
    let owner = broker.connect();
    let other = broker.connect();

    owner
        .declare_queue("shelterhub.reply.web.1", QueueKind::Reply)
        .await
        .unwrap();
    assert!(other
        .declare_queue("shelterhub.reply.web.1", QueueKind::Reply)
        .await
        .is_err());

    owner.close().await.unwrap();
    assert!(!broker.queue_exists("shelterhub.reply.web.1"));
}

#[tokio::test]
async fn test_redeclare_with_other_kind_fails() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();
    transport.declare_queue("q", QueueKind::Durable).await.unwrap();
    transport.declare_queue("q", QueueKind::Durable).await.unwrap();
    assert!(transport.declare_queue("q", QueueKind::Reply).await.is_err());
}

#[tokio::test]
async fn test_close_is_idempotent_and_ends_consumers() {
    let broker = ChannelBroker::new();
    let transport = broker.connect();
    transport.declare_queue("q", QueueKind::Durable).await.unwrap();
    let mut stream = transport.consume("q", ConsumeOptions::default()).await.unwrap();

    transport.close().await.unwrap();
    transport.close().await.unwrap();

    assert!(transport.is_closed());
    let ended = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap();
    assert!(ended.is_none());
    assert!(matches!(
        transport.publish("q", message(b"x")).await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn test_durable_queue_survives_consumer_transport() {
    let broker = ChannelBroker::new();
    let service = broker.connect();
    service.declare_queue("q", QueueKind::Durable).await.unwrap();
    service.close().await.unwrap();

    let caller = broker.connect();
    caller.publish("q", message(b"kept")).await.unwrap();

    let restarted = broker.connect();
    let mut stream = restarted.consume("q", ConsumeOptions::default()).await.unwrap();
    assert_eq!(&next(&mut stream).await.payload[..], b"kept");
}

#[tokio::test]
async fn test_consume_unknown_queue_fails() {
    let transport = ChannelBroker::new().connect();
    let result = transport.consume("missing", ConsumeOptions::default()).await;
    assert!(matches!(result, Err(BusError::Subscribe(_))));
}
