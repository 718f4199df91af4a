use super::*;
use crate::bus::{MessageProperties, MockTransport, Settled};
use crate::dlq::{ChannelDeadLetterPublisher, RejectionDetails};
use serde_json::json;
use shelterhub_client::Reply;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

const QUEUE: &str = "shelterhub.auth";

struct Harness {
    transport: Arc<MockTransport>,
    dispatcher: Dispatcher,
    dead_letters: mpsc::UnboundedReceiver<DeadLetter>,
    calls: Arc<AtomicUsize>,
}

fn harness(max_redeliveries: u32) -> Harness {
    let transport = Arc::new(MockTransport::new());
    let (dlq, dead_letters) = ChannelDeadLetterPublisher::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let handlers = HandlerRegistry::new()
        .register(
            "echo",
            handler_fn(move |envelope: Envelope| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { HandlerResult::Ok(Reply::success("echoed").with_field("data", envelope.data)) }
            }),
        )
        .register(
            "refuse",
            handler_fn(|_| async { HandlerResult::Err(HandlerError::rejected("Passwords do not match!")) }),
        )
        .register(
            "explode",
            handler_fn(|_| async {
                HandlerResult::Err(HandlerError::Storage(crate::storage::StorageError::Query(
                    "disk on fire".to_string(),
                )))
            }),
        )
        .on("typed", |req: shelterhub_client::GetProfileRequest| async move {
            HandlerResult::Ok(Reply::ok().with_field("user_id", req.user_id))
        });

    let dispatcher = Dispatcher::new(
        transport.clone(),
        handlers,
        Arc::new(dlq),
        DispatcherConfig {
            queue: QUEUE.to_string(),
            service_name: "auth".to_string(),
            prefetch: 1,
            max_redeliveries,
        },
    );

    Harness {
        transport,
        dispatcher,
        dead_letters,
        calls,
    }
}

fn request(action: &str, data: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "action": action, "data": data })).unwrap()
}

fn props(redelivery_count: u32) -> MessageProperties {
    MessageProperties {
        correlation_id: Some("corr-1".to_string()),
        reply_to: Some("shelterhub.reply.web.1".to_string()),
        persistent: true,
        redelivery_count,
    }
}

async fn only_reply(transport: &MockTransport) -> (String, OutboundMessage, Reply) {
    let mut published = transport.take_published().await;
    assert_eq!(published.len(), 1, "expected exactly one reply");
    let (queue, message) = published.remove(0);
    let reply = Reply::from_slice(&message.payload).unwrap();
    (queue, message, reply)
}

#[tokio::test]
async fn test_handled_action_replies_with_correlation_and_acks() {
    let mut h = harness(5);
    let delivery = h
        .transport
        .delivery(QUEUE, request("echo", json!({ "x": 1 })), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);

    let (queue, message, reply) = only_reply(&h.transport).await;
    assert_eq!(queue, "shelterhub.reply.web.1");
    assert_eq!(message.properties.correlation_id.as_deref(), Some("corr-1"));
    assert!(!message.properties.persistent);
    assert!(reply.success);
    assert_eq!(reply.fields["data"], json!({ "x": 1 }));

    assert!(matches!(h.transport.settlements().await.as_slice(), [Settled::Acked]));
    assert!(h.dead_letters.try_recv().is_err());
    assert_eq!(h.dispatcher.state(), ConsumerState::Idle);
}

#[tokio::test]
async fn test_business_failure_is_a_reply_and_acked() {
    let h = harness(5);
    let delivery = h.transport.delivery(QUEUE, request("refuse", json!({})), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);

    let (_, _, reply) = only_reply(&h.transport).await;
    assert!(!reply.success);
    assert_eq!(reply.message.as_deref(), Some("Passwords do not match!"));
}

#[tokio::test]
async fn test_collaborator_failure_replies_internal_error() {
    let h = harness(5);
    let delivery = h.transport.delivery(QUEUE, request("explode", json!({})), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);

    let (_, _, reply) = only_reply(&h.transport).await;
    assert_eq!(reply.message.as_deref(), Some("Internal Server Error"));
}

#[tokio::test]
async fn test_invalid_payload_replies_invalid_request() {
    let h = harness(5);
    let delivery = h
        .transport
        .delivery(QUEUE, request("typed", json!({ "user_id": "abc" })), props(0));

    h.dispatcher.process(delivery).await;

    let (_, _, reply) = only_reply(&h.transport).await;
    assert!(!reply.success);
    assert!(reply
        .message
        .as_deref()
        .unwrap_or_default()
        .starts_with("Invalid request: "));
}

#[tokio::test]
async fn test_typed_payload_accepts_numeric_string_id() {
    let h = harness(5);
    let delivery = h
        .transport
        .delivery(QUEUE, request("typed", json!({ "user_id": "42" })), props(0));

    h.dispatcher.process(delivery).await;

    let (_, _, reply) = only_reply(&h.transport).await;
    assert_eq!(reply.field::<i64>("user_id").unwrap(), 42);
}

#[tokio::test]
async fn test_unknown_action_acked_without_reply() {
    let h = harness(5);
    let delivery = h.transport.delivery(QUEUE, request("teleport", json!({})), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);

    assert_eq!(h.transport.published_count().await, 0);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert!(matches!(h.transport.settlements().await.as_slice(), [Settled::Acked]));
}

#[tokio::test]
async fn test_undecodable_body_is_dead_lettered_not_requeued() {
    let mut h = harness(5);
    let delivery = h.transport.delivery(QUEUE, &b"{not json"[..], props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::DeadLettered);

    assert!(matches!(h.transport.settlements().await.as_slice(), [Settled::Rejected]));
    assert_eq!(h.transport.published_count().await, 0);

    let dead = h.dead_letters.try_recv().unwrap();
    assert_eq!(dead.queue, QUEUE);
    assert_eq!(dead.payload, "{not json");
    assert!(matches!(dead.rejection_details, RejectionDetails::DecodeFailed { .. }));
}

#[tokio::test]
async fn test_no_reply_address_still_handles_and_acks() {
    let h = harness(5);
    let delivery = h.transport.delivery(
        QUEUE,
        request("echo", json!({})),
        MessageProperties {
            reply_to: None,
            ..props(0)
        },
    );

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.published_count().await, 0);
}

#[tokio::test]
async fn test_reply_publish_failure_requeues_with_incremented_count() {
    let h = harness(5);
    h.transport.fail_next_publishes(1);
    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(2));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Requeued);

    let settled = h.transport.settlements().await;
    match settled.as_slice() {
        [Settled::Requeued(message)] => {
            assert_eq!(message.properties.redelivery_count, 3);
            assert_eq!(message.properties.correlation_id.as_deref(), Some("corr-1"));
        }
        other => panic!("Expected one requeue, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reply_publish_failure_at_bound_dead_letters() {
    let mut h = harness(2);
    h.transport.fail_next_publishes(1);
    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(2));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::DeadLettered);

    let dead = h.dead_letters.try_recv().unwrap();
    match dead.rejection_details {
        RejectionDetails::RedeliveryExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("Expected RedeliveryExhausted, got {:?}", other),
    }
    assert_eq!(dead.metadata.get("action").map(String::as_str), Some("echo"));
}

/// Turn a requeued message back into the delivery the broker would hand out.
fn redeliver(transport: &MockTransport, message: OutboundMessage) -> Delivery {
    transport.delivery(QUEUE, message.payload, message.properties)
}

async fn take_requeued(transport: &MockTransport) -> OutboundMessage {
    let settled = transport.settlements().await;
    match settled.last() {
        Some(Settled::Requeued(message)) => message.clone(),
        other => panic!("Expected a requeue, got {:?}", other),
    }
}

#[tokio::test]
async fn test_redelivered_request_resends_reply_without_rerunning_handler() {
    let h = harness(5);
    h.transport.fail_next_publishes(1);
    let delivery = h
        .transport
        .delivery(QUEUE, request("echo", json!({ "seat": 7 })), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Requeued);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.published_count().await, 0);

    let requeued = take_requeued(&h.transport).await;
    let redelivered = redeliver(&h.transport, requeued);
    assert_eq!(h.dispatcher.process(redelivered).await, Settlement::Acked);

    assert_eq!(h.calls.load(Ordering::SeqCst), 1, "handler must run once per request");
    let (queue, message, reply) = only_reply(&h.transport).await;
    assert_eq!(queue, "shelterhub.reply.web.1");
    assert_eq!(message.properties.correlation_id.as_deref(), Some("corr-1"));
    assert_eq!(reply.fields["data"], json!({ "seat": 7 }));
    assert!(h.dispatcher.settled.is_empty());
}

#[tokio::test]
async fn test_stored_reply_survives_repeated_publish_failures() {
    let h = harness(5);
    h.transport.fail_next_publishes(2);
    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Requeued);
    let again = redeliver(&h.transport, take_requeued(&h.transport).await);
    assert_eq!(h.dispatcher.process(again).await, Settlement::Requeued);
    let last = redeliver(&h.transport, take_requeued(&h.transport).await);
    assert_eq!(last.redelivery_count(), 2);
    assert_eq!(h.dispatcher.process(last).await, Settlement::Acked);

    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.published_count().await, 1);
}

#[tokio::test]
async fn test_uncorrelated_reply_failure_is_not_requeued() {
    let h = harness(5);
    h.transport.fail_next_publishes(1);
    let delivery = h.transport.delivery(
        QUEUE,
        request("echo", json!({})),
        MessageProperties {
            correlation_id: None,
            ..props(0)
        },
    );

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::Acked);
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert!(h.dispatcher.settled.is_empty());
}

#[tokio::test]
async fn test_failed_requeue_is_dead_lettered_not_reported_requeued() {
    let mut h = harness(5);
    h.transport.fail_next_publishes(1);
    h.transport.set_fail_requeue(true);
    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(0));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::DeadLettered);

    let dead = h.dead_letters.try_recv().unwrap();
    assert!(dead.metadata.contains_key("requeue_error"));
    assert!(matches!(h.transport.settlements().await.as_slice(), [Settled::Rejected]));
    assert!(h.dispatcher.settled.is_empty());
}

#[tokio::test]
async fn test_unreachable_dlq_requeues_under_bound() {
    let Harness {
        transport,
        dispatcher,
        dead_letters,
        ..
    } = harness(5);
    drop(dead_letters);
    let delivery = transport.delivery(QUEUE, &b"{not json"[..], props(1));

    assert_eq!(dispatcher.process(delivery).await, Settlement::Requeued);

    let requeued = take_requeued(&transport).await;
    assert_eq!(requeued.properties.redelivery_count, 2);
}

#[tokio::test]
async fn test_unreachable_dlq_drops_at_bound() {
    let Harness {
        transport,
        dispatcher,
        dead_letters,
        ..
    } = harness(2);
    drop(dead_letters);
    let delivery = transport.delivery(QUEUE, &b"{not json"[..], props(2));

    assert_eq!(dispatcher.process(delivery).await, Settlement::Dropped);
    assert!(matches!(transport.settlements().await.as_slice(), [Settled::Rejected]));
}

#[tokio::test]
async fn test_state_followers_notified_after_processing() {
    let h = harness(5);
    let mut states = h.dispatcher.subscribe_state();
    assert_eq!(*states.borrow_and_update(), ConsumerState::Idle);

    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(0));
    h.dispatcher.process(delivery).await;

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConsumerState::Idle);
}

#[tokio::test]
async fn test_past_bound_dead_lettered_without_running_handler() {
    let mut h = harness(2);
    let delivery = h.transport.delivery(QUEUE, request("echo", json!({})), props(3));

    assert_eq!(h.dispatcher.process(delivery).await, Settlement::DeadLettered);

    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.published_count().await, 0);
    assert!(h.dead_letters.try_recv().is_ok());
}

#[tokio::test]
async fn test_run_stops_when_cancelled() {
    let h = harness(5);
    let token = CancellationToken::new();
    token.cancel();

    h.dispatcher.run(token).await.unwrap();
    assert_eq!(h.dispatcher.state(), ConsumerState::Stopped);
}

#[test]
fn test_dispatch_futures_can_be_spawned() {
    fn assert_send<T: Send>(_: &T) {}
    fn assert_sync<T: Sync>() {}

    assert_sync::<Delivery>();
    let h = harness(5);
    let run = h.dispatcher.run(CancellationToken::new());
    assert_send(&run);
    let process = h
        .dispatcher
        .process(h.transport.delivery(QUEUE, request("echo", json!({})), props(0)));
    assert_send(&process);
}

#[test]
fn test_registry_lists_actions_sorted() {
    let h = harness(5);
    assert_eq!(h.dispatcher.handlers.actions(), vec!["echo", "explode", "refuse", "typed"]);
    assert!(h.dispatcher.handlers.contains("echo"));
    assert!(!h.dispatcher.handlers.contains("teleport"));
}

#[test]
fn test_config_for_service() {
    let config = DispatcherConfig::for_service(Service::Profile, &DispatcherSettings::default());
    assert_eq!(config.queue, "shelterhub.profile");
    assert_eq!(config.service_name, "profile");
    assert_eq!(config.prefetch, 1);
    assert_eq!(config.max_redeliveries, 5);
}

#[cfg(feature = "channel")]
mod over_channel {
    use super::*;
    use crate::bus::ChannelBroker;
    use crate::dlq::NoopDeadLetterPublisher;
    use parking_lot::Mutex;

    /// X takes a while; Y must not start until X has been settled.
    #[tokio::test]
    async fn test_messages_processed_one_at_a_time_in_order() {
        let broker = ChannelBroker::new();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let handler_log = log.clone();
        let handlers = HandlerRegistry::new().register(
            "step",
            handler_fn(move |envelope: Envelope| {
                let log = handler_log.clone();
                async move {
                    let name = envelope.data["name"].as_str().unwrap_or_default().to_string();
                    log.lock().push(format!("{name}-start"));
                    if name == "X" {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    log.lock().push(format!("{name}-end"));
                    HandlerResult::Ok(Reply::ok())
                }
            }),
        );

        let transport: Arc<dyn Transport> = Arc::new(broker.connect());
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            handlers,
            Arc::new(NoopDeadLetterPublisher),
            DispatcherConfig {
                queue: QUEUE.to_string(),
                service_name: "auth".to_string(),
                prefetch: 1,
                max_redeliveries: 5,
            },
        ));

        let token = CancellationToken::new();
        let runner = {
            let dispatcher = dispatcher.clone();
            let token = token.clone();
            tokio::spawn(async move { dispatcher.run(token).await })
        };

        let client = broker.connect();
        client.declare_queue(QUEUE, QueueKind::Durable).await.unwrap();
        for name in ["X", "Y"] {
            client
                .publish(QUEUE, OutboundMessage::new(request("step", json!({ "name": name }))))
                .await
                .unwrap();
        }

        for _ in 0..100 {
            if log.lock().len() == 4 && broker.queue_depth(QUEUE) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*log.lock(), vec!["X-start", "X-end", "Y-start", "Y-end"]);

        token.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(dispatcher.state(), ConsumerState::Stopped);
    }
}
