//! Step definitions for the request/reply and dispatch scenarios.

use std::sync::Arc;
use std::time::Duration;

use cucumber::{given, then, when, World};
use futures::StreamExt;
use serde_json::{Map, Value};
use shelterhub::bus::{
    ChannelTransport, ConsumeOptions, Delivery, OutboundMessage, QueueKind, Transport,
};
use shelterhub::dispatch::{HandlerError, HandlerRegistry, HandlerResult};
use shelterhub::dlq::RejectionDetails;
use shelterhub::rpc::{RpcClient, RpcError};
use shelterhub::test_utils::TestDeployment;
use shelterhub_client::{GetProfileRequest, Profile, Reply, Service};
use tokio::sync::mpsc;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(World)]
#[world(init = Self::new)]
pub struct RequestReplyWorld {
    deployment: Option<TestDeployment>,
    client: Option<RpcClient>,
    outcome: Option<Result<Reply, RpcError>>,
    /// Requests taken off a queue by a responder that does not reply.
    held: Option<mpsc::UnboundedReceiver<Delivery>>,
    responder: Option<Arc<ChannelTransport>>,
    late_reply_queue: Option<String>,
}

impl std::fmt::Debug for RequestReplyWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReplyWorld")
            .field("deployment", &self.deployment.is_some())
            .field("client", &self.client.as_ref().map(|c| c.reply_queue().to_string()))
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl RequestReplyWorld {
    fn new() -> Self {
        Self {
            deployment: None,
            client: None,
            outcome: None,
            held: None,
            responder: None,
            late_reply_queue: None,
        }
    }

    fn deployment(&mut self) -> &mut TestDeployment {
        self.deployment
            .get_or_insert_with(|| TestDeployment::start(&[]))
    }

    async fn client(&mut self) -> RpcClient {
        if let Some(client) = &self.client {
            return client.clone();
        }
        let client = self.deployment().client("scenario", DEFAULT_TIMEOUT).await;
        self.client = Some(client.clone());
        client
    }

    async fn call(&mut self, service: &str, action: &str, data: Map<String, Value>, timeout: Option<Duration>) {
        let service: Service = service.parse().expect("Unknown service");
        let client = self.client().await;
        self.outcome = Some(client.call(service.queue(), action, data, timeout).await);
    }

    fn reply(&self) -> &Reply {
        match self.outcome.as_ref().expect("No call made") {
            Ok(reply) => reply,
            Err(e) => panic!("Expected a reply, got {:?}", e),
        }
    }
}

fn user_data(user_id: i64) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("user_id".to_string(), Value::from(user_id));
    data
}

// ==========================================================================
// Services
// ==========================================================================

#[given(regex = r"^the (auth|shelter|profile) service is running$")]
async fn given_service_running(world: &mut RequestReplyWorld, service: String) {
    let service: Service = service.parse().expect("Unknown service");
    world.deployment().add_service(service);
}

#[given(expr = "a profile service that knows user {int} as {string} with email {string}")]
async fn given_profile_fixture(world: &mut RequestReplyWorld, id: i64, name: String, email: String) {
    let profile = Profile { id, name, email };
    let handlers = HandlerRegistry::new().on("get_profile", move |req: GetProfileRequest| {
        let profile = profile.clone();
        async move {
            if req.user_id != profile.id {
                return HandlerResult::Err(HandlerError::rejected("User not found"));
            }
            HandlerResult::Ok(Reply::ok().with_serialized("profile", &profile)?)
        }
    });
    world.deployment().add_dispatcher(Service::Profile, handlers);
}

#[given("a profile service that holds requests without replying")]
async fn given_holding_responder(world: &mut RequestReplyWorld) {
    let transport = Arc::new(world.deployment().broker.connect());
    let queue = Service::Profile.queue();
    transport
        .declare_queue(queue, QueueKind::Durable)
        .await
        .expect("Failed to declare queue");
    let mut stream = transport
        .consume(queue, ConsumeOptions::default())
        .await
        .expect("Failed to consume");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(Ok(delivery)) = stream.next().await {
            if tx.send(delivery).is_err() {
                break;
            }
        }
    });

    world.held = Some(rx);
    world.responder = Some(transport);
}

#[given(expr = "{string} is already registered")]
async fn given_registered(world: &mut RequestReplyWorld, email: String) {
    let data = serde_json::json!({
        "name": "Existing",
        "email": email,
        "password": "pw",
        "password_confirm": "pw",
    });
    let data = data.as_object().cloned().unwrap_or_default();
    world.call("auth", "register", data, None).await;
    assert!(world.reply().success, "Setup registration failed: {:?}", world.outcome);
}

// ==========================================================================
// Calls
// ==========================================================================

#[when(regex = r#"^the client calls "(\w+)" on "(\w+)" for user (\d+)$"#)]
async fn when_call_for_user(world: &mut RequestReplyWorld, action: String, service: String, user_id: i64) {
    world.call(&service, &action, user_data(user_id), None).await;
}

#[when(regex = r#"^the client calls "(\w+)" on "(\w+)" for user (\d+) with a (\d+) ms timeout$"#)]
async fn when_call_for_user_with_timeout(
    world: &mut RequestReplyWorld,
    action: String,
    service: String,
    user_id: i64,
    timeout_ms: u64,
) {
    world
        .call(&service, &action, user_data(user_id), Some(Duration::from_millis(timeout_ms)))
        .await;
}

#[when(regex = r#"^the client calls "(\w+)" on "(\w+)" with a (\d+) ms timeout$"#)]
async fn when_call_with_timeout(world: &mut RequestReplyWorld, action: String, service: String, timeout_ms: u64) {
    world
        .call(&service, &action, Map::new(), Some(Duration::from_millis(timeout_ms)))
        .await;
}

#[when(regex = r#"^the client calls "(\w+)" on "(\w+)" with data (.+)$"#)]
async fn when_call_with_data(world: &mut RequestReplyWorld, action: String, service: String, json: String) {
    let data = match serde_json::from_str::<Value>(&json).expect("Invalid JSON in step") {
        Value::Object(map) => map,
        other => panic!("Step data must be an object, got {}", other),
    };
    world.call(&service, &action, data, None).await;
}

#[when(expr = "the client registers {string} with password {string} and confirmation {string}")]
async fn when_register(world: &mut RequestReplyWorld, email: String, password: String, confirm: String) {
    let data = serde_json::json!({
        "name": "Ada",
        "email": email,
        "password": password,
        "password_confirm": confirm,
    });
    let data = data.as_object().cloned().unwrap_or_default();
    world.call("auth", "register", data, None).await;
}

#[when(expr = "a raw message {string} is published to {string}")]
async fn when_raw_message(world: &mut RequestReplyWorld, body: String, service: String) {
    let service: Service = service.parse().expect("Unknown service");
    let producer = world.deployment().broker.connect();
    producer
        .declare_queue(service.queue(), QueueKind::Durable)
        .await
        .expect("Failed to declare queue");
    producer
        .publish(
            service.queue(),
            OutboundMessage::new(body.into_bytes()).with_correlation_id("raw-1"),
        )
        .await
        .expect("Failed to publish");
    producer.close().await.expect("Failed to close producer");
}

#[when("the held request is answered late")]
async fn when_answered_late(world: &mut RequestReplyWorld) {
    let held = world.held.as_mut().expect("No holding responder");
    let delivery = tokio::time::timeout(DEFAULT_TIMEOUT, held.recv())
        .await
        .expect("No request was held")
        .expect("Responder stopped");

    let reply_to = delivery.reply_to().expect("Request without reply address").to_string();
    let correlation_id = delivery
        .correlation_id()
        .expect("Request without correlation id")
        .to_string();
    let body = Reply::ok().with_field("late", true).to_vec().expect("Failed to encode reply");

    let responder = world.responder.as_ref().expect("No responder");
    responder
        .publish(
            &reply_to,
            OutboundMessage::new(body)
                .with_correlation_id(correlation_id)
                .persistent(false),
        )
        .await
        .expect("Failed to publish late reply");
    delivery.ack().await.expect("Failed to ack");

    world.late_reply_queue = Some(reply_to);
}

// ==========================================================================
// Outcomes
// ==========================================================================

#[then("the call succeeds")]
async fn then_call_succeeds(world: &mut RequestReplyWorld) {
    assert!(world.reply().success, "Reply: {:?}", world.reply());
}

#[then(expr = "the reply carries profile {int} named {string} with email {string}")]
async fn then_reply_profile(world: &mut RequestReplyWorld, id: i64, name: String, email: String) {
    let profile: Profile = world.reply().field("profile").expect("No profile in reply");
    assert_eq!(profile, Profile { id, name, email });
}

#[then(expr = "the reply fails with {string}")]
async fn then_reply_fails_with(world: &mut RequestReplyWorld, message: String) {
    let reply = world.reply();
    assert!(!reply.success);
    assert_eq!(reply.message.as_deref(), Some(message.as_str()));
}

#[then(expr = "the reply fails with a message starting {string}")]
async fn then_reply_fails_starting(world: &mut RequestReplyWorld, prefix: String) {
    let reply = world.reply();
    assert!(!reply.success);
    let message = reply.message.as_deref().unwrap_or_default();
    assert!(message.starts_with(&prefix), "Message: {}", message);
}

#[then("the call times out")]
async fn then_call_times_out(world: &mut RequestReplyWorld) {
    assert!(
        matches!(world.outcome, Some(Err(RpcError::Timeout { .. }))),
        "Outcome: {:?}",
        world.outcome
    );
}

#[then("the late reply is discarded")]
async fn then_late_reply_discarded(world: &mut RequestReplyWorld) {
    let reply_queue = world.late_reply_queue.clone().expect("No late reply sent");
    let broker = world.deployment().broker.clone();

    // Wait for the reply listener to take it off the queue.
    let consumed = tokio::time::timeout(DEFAULT_TIMEOUT, async {
        while broker.queue_depth(&reply_queue) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(consumed.is_ok(), "Late reply never consumed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The caller already saw its timeout; nothing replaced it.
    assert!(
        matches!(world.outcome, Some(Err(RpcError::Timeout { .. }))),
        "Outcome: {:?}",
        world.outcome
    );
}

#[then("no requests are pending")]
async fn then_nothing_pending(world: &mut RequestReplyWorld) {
    let client = world.client().await;
    assert_eq!(client.pending(), 0);
}

#[then("the client still gets replies to new calls")]
async fn then_client_still_works(world: &mut RequestReplyWorld) {
    world.call("auth", "logout", Map::new(), None).await;
    assert_eq!(world.reply().message.as_deref(), Some("Logged out successfully"));
}

#[then("storage was never queried")]
async fn then_storage_untouched(world: &mut RequestReplyWorld) {
    assert_eq!(world.deployment().store.query_count(), 0);
}

#[then(expr = "the {string} queue is empty")]
async fn then_queue_empty(world: &mut RequestReplyWorld, service: String) {
    let service: Service = service.parse().expect("Unknown service");
    assert_eq!(world.deployment().broker.queue_depth(service.queue()), 0);
}

#[then("nothing was dead-lettered")]
async fn then_no_dead_letters(world: &mut RequestReplyWorld) {
    assert!(world.deployment().dead_letters.try_recv().is_err());
}

#[then(expr = "a dead letter for {string} records a decode failure")]
async fn then_dead_letter_decode_failure(world: &mut RequestReplyWorld, queue: String) {
    let dead_letters = &mut world.deployment().dead_letters;
    let dead_letter = tokio::time::timeout(DEFAULT_TIMEOUT, dead_letters.recv())
        .await
        .expect("No dead letter")
        .expect("Dead-letter channel closed");
    assert_eq!(dead_letter.queue, queue);
    assert!(matches!(
        dead_letter.rejection_details,
        RejectionDetails::DecodeFailed { .. }
    ));
}
