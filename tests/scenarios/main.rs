//! Request/reply scenarios using Cucumber.
//!
//! ```bash
//! cargo test --test scenarios --features test-utils
//! ```
//!
//! Services run over the in-memory broker; each scenario gets a fresh
//! deployment.

mod steps;

use cucumber::World;
use steps::RequestReplyWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running Request/Reply Scenarios ===\n");
    RequestReplyWorld::cucumber()
        .fail_on_skipped()
        .run("tests/features/request_reply.feature")
        .await;

    println!("\n=== Running Dispatch Scenarios ===\n");
    RequestReplyWorld::cucumber()
        .fail_on_skipped()
        .run("tests/features/dispatch.feature")
        .await;
}
