//! Interface tests for the simulated broker using Cucumber.
//!
//! Scenarios drive the broker only through the `Connection`/`Channel`
//! traits, so they describe what application code observes.
//!
//! ```bash
//! cargo test --test interfaces
//! WARREN_LOG=debug cargo test --test interfaces
//! ```

mod context;
mod steps;

use cucumber::World;
use steps::consuming::ConsumingWorld;
use steps::routing::RoutingWorld;

#[tokio::main]
async fn main() {
    warren::utils::bootstrap::init_tracing();

    // Run routing tests
    println!("\n=== Running Routing Interface Tests ===\n");
    RoutingWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/routing.feature")
        .await;

    // Run consuming tests
    println!("\n=== Running Consuming Interface Tests ===\n");
    ConsumingWorld::cucumber()
        .fail_on_skipped()
        .run("tests/interfaces/features/consuming.feature")
        .await;
}
