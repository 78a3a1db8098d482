/*! Integration tests for Placard.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - order: Tests for order key allocation and rebalancing
 * - board: Tests for the BoardAggregate operations and invariants
 * - repository: Tests for the InMemoryRepository, its change feed and persistence
 * - pipeline: Tests for optimistic mutations, reconciliation and concurrent clients
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("placard=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod board;
mod helpers;
mod order;
mod pipeline;
mod repository;
