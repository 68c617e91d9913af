//! Identifier and pipeline fixtures

use super::MockSubmitter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tza_archiver::{ContentId, Coordinator, GatewayResolver, Pipeline, StateStore};

pub const TEST_GATEWAY: &str = "https://ipfs.fileship.xyz";

const BASE58: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Distinct, well-formed CIDv0 for index `n`
pub fn cid(n: usize) -> ContentId {
    let mut tail = String::new();
    let mut value = n;
    for _ in 0..4 {
        tail.push(BASE58[value % BASE58.len()] as char);
        value /= BASE58.len();
    }
    ContentId::new(format!("Qm{}{}", "1".repeat(40), tail))
}

pub fn cids(count: usize) -> Vec<ContentId> {
    (0..count).map(cid).collect()
}

/// Pipeline over `data_dir` with a fresh store loaded from disk
pub fn create_test_pipeline(
    data_dir: &Path,
    submitter: MockSubmitter,
    capacity: usize,
    spacing: Duration,
) -> (Pipeline<MockSubmitter>, Arc<MockSubmitter>) {
    let store = Arc::new(StateStore::load(data_dir));
    let submitter = Arc::new(submitter);
    let pipeline = Pipeline::new(
        store,
        Arc::clone(&submitter),
        GatewayResolver::new(TEST_GATEWAY).expect("valid gateway"),
        Coordinator::new(capacity, spacing),
    );
    (pipeline, submitter)
}
