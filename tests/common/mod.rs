//! Common test infrastructure shared across integration tests.
//!
//! - `stubs`: the recording simulation and the test [`Config`](netplay_lockstep::Config)
//! - `test_utils`: session nodes, pairing and synchronization helpers
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{synchronized_pair, run_frames};
//! ```

pub mod stubs;
pub mod test_utils;

// These are public utilities for integration tests - allow unused until tests adopt them.
#[allow(unused_imports)]
pub use test_utils::{
    assert_in_lockstep, digest, frame_time, paired_nodes, run_frames, single_node, synchronize,
    synchronized_pair, Node, GUEST, HOST, MAX_SYNC_ITERATIONS,
};
