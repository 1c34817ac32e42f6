//! Block template assembly and the Cuckoo-Cycle CPU mining loop (spec.md §4.B).

pub mod cuckoo;
pub mod job;
pub mod reward;
pub mod template;

pub use cuckoo::{verify as verify_cuckoo, CuckooError, CuckooParams};
pub use job::{commit, find_nonce, mine, InThreadPool, Job, MiningWorkerPool, ThreadWorkerPool};
pub use reward::base_reward;
pub use template::{Block, Template, MAX_BLOCK_SIGOPS, MAX_BLOCK_WEIGHT};
