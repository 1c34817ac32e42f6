//! The PoW search loop: pairs a `Template` with mutable `(nonce1, nonce2)`
//! and drives `cuckoo::solve` against the target until a solution is found,
//! the tip moves, or the template goes stale (spec.md §4.B).

use std::time::{Duration, Instant};

use hns_chain::header::meets_target;
use hns_chain::Hash;

use crate::cuckoo::{self, CuckooParams};
use crate::template::{extra_nonce_bytes, Block, Template};

const STALE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Job {
    pub template: Template,
    pub nonce1: u64,
    pub nonce2: u64,
    start: Instant,
    pub destroyed: bool,
}

impl Job {
    pub fn new(template: Template) -> Self {
        Job {
            template,
            nonce1: 0,
            nonce2: 0,
            start: Instant::now(),
            destroyed: false,
        }
    }

    fn header_prefix(&self) -> [u8; hns_chain::HEADER_SIZE] {
        let mut header = self.template.get_proof(self.nonce1, self.nonce2, self.template.time, vec![]);
        header.extra_nonce = extra_nonce_bytes(self.nonce1, self.nonce2);
        header.encode_prefix()
    }

    pub fn bump_nonce(&mut self) {
        let (next, overflow) = self.nonce2.overflowing_add(1);
        self.nonce2 = next;
        if overflow {
            self.nonce1 = self.nonce1.wrapping_add(1);
        }
    }

    pub fn is_stale(&self) -> bool {
        self.start.elapsed() > STALE_AFTER
    }

    /// Called on every mempool poll; destroys the job once it has run past
    /// the 10-second staleness window so the caller builds a fresh one.
    pub fn notify_entry(&mut self) {
        if self.is_stale() {
            self.destroyed = true;
        }
    }

    /// Called on a new chain tip: if it shares this job's `prevBlock`, a
    /// competing block won the race and this job is moot.
    pub fn on_new_tip(&mut self, new_tip_prev_block: Hash) {
        if new_tip_prev_block == self.template.prev_block {
            self.destroyed = true;
        }
    }
}

/// Runs up to `interval` nonce attempts against `job`'s current merkle
/// roots, returning the first solution whose PoW hash meets `target_bits`.
pub fn mine(job: &mut Job, target_bits: u32, interval: u64, params: &CuckooParams) -> Option<Vec<u32>> {
    for _ in 0..interval {
        if job.destroyed || job.is_stale() {
            return None;
        }
        let prefix = job.header_prefix();
        let prehash = Hash::digest(&prefix);
        if let Some(sol) = cuckoo::solve(prehash.as_bytes(), params) {
            let sol_bytes: Vec<u8> = sol.iter().flat_map(|e| e.to_le_bytes()).collect();
            let sol_hash = Hash::digest(&sol_bytes);
            let combined = Hash::digest_many(&[prehash.as_bytes(), sol_hash.as_bytes()]);
            if meets_target(&combined, target_bits) {
                return Some(sol);
            }
        }
        job.bump_nonce();
    }
    None
}

/// `findNonce(job)`: the outer retry loop — on an empty scan, bump the
/// nonce and try again until destroyed or stale.
pub fn find_nonce(job: &mut Job, target_bits: u32, interval: u64, params: &CuckooParams) -> Option<Vec<u32>> {
    while !job.destroyed {
        if let Some(sol) = mine(job, target_bits, interval, params) {
            return Some(sol);
        }
        if job.is_stale() {
            job.destroyed = true;
            return None;
        }
    }
    None
}

/// Assembles the winning block once `find_nonce` returns a solution.
pub fn commit(job: &Job, solution: Vec<u32>) -> Block {
    let header = job
        .template
        .get_proof(job.nonce1, job.nonce2, job.template.time, solution);
    job.template.commit(header)
}

/// `mine` is allowed to run in-thread or be offloaded to a worker pool; both
/// forms must be behaviorally identical.
pub trait MiningWorkerPool: Send + Sync {
    fn mine(&self, job: &mut Job, target_bits: u32, interval: u64, params: &CuckooParams) -> Option<Vec<u32>>;
}

pub struct InThreadPool;

impl MiningWorkerPool for InThreadPool {
    fn mine(&self, job: &mut Job, target_bits: u32, interval: u64, params: &CuckooParams) -> Option<Vec<u32>> {
        mine(job, target_bits, interval, params)
    }
}

/// Offloads the scan to a dedicated OS thread; the job is cloned in, mined,
/// and the advanced nonce state is copied back so the caller sees the same
/// progress it would from `InThreadPool`.
pub struct ThreadWorkerPool;

impl MiningWorkerPool for ThreadWorkerPool {
    fn mine(&self, job: &mut Job, target_bits: u32, interval: u64, params: &CuckooParams) -> Option<Vec<u32>> {
        let mut worker_job = job.clone();
        let params = *params;
        let handle = std::thread::spawn(move || {
            let sol = mine(&mut worker_job, target_bits, interval, &params);
            (worker_job, sol)
        });
        let (updated, sol) = handle.join().expect("mining thread panicked");
        *job = updated;
        sol
    }
}
