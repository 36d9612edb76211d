//! Shared helpers for the multi-rank integration tests.

use gridswap::comm::LocalComm;
use std::thread;

/// Run `f` once per rank of an in-process universe of `n` ranks, each on
/// its own thread, and propagate any panic.
#[allow(dead_code)]
pub fn run_ranks<F>(n: usize, f: F)
where
    F: Fn(LocalComm) + Send + Sync + 'static + Clone,
{
    let handles: Vec<_> = LocalComm::universe(n)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
