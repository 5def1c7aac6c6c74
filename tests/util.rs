//! Shared helpers for multi-rank integration tests.

use hypermesh::comm::ThreadComm;

/// Run `f` on `n` in-process ranks, one thread each, and collect the
/// per-rank results in rank order.
#[allow(dead_code)]
pub fn on_ranks<F, T>(n: usize, f: F) -> Vec<T>
where
    F: Fn(ThreadComm) -> T + Send + Sync + Copy + 'static,
    T: Send + 'static,
{
    let comms = ThreadComm::universe(n);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|c| std::thread::spawn(move || f(c)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
