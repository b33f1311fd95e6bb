//! Bounded-concurrency task execution

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Run every task with at most `concurrency` in flight at once.
///
/// Tasks are launched in list order; a slot frees as soon as any task
/// completes and the next queued task takes it. Results are returned in
/// completion order. A task failure is just a value of `T` (callers use
/// `Result` or an outcome enum), so one failing task never aborts its
/// siblings. A concurrency of 0 is treated as 1.
pub async fn run_all<T, F>(tasks: Vec<F>, concurrency: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    let concurrency = concurrency.max(1);
    let mut queue = tasks.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut results = Vec::with_capacity(queue.len());

    loop {
        while in_flight.len() < concurrency {
            match queue.next() {
                Some(task) => in_flight.push(task),
                None => break,
            }
        }
        match in_flight.next().await {
            Some(output) => results.push(output),
            None => break,
        }
    }

    results
}
