//! Bounded worker pool over scoped threads.

use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

/// Outcome of one job. `Err` holds the panic message of a job that unwound.
pub type JobOutcome<R> = Result<R, String>;

/// Runs `job` over every item with at most `workers` threads.
///
/// Workers pull the next index from a shared counter, so a slow item never
/// holds up the rest of the queue. A panicking job is caught and reported for
/// that item only. The returned vector is in input order.
pub fn run_bounded<T, R, F>(items: &[T], workers: usize, job: F) -> Vec<JobOutcome<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let degree = workers.max(1).min(items.len());

    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<JobOutcome<R>>>> =
        Mutex::new((0..items.len()).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..degree {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else {
                    return;
                };
                let outcome = catch_unwind(AssertUnwindSafe(|| job(item))).map_err(panic_message);
                slots.lock()[idx] = Some(outcome);
            });
        }
    });

    slots
        .into_inner()
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err("job never ran".to_string())))
        .collect()
}

pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_results_in_input_order() {
        let items: Vec<u64> = (0..50).collect();
        let out = run_bounded(&items, 4, |n| n * 2);
        let doubled: Vec<u64> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(doubled, items.iter().map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_panic_is_isolated() {
        let items = vec![1, 2, 3];
        let out = run_bounded(&items, 2, |n| {
            if *n == 2 {
                panic!("boom on {n}");
            }
            *n
        });
        assert_eq!(out[0], Ok(1));
        assert_eq!(out[1], Err("boom on 2".to_string()));
        assert_eq!(out[2], Ok(3));
    }

    #[test]
    fn test_degree_never_exceeds_workers() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..20).collect();
        run_bounded(&items, 3, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_zero_workers_still_runs() {
        let out = run_bounded(&["a"], 0, |s| s.len());
        assert_eq!(out, vec![Ok(1)]);
    }
}
