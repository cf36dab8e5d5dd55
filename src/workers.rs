//! Wave-scheduled worker helper.
//!
//! The pipeline's parallel stages all follow the same shape: fork up to
//! `threads` workers, wait for the whole wave, then fork the next wave.
//! Workers never outlive their wave and results come back in task order,
//! so downstream assembly is deterministic.

use std::thread;

/// Run `f` over `tasks` in waves of at most `threads` workers.
///
/// A cap of zero means one worker per task (a single wave). Results are
/// returned in task order. Worker panics propagate to the caller.
pub fn run_waves<T, R, F>(tasks: Vec<T>, threads: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = tasks.len();
    if total == 0 {
        return Vec::new();
    }
    let wave = if threads == 0 { total } else { threads };
    if wave == 1 {
        // nothing to fork; run inline
        return tasks.into_iter().map(f).collect();
    }

    let f = &f;
    let mut results: Vec<R> = Vec::with_capacity(total);
    let mut iter = tasks.into_iter();
    loop {
        let batch: Vec<T> = iter.by_ref().take(wave).collect();
        if batch.is_empty() {
            break;
        }
        thread::scope(|scope| {
            let handles: Vec<_> = batch
                .into_iter()
                .map(|task| scope.spawn(move || f(task)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(r) => results.push(r),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });
    }
    results
}
