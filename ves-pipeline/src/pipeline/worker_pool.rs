use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Run `work` over `items` with a fixed number of workers pulling from a
/// shared queue. This bounds in-flight tasks without spawning one task per
/// item; results come back in input order.
pub async fn run_bounded<T, R, F, Fut>(concurrency: usize, items: Vec<T>, work: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = concurrency.max(1).min(total);
    let queue: Arc<Mutex<VecDeque<(usize, T)>>> =
        Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
    let results: Arc<Mutex<Vec<Option<R>>>> =
        Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let work = Arc::new(work);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let work = Arc::clone(&work);
        handles.push(tokio::spawn(async move {
            loop {
                let next = queue.lock().expect("worker queue lock poisoned").pop_front();
                let Some((index, item)) = next else {
                    break;
                };
                let output = work(item).await;
                results.lock().expect("worker results lock poisoned")[index] = Some(output);
            }
        }));
    }
    for handle in handles {
        // Worker panics should not be silently swallowed
        handle.await.expect("worker task panicked");
    }

    Arc::try_unwrap(results)
        .unwrap_or_else(|_| panic!("workers still hold results"))
        .into_inner()
        .expect("worker results lock poisoned")
        .into_iter()
        .map(|slot| slot.expect("worker skipped an item"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn processes_all_items_in_order() {
        let results = run_bounded(3, (0..20).collect(), |n: i32| async move { n * 2 }).await;
        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight2, peak2) = (Arc::clone(&in_flight), Arc::clone(&peak));

        run_bounded(2, (0..10).collect::<Vec<i32>>(), move |_| {
            let in_flight = Arc::clone(&in_flight2);
            let peak = Arc::clone(&peak2);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let results: Vec<i32> = run_bounded(4, Vec::<i32>::new(), |n| async move { n }).await;
        assert!(results.is_empty());
    }
}
