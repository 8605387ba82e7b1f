//! Bounded FIFO queue drained by a fixed pool of worker tasks.
//!
//! Shutdown is close-then-drain: the feeder drops the sender after the last
//! item, each worker exits when `recv` returns `None`, and the pool returns
//! once every worker has been joined. No item is abandoned mid-flight.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// Runs `handler` over `items` with `workers` concurrent tasks.
///
/// Items are dequeued in order; completion order across items is not
/// defined. The handler owns its error handling: it returns nothing, so one
/// failing item can never stop a worker loop. A panicking handler only takes
/// its own worker down and is logged.
#[instrument(skip(items, handler), fields(pool = name, items = items.len()))]
pub async fn run_pool<T, F, Fut>(name: &'static str, items: Vec<T>, workers: usize, handler: F)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if items.is_empty() {
        debug!("nothing to do");
        return;
    }

    let workers = workers.clamp(1, items.len());
    let (tx, rx) = mpsc::channel::<T>(workers * 2);
    let rx = Arc::new(Mutex::new(rx));

    let mut tasks = JoinSet::new();

    tasks.spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        // tx dropped here: closes the queue
    });

    for worker_id in 0..workers {
        let rx = Arc::clone(&rx);
        let handler = handler.clone();
        tasks.spawn(async move {
            let mut handled = 0_usize;
            loop {
                let next = rx.lock().await.recv().await;
                let Some(item) = next else {
                    break;
                };
                handler(item).await;
                handled += 1;
            }
            debug!(pool = name, worker_id, handled, "worker finished");
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(pool = name, error = %e, "worker task panicked");
        }
    }
}
