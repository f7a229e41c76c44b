//! Tools for limiting the number of concurrent CPU-bound tasks.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Semaphore used to limit the number of concurrent `tesseract` and
/// `pdftocairo` processes.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Call an async function while holding a permit from the CPU semaphore.
///
/// Each grid cell spawns a `tesseract` process that will happily use 100% of
/// a core, and a batch run multiplies that by the number of in-flight
/// documents. The semaphore keeps the total number of external processes at
/// or below the core count.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    // Acquire a permit from the semaphore.
    let permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("Could not acquire CPU permit")?;
    // Run the function while holding the permit.
    let result = f().await;
    // Release the permit.
    drop(permit);
    result
}
