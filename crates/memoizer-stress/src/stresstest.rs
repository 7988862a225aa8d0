use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use memoizer::{Memoizer, MemoizerConfig};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{PreparedWorkload, WorkloadsConfig};

pub async fn perform_stresstest(
    config: MemoizerConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let memoizer = Memoizer::from_config(&config);
    tracing::info!(?config, "Starting stresstest");

    // initialize workloads, all sharing the same memoizer
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .map(|workload| Arc::new(PreparedWorkload::new(&memoizer, workload)))
        .collect();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for workload in workloads {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);

        let task = tokio::spawn(async move {
            let concurrency = workload.concurrency;
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failures = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency as usize));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let failures = Arc::clone(&failures);
                        let task_start = Instant::now();

                        tokio::task::spawn_blocking(move || {
                            if !workload.call_random() {
                                failures.fetch_add(1, Ordering::Relaxed);
                            }

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency).await;

            let task_durations: DDSketch = {
                let mut task_durations = task_durations.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            WorkloadReport {
                concurrency,
                task_durations,
                failures: failures.load(Ordering::Relaxed),
                executions: workload.executions(),
            }
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let report = task.context("workload task failed")?;
        report.print(i, duration);
    }

    println!("Stored results: {}", memoizer.storage().item_count());

    Ok(())
}

struct WorkloadReport {
    concurrency: u32,
    task_durations: DDSketch,
    failures: usize,
    executions: usize,
}

impl WorkloadReport {
    fn print(&self, i: usize, duration: Duration) {
        let Self {
            concurrency,
            task_durations,
            failures,
            executions,
        } = self;

        let ops = task_durations.count();
        let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");
        println!("  executions: {executions}; failures: {failures}");

        if ops == 0 {
            return;
        }

        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }
}
