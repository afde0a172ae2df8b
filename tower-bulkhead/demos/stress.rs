use std::num::NonZeroUsize;
use std::time::Duration;

use bulkhead_limit::Bulkhead;
use bulkhead_limit::BulkheadConfig;
use clap::Parser;
use tokio::time::sleep;
use tower::BoxError;
use tower_bulkhead::Failure;
use tower_bulkhead::invoke;

/// Fire a burst of guarded calls at a single bulkhead.
#[derive(Parser, Debug)]
struct Args {
    /// Permits in the bulkhead
    #[arg(long, default_value_t = NonZeroUsize::new(10).unwrap())]
    capacity: NonZeroUsize,

    /// How long a call may queue for a permit
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    max_wait: Duration,

    /// How long each admitted call holds its permit
    #[arg(long, default_value = "20ms", value_parser = humantime::parse_duration)]
    work: Duration,

    /// Number of concurrent calls
    #[arg(long, default_value_t = 100)]
    requests: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let bulkhead = Bulkhead::new(
        "stress",
        BulkheadConfig::new(args.capacity).with_max_wait(args.max_wait),
    );

    println!("🚀 Starting Stress Test...");
    println!(
        "Bulkhead: {} permits, {:?} max wait, {:?} per call\n",
        args.capacity, args.max_wait, args.work
    );

    let mut tasks = Vec::new();
    for i in 0..args.requests {
        let bulkhead = bulkhead.clone();
        let work = args.work;
        tasks.push(tokio::spawn(async move {
            let res = invoke(
                &bulkhead,
                || async move {
                    sleep(work).await;
                    Ok::<_, BoxError>("Request Successful")
                },
                |failure: Failure| failure,
            )
            .await;
            match res {
                Ok(resp) => {
                    println!("[{i:03}] ✅ {resp}");
                    true
                }
                Err(failure) => {
                    println!("[{i:03}] ❌ {failure}");
                    false
                }
            }
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if let Ok(true) = task.await {
            admitted += 1;
        }
    }

    println!(
        "\n🏁 Stress test complete: {admitted}/{} admitted, {:?}",
        args.requests,
        bulkhead.metrics()
    );
}
