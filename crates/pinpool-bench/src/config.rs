use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `pinpool-bench` binary.
///
/// These settings control the size of the pinned pool and the shape of the
/// load driven through it. All values are parsed from CLI arguments or
/// environment variables, with defaults that keep a laptop busy without
/// saturating it.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pinpool-bench",
    version,
    about = "Drives concurrent index lookups through a pinned thread pool"
)]
pub struct CliArgs {
    /// Number of pinned worker threads in the pool.
    ///
    /// Must be at least 1 and strictly less than the number of logical CPUs
    /// on the host, leaving room for the async runtime.
    ///
    /// Environment variable: `NUM_THREADS`
    #[arg(long, env = "NUM_THREADS", default_value_t = 2)]
    pub num_threads: usize,

    /// Number of concurrent lookup loops contending for the pool.
    ///
    /// Values above `num_threads` exercise the pool's backpressure: callers
    /// queue for an idle worker instead of spawning more threads.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 64)]
    pub concurrency: usize,

    /// How long to drive load before shutting down, in seconds.
    ///
    /// `0` runs until Ctrl+C or SIGTERM.
    ///
    /// Environment variable: `DURATION_SECS`
    #[arg(long, env = "DURATION_SECS", default_value_t = 10)]
    pub duration_secs: u64,

    /// Simulated blocking time of every index lookup, in microseconds.
    ///
    /// Environment variable: `LOOKUP_DELAY_US`
    #[arg(long, env = "LOOKUP_DELAY_US", default_value_t = 50)]
    pub lookup_delay_us: u64,

    /// Number of distinct label values in the in-memory index.
    ///
    /// Environment variable: `NUM_LABELS`
    #[arg(long, env = "NUM_LABELS", default_value_t = 128)]
    pub num_labels: usize,

    /// Name prefix of the pinned worker threads (`<prefix>-<id>`).
    ///
    /// Environment variable: `THREAD_NAME`
    #[arg(long, env = "THREAD_NAME", default_value_t = String::from("index-reader"))]
    pub thread_name: String,
}

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub num_threads: usize,
    pub concurrency: usize,
    /// `None` runs until a shutdown signal arrives.
    pub duration: Option<Duration>,
    pub lookup_delay: Duration,
    pub num_labels: usize,
    pub thread_name: String,
}

impl TryFrom<CliArgs> for BenchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_threads == 0 {
            bail!("NUM_THREADS must be greater than 0");
        }

        let available = num_cpus::get();
        if args.num_threads >= available {
            bail!(
                "NUM_THREADS ({}) must be less than the number of logical CPUs ({})",
                args.num_threads,
                available
            );
        }

        if args.concurrency == 0 {
            bail!("CONCURRENCY must be greater than 0");
        }

        if args.num_labels == 0 {
            bail!("NUM_LABELS must be greater than 0");
        }

        if args.thread_name.trim().is_empty() {
            bail!("THREAD_NAME must not be empty");
        }

        Ok(Self {
            num_threads: args.num_threads,
            concurrency: args.concurrency,
            duration: (args.duration_secs > 0).then(|| Duration::from_secs(args.duration_secs)),
            lookup_delay: Duration::from_micros(args.lookup_delay_us),
            num_labels: args.num_labels,
            thread_name: args.thread_name,
        })
    }
}
