//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! This runner orchestrates app processes and cleanup functions, providing:
//! - Concurrent execution of named processes sharing one cancellation token
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Ordered cleanup under a configurable timeout
//!
//! # Example
//!
//! ```no_run
//! use receipt_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new()
//!         .with_named_process("worker", |ctx| async move {
//!             ctx.cancelled().await;
//!             tracing::info!("Process stopping gracefully");
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5));
//!
//!     runner.run().await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// Type alias for a closer function.
/// Returns a future that resolves to Result<(), anyhow::Error>
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

/// A concurrent application runner that manages long-running processes with graceful shutdown.
///
/// - App processes run concurrently until one fails, all finish, or a shutdown
///   signal is received
/// - Closers execute afterward one by one in registration order, regardless of
///   process outcome; a failing closer does not stop the ones after it
pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds
    /// - OS signal handling enabled
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Adds an unnamed app process to the runner.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.with_named_process("app", process)
    }

    /// Adds an app process that is identified by `name` in logs.
    ///
    /// If any process returns an error, all processes are cancelled and
    /// closers are executed.
    pub fn with_named_process<F, Fut>(mut self, name: &str, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes
            .push((name.to_string(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a closer to the runner.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the timeout for executing all closers. Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disable SIGINT/SIGTERM handling, leaving shutdown to the cancellation token
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Runs everything and exits the process: status 0 on a clean shutdown,
    /// 1 if an app process failed.
    pub async fn run(self) {
        match self.execute().await {
            Ok(()) => {
                tracing::info!("Application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Runs all app processes, then all closers, and reports the first
    /// process error.
    ///
    /// This method:
    /// 1. Spawns all app processes concurrently
    /// 2. Monitors for SIGTERM/SIGINT signals
    /// 3. Cancels all processes when a signal is received or any process fails
    /// 4. Waits for the processes to stop
    /// 5. Executes the closers in order within the configured timeout
    pub async fn execute(self) -> Result<(), anyhow::Error> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        if self.handle_signals {
            spawn_signal_handlers(&token);
        }

        let first_error = wait_for_processes(&mut join_set, &token).await;

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);

            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_signal_handlers(token: &CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(err) => {
                tracing::error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    {
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM signal");
                    sigterm_token.cancel();
                }
                Err(err) => {
                    tracing::error!("Error setting up SIGTERM handler: {}", err);
                }
            }
        });
    }
}

/// Wait until every process has stopped. The first failure cancels the rest.
async fn wait_for_processes(
    join_set: &mut JoinSet<(String, Result<(), anyhow::Error>)>,
    token: &CancellationToken,
) -> Option<anyhow::Error> {
    let mut first_error = None;

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((name, Ok(()))) => {
                tracing::debug!(process = %name, "App process completed successfully");
            }
            Ok((name, Err(err))) => {
                tracing::error!(process = %name, "App process error: {:#}", err);
                if first_error.is_none() {
                    first_error = Some(err.context(format!("process '{}' failed", name)));
                }
                token.cancel();
            }
            Err(err) => {
                tracing::error!("App process panicked: {}", err);
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                }
                token.cancel();
            }
        }
    }

    first_error
}

/// Runs closers sequentially in registration order, logging failures.
async fn run_closers(closers: Vec<Closer>) {
    for (index, closer) in closers.into_iter().enumerate() {
        match closer().await {
            Ok(()) => tracing::debug!(closer = index, "Closer completed successfully"),
            Err(err) => tracing::error!(closer = index, "Closer error: {:#}", err),
        }
    }
}
