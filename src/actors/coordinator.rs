use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::messaging::{ChannelError, MessageHandler, Subscriber};

// ============================================================================
// Coordinator - owns the process's listener tasks
// ============================================================================
//
// Responsibilities:
// - Start one task per inbound channel, all sharing a root cancellation token
// - Stop everything when the shutdown signal fires or a listener fails for good
// - Give in-flight work a bounded grace period, then abort what is left
//
// Task tree:
//   Coordinator (root token)
//   ├── order-service listener     (assembly-completed)
//   ├── assembly-worker listener   (payment-completed)
//   └── notifier listener          (both topics)
//
// ============================================================================

type ListenerResult = (String, Result<(), ChannelError>);

/// How the listeners ended
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    pub aborted: usize,
}

pub struct Coordinator {
    cancel: CancellationToken,
    tasks: JoinSet<ListenerResult>,
    grace: Duration,
}

impl Coordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            grace,
        }
    }

    /// Root token; cancelling it begins shutdown
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Feed `subscriber` into `handler` until shutdown
    pub fn spawn_listener(
        &mut self,
        name: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let cancel = self.cancel.child_token();
        self.spawn_task(name, async move { subscriber.consume(handler, cancel).await });
    }

    pub fn spawn_task<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), ChannelError>> + Send + 'static,
    {
        let name = name.into();
        tracing::info!(listener = %name, "Starting listener");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Run until `signal` resolves or a listener fails, then shut down.
    /// Returns the first fatal listener error, if any.
    pub async fn run_until<S>(mut self, signal: S) -> Result<ShutdownReport, ChannelError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(signal);
        let mut fatal = None;

        loop {
            tokio::select! {
                _ = &mut signal => {
                    tracing::info!("🛑 Shutdown requested");
                    break;
                }
                Some(joined) = self.tasks.join_next() => {
                    match joined {
                        Ok((name, Ok(()))) => {
                            tracing::info!(listener = %name, "Listener finished");
                        }
                        Ok((name, Err(e))) => {
                            tracing::error!(listener = %name, error = %e, "Listener failed, stopping process");
                            fatal = Some(e);
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Listener task panicked, stopping process");
                            fatal = Some(ChannelError::Transport(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }

        let report = self.shutdown().await;
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Cancel every listener and wait up to the grace period for them
    pub async fn shutdown(mut self) -> ShutdownReport {
        self.cancel.cancel();
        let mut report = ShutdownReport::default();

        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                report.completed += 1;
                if let Ok((name, result)) = joined {
                    tracing::info!(listener = %name, ok = result.is_ok(), "Listener stopped");
                }
            }
        })
        .await;

        if drained.is_err() {
            report.aborted = self.tasks.len();
            tracing::warn!(
                aborted = report.aborted,
                grace_secs = self.grace.as_secs(),
                "Grace period elapsed, aborting remaining listeners"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        tracing::info!(
            completed = report.completed,
            aborted = report.aborted,
            "🛑 Coordinator stopped"
        );
        report
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_tasks_finish_within_grace() {
        let mut coordinator = Coordinator::new(Duration::from_secs(5));
        for i in 0..3 {
            let cancel = coordinator.token();
            coordinator.spawn_task(format!("listener-{i}"), async move {
                cancel.cancelled().await;
                Ok(())
            });
        }

        let report = coordinator.run_until(async {}).await.unwrap();

        assert_eq!(report, ShutdownReport { completed: 3, aborted: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_are_aborted_after_grace() {
        let mut coordinator = Coordinator::new(Duration::from_secs(2));
        coordinator.spawn_task("stubborn", async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let cancel = coordinator.token();
        coordinator.spawn_task("polite", async move {
            cancel.cancelled().await;
            Ok(())
        });

        let report = coordinator.shutdown().await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.aborted, 1);
    }

    #[tokio::test]
    async fn test_fatal_listener_error_stops_everything() {
        let mut coordinator = Coordinator::new(Duration::from_secs(1));
        let cancel = coordinator.token();
        coordinator.spawn_task("healthy", async move {
            cancel.cancelled().await;
            Ok(())
        });
        coordinator.spawn_task("broken", async {
            Err(ChannelError::SubscriptionFailed {
                topics: vec!["payment-completed".to_string()],
                reason: "no brokers".to_string(),
            })
        });

        let result = coordinator.run_until(std::future::pending::<()>()).await;

        assert!(matches!(result, Err(ChannelError::SubscriptionFailed { .. })));
    }
}
