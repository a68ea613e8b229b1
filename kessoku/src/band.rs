//! Task supervision for generated injectors.
//!
//! A [`Band`] owns every auxiliary provider task spawned by one injector
//! call. It is bound to a child of the caller's cancellation token: the
//! first task error cancels the token, which unblocks every sibling waiting
//! on a [`SignalReceiver`], and the injector surfaces that first error.

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::InjectError;

/// Creates a one-shot value channel connecting two provider chains.
///
/// The producing chain sends exactly once; the consuming chain awaits the
/// value through [`recv`] or [`Band::recv`].
pub fn signal<T>() -> (Signal<T>, SignalReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (Signal(tx), SignalReceiver(rx))
}

/// Sending half of a cross-chain value channel.
pub struct Signal<T>(oneshot::Sender<T>);

impl<T> Signal<T> {
    /// Delivers the value. A dropped receiver means the consumer was
    /// canceled, which is not the producer's problem.
    pub fn send(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// Receiving half of a cross-chain value channel.
pub struct SignalReceiver<T>(oneshot::Receiver<T>);

impl<T> SignalReceiver<T> {
    async fn wait(self) -> Result<T, oneshot::error::RecvError> {
        self.0.await
    }
}

/// Awaits a signal on an auxiliary task, observing cancellation.
///
/// Returns [`InjectError::Canceled`] when the token fires or the producer
/// died before sending; the producer's own error is surfaced by the
/// supervisor at the barrier.
pub async fn recv<T>(rx: SignalReceiver<T>, ctx: &CancellationToken) -> Result<T, InjectError> {
    tokio::select! {
        value = rx.wait() => value.map_err(|_| InjectError::Canceled),
        _ = ctx.cancelled() => Err(InjectError::Canceled),
    }
}

/// Supervisor for the auxiliary tasks of one injector call.
pub struct Band {
    tasks: JoinSet<Result<(), InjectError>>,
    ctx: CancellationToken,
}

impl Band {
    /// Creates a supervisor bound to a child of `ctx`. Canceling `ctx`
    /// cancels every task; a task error cancels only the child.
    pub fn new(ctx: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            ctx: ctx.child_token(),
        }
    }

    /// The derived token auxiliary tasks and context-requiring providers
    /// observe.
    pub fn context(&self) -> CancellationToken {
        self.ctx.clone()
    }

    /// Launches an auxiliary provider chain.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = Result<(), InjectError>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Awaits a signal on the principal task.
    ///
    /// When the producer failed before sending, the supervisor is drained
    /// and the producer's actual error is returned instead of a bare
    /// cancellation.
    pub async fn recv<T>(&mut self, rx: SignalReceiver<T>) -> Result<T, InjectError> {
        let ctx = self.ctx.clone();
        tokio::select! {
            value = rx.wait() => match value {
                Ok(value) => Ok(value),
                Err(_) => Err(self.first_error().await),
            },
            _ = ctx.cancelled() => Err(self.first_error().await),
        }
    }

    /// The barrier before the injector's return: waits for every auxiliary
    /// task, canceling the siblings of the first failure.
    pub async fn finish(mut self) -> Result<(), InjectError> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.cancel_and_drain().await;
                    return Err(err);
                }
                Err(err) => {
                    self.cancel_and_drain().await;
                    return Err(InjectError::Join(err));
                }
            }
        }
        Ok(())
    }

    /// Cancels the remaining tasks and reports the first error found while
    /// draining, falling back to `Canceled` when every task exited cleanly.
    async fn first_error(&mut self) -> InjectError {
        self.ctx.cancel();
        let mut first = None;
        while let Some(joined) = self.tasks.join_next().await {
            if first.is_none() {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => first = Some(err),
                    Err(err) => first = Some(InjectError::Join(err)),
                }
            }
        }
        first.unwrap_or(InjectError::Canceled)
    }

    async fn cancel_and_drain(&mut self) {
        self.ctx.cancel();
        while self.tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn boxed(msg: &str) -> Box<dyn std::error::Error + Send + Sync> {
        msg.to_string().into()
    }

    #[tokio::test]
    async fn signal_delivers_value() {
        let ctx = CancellationToken::new();
        let (tx, rx) = signal::<u32>();
        tx.send(7);
        assert_eq!(recv(rx, &ctx).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn recv_observes_cancellation() {
        let ctx = CancellationToken::new();
        let (_tx, rx) = signal::<u32>();
        ctx.cancel();
        assert!(matches!(recv(rx, &ctx).await, Err(InjectError::Canceled)));
    }

    #[tokio::test]
    async fn finish_returns_first_task_error() {
        let ctx = CancellationToken::new();
        let mut band = Band::new(&ctx);
        band.spawn(async { Ok(()) });
        band.spawn(async { Err(InjectError::provider("new_db", boxed("connect refused"))) });
        let err = band.finish().await.unwrap_err();
        assert!(matches!(err, InjectError::Provider { name: "new_db", .. }));
    }

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let ctx = CancellationToken::new();
        let mut band = Band::new(&ctx);
        let derived = band.context();
        band.spawn(async move {
            // Would hang forever if the sibling's failure did not cancel us.
            derived.cancelled().await;
            Err(InjectError::Canceled)
        });
        band.spawn(async { Err(InjectError::provider("new_cache", boxed("boom"))) });
        let err = tokio::time::timeout(Duration::from_secs(5), band.finish())
            .await
            .expect("siblings were not canceled")
            .unwrap_err();
        assert!(matches!(err, InjectError::Provider { name: "new_cache", .. }));
    }

    #[tokio::test]
    async fn principal_recv_surfaces_producer_error() {
        let ctx = CancellationToken::new();
        let mut band = Band::new(&ctx);
        let (tx, rx) = signal::<u32>();
        band.spawn(async move {
            drop(tx);
            Err(InjectError::provider("new_db", boxed("down")))
        });
        let err = band.recv(rx).await.unwrap_err();
        assert!(matches!(err, InjectError::Provider { name: "new_db", .. }));
    }

    #[tokio::test]
    async fn principal_recv_returns_value_before_barrier() {
        let ctx = CancellationToken::new();
        let mut band = Band::new(&ctx);
        let (tx, rx) = signal::<&'static str>();
        band.spawn(async move {
            tx.send("db");
            Ok(())
        });
        assert_eq!(band.recv(rx).await.unwrap(), "db");
        band.finish().await.unwrap();
    }

    #[tokio::test]
    async fn caller_cancellation_propagates() {
        let ctx = CancellationToken::new();
        let mut band = Band::new(&ctx);
        let derived = band.context();
        band.spawn(async move {
            derived.cancelled().await;
            Err(InjectError::Canceled)
        });
        ctx.cancel();
        assert!(matches!(band.finish().await, Err(InjectError::Canceled)));
    }
}
