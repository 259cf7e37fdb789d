//! Generic subsystem runtime — shared scaffolding for all subsystems.
//!
//! # Component model
//!
//! A [`Component`] is any independently-runnable unit owned by a subsystem:
//! a comms channel (stdio, HTTP…), a background scanner, etc.
//! The subsystem constructs components with their shared state already
//! captured inside them, then hands them to [`spawn_components`].
//!
//! # SubsystemHandle
//!
//! [`spawn_components`] returns a [`SubsystemHandle`] that the caller can
//! `.await` (blocking until all components finish) or hold onto while doing
//! other work — the components run concurrently regardless.
//! Any component error cancels the shared [`CancellationToken`] so sibling
//! components and the supervisor all shut down cleanly.

use std::pin::Pin;
use std::future::Future;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture =
    Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit owned by a subsystem.
///
/// Implementors capture all shared state (`Arc<XxxState>`, shutdown token, …)
/// at construction time. [`Component::run`] is called once by
/// [`spawn_components`] and should run until `shutdown` is cancelled or the
/// component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its async run-loop as a boxed future.
    ///
    /// The returned future must be `Send + 'static` so it can be spawned on
    /// the Tokio thread pool. Capture the `CancellationToken` inside it to
    /// respect cooperative shutdown.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── SubsystemHandle ───────────────────────────────────────────────────────────

/// An opaque handle to a running subsystem task set.
///
/// Returned by [`spawn_components`]. The caller can `.await` it to block until
/// all components have exited, or store it and poll it later.
pub struct SubsystemHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SubsystemHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Comms(format!("subsystem task panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each [`Component`] as an independent Tokio task and return a
/// [`SubsystemHandle`] that resolves when all components have exited.
///
/// Behaviour on error:
/// - If any component returns `Err`, `shutdown` is cancelled so all siblings
///   receive the cancellation signal and stop cooperatively.
/// - The manager task then drains the remaining components and returns the
///   first error encountered.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> SubsystemHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            let shutdown = shutdown.clone();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                // Component panicked.
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| {
                        AppError::Comms(format!("component panicked: {e}"))
                    });
                }
                // Component returned an error.
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                // Component exited cleanly.
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    SubsystemHandle { inner: handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneShot {
        id: String,
        fail: bool,
    }

    impl Component for OneShot {
        fn id(&self) -> &str {
            &self.id
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> ComponentFuture {
            Box::pin(async move {
                if self.fail {
                    Err(AppError::Comms("boom".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn clean_components_join_ok() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(
            vec![
                Box::new(OneShot { id: "a".into(), fail: false }),
                Box::new(OneShot { id: "b".into(), fail: false }),
            ],
            shutdown,
        );
        assert!(handle.join().await.is_ok());
    }

    #[tokio::test]
    async fn failing_component_cancels_shutdown_and_reports() {
        let shutdown = CancellationToken::new();
        let handle = spawn_components(
            vec![Box::new(OneShot { id: "bad".into(), fail: true })],
            shutdown.clone(),
        );
        assert!(handle.join().await.is_err());
        assert!(shutdown.is_cancelled());
    }
}
