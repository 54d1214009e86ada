//! Ordered supervisor group.
//!
//! Members start one at a time in registration order; each must signal
//! ready before the next is started. Host signals are relayed to every
//! member in reverse start order. As soon as one member exits the others
//! are interrupted, and the group returns the first error any member
//! reported.

use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use cutover_supervisor::HostSignal;

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type Runner = Box<dyn FnOnce(mpsc::Receiver<HostSignal>, oneshot::Sender<()>) -> BoxFuture + Send>;

struct Member {
    name: &'static str,
    run: Runner,
}

#[derive(Default)]
pub struct OrderedGroup {
    members: Vec<Member>,
}

impl OrderedGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member. `run` receives the member's signal inbox and the
    /// ready sender it must fire once it is up.
    pub fn member<F, Fut>(mut self, name: &'static str, run: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<HostSignal>, oneshot::Sender<()>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.members.push(Member {
            name,
            run: Box::new(move |signals, ready| Box::pin(run(signals, ready))),
        });
        self
    }

    /// Run every member until the first one exits.
    pub async fn run(self, mut host: mpsc::Receiver<HostSignal>) -> anyhow::Result<()> {
        let (exit_tx, mut exits) = mpsc::unbounded_channel::<(&'static str, anyhow::Result<()>)>();
        let mut started: Vec<(&'static str, mpsc::Sender<HostSignal>)> = Vec::new();
        let mut aborted_start = None;

        for member in self.members {
            let name = member.name;
            let (signal_tx, signal_rx) = mpsc::channel(4);
            let (ready_tx, ready_rx) = oneshot::channel();

            let task = tokio::spawn((member.run)(signal_rx, ready_tx));
            let exit_tx = exit_tx.clone();
            tokio::spawn(async move {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => Err(anyhow!("member {name} panicked: {e}")),
                };
                let _ = exit_tx.send((name, result));
            });
            started.push((name, signal_tx));

            if ready_rx.await.is_err() {
                warn!(member = name, "member stopped before becoming ready");
                aborted_start = Some(name);
                break;
            }
            info!(member = name, "member ready");
        }
        drop(exit_tx);

        let mut first_error = None;
        if aborted_start.is_none() {
            let mut host_open = true;
            loop {
                tokio::select! {
                    signal = host.recv(), if host_open => match signal {
                        Some(signal) => {
                            info!(%signal, "relaying host signal");
                            broadcast(&started, signal).await;
                        }
                        None => host_open = false,
                    },
                    exit = exits.recv() => {
                        if let Some((name, result)) = exit {
                            record_exit(name, result, &mut first_error);
                        }
                        break;
                    }
                }
            }
        }

        broadcast(&started, HostSignal::Interrupt).await;
        while let Some((name, result)) = exits.recv().await {
            record_exit(name, result, &mut first_error);
        }

        match (first_error, aborted_start) {
            (Some(e), _) => Err(e),
            (None, Some(name)) => Err(anyhow!("member {name} exited before becoming ready")),
            (None, None) => Ok(()),
        }
    }
}

/// Send `signal` to every started member, last started first. Members that
/// already exited are skipped.
async fn broadcast(started: &[(&'static str, mpsc::Sender<HostSignal>)], signal: HostSignal) {
    for (name, tx) in started.iter().rev() {
        if tx.send(signal).await.is_err() {
            debug!(member = name, %signal, "member already gone");
        }
    }
}

fn record_exit(
    name: &'static str,
    result: anyhow::Result<()>,
    first_error: &mut Option<anyhow::Error>,
) {
    match result {
        Ok(()) => info!(member = name, "member exited"),
        Err(e) => {
            error!(member = name, error = %e, "member failed");
            first_error.get_or_insert(e.context(format!("{name} failed")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    /// Member that becomes ready, then waits for one signal and returns.
    fn waiter(
        log: Log,
        name: &'static str,
    ) -> impl FnOnce(mpsc::Receiver<HostSignal>, oneshot::Sender<()>) -> BoxFuture + Send + 'static
    {
        move |mut signals, ready| {
            Box::pin(async move {
                push(&log, format!("{name} start"));
                let _ = ready.send(());
                let signal = signals.recv().await;
                push(&log, format!("{name} got {}", signal.map(|s| s.name()).unwrap_or("close")));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn starts_in_order_and_relays_in_reverse() {
        let log = Log::default();
        let group = OrderedGroup::new()
            .member("first", waiter(log.clone(), "first"))
            .member("second", waiter(log.clone(), "second"));

        let (host_tx, host_rx) = mpsc::channel(1);
        let task = tokio::spawn(group.run(host_rx));

        // Wait until both are up.
        while log.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }
        host_tx.send(HostSignal::Terminate).await.unwrap();
        task.await.unwrap().unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(log[0], "first start");
        assert_eq!(log[1], "second start");
        assert!(log.contains(&"first got SIGTERM".to_string()));
        assert!(log.contains(&"second got SIGTERM".to_string()));
    }

    #[tokio::test]
    async fn member_exit_interrupts_the_rest() {
        let log = Log::default();
        let group = OrderedGroup::new()
            .member("steady", waiter(log.clone(), "steady"))
            .member("failing", |_signals, ready: oneshot::Sender<()>| async move {
                let _ = ready.send(());
                Err(anyhow!("boom"))
            });

        let (_host_tx, host_rx) = mpsc::channel(1);
        let err = group.run(host_rx).await.unwrap_err();
        assert!(format!("{err:#}").contains("boom"));
        assert!(log.lock().unwrap().contains(&"steady got SIGINT".to_string()));
    }

    #[tokio::test]
    async fn later_members_do_not_start_after_failed_start() {
        let log = Log::default();
        let group = OrderedGroup::new()
            .member("broken", |_signals, _ready| async move {
                Err(anyhow!("launch failed"))
            })
            .member("never", waiter(log.clone(), "never"));

        let (_host_tx, host_rx) = mpsc::channel(1);
        let err = group.run(host_rx).await.unwrap_err();
        assert!(format!("{err:#}").contains("launch failed"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_member_is_an_error() {
        let group = OrderedGroup::new().member("panicky", |_signals, ready: oneshot::Sender<()>| async move {
            let _ = ready.send(());
            panic!("member blew up");
        });

        let (_host_tx, host_rx) = mpsc::channel(1);
        let err = group.run(host_rx).await.unwrap_err();
        assert!(format!("{err:#}").contains("panicked"));
    }

    #[tokio::test]
    async fn clean_exit_is_ok() {
        let group = OrderedGroup::new().member("oneshot", |_signals, ready: oneshot::Sender<()>| async move {
            let _ = ready.send(());
            Ok(())
        });

        let (_host_tx, host_rx) = mpsc::channel(1);
        group.run(host_rx).await.unwrap();
    }
}
