use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::AnalysisBackend;
use crate::app::BackgroundEvent;
use crate::models::Session;

/// Call `poll` every `interval` while `focused` holds `true`.
///
/// Losing focus parks the loop until focus returns; regaining it polls at
/// once instead of waiting out the interval. The loop ends when `poll`
/// returns `false` or the focus sender is dropped.
pub async fn run_poller<F, Fut>(interval: Duration, mut focused: watch::Receiver<bool>, mut poll: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let active = *focused.borrow_and_update();
        if !active {
            debug!("Polling paused");
            if focused.changed().await.is_err() {
                return;
            }
            continue;
        }
        if !poll().await {
            return;
        }
        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = focused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    // A repeated `true` is not a focus change.
                    if !*focused.borrow_and_update() {
                        break;
                    }
                }
            }
        }
    }
}

/// Spawn the git status/branches poller. Results arrive on `bg_tx` as
/// `GitStatusFetched` and `GitBranchesFetched`.
pub fn spawn_git_poller(
    bg_tx: &mpsc::UnboundedSender<BackgroundEvent>,
    backend: Arc<dyn AnalysisBackend>,
    session: Session,
    interval: Duration,
    focused: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let tx = bg_tx.clone();
    tokio::spawn(async move {
        run_poller(interval, focused, || {
            let tx = tx.clone();
            let backend = Arc::clone(&backend);
            let session = session.clone();
            async move {
                let status = backend.git_status(&session).await;
                if tx.send(BackgroundEvent::GitStatusFetched(status)).is_err() {
                    return false;
                }
                let branches = backend.git_branches(&session).await;
                tx.send(BackgroundEvent::GitBranchesFetched(branches)).is_ok()
            }
        })
        .await;
        debug!("Git poller stopped");
    })
}
