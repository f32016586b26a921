use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::io::ProgressReceiver;
use super::tracker::TransferTracker;

/// Destination for rendered progress text, normally a Telegram message that
/// gets edited in place.
#[async_trait]
pub(crate) trait StatusSink: Send + Sync + 'static {
    async fn update(&self, text: String) -> anyhow::Result<()>;
}

/// Drives a [`TransferTracker`] from the samples published on `receiver` and
/// pushes each emitted report to `sink`. The task ends once every sender of the
/// channel is gone and returns the tracker for a final summary.
pub(crate) fn spawn_reporter<S: StatusSink>(
    sink: S,
    mut tracker: TransferTracker,
    mut receiver: ProgressReceiver,
) -> JoinHandle<TransferTracker> {
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let progress = *receiver.borrow_and_update();
            if let Some(report) = tracker.on_progress(progress.transferred, progress.total) {
                if let Err(e) = sink.update(report.to_string()).await {
                    log::warn!("Failed to deliver {} status: {}", tracker.label(), e);
                }
            }
        }
        tracker
    })
}
