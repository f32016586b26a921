pub(crate) mod bot;
pub(crate) mod listener;
pub(crate) mod tasks;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Future, FutureExt};
use lazy_static::lazy_static;
use teloxide::types::{ChatId, MessageId};
use tokio::task::JoinHandle;

use crate::api::Messenger;
use crate::config::Config;
use crate::media::{Aria2, MediaProbe};
use crate::session::{PathClaims, RequestId};
use crate::transfer::{StatusSink, TransferTracker};
use listener::Listeners;

/// Read-only process-wide timestamps, set once at startup.
pub(crate) struct ProcessTimes {
    pub(crate) started_at: Instant,
}

lazy_static! {
    pub(crate) static ref PROCESS_TIMES: ProcessTimes = ProcessTimes {
        started_at: Instant::now(),
    };
}

pub(crate) fn uptime() -> Duration {
    PROCESS_TIMES.started_at.elapsed()
}

pub(crate) fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    let (days, seconds) = (seconds / 86_400, seconds % 86_400);
    let (hours, seconds) = (seconds / 3_600, seconds % 3_600);
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    if days > 0 {
        format!("{}d {:02}h {:02}m {:02}s", days, hours, minutes, seconds)
    } else {
        format!("{:02}h {:02}m {:02}s", hours, minutes, seconds)
    }
}

/// Collaborators shared by every request.
pub(crate) struct Services<M: Messenger> {
    pub(crate) messenger: M,
    pub(crate) config: Arc<Config>,
    pub(crate) listeners: Listeners<M::Attachment>,
    /// Download targets currently being written.
    pub(crate) downloads: PathClaims,
    pub(crate) probe: MediaProbe,
    pub(crate) aria2: Aria2,
}

impl<M: Messenger> Clone for Services<M> {
    fn clone(&self) -> Self {
        Self {
            messenger: self.messenger.clone(),
            config: Arc::clone(&self.config),
            listeners: self.listeners.clone(),
            downloads: self.downloads.clone(),
            probe: self.probe.clone(),
            aria2: self.aria2.clone(),
        }
    }
}

impl<M: Messenger> Services<M> {
    pub(crate) fn new(messenger: M, config: Config) -> Self {
        Self {
            messenger,
            probe: MediaProbe::new(&config.ffprobe_path),
            aria2: Aria2::new(&config.aria2c_path),
            config: Arc::new(config),
            listeners: Listeners::default(),
            downloads: PathClaims::default(),
        }
    }
}

/// A message edited in place to show the state of one request.
pub(crate) struct StatusMessage<M> {
    messenger: M,
    chat_id: ChatId,
    message_id: MessageId,
}

impl<M: Clone> Clone for StatusMessage<M> {
    fn clone(&self) -> Self {
        Self {
            messenger: self.messenger.clone(),
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

impl<M: Messenger> StatusMessage<M> {
    pub(crate) fn new(messenger: M, chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            messenger,
            chat_id,
            message_id,
        }
    }

    pub(crate) async fn edit(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.messenger
            .edit_text(self.chat_id, self.message_id, text.into())
            .await
    }

    pub(crate) async fn edit_or_log(&self, text: impl Into<String>) {
        if let Err(e) = self.edit(text).await {
            log::error!("Failed to update status message: {}", e);
        }
    }
}

#[async_trait]
impl<M: Messenger> StatusSink for StatusMessage<M> {
    async fn update(&self, text: String) -> anyhow::Result<()> {
        self.edit(text).await
    }
}

const REPORTER_GRACE: Duration = Duration::from_secs(5);

/// Waits for a progress reporter once its transfer is over, so a status edit in
/// flight lands before the final one. The reporter ends when the transfer drops
/// its progress sender; one that outlives the grace period is aborted.
pub(crate) async fn stop_reporter(
    mut reporter: JoinHandle<TransferTracker>,
) -> Option<TransferTracker> {
    match tokio::time::timeout(REPORTER_GRACE, &mut reporter).await {
        Ok(Ok(tracker)) => {
            log::info!(
                "{} finished at {} bytes after {:?}",
                tracker.label(),
                tracker.bytes_transferred(),
                tracker.elapsed()
            );
            Some(tracker)
        }
        Ok(Err(e)) => {
            log::warn!("Progress reporter failed: {}", e);
            None
        }
        Err(_) => {
            log::warn!("Progress reporter outlived its transfer, aborting it");
            reporter.abort();
            None
        }
    }
}

/// Logs the error a request ended with.
pub(crate) fn log_failure<F>(request: RequestId, future: F) -> impl Future<Output = ()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    future.map(move |result| {
        if let Err(e) = result {
            log::error!("Request {} failed: {:#}", request, e);
        }
    })
}
