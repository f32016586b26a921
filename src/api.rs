pub(crate) mod telegram;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use teloxide::types::{ChatId, MessageId};

use crate::media::MediaDuration;
use crate::session::RequestId;
use crate::transfer::io::ProgressSender;

pub(crate) const VIDEO_WIDTH: u32 = 480;
pub(crate) const VIDEO_HEIGHT: u32 = 320;

/// Everything needed to send a file back as a video.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VideoUpload {
    pub(crate) path: PathBuf,
    pub(crate) file_name: String,
    /// HTML formatted.
    pub(crate) caption: String,
    pub(crate) thumbnail: PathBuf,
    pub(crate) spoiler: bool,
    pub(crate) duration: MediaDuration,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Outbound side of the messaging platform. Texts are HTML formatted.
#[async_trait]
pub(crate) trait Messenger: Clone + Send + Sync + 'static {
    /// Reference to a file stored by the platform.
    type Attachment: Clone + Send + Sync + 'static;

    async fn send_text(&self, chat_id: ChatId, text: String) -> anyhow::Result<MessageId>;

    /// Replaces the text of a message, dropping any inline keyboard.
    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    ) -> anyhow::Result<()>;

    /// Sends `text` with the two-button spoiler choice bound to `request`.
    async fn send_spoiler_prompt(
        &self,
        request: RequestId,
        text: String,
    ) -> anyhow::Result<MessageId>;

    async fn download(
        &self,
        attachment: &Self::Attachment,
        destination: &Path,
        progress: Option<ProgressSender>,
    ) -> anyhow::Result<()>;

    async fn send_video(
        &self,
        chat_id: ChatId,
        video: VideoUpload,
        progress: ProgressSender,
    ) -> anyhow::Result<()>;
}
