use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use teloxide::adaptors::Throttle;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileMeta, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
};
use teloxide::{ApiError, RequestError};
use tokio::io::AsyncWriteExt;

use crate::api::{Messenger, VideoUpload};
use crate::session::RequestId;
use crate::transfer::io::ProgressSender;
use crate::transfer::{progress_channel, CountingReader, CountingWriter};

pub(crate) type BotType = Throttle<Bot>;

const SPOILER_PREFIX: &str = "spoiler";

pub(crate) fn spoiler_callback_data(request: RequestId, spoiler: bool) -> String {
    format!(
        "{}:{}:{}:{}",
        SPOILER_PREFIX, request.chat_id.0, request.message_id.0, spoiler
    )
}

pub(crate) fn parse_spoiler_callback(data: &str) -> Option<(RequestId, bool)> {
    let mut parts = data.split(':');
    if parts.next()? != SPOILER_PREFIX {
        return None;
    }
    let chat_id = parts.next()?.parse().ok()?;
    let message_id = parts.next()?.parse().ok()?;
    let spoiler = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((RequestId::new(ChatId(chat_id), MessageId(message_id)), spoiler))
}

fn spoiler_keyboard(request: RequestId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(
            "True",
            spoiler_callback_data(request, true),
        )],
        vec![InlineKeyboardButton::callback(
            "False",
            spoiler_callback_data(request, false),
        )],
    ])
}

#[async_trait]
impl Messenger for BotType {
    type Attachment = FileMeta;

    async fn send_text(&self, chat_id: ChatId, text: String) -> anyhow::Result<MessageId> {
        let message = self
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(message.id)
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    ) -> anyhow::Result<()> {
        match self
            .edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn send_spoiler_prompt(
        &self,
        request: RequestId,
        text: String,
    ) -> anyhow::Result<MessageId> {
        let message = self
            .send_message(request.chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(spoiler_keyboard(request))
            .await?;
        Ok(message.id)
    }

    async fn download(
        &self,
        attachment: &FileMeta,
        destination: &Path,
        progress: Option<ProgressSender>,
    ) -> anyhow::Result<()> {
        let file = self.get_file(attachment.id.clone()).await?;
        let progress = progress.unwrap_or_else(|| progress_channel().0);
        let output = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("couldn't create {}", destination.display()))?;
        let mut writer = CountingWriter::new(output, u64::from(file.size), progress);
        self.inner().download_file(&file.path, &mut writer).await?;
        writer.flush().await?;
        log::info!("Saved {} to {}", file.path, destination.display());
        Ok(())
    }

    async fn send_video(
        &self,
        chat_id: ChatId,
        video: VideoUpload,
        progress: ProgressSender,
    ) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(&video.path)
            .await
            .with_context(|| format!("couldn't open {}", video.path.display()))?;
        let total = file.metadata().await?.len();
        let reader = CountingReader::new(file, total, progress);

        let input = InputFile::read(reader).file_name(video.file_name);
        let mut request = Requester::send_video(self, chat_id, input)
            .caption(video.caption)
            .parse_mode(ParseMode::Html)
            .has_spoiler(video.spoiler)
            .width(video.width)
            .height(video.height)
            .supports_streaming(true)
            .thumbnail(InputFile::file(video.thumbnail));
        if let Some(seconds) = video.duration.as_whole_seconds() {
            request = request.duration(seconds);
        }
        request.await?;
        Ok(())
    }
}
