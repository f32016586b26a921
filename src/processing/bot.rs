use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::FileMeta;
use teloxide::utils::command::BotCommands;

use crate::api::telegram::{parse_spoiler_callback, BotType};
use crate::common::naming::video_file_name;
use crate::processing::tasks::{media_task, upload_task, url_task, MediaRequest};
use crate::processing::{format_uptime, log_failure, uptime, Services};
use crate::regexp::HTTP_URL;
use crate::session::RequestId;

type BotServices = Services<BotType>;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub(crate) enum Command {
    #[command(description = "display this text.")]
    Help,
    #[command(description = "show the greeting and this text.")]
    Start,
    #[command(description = "upload a file from the downloads directory as a video.")]
    Upload(String),
    #[command(description = "abort the requests of this chat.")]
    Cancel,
    #[command(description = "show how long the bot has been running.")]
    Uptime,
}

pub(crate) fn schema() -> UpdateHandler<anyhow::Error> {
    let commands = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(on_command);

    let media = Update::filter_message()
        .filter(|msg: Message| msg.photo().is_some() || msg.video().is_some() || msg.document().is_some())
        .endpoint(on_media);

    let links = Update::filter_message()
        .filter(|msg: Message| {
            msg.chat.is_private() && msg.text().map_or(false, |text| HTTP_URL.is_match(text.trim()))
        })
        .endpoint(on_link);

    let callbacks = Update::filter_callback_query().endpoint(on_callback);

    dptree::entry()
        .branch(commands)
        .branch(media)
        .branch(links)
        .branch(callbacks)
}

async fn on_command(
    bot: BotType,
    msg: Message,
    command: Command,
    services: BotServices,
) -> anyhow::Result<()> {
    let request = RequestId::new(msg.chat.id, msg.id);
    match command {
        Command::Help | Command::Start => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Upload(file_name) => {
            log::info!("Request {}: upload of {:?}", request, file_name);
            tokio::spawn(log_failure(request, upload_task(services, request, file_name)));
        }
        Command::Cancel => {
            let cancelled = services.listeners.cancel(msg.chat.id);
            log::info!("Chat {}: cancelled {} request(s)", msg.chat.id, cancelled);
            let text = match cancelled {
                0 => "Nothing to cancel.".to_string(),
                n => format!("Cancelling {} request(s).", n),
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Uptime => {
            bot.send_message(msg.chat.id, format!("Uptime: {}", format_uptime(uptime())))
                .await?;
        }
    }
    Ok(())
}

/// Largest rendition of a photo message.
fn largest_photo(msg: &Message) -> Option<FileMeta> {
    msg.photo()?
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
        .map(|size| size.file.clone())
}

fn media_attachment(msg: &Message) -> Option<(FileMeta, Option<String>)> {
    if let Some(video) = msg.video() {
        return Some((video.file.clone(), video.file_name.clone()));
    }
    if let Some(document) = msg.document() {
        return Some((document.file.clone(), document.file_name.clone()));
    }
    largest_photo(msg).map(|file| (file, None))
}

async fn on_media(msg: Message, services: BotServices) -> anyhow::Result<()> {
    if let Some(photo) = largest_photo(&msg) {
        if let Ok(request) = services.listeners.deliver_thumbnail(msg.chat.id, photo) {
            log::info!("Request {}: thumbnail received", request);
            return Ok(());
        }
    }
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some((attachment, attachment_name)) = media_attachment(&msg) else {
        return Ok(());
    };

    let request = RequestId::new(msg.chat.id, msg.id);
    let file_name = video_file_name(msg.caption(), attachment_name.as_deref(), msg.id.0);
    log::info!("Request {}: media {} ({} bytes)", request, file_name, attachment.size);
    let media = MediaRequest {
        request,
        attachment,
        file_name,
        caption: msg.caption().map(str::to_string),
    };
    tokio::spawn(log_failure(request, media_task(services, media)));
    Ok(())
}

async fn on_link(msg: Message, services: BotServices) -> anyhow::Result<()> {
    let Some(url) = msg.text().map(|text| text.trim().to_string()) else {
        return Ok(());
    };
    let request = RequestId::new(msg.chat.id, msg.id);
    log::info!("Request {}: link {}", request, url);
    tokio::spawn(log_failure(request, url_task(services, request, url)));
    Ok(())
}

async fn on_callback(bot: BotType, query: CallbackQuery, services: BotServices) -> anyhow::Result<()> {
    let answer = match query.data.as_deref().and_then(parse_spoiler_callback) {
        Some((request, spoiler)) if services.listeners.deliver_spoiler(request, spoiler) => {
            if spoiler {
                "Spoiler: on"
            } else {
                "Spoiler: off"
            }
        }
        Some((request, _)) => {
            log::info!("Request {}: spoiler choice came too late", request);
            "This choice is locked or expired."
        }
        None => {
            log::warn!("Unknown callback data: {:?}", query.data);
            return Ok(());
        }
    };
    bot.answer_callback_query(query.id.clone()).text(answer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_parsed() {
        assert!(matches!(
            Command::parse("/upload report.mp4", "bot"),
            Ok(Command::Upload(name)) if name == "report.mp4"
        ));
        assert!(matches!(Command::parse("/cancel", "bot"), Ok(Command::Cancel)));
        assert!(matches!(Command::parse("/uptime@bot", "bot"), Ok(Command::Uptime)));
        assert!(Command::parse("/tweet someone", "bot").is_err());
    }

    #[test]
    fn help_lists_every_command() {
        let help = Command::descriptions().to_string();
        for command in ["/help", "/start", "/upload", "/cancel", "/uptime"] {
            assert!(help.contains(command), "{} missing from {}", command, help);
        }
    }
}
