use std::path::{Path, PathBuf};

use teloxide::utils::html;

use crate::api::{Messenger, VideoUpload, VIDEO_HEIGHT, VIDEO_WIDTH};
use crate::common::naming::{extract_filename, is_bare_file_name};
use crate::processing::listener::{Listener, Wait};
use crate::processing::{stop_reporter, Services, StatusMessage};
use crate::session::{RequestId, Session};
use crate::transfer::{progress_channel, spawn_reporter, TransferTracker};

pub(crate) const THUMBNAIL_PROMPT: &str = "Please send a photo\nSelect the spoiler setting:";

/// Media message that should come back as a video.
#[derive(Debug, Clone)]
pub(crate) struct MediaRequest<A> {
    pub(crate) request: RequestId,
    pub(crate) attachment: A,
    pub(crate) file_name: String,
    pub(crate) caption: Option<String>,
}

/// Waits for the thumbnail and stores it. `None` means the request is over and
/// the user has been told why.
async fn acquire_thumbnail<M: Messenger>(
    services: &Services<M>,
    listener: &mut Listener<M::Attachment>,
    session: &mut Session,
    status: &StatusMessage<M>,
) -> anyhow::Result<Option<PathBuf>> {
    let limit = services.config.thumbnail_timeout;
    let thumbnail = match listener.wait_for_thumbnail(session, limit).await {
        Wait::Thumbnail(thumbnail) => thumbnail,
        Wait::TimedOut => {
            log::info!("Request {}: no thumbnail within {:?}", session.request_id(), limit);
            status
                .edit(format!(
                    "No photo received within {} seconds, request cancelled.",
                    limit.as_secs()
                ))
                .await?;
            return Ok(None);
        }
        Wait::Cancelled => {
            status.edit("Request cancelled.").await?;
            return Ok(None);
        }
    };

    let path = services.config.downloads_dir.join(format!(
        "photo_{}.jpg",
        session.request_id().file_prefix()
    ));
    session.register_temporary_file(&path);
    let fetched = services.messenger.download(&thumbnail, &path, None).await;
    if fetched.is_err() {
        return conclude(status, fetched, String::new()).await.map(|()| None);
    }
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        status.edit("Please set a custom thumbnail first.").await?;
        return Ok(None);
    }
    Ok(Some(path))
}

async fn download_with_progress<M: Messenger>(
    services: &Services<M>,
    attachment: &M::Attachment,
    destination: &Path,
    status: &StatusMessage<M>,
) -> anyhow::Result<()> {
    let (sender, receiver) = progress_channel();
    let reporter = spawn_reporter(status.clone(), TransferTracker::new("Downloading"), receiver);
    let result = services
        .messenger
        .download(attachment, destination, Some(sender))
        .await;
    stop_reporter(reporter).await;
    result
}

async fn upload_with_progress<M: Messenger>(
    services: &Services<M>,
    chat_id: teloxide::types::ChatId,
    video: VideoUpload,
    status: &StatusMessage<M>,
) -> anyhow::Result<()> {
    let (sender, receiver) = progress_channel();
    let reporter = spawn_reporter(status.clone(), TransferTracker::new("Uploading"), receiver);
    let result = services.messenger.send_video(chat_id, video, sender).await;
    stop_reporter(reporter).await;
    result
}

/// Reports how the request ended. Failures are always shown to the user and
/// then handed back for logging.
async fn conclude<M: Messenger>(
    status: &StatusMessage<M>,
    result: anyhow::Result<()>,
    success: String,
) -> anyhow::Result<()> {
    match result {
        Ok(()) => status.edit(success).await,
        Err(e) => {
            status
                .edit_or_log(format!("Failed: {}", html::escape(&format!("{:#}", e))))
                .await;
            Err(e)
        }
    }
}

/// Re-uploads a media message as a video with a user-supplied thumbnail.
pub(crate) async fn media_task<M: Messenger>(
    services: Services<M>,
    media: MediaRequest<M::Attachment>,
) -> anyhow::Result<()> {
    let request = media.request;
    let mut session = Session::begin(request);
    let mut listener = services.listeners.listen(request);
    let prompt = services
        .messenger
        .send_spoiler_prompt(request, THUMBNAIL_PROMPT.to_string())
        .await?;
    let status = StatusMessage::new(services.messenger.clone(), request.chat_id, prompt);

    let Some(thumbnail) = acquire_thumbnail(&services, &mut listener, &mut session, &status).await?
    else {
        return Ok(());
    };
    status.edit("Starting download...").await?;

    let video_path = services
        .config
        .downloads_dir
        .join(format!("{}-{}", request.file_prefix(), media.file_name));
    session.register_temporary_file(&video_path);

    let caption = media.caption.as_deref().unwrap_or(&media.file_name);
    let video = VideoUpload {
        path: video_path.clone(),
        file_name: media.file_name.clone(),
        caption: html::code_inline(caption),
        thumbnail,
        spoiler: session.spoiler(),
        duration: crate::media::MediaDuration::Unknown,
        width: VIDEO_WIDTH,
        height: VIDEO_HEIGHT,
    };
    let transfer = async {
        download_with_progress(&services, &media.attachment, &video_path, &status).await?;
        let duration = services.probe.probe_duration(&video_path).await;
        upload_with_progress(
            &services,
            request.chat_id,
            VideoUpload { duration, ..video },
            &status,
        )
        .await
    };
    let result = tokio::select! {
        result = transfer => result,
        _ = listener.cancelled() => {
            status.edit("Request cancelled.").await?;
            return Ok(());
        }
    };
    conclude(&status, result, "Uploaded ✅".to_string()).await
}

/// Uploads a file that already sits in the downloads directory. The file is
/// removed once it has been uploaded.
pub(crate) async fn upload_task<M: Messenger>(
    services: Services<M>,
    request: RequestId,
    file_name: String,
) -> anyhow::Result<()> {
    let messenger = &services.messenger;
    let file_name = file_name.trim();
    if file_name.is_empty() {
        messenger
            .send_text(request.chat_id, "Please specify the file name.".to_string())
            .await?;
        return Ok(());
    }
    let escaped = html::escape(file_name);
    let path = services.config.downloads_dir.join(file_name);
    let exists = is_bare_file_name(file_name)
        && tokio::fs::metadata(&path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
    if exists && services.downloads.is_claimed(&path) {
        messenger
            .send_text(
                request.chat_id,
                format!("File <code>{}</code> is still downloading.", escaped),
            )
            .await?;
        return Ok(());
    }
    if !exists {
        messenger
            .send_text(
                request.chat_id,
                format!("File <code>{}</code> not found.", escaped),
            )
            .await?;
        return Ok(());
    }

    let mut session = Session::begin(request);
    let mut listener = services.listeners.listen(request);
    let prompt = messenger
        .send_spoiler_prompt(request, THUMBNAIL_PROMPT.to_string())
        .await?;
    let status = StatusMessage::new(messenger.clone(), request.chat_id, prompt);

    let Some(thumbnail) = acquire_thumbnail(&services, &mut listener, &mut session, &status).await?
    else {
        return Ok(());
    };
    status.edit("Starting upload...").await?;

    let spoiler = session.spoiler();
    let transfer = async {
        let duration = services.probe.probe_duration(&path).await;
        let video = VideoUpload {
            path: path.clone(),
            file_name: file_name.to_string(),
            caption: html::code_inline(file_name),
            thumbnail,
            spoiler,
            duration,
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
        };
        upload_with_progress(&services, request.chat_id, video, &status).await
    };
    let result = tokio::select! {
        result = transfer => result,
        _ = listener.cancelled() => {
            status.edit("Request cancelled.").await?;
            return Ok(());
        }
    };
    let uploaded = result.is_ok();
    let outcome = conclude(
        &status,
        result,
        format!("File <code>{}</code> uploaded successfully!", escaped),
    )
    .await;
    if uploaded {
        session.register_temporary_file(&path);
    }
    outcome
}

/// Fetches a URL into the downloads directory with aria2c. The file stays
/// there for a later `/upload`.
pub(crate) async fn url_task<M: Messenger>(
    services: Services<M>,
    request: RequestId,
    url: String,
) -> anyhow::Result<()> {
    let filename = extract_filename(&url);
    let escaped = html::escape(&filename);
    let Some(_claim) = services
        .downloads
        .claim(services.config.downloads_dir.join(&filename))
    else {
        log::info!("Request {}: {} is already being downloaded", request, filename);
        services
            .messenger
            .send_text(
                request.chat_id,
                format!("<code>{}</code> is already being downloaded.", escaped),
            )
            .await?;
        return Ok(());
    };
    let message_id = services
        .messenger
        .send_text(request.chat_id, "Starting download...".to_string())
        .await?;
    let status = StatusMessage::new(services.messenger.clone(), request.chat_id, message_id);
    let mut listener = services.listeners.watch(request);

    let (sender, receiver) = progress_channel();
    let reporter = spawn_reporter(status.clone(), TransferTracker::new("Downloading"), receiver);
    let download = services
        .aria2
        .download(&url, &services.config.downloads_dir, &filename, sender);
    let result = tokio::select! {
        result = download => result.map(|_| ()),
        _ = listener.cancelled() => {
            stop_reporter(reporter).await;
            status.edit("Download cancelled.").await?;
            return Ok(());
        }
    };
    stop_reporter(reporter).await;
    conclude(
        &status,
        result,
        format!("Download complete! <code>{}</code>", escaped),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::media::{Aria2, MediaDuration, MediaProbe};
    use crate::processing::listener::Listeners;
    use crate::session::PathClaims;
    use crate::transfer::io::{Progress, ProgressSender};
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use teloxide::types::{ChatId, MessageId};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Text(String),
        Edit(MessageId, String),
        Prompt(RequestId),
        Download(String, PathBuf),
        Video(VideoUpload, bool),
    }

    /// Records outbound calls. When `reply` is set, answering the prompt is
    /// simulated: the spoiler choice and then the thumbnail arrive right away.
    #[derive(Clone)]
    struct FakeMessenger {
        calls: Arc<Mutex<Vec<Call>>>,
        listeners: Listeners<String>,
        reply: Option<(Option<bool>, String)>,
        fail_upload: bool,
        /// Video downloads write their bytes and then never finish.
        stall_download: bool,
        next_id: Arc<AtomicI32>,
    }

    impl FakeMessenger {
        fn new(listeners: &Listeners<String>) -> Self {
            Self {
                calls: Arc::default(),
                listeners: listeners.clone(),
                reply: None,
                fail_upload: false,
                stall_download: false,
                next_id: Arc::new(AtomicI32::new(100)),
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn last_edit(&self) -> Option<String> {
            self.calls().into_iter().rev().find_map(|call| match call {
                Call::Edit(_, text) => Some(text),
                _ => None,
            })
        }

        fn videos(&self) -> Vec<(VideoUpload, bool)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Video(video, thumbnail_present) => Some((video, thumbnail_present)),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        type Attachment = String;

        async fn send_text(&self, _: ChatId, text: String) -> anyhow::Result<MessageId> {
            self.record(Call::Text(text));
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn edit_text(&self, _: ChatId, id: MessageId, text: String) -> anyhow::Result<()> {
            self.record(Call::Edit(id, text));
            Ok(())
        }

        async fn send_spoiler_prompt(&self, request: RequestId, _: String) -> anyhow::Result<MessageId> {
            self.record(Call::Prompt(request));
            if let Some((spoiler, thumbnail)) = &self.reply {
                if let Some(spoiler) = spoiler {
                    assert!(self.listeners.deliver_spoiler(request, *spoiler));
                }
                assert!(self.listeners.deliver_thumbnail(request.chat_id, thumbnail.clone()).is_ok());
            }
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn download(
            &self,
            attachment: &String,
            destination: &Path,
            progress: Option<ProgressSender>,
        ) -> anyhow::Result<()> {
            self.record(Call::Download(attachment.clone(), destination.to_path_buf()));
            fs::write(destination, attachment)?;
            let stall = self.stall_download && progress.is_some();
            if let Some(progress) = progress {
                let size = attachment.len() as u64;
                let _ = progress.send(Progress {
                    transferred: size,
                    total: size,
                });
            }
            if stall {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn send_video(
            &self,
            _: ChatId,
            video: VideoUpload,
            _: ProgressSender,
        ) -> anyhow::Result<()> {
            let thumbnail_present = video.thumbnail.exists() && video.path.exists();
            self.record(Call::Video(video, thumbnail_present));
            if self.fail_upload {
                anyhow::bail!("Request Entity Too Large");
            }
            Ok(())
        }
    }

    fn config(downloads_dir: &Path) -> Config {
        Config {
            api_id: 1,
            api_hash: "hash".to_string(),
            bot_token: "1:token".to_string(),
            bot_api_url: None,
            downloads_dir: downloads_dir.to_path_buf(),
            thumbnail_timeout: Duration::from_secs(300),
            aria2c_path: "/nonexistent/aria2c".into(),
            ffprobe_path: "/nonexistent/ffprobe".into(),
        }
    }

    fn services(messenger: FakeMessenger, listeners: Listeners<String>, dir: &Path) -> Services<FakeMessenger> {
        let config = config(dir);
        Services {
            messenger,
            probe: MediaProbe::new(&config.ffprobe_path),
            aria2: Aria2::new(&config.aria2c_path),
            config: Arc::new(config),
            listeners,
            downloads: PathClaims::default(),
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request() -> RequestId {
        RequestId::new(ChatId(42), MessageId(7))
    }

    fn dir_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn upload_of_missing_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners, dir.path());

        upload_task(services, request(), "missing.mp4".to_string())
            .await
            .unwrap();

        assert_eq!(
            messenger.calls(),
            vec![Call::Text("File <code>missing.mp4</code> not found.".to_string())]
        );
    }

    #[tokio::test]
    async fn upload_requires_a_plain_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret.mp4"), b"x").unwrap();
        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners, dir.path());

        upload_task(services.clone(), request(), "  ".to_string())
            .await
            .unwrap();
        upload_task(services, request(), "../secret.mp4".to_string())
            .await
            .unwrap();

        assert_eq!(
            messenger.calls(),
            vec![
                Call::Text("Please specify the file name.".to_string()),
                Call::Text("File <code>../secret.mp4</code> not found.".to_string()),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_sends_probed_video_with_chosen_spoiler() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let ffprobe = tools.path().join("ffprobe");
        fs::write(&ffprobe, "#!/bin/sh\necho 12.500000\n").unwrap();
        fs::set_permissions(&ffprobe, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join("report.mp4"), b"video").unwrap();

        let listeners = Listeners::default();
        let mut messenger = FakeMessenger::new(&listeners);
        messenger.reply = Some((Some(true), "thumbnail".to_string()));
        let mut services = services(messenger.clone(), listeners.clone(), dir.path());
        services.probe = MediaProbe::new(&ffprobe);

        upload_task(services, request(), "report.mp4".to_string())
            .await
            .unwrap();

        let videos = messenger.videos();
        assert_eq!(videos.len(), 1);
        let (video, files_present) = &videos[0];
        assert!(files_present);
        assert_eq!(video.duration, MediaDuration::Seconds(12.5));
        assert!(video.spoiler);
        assert_eq!(video.file_name, "report.mp4");
        assert_eq!(video.caption, "<code>report.mp4</code>");
        assert_eq!((video.width, video.height), (480, 320));
        assert_eq!(
            messenger.last_edit().unwrap(),
            "File <code>report.mp4</code> uploaded successfully!"
        );
        assert!(dir_is_empty(dir.path()));
        assert_eq!(listeners.chat_count(), 0);
    }

    #[tokio::test]
    async fn media_is_downloaded_and_sent_back_as_video() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let mut messenger = FakeMessenger::new(&listeners);
        messenger.reply = Some((None, "thumbnail".to_string()));
        let services = services(messenger.clone(), listeners, dir.path());

        let media = MediaRequest {
            request: request(),
            attachment: "video-bytes".to_string(),
            file_name: "Show.mkv".to_string(),
            caption: Some("Show.mkv <b>1080p</b>".to_string()),
        };
        media_task(services, media).await.unwrap();

        let videos = messenger.videos();
        assert_eq!(videos.len(), 1);
        let (video, files_present) = &videos[0];
        assert!(files_present);
        assert!(!video.spoiler);
        assert_eq!(video.duration, MediaDuration::Unknown);
        assert_eq!(video.file_name, "Show.mkv");
        assert_eq!(video.caption, "<code>Show.mkv &lt;b&gt;1080p&lt;/b&gt;</code>");
        assert_eq!(video.path, dir.path().join("42-7-Show.mkv"));
        assert_eq!(messenger.last_edit().unwrap(), "Uploaded ✅");
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn failed_upload_is_reported_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let mut messenger = FakeMessenger::new(&listeners);
        messenger.reply = Some((Some(false), "thumbnail".to_string()));
        messenger.fail_upload = true;
        let services = services(messenger.clone(), listeners, dir.path());

        let media = MediaRequest {
            request: request(),
            attachment: "video-bytes".to_string(),
            file_name: "clip.mp4".to_string(),
            caption: None,
        };
        assert!(media_task(services, media).await.is_err());

        assert_eq!(
            messenger.last_edit().unwrap(),
            "Failed: Request Entity Too Large"
        );
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_thumbnail_prompt_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners.clone(), dir.path());

        let media = MediaRequest {
            request: request(),
            attachment: "video-bytes".to_string(),
            file_name: "clip.mp4".to_string(),
            caption: None,
        };
        media_task(services, media).await.unwrap();

        assert_eq!(
            messenger.last_edit().unwrap(),
            "No photo received within 300 seconds, request cancelled."
        );
        assert!(!messenger
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Download(..) | Call::Video(..))));
        assert!(dir_is_empty(dir.path()));
        assert_eq!(listeners.chat_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_prompt_ends_the_request() {
        let dir = tempfile::tempdir().unwrap();
        let listeners: Listeners<String> = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners.clone(), dir.path());

        let media = MediaRequest {
            request: request(),
            attachment: "video-bytes".to_string(),
            file_name: "clip.mp4".to_string(),
            caption: None,
        };
        let task = tokio::spawn(media_task(services, media));
        while !listeners.is_awaiting_thumbnail(ChatId(42)) {
            tokio::task::yield_now().await;
        }
        assert_eq!(listeners.cancel(ChatId(42)), 1);
        task.await.unwrap().unwrap();

        assert_eq!(messenger.last_edit().unwrap(), "Request cancelled.");
    }

    #[tokio::test]
    async fn failed_url_download_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners.clone(), dir.path());

        let result = url_task(
            services,
            request(),
            "https://host/get?file=movie.mp4".to_string(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            messenger.calls().first(),
            Some(&Call::Text("Starting download...".to_string()))
        );
        assert!(messenger.last_edit().unwrap().starts_with("Failed: couldn't start"));
        assert_eq!(listeners.chat_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn url_download_reports_file_name() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let aria2c = tools.path().join("aria2c");
        fs::write(&aria2c, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&aria2c, fs::Permissions::from_mode(0o755)).unwrap();

        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let mut services = services(messenger.clone(), listeners, dir.path());
        services.aria2 = Aria2::new(&aria2c);

        url_task(
            services,
            request(),
            "https://host/get?file=movie%20night.mp4".to_string(),
        )
        .await
        .unwrap();

        assert_eq!(
            messenger.last_edit().unwrap(),
            "Download complete! <code>movie night.mp4</code>"
        );
    }

    #[tokio::test]
    async fn upload_waits_for_running_download() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("movie.mp4"), b"partial").unwrap();
        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let services = services(messenger.clone(), listeners, dir.path());
        let _claim = services.downloads.claim(dir.path().join("movie.mp4")).unwrap();

        upload_task(services, request(), "movie.mp4".to_string())
            .await
            .unwrap();

        assert_eq!(
            messenger.calls(),
            vec![Call::Text("File <code>movie.mp4</code> is still downloading.".to_string())]
        );
        assert!(dir.path().join("movie.mp4").exists());
    }

    #[tokio::test]
    async fn cancel_during_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let listeners = Listeners::default();
        let mut messenger = FakeMessenger::new(&listeners);
        messenger.reply = Some((None, "thumbnail".to_string()));
        messenger.stall_download = true;
        let services = services(messenger.clone(), listeners.clone(), dir.path());

        let media = MediaRequest {
            request: request(),
            attachment: "half-a-video".to_string(),
            file_name: "clip.mp4".to_string(),
            caption: None,
        };
        let task = tokio::spawn(media_task(services, media));
        let partial = dir.path().join("42-7-clip.mp4");
        while !partial.exists() {
            tokio::task::yield_now().await;
        }
        assert_eq!(listeners.cancel(ChatId(42)), 1);
        task.await.unwrap().unwrap();

        assert_eq!(messenger.last_edit().unwrap(), "Request cancelled.");
        assert!(messenger.videos().is_empty());
        assert!(dir_is_empty(dir.path()));
        assert_eq!(listeners.chat_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_during_url_download_kills_aria2c() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let marker = tools.path().join("finished");
        let aria2c = script(
            tools.path(),
            "aria2c",
            &format!("sleep 1\ntouch '{}'\n", marker.display()),
        );

        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let mut services = services(messenger.clone(), listeners.clone(), dir.path());
        services.aria2 = Aria2::new(&aria2c);

        let task = tokio::spawn(url_task(
            services,
            request(),
            "https://host/get?file=movie.mp4".to_string(),
        ));
        while listeners.chat_count() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(listeners.cancel(ChatId(42)), 1);
        task.await.unwrap().unwrap();

        assert_eq!(messenger.last_edit().unwrap(), "Download cancelled.");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn same_target_is_downloaded_by_one_request_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let aria2c = script(
            tools.path(),
            "aria2c",
            concat!(
                "for arg in \"$@\"; do\n",
                "  case \"$arg\" in\n",
                "    --dir=*) dir=\"${arg#--dir=}\" ;;\n",
                "    --out=*) out=\"${arg#--out=}\" ;;\n",
                "  esac\n",
                "done\n",
                "echo \"writer-$$\" >> \"$dir/$out\"\n",
                "sleep 0.3\n",
            ),
        );

        let listeners = Listeners::default();
        let messenger = FakeMessenger::new(&listeners);
        let mut services = services(messenger.clone(), listeners, dir.path());
        services.aria2 = Aria2::new(&aria2c);

        let url = "https://host/get?file=movie.mp4".to_string();
        let first = RequestId::new(ChatId(42), MessageId(7));
        let second = RequestId::new(ChatId(43), MessageId(8));
        let (a, b) = tokio::join!(
            url_task(services.clone(), first, url.clone()),
            url_task(services.clone(), second, url.clone()),
        );
        a.unwrap();
        b.unwrap();

        let target = dir.path().join("movie.mp4");
        assert_eq!(fs::read_to_string(&target).unwrap().lines().count(), 1);
        assert!(messenger.calls().contains(&Call::Text(
            "<code>movie.mp4</code> is already being downloaded.".to_string()
        )));
        assert_eq!(
            messenger.last_edit().unwrap(),
            "Download complete! <code>movie.mp4</code>"
        );

        url_task(services, second, url).await.unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap().lines().count(), 2);
    }
}
