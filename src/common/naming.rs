use url::Url;

use crate::regexp::VIDEO_EXTENSION;

pub(crate) const DEFAULT_DOWNLOAD_NAME: &str = "downloaded_file";

/// Cuts the caption right after its first `.mkv`/`.mp4`. Captions without a
/// video extension are returned whole.
pub(crate) fn strip_after_extension(caption: &str) -> &str {
    match VIDEO_EXTENSION.find(caption) {
        Some(m) => &caption[..m.end()],
        None => caption,
    }
}

/// A name that stays inside the directory it is joined onto.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Reduces `name` to its last path component, if that is a plain file name.
pub(crate) fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    is_plain_name(base).then(|| base.to_string())
}

/// Names passed by users to `/upload` must already be bare file names.
pub(crate) fn is_bare_file_name(name: &str) -> bool {
    is_plain_name(name)
}

pub(crate) fn extract_filename(url: &str) -> String {
    let name = Url::parse(url).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == "file")
            .and_then(|(_, value)| sanitize_file_name(&value))
    });
    let name = name.unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string());
    log::info!("Extracted filename: {}", name);
    name
}

/// File name used for a re-uploaded video: the trimmed caption, then the
/// attachment's own name, then a name derived from the message id.
pub(crate) fn video_file_name(
    caption: Option<&str>,
    attachment_name: Option<&str>,
    message_id: i32,
) -> String {
    caption
        .map(strip_after_extension)
        .and_then(sanitize_file_name)
        .or_else(|| attachment_name.and_then(sanitize_file_name))
        .unwrap_or_else(|| format!("video_{}.mp4", message_id))
}
