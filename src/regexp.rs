use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub(crate) static ref HTTP_URL: Regex = Regex::new(r#"^https?://\S+$"#).unwrap();
    pub(crate) static ref VIDEO_EXTENSION: Regex = Regex::new(r#"(\.mkv|\.mp4)"#).unwrap();
    pub(crate) static ref ARIA2_READOUT: Regex = Regex::new(
        r#"\[#[0-9a-f]+\s+([0-9.]+)(B|KiB|MiB|GiB|TiB)/([0-9.]+)(B|KiB|MiB|GiB|TiB)\((\d+)%\)"#
    )
    .unwrap();
}
