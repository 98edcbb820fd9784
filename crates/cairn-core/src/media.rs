//! Media URL resolution for transcoded videos.

use crate::model::FileMeta;

/// Thumbnail URL for a transcoded video.
#[must_use]
pub fn thumbnail_url(hostname: &str, video_id: &str, format: &str) -> String {
    format!("https://{hostname}/videos/{video_id}/thumbnail.{format}")
}

/// First video among `files`, in order.
#[must_use]
pub fn first_video(files: &[FileMeta]) -> Option<&str> {
    files.iter().find_map(|file| file.video_id.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: i64, video_id: Option<&str>) -> FileMeta {
        FileMeta {
            id,
            name: format!("file-{id}"),
            mime_type: if video_id.is_some() { "video/mp4" } else { "image/jpeg" }.into(),
            video_id: video_id.map(str::to_string),
        }
    }

    #[test]
    fn builds_thumbnail_url() {
        assert_eq!(
            thumbnail_url("media.example.org", "abc", "webp"),
            "https://media.example.org/videos/abc/thumbnail.webp"
        );
    }

    #[test]
    fn first_video_skips_images() {
        let files = [file(1, None), file(2, Some("v2")), file(3, Some("v3"))];
        assert_eq!(first_video(&files), Some("v2"));
        assert_eq!(first_video(&files[..1]), None);
    }
}
