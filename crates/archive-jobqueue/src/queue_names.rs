//! The fixed set of queue names the archive service dispatches work to, and
//! the priority order a worker drains them in. Grounded on
//! `internal/queuenames/queuenames.go`.

pub const CHANNEL_UPDATE_METADATA: &str = "channel_update_metadata";
pub const CHANNEL_UPDATE_PLAYLISTS: &str = "channel_update_playlists";
pub const CHANNEL_UPDATE_VIDEOS: &str = "channel_update_videos";
pub const PLAYLIST_UPDATE_METADATA: &str = "playlist_update_metadata";
pub const PLAYLIST_UPDATE_VIDEOS: &str = "playlist_update_videos";
pub const VIDEO_UPDATE_METADATA: &str = "video_update_metadata";
pub const VIDEO_DOWNLOAD: &str = "video_download";
pub const VIDEO_UPDATE_THUMBNAIL: &str = "video_update_thumbnail";
pub const VIDEO_TRANSCODE: &str = "video_transcode";
pub const VIDEO_EXTRACT_AUDIO: &str = "video_extract_audio";

/// Priority order: a worker asked to drain "everything" pulls from earlier
/// queues first. Order matches `internal/queuenames/queuenames.go`'s
/// `Priority` verbatim.
pub const PRIORITY: &[&str] = &[
    VIDEO_UPDATE_METADATA,
    CHANNEL_UPDATE_METADATA,
    PLAYLIST_UPDATE_METADATA,
    PLAYLIST_UPDATE_VIDEOS,
    CHANNEL_UPDATE_PLAYLISTS,
    CHANNEL_UPDATE_VIDEOS,
    VIDEO_DOWNLOAD,
    VIDEO_UPDATE_THUMBNAIL,
    VIDEO_EXTRACT_AUDIO,
    VIDEO_TRANSCODE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_lists_every_queue_name_exactly_once() {
        let mut sorted = PRIORITY.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), PRIORITY.len());
        assert_eq!(PRIORITY.len(), 10);
    }
}
