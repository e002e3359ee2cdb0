//! Aggregate (master) HLS manifest.

use std::fmt::Write;

use strm_models::{estimate_bandwidth, MediaId, Rendition};

/// Build the master playlist listing every rendition.
///
/// Stream URIs are relative to the master playlist, which lives at
/// `{media_id}/master.m3u8`.
pub fn master_manifest(media_id: &MediaId, renditions: &[Rendition]) -> String {
    master_manifest_under(media_id.as_str(), renditions)
}

/// Master playlist stored at `{root}/master.m3u8`.
pub fn master_manifest_under(root: &str, renditions: &[Rendition]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    let root = format!("{}/", root);

    for rendition in renditions {
        let bandwidth = if rendition.bitrate > 0 {
            rendition.bitrate
        } else {
            estimate_bandwidth(&rendition.name)
        };

        let _ = write!(out, "#EXT-X-STREAM-INF:BANDWIDTH={}", bandwidth);
        if let (Some(width), Some(height)) = (rendition.width, rendition.height) {
            let _ = write!(out, ",RESOLUTION={}x{}", width, height);
        }
        out.push('\n');

        let uri = rendition
            .manifest_key
            .strip_prefix(&root)
            .unwrap_or(&rendition.manifest_key);
        out.push_str(uri);
        out.push('\n');
    }

    out
}
