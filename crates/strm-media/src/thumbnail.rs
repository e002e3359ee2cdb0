//! Thumbnail generation.

use std::path::Path;

use strm_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};
use tokio_util::sync::CancellationToken;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::executor::CommandExecutor;

/// FFmpeg arguments extracting one poster frame.
pub fn thumbnail_args(video_path: &Path, output_path: &Path) -> Vec<String> {
    FfmpegCommand::new(video_path, output_path)
        .seek(THUMBNAIL_TIMESTAMP)
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
        .build_args()
}

/// Generate a thumbnail from a video file.
pub async fn generate_thumbnail(
    executor: &dyn CommandExecutor,
    video_path: &Path,
    output_path: &Path,
    cancel: &CancellationToken,
) -> MediaResult<()> {
    executor
        .execute(&thumbnail_args(video_path, output_path), cancel)
        .await?;

    if !tokio::fs::try_exists(output_path).await? {
        return Err(MediaError::MissingOutput(output_path.to_path_buf()));
    }
    Ok(())
}
