//! Attachment staging
//!
//! Downloads the image attachments of an item to scratch files, uploads
//! them to the publisher and collects the media ids in attachment order.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PlatformError, PosseError, Result};
use crate::feed::FeedSource;
use crate::platforms::Publisher;
use crate::types::{FeedAttachment, FeedItem};

/// Size above which an image is reported before upload
pub const LARGE_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// What to do with a post when some of its images could not be staged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFailurePolicy {
    /// Post with the images that made it
    #[default]
    Skip,
    /// Do not post the item at all
    Abort,
}

impl std::str::FromStr for MediaFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(MediaFailurePolicy::Skip),
            "abort" => Ok(MediaFailurePolicy::Abort),
            _ => Err(format!(
                "Invalid media failure policy: '{}'. Valid options: skip, abort",
                s
            )),
        }
    }
}

/// Outcome of staging one attachment
#[derive(Debug, Clone)]
pub struct StagedAttachment {
    pub url: String,
    pub result: std::result::Result<String, String>,
}

/// Removes the scratch file when dropped
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(dir: &Path) -> Self {
        Self(dir.join(format!("image-{}", Uuid::new_v4())))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "scratch file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), "cannot remove scratch file: {}", e),
        }
    }
}

pub struct AttachmentStager<'a> {
    source: &'a dyn FeedSource,
    publisher: &'a dyn Publisher,
    temp_dir: PathBuf,
    policy: MediaFailurePolicy,
}

impl<'a> AttachmentStager<'a> {
    pub fn new(
        source: &'a dyn FeedSource,
        publisher: &'a dyn Publisher,
        temp_dir: PathBuf,
        policy: MediaFailurePolicy,
    ) -> Self {
        Self {
            source,
            publisher,
            temp_dir,
            policy,
        }
    }

    async fn transfer(
        &self,
        attachment: &FeedAttachment,
        path: &Path,
    ) -> std::result::Result<String, String> {
        let size = self
            .source
            .download(&attachment.url, path)
            .await
            .map_err(|e| e.to_string())?;
        if size > LARGE_IMAGE_BYTES {
            warn!(
                url = %attachment.url,
                bytes = size,
                "image is larger than 5 MB, the network may reject it"
            );
        }

        self.publisher
            .upload_media(path, &attachment.title)
            .await
            .map_err(|e| e.to_string())
    }

    async fn stage_one(&self, attachment: &FeedAttachment) -> StagedAttachment {
        let scratch = ScratchFile::new(&self.temp_dir);
        debug!(url = %attachment.url, path = %scratch.path().display(), "Uploading attachment");

        let result = self.transfer(attachment, scratch.path()).await;

        match &result {
            Ok(id) => debug!(url = %attachment.url, media_id = %id, "Uploaded"),
            Err(e) => warn!(url = %attachment.url, "attachment failed: {}", e),
        }

        StagedAttachment {
            url: attachment.url.clone(),
            result,
        }
    }

    /// Stage every image attachment of `item` concurrently
    ///
    /// The outcomes are in attachment order, one per staged image.
    pub async fn stage_all(&self, item: &FeedItem) -> Vec<StagedAttachment> {
        let images: Vec<&FeedAttachment> = item.image_attachments().collect();
        let max = self.publisher.max_attachments();
        if images.len() > max {
            warn!(
                url = %item.url,
                images = images.len(),
                max,
                "too many images, extra ones are dropped"
            );
        }

        join_all(images.into_iter().take(max).map(|a| self.stage_one(a))).await
    }

    /// Media ids to attach to the post for `item`
    ///
    /// # Errors
    ///
    /// Under [`MediaFailurePolicy::Abort`], returns a media error when any
    /// image failed.
    pub async fn stage(&self, item: &FeedItem) -> Result<Vec<String>> {
        let staged = self.stage_all(item).await;
        resolve_media_ids(staged, self.policy)
    }
}

/// Apply `policy` to staging outcomes, keeping the order of the successes
pub fn resolve_media_ids(
    staged: Vec<StagedAttachment>,
    policy: MediaFailurePolicy,
) -> Result<Vec<String>> {
    let total = staged.len();
    let (ids, failed): (Vec<_>, Vec<_>) = staged
        .into_iter()
        .partition(|attachment| attachment.result.is_ok());

    if !failed.is_empty() {
        let failed_urls: Vec<String> = failed.into_iter().map(|a| a.url).collect();
        match policy {
            MediaFailurePolicy::Abort => {
                return Err(PosseError::Platform(PlatformError::Media(format!(
                    "{} of {} images failed: {}",
                    failed_urls.len(),
                    total,
                    failed_urls.join(", ")
                ))));
            }
            MediaFailurePolicy::Skip => {
                info!(
                    failed = failed_urls.len(),
                    total, "posting without the images that failed"
                );
            }
        }
    }

    Ok(ids.into_iter().filter_map(|a| a.result.ok()).collect())
}
