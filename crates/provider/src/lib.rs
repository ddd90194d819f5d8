//! Provider abstraction for the video platform and the translation service
//!
//! Defines the collaborator traits the orchestrator drives. Implementations
//! own quota accounting and authentication: every method charges its cost
//! through the quota broker before the upstream call and reverts it when the
//! call fails. The orchestrator only sees these traits, so tests can swap in
//! in-process fakes.
//!
//! Identity is explicit: every user-scoped call takes `user_id` as a
//! parameter.

pub mod caption;
pub mod error;
pub mod language;

pub use caption::{CaptionDocument, CaptionEntry, CaptionError};
pub use common::BoxFuture;
pub use error::{Error, ErrorKind, Result};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Title, description and declared source language of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    /// Video-platform language code (may be empty when the owner never set one)
    pub language: String,
}

/// A video owned by the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    /// RFC 3339 timestamp as reported by the platform
    pub published_at: String,
}

/// One page of a video listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoPage {
    pub videos: Vec<VideoSummary>,
    /// Pass back to fetch the next page; `None` on the last page
    pub next_page_token: Option<String>,
}

/// One caption track attached to a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionTrack {
    pub id: String,
    pub language: String,
}

/// Translated title and description for one target language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDraft {
    /// Video-platform language code
    pub language: String,
    pub title: String,
    pub description: String,
}

/// Drafts keyed by video-platform language code.
pub type MetadataDrafts = BTreeMap<String, MetadataDraft>;

/// Video platform operations.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn VideoProvider>`).
pub trait VideoProvider: Send + Sync {
    /// Identifier for logging (e.g. "youtube")
    fn id(&self) -> &str;

    /// List the user's own videos, one page at a time. An empty
    /// `page_token` requests the first page.
    fn videos<'a>(
        &'a self,
        user_id: &'a str,
        page_token: &'a str,
    ) -> BoxFuture<'a, Result<VideoPage>>;

    /// Fetch title, description and default language of a video.
    fn metadata<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
    ) -> BoxFuture<'a, Result<VideoMetadata>>;

    /// Write every localization in one call.
    fn update_metadata_batch<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
        drafts: &'a MetadataDrafts,
    ) -> BoxFuture<'a, Result<()>>;

    /// List the caption tracks of a video.
    fn caption_tracks<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CaptionTrack>>>;

    /// Download and parse one caption track.
    fn download_caption_track<'a>(
        &'a self,
        user_id: &'a str,
        track_id: &'a str,
    ) -> BoxFuture<'a, Result<CaptionDocument>>;

    /// Upload a caption track tagged with `language`, returning the new
    /// track id. Repeating an identical upload returns the earlier id.
    fn upload_caption_track<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
        language: &'a str,
        document: &'a CaptionDocument,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Machine translation operations.
pub trait TranslationProvider: Send + Sync {
    /// Identifier for logging (e.g. "deepl")
    fn id(&self) -> &str;

    /// Target languages the provider supports, in provider codes.
    fn supported_languages(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Translate `texts` from `source` to `target`; the result has one
    /// element per input text, in order.
    fn translate<'a>(
        &'a self,
        texts: &'a [String],
        source: &'a str,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;
}
