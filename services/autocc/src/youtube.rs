//! YouTube Data API implementation of `VideoProvider`
//!
//! Each call reserves its documented quota cost on one of the user's
//! sessions, authenticates with that session's (possibly refreshed) access
//! token and settles the reservation with the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, cache_key};
use provider::{
    BoxFuture, CaptionDocument, CaptionTrack, Error, MetadataDrafts, Result, VideoMetadata,
    VideoPage, VideoProvider, VideoSummary,
};
use quota_pool::quota::{
    CAPTIONS_DOWNLOAD_COST, CAPTIONS_INSERT_COST, CAPTIONS_LIST_COST, SEARCH_LIST_COST,
    VIDEOS_LIST_COST, VIDEOS_UPDATE_COST,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::ClientFactory;

const CAPTION_FORMAT: &str = "srt";
const VIDEOS_PAGE_SIZE: &str = "50";
const VIDEO_KIND: &str = "youtube#video";

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: SearchSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    kind: String,
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct VideoItem {
    snippet: VideoSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    default_language: Option<String>,
}

#[derive(Deserialize)]
struct CaptionItem {
    id: String,
    snippet: CaptionSnippet,
}

#[derive(Deserialize)]
struct CaptionSnippet {
    language: String,
}

#[derive(Serialize)]
struct LocalizationsUpdate<'a> {
    id: &'a str,
    localizations: BTreeMap<&'a str, Localization<'a>>,
}

#[derive(Serialize)]
struct Localization<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct CaptionInsert<'a> {
    snippet: CaptionInsertSnippet<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptionInsertSnippet<'a> {
    language: &'a str,
    name: &'a str,
    video_id: &'a str,
}

#[derive(Deserialize)]
struct Inserted {
    id: String,
}

pub struct YouTubeProvider {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
    factory: ClientFactory,
    cache: Arc<dyn Cache>,
    upload_ttl: Duration,
}

impl YouTubeProvider {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        upload_base: &str,
        factory: ClientFactory,
        cache: Arc<dyn Cache>,
        upload_ttl: Duration,
    ) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            factory,
            cache,
            upload_ttl,
        }
    }
}

impl VideoProvider for YouTubeProvider {
    fn id(&self) -> &str {
        "youtube"
    }

    fn videos<'a>(
        &'a self,
        user_id: &'a str,
        page_token: &'a str,
    ) -> BoxFuture<'a, Result<VideoPage>> {
        Box::pin(async move {
            if user_id.is_empty() {
                return Err(Error::InvalidInput("user id is required".into()));
            }
            let mut client = self.factory.video(user_id, SEARCH_LIST_COST).await?;
            let result: Result<VideoPage> = async {
                let token = client.access_token().await?;
                let mut query = vec![
                    ("part", "snippet"),
                    ("forMine", "true"),
                    ("type", "video"),
                    ("maxResults", VIDEOS_PAGE_SIZE),
                ];
                if !page_token.is_empty() {
                    query.push(("pageToken", page_token));
                }
                let response = self
                    .http
                    .get(format!("{}/search", self.api_base))
                    .query(&query)
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(request_error("search.list"))?;
                let search: SearchResponse = parse(response, "search.list").await?;
                let videos = search
                    .items
                    .into_iter()
                    .filter(|item| item.id.kind == VIDEO_KIND)
                    .filter_map(|item| {
                        Some(VideoSummary {
                            id: item.id.video_id?,
                            title: item.snippet.title,
                            description: item.snippet.description,
                            thumbnail_url: item
                                .snippet
                                .thumbnails
                                .default
                                .map(|t| t.url)
                                .unwrap_or_default(),
                            published_at: item.snippet.published_at,
                        })
                    })
                    .collect();
                Ok(VideoPage {
                    videos,
                    next_page_token: search.next_page_token.filter(|t| !t.is_empty()),
                })
            }
            .await;
            client.finish(result).await
        })
    }

    fn metadata<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
    ) -> BoxFuture<'a, Result<VideoMetadata>> {
        Box::pin(async move {
            require(user_id, video_id)?;
            let mut client = self.factory.video(user_id, VIDEOS_LIST_COST).await?;
            let result: Result<VideoMetadata> = async {
                let token = client.access_token().await?;
                let response = self
                    .http
                    .get(format!("{}/videos", self.api_base))
                    .query(&[("part", "snippet"), ("id", video_id)])
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(request_error("videos.list"))?;
                let list: ListResponse<VideoItem> = parse(response, "videos.list").await?;
                let item = list
                    .items
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::NotFound(format!("video {video_id}")))?;
                Ok(VideoMetadata {
                    title: item.snippet.title,
                    description: item.snippet.description,
                    language: item.snippet.default_language.unwrap_or_default(),
                })
            }
            .await;
            client.finish(result).await
        })
    }

    fn update_metadata_batch<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
        drafts: &'a MetadataDrafts,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            require(user_id, video_id)?;
            if drafts.is_empty() {
                return Err(Error::InvalidInput("no metadata drafts".into()));
            }
            let body = LocalizationsUpdate {
                id: video_id,
                localizations: drafts
                    .iter()
                    .map(|(language, draft)| {
                        (
                            language.as_str(),
                            Localization {
                                title: &draft.title,
                                description: &draft.description,
                            },
                        )
                    })
                    .collect(),
            };

            let mut client = self.factory.video(user_id, VIDEOS_UPDATE_COST).await?;
            let result: Result<()> = async {
                let token = client.access_token().await?;
                let response = self
                    .http
                    .put(format!("{}/videos", self.api_base))
                    .query(&[("part", "localizations")])
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .map_err(request_error("videos.update"))?;
                check_status(response, "videos.update").await?;
                Ok(())
            }
            .await;
            let result = client.finish(result).await;
            if result.is_ok() {
                info!(video_id, languages = drafts.len(), "localizations updated");
            }
            result
        })
    }

    fn caption_tracks<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CaptionTrack>>> {
        Box::pin(async move {
            require(user_id, video_id)?;
            let mut client = self.factory.video(user_id, CAPTIONS_LIST_COST).await?;
            let result: Result<Vec<CaptionTrack>> = async {
                let token = client.access_token().await?;
                let response = self
                    .http
                    .get(format!("{}/captions", self.api_base))
                    .query(&[("part", "id,snippet"), ("videoId", video_id)])
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(request_error("captions.list"))?;
                let list: ListResponse<CaptionItem> = parse(response, "captions.list").await?;
                Ok(list
                    .items
                    .into_iter()
                    .map(|item| CaptionTrack {
                        id: item.id,
                        language: item.snippet.language,
                    })
                    .collect())
            }
            .await;
            client.finish(result).await
        })
    }

    fn download_caption_track<'a>(
        &'a self,
        user_id: &'a str,
        track_id: &'a str,
    ) -> BoxFuture<'a, Result<CaptionDocument>> {
        Box::pin(async move {
            if user_id.is_empty() || track_id.is_empty() {
                return Err(Error::InvalidInput("user id and track id are required".into()));
            }
            let mut client = self.factory.video(user_id, CAPTIONS_DOWNLOAD_COST).await?;
            let result: Result<CaptionDocument> = async {
                let token = client.access_token().await?;
                let response = self
                    .http
                    .get(format!("{}/captions/{track_id}", self.api_base))
                    .query(&[("tfmt", CAPTION_FORMAT)])
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(request_error("captions.download"))?;
                let response = check_status(response, "captions.download").await?;
                let text = response
                    .text()
                    .await
                    .map_err(request_error("captions.download"))?;
                Ok(CaptionDocument::parse(&text)?)
            }
            .await;
            client.finish(result).await
        })
    }

    fn upload_caption_track<'a>(
        &'a self,
        user_id: &'a str,
        video_id: &'a str,
        language: &'a str,
        document: &'a CaptionDocument,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            require(user_id, video_id)?;
            let content = document.to_string();
            let key = cache_key(&["upload", user_id, video_id, language, &content]);
            if let Some(track_id) = self.cache.get(&key).await {
                debug!(video_id, language, track_id = %track_id, "identical captions already uploaded");
                return Ok(track_id);
            }

            let snippet = serde_json::to_string(&CaptionInsert {
                snippet: CaptionInsertSnippet {
                    language,
                    name: "",
                    video_id,
                },
            })
            .map_err(|e| Error::Provider(format!("captions.insert metadata: {e}")))?;
            let boundary = format!("autocc-{}", uuid::Uuid::new_v4().simple());
            let body = multipart_related(&boundary, &snippet, &content);

            let mut client = self.factory.video(user_id, CAPTIONS_INSERT_COST).await?;
            let result: Result<String> = async {
                let token = client.access_token().await?;
                let response = self
                    .http
                    .post(format!("{}/captions", self.upload_base))
                    .query(&[("part", "snippet"), ("uploadType", "multipart")])
                    .bearer_auth(token)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={boundary}"),
                    )
                    .body(body)
                    .send()
                    .await
                    .map_err(request_error("captions.insert"))?;
                let inserted: Inserted = parse(response, "captions.insert").await?;
                Ok(inserted.id)
            }
            .await;
            let track_id = client.finish(result).await?;

            self.cache.set(&key, track_id.clone(), self.upload_ttl).await;
            Ok(track_id)
        })
    }
}

fn require(user_id: &str, video_id: &str) -> Result<()> {
    if user_id.is_empty() || video_id.is_empty() {
        return Err(Error::InvalidInput("user id and video id are required".into()));
    }
    Ok(())
}

/// Body of a `multipart/related` upload: JSON resource, then the media.
fn multipart_related(boundary: &str, metadata: &str, media: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{boundary}\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {media}\r\n\
         --{boundary}--\r\n"
    )
}

fn request_error(what: &'static str) -> impl Fn(reqwest::Error) -> Error {
    move |e| Error::Provider(format!("youtube {what} request failed: {e}"))
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::NotFound(format!("youtube {what}: {body}")));
    }
    Err(Error::Provider(format!("youtube {what} returned {status}: {body}")))
}

async fn parse<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T> {
    check_status(response, what)
        .await?
        .json::<T>()
        .await
        .map_err(|e| Error::Provider(format!("invalid youtube {what} response: {e}")))
}
