//! DeepL implementation of `TranslationProvider`
//!
//! Every call reserves its character cost on one pooled API key first.
//! Translations and the language list are memoised in the cache, so a
//! repeated run does not spend the character budget again.

use std::sync::Arc;
use std::time::Duration;

use cache::{Cache, cache_key};
use provider::{BoxFuture, Error, Result, TranslationProvider};
use quota_pool::quota::{TRANSLATION_LANGUAGES_COST, translation_cost};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::ClientFactory;

const DAY: Duration = Duration::from_secs(86_400);

#[derive(Deserialize)]
struct LanguageEntry {
    language: String,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    source_lang: String,
    target_lang: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

/// Character usage of one API key as reported by DeepL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyUsage {
    pub character_count: u64,
    pub character_limit: u64,
}

pub struct DeepLProvider {
    http: reqwest::Client,
    base_url: String,
    factory: ClientFactory,
    cache: Arc<dyn Cache>,
    translation_ttl: Duration,
    languages_ttl: Duration,
}

impl DeepLProvider {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        factory: ClientFactory,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            factory,
            cache,
            translation_ttl: DAY,
            languages_ttl: DAY,
        }
    }

    pub fn with_ttls(mut self, translation: Duration, languages: Duration) -> Self {
        self.translation_ttl = translation;
        self.languages_ttl = languages;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Current character count and limit of `api_key`. Does not go through
    /// the broker: the key may not be stored yet.
    pub async fn fetch_usage(&self, api_key: &str) -> Result<KeyUsage> {
        let response = self
            .http
            .get(self.url("usage"))
            .header(reqwest::header::AUTHORIZATION, auth_header(api_key))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("deepl usage request failed: {e}")))?;
        let response = check_status(response, "usage").await?;
        response
            .json::<KeyUsage>()
            .await
            .map_err(|e| Error::Provider(format!("invalid deepl usage response: {e}")))
    }

    async fn request_languages(&self, api_key: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("languages"))
            .header(reqwest::header::AUTHORIZATION, auth_header(api_key))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("deepl languages request failed: {e}")))?;
        let response = check_status(response, "languages").await?;
        let entries = response
            .json::<Vec<LanguageEntry>>()
            .await
            .map_err(|e| Error::Provider(format!("invalid deepl languages response: {e}")))?;
        Ok(entries.into_iter().map(|e| e.language).collect())
    }

    async fn request_translation(
        &self,
        api_key: &str,
        texts: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>> {
        let body = TranslateRequest {
            text: texts,
            source_lang: source_lang(source),
            target_lang: target,
        };
        let response = self
            .http
            .post(self.url("translate"))
            .header(reqwest::header::AUTHORIZATION, auth_header(api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("deepl translate request failed: {e}")))?;
        let response = check_status(response, "translate").await?;
        let parsed = response
            .json::<TranslateResponse>()
            .await
            .map_err(|e| Error::Provider(format!("invalid deepl translate response: {e}")))?;
        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
    }
}

impl TranslationProvider for DeepLProvider {
    fn id(&self) -> &str {
        "deepl"
    }

    fn supported_languages(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let key = cache_key(&["deepl", "languages"]);
            if let Some(languages) = self.cache.get_list(&key).await {
                debug!(count = languages.len(), "supported languages from cache");
                return Ok(languages);
            }

            let client = self.factory.translation(TRANSLATION_LANGUAGES_COST).await?;
            let result = self.request_languages(client.api_key()).await;
            let languages = client.finish(result).await?;

            info!(count = languages.len(), "fetched supported languages");
            self.cache
                .set_list(&key, languages.clone(), self.languages_ttl)
                .await;
            Ok(languages)
        })
    }

    fn translate<'a>(
        &'a self,
        texts: &'a [String],
        source: &'a str,
        target: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            if texts.is_empty() {
                return Err(Error::InvalidInput("nothing to translate".into()));
            }

            let mut parts = vec!["translate", source, target];
            parts.extend(texts.iter().map(String::as_str));
            let key = cache_key(&parts);
            if let Some(cached) = self.cache.get_list(&key).await
                && cached.len() == texts.len()
            {
                debug!(source, target, texts = texts.len(), "translation from cache");
                return Ok(cached);
            }

            let cost = translation_cost(texts);
            let client = self.factory.translation(cost).await?;
            let credential_id = client.credential_id().to_string();
            let result = self
                .request_translation(client.api_key(), texts, source, target)
                .await;
            // the key was charged once the request went through
            let translated = client.finish(result).await?;

            if translated.len() != texts.len() {
                return Err(Error::Provider(format!(
                    "deepl returned {} translations for {} texts",
                    translated.len(),
                    texts.len()
                )));
            }
            debug!(source, target, cost, credential_id = %credential_id, "translated");
            self.cache
                .set_list(&key, translated.clone(), self.translation_ttl)
                .await;
            Ok(translated)
        })
    }
}

fn auth_header(api_key: &str) -> String {
    format!("DeepL-Auth-Key {api_key}")
}

/// `source_lang` takes the bare language, uppercased.
fn source_lang(code: &str) -> String {
    code.split(['-', '_'])
        .next()
        .unwrap_or(code)
        .to_ascii_uppercase()
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
    Err(Error::Provider(format!("deepl {what} returned {status}: {body}")))
}
