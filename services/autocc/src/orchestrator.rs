//! Fan-out translation of a video's captions and metadata
//!
//! One run moves through
//! `Fetching → Translating → CommittingMetadata → CommittingCaptions → Done`,
//! ending in `Failed` on the first surfaced error.
//!
//! Per target language two tasks run in parallel: a caption task (translate,
//! rebuild with identical timing, upload) and a metadata task (translate
//! title and description into a draft). Tasks never abort each other
//! directly; they record failures into a shared channel and the run checks it
//! at two join points. Metadata is committed as one batch only when every
//! metadata task succeeded. Caption uploads commit individually, so a failed
//! run can leave some languages uploaded.
//!
//! `process` always joins every task it spawned before returning.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use provider::language::{same_language, to_translation_code, to_video_code};
use provider::{
    CaptionDocument, Error, MetadataDraft, MetadataDrafts, Result, TranslationProvider,
    VideoMetadata, VideoProvider,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::metrics::{record_process, record_task};

/// Progress of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Translating,
    CommittingMetadata,
    CommittingCaptions,
    Done,
    Failed,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Translating => "translating",
            Stage::CommittingMetadata => "committing_metadata",
            Stage::CommittingCaptions => "committing_captions",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProcessReport {
    pub run_id: String,
    /// Declared language of the video (video-platform code)
    pub source_language: String,
    /// Target languages, video-platform codes
    pub targets: Vec<String>,
    /// Uploaded caption track id per target language
    pub uploaded: BTreeMap<String, String>,
    pub metadata_updated: bool,
}

/// Drives `process` against the two provider traits.
pub struct Orchestrator {
    video: Arc<dyn VideoProvider>,
    translator: Arc<dyn TranslationProvider>,
    cancel_on_failure: bool,
}

/// State shared by every task of one run.
struct Run {
    video: Arc<dyn VideoProvider>,
    translator: Arc<dyn TranslationProvider>,
    user_id: String,
    video_id: String,
    /// Source language, translation-provider code
    source: String,
    metadata: VideoMetadata,
    captions: CaptionDocument,
    cancel: CancellationToken,
    cancel_on_failure: bool,
    errors: mpsc::Sender<Error>,
    drafts: Mutex<MetadataDrafts>,
    uploads: Mutex<BTreeMap<String, String>>,
}

impl Run {
    /// Record a task failure. The first recorded error is the one surfaced.
    fn record(&self, err: Error) {
        if let Err(e) = self.errors.try_send(err) {
            debug!(error = %e, "error channel full, dropping");
        }
        if self.cancel_on_failure {
            self.cancel.cancel();
        }
    }

    async fn uploaded_languages(&self) -> Vec<String> {
        self.uploads.lock().await.keys().cloned().collect()
    }
}

impl Orchestrator {
    pub fn new(video: Arc<dyn VideoProvider>, translator: Arc<dyn TranslationProvider>) -> Self {
        Self {
            video,
            translator,
            cancel_on_failure: true,
        }
    }

    /// When set (the default), the first recorded task failure cancels the
    /// in-flight siblings. When cleared, every task runs to completion.
    pub fn with_cancel_on_failure(mut self, cancel_on_failure: bool) -> Self {
        self.cancel_on_failure = cancel_on_failure;
        self
    }

    /// Translate the captions and metadata of `video_id` into every
    /// supported language.
    ///
    /// Cancelling `cancel` stops the run at its next provider call; the run
    /// then returns `Error::Cancelled` after its tasks have wound down.
    pub async fn process(
        &self,
        user_id: &str,
        video_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("process", run_id = %run_id, user_id, video_id);
        let started = Instant::now();

        let result = self
            .run(run_id, user_id, video_id, cancel)
            .instrument(span.clone())
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        let _entered = span.enter();
        match &result {
            Ok(report) => {
                info!(
                    stage = Stage::Done.label(),
                    targets = report.targets.len(),
                    uploaded = report.uploaded.len(),
                    elapsed_secs = elapsed,
                    "process finished"
                );
                record_process("done", elapsed);
            }
            Err(e) => {
                warn!(
                    stage = Stage::Failed.label(),
                    kind = e.kind().label(),
                    error = %e,
                    elapsed_secs = elapsed,
                    "process failed"
                );
                record_process(e.kind().label(), elapsed);
            }
        }
        result
    }

    async fn run(
        &self,
        run_id: String,
        user_id: &str,
        video_id: &str,
        caller: &CancellationToken,
    ) -> Result<ProcessReport> {
        let cancel = caller.child_token();
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user id is empty".into()));
        }
        if video_id.trim().is_empty() {
            return Err(Error::InvalidInput("video id is empty".into()));
        }

        enter(Stage::Fetching);
        let languages = guarded(&cancel, self.translator.supported_languages()).await?;
        let metadata = guarded(&cancel, self.video.metadata(user_id, video_id)).await?;
        let source = to_translation_code(&metadata.language);
        let targets = target_languages(&languages, &source);

        let mut report = ProcessReport {
            run_id,
            source_language: metadata.language.clone(),
            targets: targets.iter().map(|t| to_video_code(t)).collect(),
            uploaded: BTreeMap::new(),
            metadata_updated: false,
        };
        if targets.is_empty() {
            info!(source = %metadata.language, "no target languages, nothing to do");
            return Ok(report);
        }

        let tracks = guarded(&cancel, self.video.caption_tracks(user_id, video_id)).await?;
        let track = tracks
            .iter()
            .find(|t| same_language(&t.language, &metadata.language))
            .ok_or_else(|| Error::SourceCaptionsNotFound(metadata.language.clone()))?;
        let captions = guarded(
            &cancel,
            self.video.download_caption_track(user_id, &track.id),
        )
        .await?;
        debug!(track_id = %track.id, entries = captions.len(), "downloaded source captions");

        enter(Stage::Translating);
        let (errors, mut recorded) = mpsc::channel(2 * targets.len());
        let run = Arc::new(Run {
            video: Arc::clone(&self.video),
            translator: Arc::clone(&self.translator),
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
            source,
            metadata,
            captions,
            cancel,
            cancel_on_failure: self.cancel_on_failure,
            errors,
            drafts: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(BTreeMap::new()),
        });

        let mut caption_tasks = JoinSet::new();
        let mut metadata_tasks = JoinSet::new();
        for target in &targets {
            let span = info_span!("language", target = %target);
            caption_tasks.spawn(caption_task(Arc::clone(&run), target.clone()).instrument(span.clone()));
            metadata_tasks.spawn(metadata_task(Arc::clone(&run), target.clone()).instrument(span));
        }
        info!(targets = targets.len(), source = %run.source, "spawned translation tasks");

        enter(Stage::CommittingMetadata);
        join_all(&mut metadata_tasks, &run).await;
        if let Ok(err) = recorded.try_recv() {
            return Err(abort(&run, &mut caption_tasks, err).await);
        }

        // A caption failure from here on must not interrupt the batch write,
        // so only the caller can cancel it.
        let drafts = std::mem::take(&mut *run.drafts.lock().await);
        if let Err(err) = guarded(
            caller,
            self.video.update_metadata_batch(user_id, video_id, &drafts),
        )
        .await
        {
            let err = match err {
                Error::Cancelled if !caller.is_cancelled() => {
                    recorded.try_recv().unwrap_or(Error::Cancelled)
                }
                other => other,
            };
            return Err(abort(&run, &mut caption_tasks, err).await);
        }
        report.metadata_updated = true;
        info!(languages = drafts.len(), "metadata committed");

        enter(Stage::CommittingCaptions);
        join_all(&mut caption_tasks, &run).await;
        if let Ok(err) = recorded.try_recv() {
            warn!(uploaded = ?run.uploaded_languages().await, "caption upload failed, keeping uploaded languages");
            return Err(err);
        }

        report.uploaded = std::mem::take(&mut *run.uploads.lock().await);
        Ok(report)
    }
}

fn enter(stage: Stage) {
    debug!(stage = stage.label(), "entering stage");
}

/// Distinct targets that differ from `source`, case-insensitively.
fn target_languages(languages: &[String], source: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::with_capacity(languages.len());
    for language in languages {
        if language.is_empty() || same_language(language, source) {
            continue;
        }
        if targets.iter().any(|t| same_language(t, language)) {
            continue;
        }
        targets.push(language.clone());
    }
    targets
}

/// Race `fut` against cancellation.
async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Wait for every task; a panicked task counts as a provider failure.
async fn join_all(tasks: &mut JoinSet<()>, run: &Run) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "translation task did not finish");
            run.record(Error::Provider(format!("translation task failed: {e}")));
        }
    }
}

/// Stop the run after a metadata-side failure: cancel siblings when
/// configured, wait for the caption tasks, report what was uploaded.
async fn abort(run: &Run, caption_tasks: &mut JoinSet<()>, err: Error) -> Error {
    if run.cancel_on_failure {
        run.cancel.cancel();
    }
    join_all(caption_tasks, run).await;
    warn!(
        error = %err,
        uploaded = ?run.uploaded_languages().await,
        "metadata not committed"
    );
    err
}

async fn caption_task(run: Arc<Run>, target: String) {
    match translate_captions(&run, &target).await {
        Ok((language, track_id)) => {
            debug!(language = %language, track_id = %track_id, "captions uploaded");
            run.uploads.lock().await.insert(language, track_id);
            record_task("caption", "ok");
        }
        Err(e) => {
            warn!(error = %e, "caption task failed");
            record_task("caption", e.kind().label());
            run.record(e);
        }
    }
}

async fn translate_captions(run: &Run, target: &str) -> Result<(String, String)> {
    let texts = run.captions.texts();
    let translated = if texts.is_empty() {
        Vec::new()
    } else {
        guarded(
            &run.cancel,
            run.translator.translate(&texts, &run.source, target),
        )
        .await?
    };
    let document = run.captions.with_texts(translated)?;

    let language = to_video_code(target);
    let track_id = guarded(
        &run.cancel,
        run.video
            .upload_caption_track(&run.user_id, &run.video_id, &language, &document),
    )
    .await?;
    Ok((language, track_id))
}

async fn metadata_task(run: Arc<Run>, target: String) {
    match translate_metadata(&run, &target).await {
        Ok(draft) => {
            run.drafts.lock().await.insert(draft.language.clone(), draft);
            record_task("metadata", "ok");
        }
        Err(e) => {
            warn!(error = %e, "metadata task failed");
            record_task("metadata", e.kind().label());
            run.record(e);
        }
    }
}

async fn translate_metadata(run: &Run, target: &str) -> Result<MetadataDraft> {
    let texts = [
        run.metadata.title.clone(),
        run.metadata.description.clone(),
    ];
    let translated = guarded(
        &run.cancel,
        run.translator.translate(&texts, &run.source, target),
    )
    .await?;
    let [title, description]: [String; 2] = translated.try_into().map_err(|got: Vec<String>| {
        Error::Provider(format!(
            "expected 2 translated metadata fields, got {}",
            got.len()
        ))
    })?;
    Ok(MetadataDraft {
        language: to_video_code(target),
        title,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::{BoxFuture, CaptionTrack, ErrorKind, VideoPage};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const SOURCE_SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:02,000 --> 00:00:03,000\nHow are you\n\n3\n00:00:03,000 --> 00:00:04,000\nBye\n\n";

    #[derive(Default)]
    struct FakeVideo {
        language: String,
        tracks: Vec<CaptionTrack>,
        srt: String,
        fail_upload: HashSet<String>,
        fail_update: bool,
        update_delay: Option<Duration>,
        upload_delay: Option<Duration>,
        calls: StdMutex<Vec<String>>,
        uploads: StdMutex<BTreeMap<String, CaptionDocument>>,
        updates: StdMutex<Vec<MetadataDrafts>>,
    }

    impl FakeVideo {
        fn english() -> Self {
            Self {
                language: "en".into(),
                tracks: vec![
                    CaptionTrack {
                        id: "track-fr".into(),
                        language: "fr".into(),
                    },
                    CaptionTrack {
                        id: "track-en".into(),
                        language: "EN".into(),
                    },
                ],
                srt: SOURCE_SRT.into(),
                ..Default::default()
            }
        }

        fn called(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
        }

        fn uploaded(&self) -> Vec<String> {
            self.uploads.lock().unwrap().keys().cloned().collect()
        }
    }

    impl VideoProvider for FakeVideo {
        fn id(&self) -> &str {
            "fake-video"
        }

        fn videos<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, Result<VideoPage>> {
            Box::pin(async move { Ok(VideoPage::default()) })
        }

        fn metadata<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, Result<VideoMetadata>> {
            self.calls.lock().unwrap().push("metadata".into());
            Box::pin(async move {
                Ok(VideoMetadata {
                    title: "My video".into(),
                    description: "About things".into(),
                    language: self.language.clone(),
                })
            })
        }

        fn update_metadata_batch<'a>(
            &'a self,
            _: &'a str,
            _: &'a str,
            drafts: &'a MetadataDrafts,
        ) -> BoxFuture<'a, Result<()>> {
            self.calls.lock().unwrap().push("update_metadata_batch".into());
            Box::pin(async move {
                if let Some(delay) = self.update_delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail_update {
                    return Err(Error::Provider("videos.update returned 500".into()));
                }
                self.updates.lock().unwrap().push(drafts.clone());
                Ok(())
            })
        }

        fn caption_tracks<'a>(
            &'a self,
            _: &'a str,
            _: &'a str,
        ) -> BoxFuture<'a, Result<Vec<CaptionTrack>>> {
            self.calls.lock().unwrap().push("caption_tracks".into());
            Box::pin(async move { Ok(self.tracks.clone()) })
        }

        fn download_caption_track<'a>(
            &'a self,
            _: &'a str,
            track_id: &'a str,
        ) -> BoxFuture<'a, Result<CaptionDocument>> {
            self.calls.lock().unwrap().push(format!("download:{track_id}"));
            Box::pin(async move { Ok(CaptionDocument::parse(&self.srt)?) })
        }

        fn upload_caption_track<'a>(
            &'a self,
            _: &'a str,
            _: &'a str,
            language: &'a str,
            document: &'a CaptionDocument,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                if let Some(delay) = self.upload_delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail_upload.contains(language) {
                    return Err(Error::Provider(format!("captions.insert failed for {language}")));
                }
                self.uploads
                    .lock()
                    .unwrap()
                    .insert(language.to_string(), document.clone());
                Ok(format!("track-{language}"))
            })
        }
    }

    #[derive(Default)]
    struct FakeTranslator {
        languages: Vec<String>,
        /// Fail metadata (two-text) translations into these targets
        fail_metadata: HashSet<String>,
        /// Fail every translation into these targets
        fail_all: HashSet<String>,
        calls: StdMutex<Vec<(String, String, usize)>>,
    }

    impl FakeTranslator {
        fn with_languages(languages: &[&str]) -> Self {
            Self {
                languages: languages.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl TranslationProvider for FakeTranslator {
        fn id(&self) -> &str {
            "fake-translator"
        }

        fn supported_languages(&self) -> BoxFuture<'_, Result<Vec<String>>> {
            Box::pin(async move { Ok(self.languages.clone()) })
        }

        fn translate<'a>(
            &'a self,
            texts: &'a [String],
            source: &'a str,
            target: &'a str,
        ) -> BoxFuture<'a, Result<Vec<String>>> {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_string(), target.to_string(), texts.len()));
            Box::pin(async move {
                if self.fail_all.contains(target)
                    || (texts.len() == 2 && self.fail_metadata.contains(target))
                {
                    return Err(Error::Provider(format!("translate into {target} failed")));
                }
                Ok(texts.iter().map(|t| format!("[{target}] {t}")).collect())
            })
        }
    }

    fn orchestrator(video: &Arc<FakeVideo>, translator: &Arc<FakeTranslator>) -> Orchestrator {
        let video: Arc<dyn VideoProvider> = video.clone();
        let translator: Arc<dyn TranslationProvider> = translator.clone();
        Orchestrator::new(video, translator)
    }

    #[tokio::test]
    async fn empty_ids_are_rejected_before_any_call() {
        let video = Arc::new(FakeVideo::english());
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));
        let orchestrator = orchestrator(&video, &translator);
        let cancel = CancellationToken::new();

        let err = orchestrator.process("", "vid", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = orchestrator.process("u1", " ", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(video.called("metadata"), 0);
    }

    #[tokio::test]
    async fn translates_and_commits_every_language() {
        let video = Arc::new(FakeVideo::english());
        let translator = Arc::new(FakeTranslator::with_languages(&["EN", "DE", "FR", "NB"]));
        let report = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.source_language, "en");
        assert_eq!(report.targets, vec!["DE", "FR", "no"]);
        assert!(report.metadata_updated);
        assert_eq!(report.uploaded.get("no").map(String::as_str), Some("track-no"));
        assert_eq!(video.uploaded(), vec!["DE", "FR", "no"]);
        assert_eq!(video.called("download:track-en"), 1);

        let updates = video.updates.lock().unwrap();
        assert_eq!(updates.len(), 1, "metadata is written in one batch");
        let drafts = &updates[0];
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts["DE"].title, "[DE] My video");
        assert_eq!(drafts["no"].description, "[NB] About things");

        let uploads = video.uploads.lock().unwrap();
        let german = &uploads["DE"];
        assert_eq!(german.entries[1].text, "[DE] How are you");
        assert_eq!(german.entries[1].start, "00:00:02,000");
        assert_eq!(german.entries[2].end, "00:00:04,000");
    }

    #[tokio::test]
    async fn failed_metadata_blocks_batch_but_keeps_other_captions() {
        let video = Arc::new(FakeVideo::english());
        let translator = Arc::new(FakeTranslator {
            fail_metadata: HashSet::from(["FR".to_string()]),
            ..FakeTranslator::with_languages(&["DE", "FR", "IT"])
        });

        let err = orchestrator(&video, &translator)
            .with_cancel_on_failure(false)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, Error::Provider("translate into FR failed".into()));
        assert_eq!(video.called("update_metadata_batch"), 0);
        // every caption task ran to completion before process returned
        assert_eq!(video.uploaded(), vec!["DE", "FR", "IT"]);
    }

    #[tokio::test(start_paused = true)]
    async fn caption_failure_surfaces_after_metadata_commit() {
        // uploads finish after the metadata join point
        let video = Arc::new(FakeVideo {
            fail_upload: HashSet::from(["FR".to_string()]),
            upload_delay: Some(Duration::from_secs(1)),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE", "FR"]));

        let err = orchestrator(&video, &translator)
            .with_cancel_on_failure(false)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Provider);
        assert!(err.to_string().contains("FR"));
        assert_eq!(video.called("update_metadata_batch"), 1);
        assert_eq!(video.uploaded(), vec!["DE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn caption_failure_does_not_interrupt_metadata_commit() {
        // FR fails while the batch write is still in flight
        let video = Arc::new(FakeVideo {
            fail_upload: HashSet::from(["FR".to_string()]),
            upload_delay: Some(Duration::from_secs(1)),
            update_delay: Some(Duration::from_secs(5)),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE", "FR"]));

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, Error::Provider("captions.insert failed for FR".into()));
        assert_eq!(video.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_stops_metadata_commit() {
        let video = Arc::new(FakeVideo {
            update_delay: Some(Duration::from_secs(5)),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
        assert!(video.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn metadata_update_failure_is_surfaced() {
        let video = Arc::new(FakeVideo {
            fail_update: true,
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::Provider("videos.update returned 500".into()));
    }

    #[tokio::test]
    async fn missing_source_track_is_reported() {
        let video = Arc::new(FakeVideo {
            language: "pl".into(),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::SourceCaptionsNotFound("pl".into()));
        assert!(translator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_source_language_is_a_no_op() {
        for languages in [vec!["en"], vec![]] {
            let video = Arc::new(FakeVideo::english());
            let translator = Arc::new(FakeTranslator::with_languages(&languages));

            let report = orchestrator(&video, &translator)
                .process("u1", "vid", &CancellationToken::new())
                .await
                .unwrap();
            assert!(report.targets.is_empty());
            assert!(!report.metadata_updated);
            assert_eq!(video.called("caption_tracks"), 0);
            assert_eq!(video.called("update_metadata_batch"), 0);
            assert!(translator.calls.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn norwegian_source_is_normalized() {
        let video = Arc::new(FakeVideo {
            language: "no".into(),
            tracks: vec![CaptionTrack {
                id: "track-no".into(),
                language: "no".into(),
            }],
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["NB", "EN"]));

        let report = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.targets, vec!["EN"]);
        let calls = translator.calls.lock().unwrap();
        assert!(calls.iter().all(|(source, target, _)| source == "nb" && target == "EN"));
    }

    #[tokio::test]
    async fn empty_source_captions_skip_translation() {
        let video = Arc::new(FakeVideo {
            srt: "\n".into(),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));

        let report = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(video.uploaded(), vec!["DE"]);
        assert!(report.metadata_updated);
        // only the metadata translation ran
        let calls = translator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_fetching() {
        let video = Arc::new(FakeVideo::english());
        let translator = Arc::new(FakeTranslator::with_languages(&["DE"]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
        assert_eq!(video.called("metadata"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_cancels_slow_siblings() {
        let video = Arc::new(FakeVideo {
            upload_delay: Some(Duration::from_secs(60)),
            ..FakeVideo::english()
        });
        let translator = Arc::new(FakeTranslator {
            fail_all: HashSet::from(["FR".to_string()]),
            ..FakeTranslator::with_languages(&["DE", "FR"])
        });

        let err = orchestrator(&video, &translator)
            .process("u1", "vid", &CancellationToken::new())
            .await
            .unwrap_err();

        // the real failure wins over the cancellations it caused
        assert_eq!(err, Error::Provider("translate into FR failed".into()));
        assert!(video.uploaded().is_empty());
        assert_eq!(video.called("update_metadata_batch"), 0);
    }

    #[test]
    fn target_languages_dedupes_and_drops_source() {
        let languages: Vec<String> = ["EN", "de", "DE", "", "fr"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(target_languages(&languages, "en"), vec!["de", "fr"]);
    }
}
