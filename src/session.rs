//! Merge workflow state: the two upload slots, the request state and the result.

use crate::error::Result;
use crate::image::encoder;
use crate::image::{EncodedImage, ImageFile, MergeProvider};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// File name used when the result is downloaded into a directory.
pub const DEFAULT_DOWNLOAD_NAME: &str = "merged-image.png";

/// Which upload slot an image goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// The photo of the person to extract.
    Portrait,
    /// The scene the person is placed into.
    Background,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Portrait => write!(f, "portrait"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Display handle for a selected file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHandle {
    name: String,
    media_type: Option<String>,
}

impl PreviewHandle {
    fn for_file(file: &ImageFile) -> Self {
        Self {
            name: file.name().to_string(),
            media_type: file.content_type().map(str::to_string),
        }
    }

    /// Returns the file's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared media type, if known before encoding.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }
}

impl std::fmt::Display for PreviewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.media_type {
            Some(mime) => write!(f, "{} ({})", self.name, mime),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One pending upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSlot {
    file: Option<ImageFile>,
    preview: Option<PreviewHandle>,
}

impl UploadSlot {
    /// Returns the selected file.
    pub fn file(&self) -> Option<&ImageFile> {
        self.file.as_ref()
    }

    /// Returns the preview of the selected file.
    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    /// Returns true if no file is selected.
    pub fn is_empty(&self) -> bool {
        self.file.is_none()
    }
}

/// Where the session is in the merge workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestState {
    /// Nothing running, nothing to show.
    #[default]
    Idle,
    /// A merge request is waiting on the remote service.
    InFlight,
    /// The last merge produced a result.
    Succeeded,
    /// The last merge failed with this message.
    Failed(String),
}

/// Why a merge request was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// At least one slot is empty.
    MissingImages,
    /// Another merge is still in flight.
    InFlight,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingImages => write!(f, "Please upload both a portrait and a background photo."),
            Self::InFlight => write!(f, "A merge is already in progress."),
        }
    }
}

/// What a call to [`SessionController::request_merge`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// No request was made; state is unchanged.
    Rejected(RejectReason),
    /// The merge produced this image.
    Succeeded(EncodedImage),
    /// The merge failed with this message.
    Failed(String),
    /// A slot changed while the request was in flight, so its outcome was dropped.
    Discarded,
}

#[derive(Debug, Default)]
struct SessionState {
    portrait: UploadSlot,
    background: UploadSlot,
    request: RequestState,
    result: Option<EncodedImage>,
    // Bumped on every slot change; outcomes for an older value are stale.
    generation: u64,
}

impl SessionState {
    fn slot(&self, kind: SlotKind) -> &UploadSlot {
        match kind {
            SlotKind::Portrait => &self.portrait,
            SlotKind::Background => &self.background,
        }
    }

    fn slot_mut(&mut self, kind: SlotKind) -> &mut UploadSlot {
        match kind {
            SlotKind::Portrait => &mut self.portrait,
            SlotKind::Background => &mut self.background,
        }
    }
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the session to Idle if a merge future is dropped before it finishes.
struct InFlightGuard<'a> {
    state: &'a Mutex<SessionState>,
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock_state(self.state);
        if state.request == RequestState::InFlight {
            tracing::info!("merge abandoned before completion");
            state.request = RequestState::Idle;
            state.result = None;
        }
    }
}

/// Owns the merge workflow for one user session.
pub struct SessionController<P> {
    provider: P,
    state: Mutex<SessionState>,
}

impl<P: MergeProvider> SessionController<P> {
    /// Creates an idle session backed by `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Returns the merge provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock_state(&self.state)
    }

    /// Stores (or with `None`, clears) the file for `slot`.
    ///
    /// Any shown result or error is cleared. An in-flight request keeps
    /// running, but its outcome will be discarded.
    pub fn select_image(&self, slot: SlotKind, file: Option<ImageFile>) {
        let mut state = self.lock();

        let preview = file.as_ref().map(PreviewHandle::for_file);
        match &preview {
            Some(p) => tracing::info!(%slot, file = %p, "image selected"),
            None => tracing::info!(%slot, "image cleared"),
        }
        *state.slot_mut(slot) = UploadSlot { file, preview };

        state.generation += 1;
        state.result = None;
        if state.request != RequestState::InFlight {
            state.request = RequestState::Idle;
        }
    }

    /// Runs one merge of the selected portrait into the selected background.
    ///
    /// Rejected without touching any state when a slot is empty or a request
    /// is already in flight. Failures end up in [`RequestState::Failed`].
    pub async fn request_merge(&self) -> MergeAttempt {
        let (background, portrait, generation) = {
            let mut state = self.lock();
            if state.request == RequestState::InFlight {
                tracing::debug!("merge ignored: request already in flight");
                return MergeAttempt::Rejected(RejectReason::InFlight);
            }
            let (Some(background), Some(portrait)) =
                (state.background.file.clone(), state.portrait.file.clone())
            else {
                tracing::debug!("merge ignored: missing image");
                return MergeAttempt::Rejected(RejectReason::MissingImages);
            };

            state.request = RequestState::InFlight;
            state.result = None;
            (background, portrait, state.generation)
        };

        tracing::info!(
            background = %background.name(),
            portrait = %portrait.name(),
            provider = %self.provider.name(),
            "merge started"
        );
        let guard = InFlightGuard {
            state: &self.state,
            armed: true,
        };
        let outcome = self.run(&background, &portrait).await;
        guard.disarm();

        let mut state = self.lock();
        if state.generation != generation {
            tracing::info!("merge outcome discarded: images changed while in flight");
            state.request = RequestState::Idle;
            state.result = None;
            return MergeAttempt::Discarded;
        }

        match outcome {
            Ok(image) => {
                tracing::info!(media_type = %image.media_type, "merge succeeded");
                state.request = RequestState::Succeeded;
                state.result = Some(image.clone());
                MergeAttempt::Succeeded(image)
            }
            Err(e) => {
                tracing::warn!("merge failed: {e}");
                let message = e.to_string();
                state.request = RequestState::Failed(message.clone());
                state.result = None;
                MergeAttempt::Failed(message)
            }
        }
    }

    async fn run(&self, background: &ImageFile, portrait: &ImageFile) -> Result<EncodedImage> {
        let (background, portrait) =
            tokio::try_join!(encoder::encode(background), encoder::encode(portrait))?;
        self.provider.merge(&background, &portrait).await
    }

    /// Writes the result's bytes to `path`, returning where they went.
    ///
    /// A directory path gets [`DEFAULT_DOWNLOAD_NAME`] appended. Returns
    /// `Ok(None)` when there is no result.
    pub async fn download_result(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let Some(result) = self.result() else {
            return Ok(None);
        };

        let mut target = path.as_ref().to_path_buf();
        if tokio::fs::metadata(&target)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            target.push(DEFAULT_DOWNLOAD_NAME);
        }

        let bytes = result.decode()?;
        tokio::fs::write(&target, &bytes).await?;
        tracing::info!(path = %target.display(), size_bytes = bytes.len(), "result saved");
        Ok(Some(target))
    }

    /// Returns the current request state.
    pub fn state(&self) -> RequestState {
        self.lock().request.clone()
    }

    /// Returns the merge result, if any.
    pub fn result(&self) -> Option<EncodedImage> {
        self.lock().result.clone()
    }

    /// Returns a snapshot of one upload slot.
    pub fn slot(&self, kind: SlotKind) -> UploadSlot {
        self.lock().slot(kind).clone()
    }

    /// Returns true if a merge request would be started right now.
    pub fn can_merge(&self) -> bool {
        let state = self.lock();
        !state.portrait.is_empty()
            && !state.background.is_empty()
            && state.request != RequestState::InFlight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use crate::image::MergeProviderKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    const JPEG_BYTES: [u8; 8] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];
    const PNG_BYTES: [u8; 10] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x01];

    enum Reply {
        Image(EncodedImage),
        Quota,
        Service(&'static str),
        NoImage,
    }

    struct FakeProvider {
        reply: Reply,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<(EncodedImage, EncodedImage)>>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeProvider {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(Vec::new())),
                gate: None,
            }
        }

        /// Signals `started` on entry, then waits for `release`.
        fn gated(mut self, started: Arc<Notify>, release: Arc<Notify>) -> Self {
            self.gate = Some((started, release));
            self
        }
    }

    #[async_trait]
    impl MergeProvider for FakeProvider {
        async fn merge(
            &self,
            background: &EncodedImage,
            portrait: &EncodedImage,
        ) -> Result<EncodedImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((background.clone(), portrait.clone()));
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            match &self.reply {
                Reply::Image(image) => Ok(image.clone()),
                Reply::Quota => Err(MergeError::QuotaExceeded),
                Reply::Service(detail) => Err(MergeError::Service(detail.to_string())),
                Reply::NoImage => Err(MergeError::NoImageReturned),
            }
        }

        fn kind(&self) -> MergeProviderKind {
            MergeProviderKind::Gemini
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn png_result() -> EncodedImage {
        EncodedImage::from_bytes("image/png", &PNG_BYTES)
    }

    fn portrait_file() -> ImageFile {
        ImageFile::from_bytes("portrait.jpg", JPEG_BYTES.to_vec()).with_content_type("image/jpeg")
    }

    fn background_file() -> ImageFile {
        ImageFile::from_bytes("background.jpg", JPEG_BYTES.to_vec())
            .with_content_type("image/jpeg")
    }

    fn ready_session(reply: Reply) -> SessionController<FakeProvider> {
        let session = SessionController::new(FakeProvider::new(reply));
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        session.select_image(SlotKind::Background, Some(background_file()));
        session
    }

    #[tokio::test]
    async fn test_merge_success_stores_result() {
        let session = ready_session(Reply::Image(png_result()));
        assert!(session.can_merge());

        let attempt = session.request_merge().await;
        assert_eq!(attempt, MergeAttempt::Succeeded(png_result()));
        assert_eq!(session.state(), RequestState::Succeeded);
        assert_eq!(session.result(), Some(png_result()));
        assert_eq!(session.result().unwrap().media_type, "image/png");
    }

    #[tokio::test]
    async fn test_merge_passes_background_first() {
        let session = SessionController::new(FakeProvider::new(Reply::Image(png_result())));
        session.select_image(
            SlotKind::Portrait,
            Some(ImageFile::from_bytes("p.png", PNG_BYTES.to_vec())),
        );
        session.select_image(SlotKind::Background, Some(background_file()));
        session.request_merge().await;

        let seen = session.provider().seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (background, portrait) = &seen[0];
        assert_eq!(background.media_type, "image/jpeg");
        assert_eq!(background.decode().unwrap(), JPEG_BYTES);
        assert_eq!(portrait.media_type, "image/png");
        assert_eq!(portrait.decode().unwrap(), PNG_BYTES);
    }

    #[tokio::test]
    async fn test_merge_with_missing_slot_is_rejected() {
        let session = SessionController::new(FakeProvider::new(Reply::Image(png_result())));
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        assert!(!session.can_merge());

        let attempt = session.request_merge().await;
        assert_eq!(attempt, MergeAttempt::Rejected(RejectReason::MissingImages));
        assert_eq!(
            RejectReason::MissingImages.to_string(),
            "Please upload both a portrait and a background photo."
        );
        assert_eq!(session.state(), RequestState::Idle);
        assert_eq!(session.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clearing_slot_after_failure_resets_to_idle() {
        let session = ready_session(Reply::NoImage);
        session.request_merge().await;
        assert!(matches!(session.state(), RequestState::Failed(_)));

        session.select_image(SlotKind::Background, None);
        assert_eq!(session.state(), RequestState::Idle);
        assert!(session.slot(SlotKind::Background).is_empty());

        let attempt = session.request_merge().await;
        assert_eq!(attempt, MergeAttempt::Rejected(RejectReason::MissingImages));
        assert_eq!(session.state(), RequestState::Idle);
        assert_eq!(session.provider().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_merge_while_in_flight_is_ignored() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let provider = FakeProvider::new(Reply::Image(png_result()))
            .gated(started.clone(), release.clone());
        let calls = provider.calls.clone();

        let session = SessionController::new(provider);
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        session.select_image(SlotKind::Background, Some(background_file()));

        let second = async {
            started.notified().await;
            assert_eq!(session.state(), RequestState::InFlight);
            assert!(!session.can_merge());
            let attempt = session.request_merge().await;
            release.notify_one();
            attempt
        };
        let (first, second) = tokio::join!(session.request_merge(), second);

        assert_eq!(second, MergeAttempt::Rejected(RejectReason::InFlight));
        assert_eq!(first, MergeAttempt::Succeeded(png_result()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_merge_does_not_lock_out_later_merges() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let provider = FakeProvider::new(Reply::Image(png_result()))
            .gated(started.clone(), release.clone());
        let calls = provider.calls.clone();

        let session = SessionController::new(provider);
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        session.select_image(SlotKind::Background, Some(background_file()));

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), session.request_merge()).await;
        assert!(timed_out.is_err());
        assert_eq!(session.state(), RequestState::Idle);
        assert!(session.can_merge());

        // Let the next provider call through.
        release.notify_one();
        let attempt = session.request_merge().await;
        assert_eq!(attempt, MergeAttempt::Succeeded(png_result()));
        assert_eq!(session.state(), RequestState::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slot_change_while_in_flight_discards_outcome() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let provider = FakeProvider::new(Reply::Image(png_result()))
            .gated(started.clone(), release.clone());

        let session = SessionController::new(provider);
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        session.select_image(SlotKind::Background, Some(background_file()));

        let change = async {
            started.notified().await;
            session.select_image(SlotKind::Portrait, Some(portrait_file()));
            assert_eq!(session.state(), RequestState::InFlight);
            release.notify_one();
        };
        let (attempt, ()) = tokio::join!(session.request_merge(), change);

        assert_eq!(attempt, MergeAttempt::Discarded);
        assert_eq!(session.state(), RequestState::Idle);
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn test_quota_message_differs_from_service_message() {
        let quota = ready_session(Reply::Quota);
        let service = ready_session(Reply::Service("500 - backend unavailable"));

        let MergeAttempt::Failed(quota_msg) = quota.request_merge().await else {
            panic!("expected failure");
        };
        let MergeAttempt::Failed(service_msg) = service.request_merge().await else {
            panic!("expected failure");
        };

        assert_ne!(quota_msg, service_msg);
        assert_eq!(quota.state(), RequestState::Failed(quota_msg));
        assert_eq!(service.state(), RequestState::Failed(service_msg.clone()));
        assert!(service_msg.contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_no_image_returned_leaves_result_absent() {
        let session = ready_session(Reply::NoImage);
        let attempt = session.request_merge().await;

        let expected = MergeError::NoImageReturned.to_string();
        assert_eq!(attempt, MergeAttempt::Failed(expected.clone()));
        assert_eq!(session.state(), RequestState::Failed(expected));
        assert!(session.result().is_none());
    }

    #[tokio::test]
    async fn test_encode_failure_becomes_failed_state() {
        let session = SessionController::new(FakeProvider::new(Reply::Image(png_result())));
        session.select_image(SlotKind::Portrait, Some(portrait_file()));
        session.select_image(
            SlotKind::Background,
            Some(ImageFile::from_bytes("notes.txt", b"not an image".to_vec())),
        );

        let attempt = session.request_merge().await;
        assert!(matches!(attempt, MergeAttempt::Failed(ref m) if m.contains("unsupported image format")));
        assert_eq!(session.provider().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_select_after_success_resets_to_idle() {
        let session = ready_session(Reply::Image(png_result()));
        session.request_merge().await;
        assert_eq!(session.state(), RequestState::Succeeded);

        session.select_image(SlotKind::Background, Some(background_file()));
        assert_eq!(session.state(), RequestState::Idle);
        assert!(session.result().is_none());

        let preview = session.slot(SlotKind::Background);
        assert_eq!(preview.preview().unwrap().name(), "background.jpg");
        assert_eq!(preview.preview().unwrap().to_string(), "background.jpg (image/jpeg)");
    }

    #[tokio::test]
    async fn test_download_without_result_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let session = ready_session(Reply::Image(png_result()));

        let saved = session.download_result(dir.path()).await.unwrap();
        assert!(saved.is_none());
        assert!(!dir.path().join(DEFAULT_DOWNLOAD_NAME).exists());
    }

    #[tokio::test]
    async fn test_download_writes_decoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let session = ready_session(Reply::Image(png_result()));
        session.request_merge().await;

        let saved = session.download_result(dir.path()).await.unwrap().unwrap();
        assert_eq!(saved, dir.path().join(DEFAULT_DOWNLOAD_NAME));
        assert_eq!(std::fs::read(&saved).unwrap(), PNG_BYTES);
        assert_eq!(session.state(), RequestState::Succeeded);

        let explicit = dir.path().join("out.png");
        let saved = session.download_result(&explicit).await.unwrap().unwrap();
        assert_eq!(saved, explicit);
    }

    #[cfg(feature = "gemini")]
    #[tokio::test]
    async fn test_end_to_end_with_mock_gemini() {
        use crate::image::providers::GeminiProvider;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let result = png_result();
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash-image:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": result.data}}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let portrait = dir.path().join("portrait.jpg");
        let background = dir.path().join("background.jpg");
        std::fs::write(&portrait, JPEG_BYTES).unwrap();
        std::fs::write(&background, JPEG_BYTES).unwrap();

        let provider = GeminiProvider::builder()
            .api_key("test-key")
            .base_url(server.uri())
            .model(crate::image::providers::GeminiModel::NanoBanana)
            .build()
            .unwrap();
        let session = SessionController::new(provider);
        session.select_image(SlotKind::Portrait, Some(ImageFile::from_path(&portrait)));
        session.select_image(SlotKind::Background, Some(ImageFile::from_path(&background)));

        let attempt = session.request_merge().await;
        assert_eq!(attempt, MergeAttempt::Succeeded(png_result()));
        assert_eq!(session.state(), RequestState::Succeeded);
        assert_eq!(
            session.result(),
            Some(EncodedImage::new("image/png", png_result().data))
        );
    }
}
