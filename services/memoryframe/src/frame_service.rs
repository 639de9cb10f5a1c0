use crate::auth_session::AuthSession;
use crate::error::{FrameError, FrameResult};
use crate::record_gateway::{Frame, FrameRecords, NewFrameRecord};
use crate::storage_gateway::{content_type_for, media_path, MediaKind, ObjectStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One uploaded file as submitted by the user
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    /// Original file name, before sanitizing
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new<S: Into<String>>(file_name: S, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A frame submission
#[derive(Debug, Clone, Default)]
pub struct NewFrameInput {
    pub title: String,
    pub description: Option<String>,
    pub photo: Option<MediaFile>,
    pub video: Option<MediaFile>,
}

/// Input checks of a submission, given the sizes of the files present
///
/// Runs in order and stops at the first failure: title and both files
/// present, then the video ceiling (inclusive). Callers holding only file
/// metadata use this to reject a submission before touching any backend.
pub fn validate_submission(
    title: &str,
    photo_size: Option<u64>,
    video_size: Option<u64>,
    max_video_bytes: u64,
) -> FrameResult<()> {
    let video_size = match (title.trim().is_empty(), photo_size, video_size) {
        (false, Some(_), Some(video_size)) => video_size,
        _ => return Err(missing_fields()),
    };

    if video_size > max_video_bytes {
        return Err(FrameError::validation(format!(
            "Video exceeds {}MB limit.",
            max_video_bytes / (1024 * 1024)
        )));
    }

    Ok(())
}

fn missing_fields() -> FrameError {
    FrameError::validation("Please provide title, photo, and video.")
}

/// Frame lifecycle: create, look up for display, list own frames
pub struct FrameService {
    storage: Arc<dyn ObjectStore>,
    records: Arc<dyn FrameRecords>,
    max_video_bytes: u64,
}

impl FrameService {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        records: Arc<dyn FrameRecords>,
        max_video_bytes: u64,
    ) -> Self {
        Self {
            storage,
            records,
            max_video_bytes,
        }
    }

    /// Upload both assets, then write the frame record
    ///
    /// Checks run before any storage or record call and stop at the first
    /// failure: signed in (refreshing an expired session), then title and both
    /// files present, then video size.
    /// Uploads are sequential, photo first. A failure after the first upload
    /// leaves already-uploaded objects in the bucket; nothing is rolled back.
    #[instrument(skip(self, input, session), fields(title = %input.title))]
    pub async fn create_frame(
        &self,
        input: NewFrameInput,
        session: &AuthSession,
    ) -> FrameResult<Frame> {
        let user = session.active_user().await.ok_or(FrameError::AuthRequired)?;

        validate_submission(
            &input.title,
            input.photo.as_ref().map(MediaFile::size),
            input.video.as_ref().map(MediaFile::size),
            self.max_video_bytes,
        )?;
        let (Some(photo), Some(video)) = (input.photo, input.video) else {
            return Err(missing_fields());
        };
        let title = input.title.trim().to_string();

        let timestamp_ms = Utc::now().timestamp_millis();
        let photo_path = media_path(MediaKind::Photo, user.id, timestamp_ms, &photo.file_name);
        let video_path = media_path(MediaKind::Video, user.id, timestamp_ms, &video.file_name);

        debug!(photo_path = %photo_path, video_path = %video_path, "Uploading frame media");

        self.storage
            .upload(&photo_path, photo.bytes, content_type_for(&photo.file_name))
            .await?;
        self.storage
            .upload(&video_path, video.bytes, content_type_for(&video.file_name))
            .await?;

        let record = NewFrameRecord {
            user_id: user.id,
            title,
            description: input
                .description
                .map(|d| d.trim().to_string())
                .unwrap_or_default(),
            photo_url: self.storage.public_url(&photo_path),
            video_url: self.storage.public_url(&video_path),
        };

        let frame = self.records.insert(record).await?;

        metrics::counter!("memoryframe.frames.created").increment(1);
        info!(frame_id = frame.id, user_id = %user.id, "Frame saved");

        Ok(frame)
    }

    /// Look a frame up for playback; `None` when no frame has this id
    #[instrument(skip(self))]
    pub async fn get_frame_for_display(&self, id: &str) -> FrameResult<Option<Frame>> {
        match self.records.get_by_id(id).await {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Frames of the signed-in user, newest first; empty when signed out
    pub async fn list_own_frames(&self, session: &AuthSession) -> FrameResult<Vec<Frame>> {
        match session.active_user().await {
            Some(user) => self.records.list_by_user(user.id).await,
            None => Ok(Vec::new()),
        }
    }
}
