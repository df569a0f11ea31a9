//! Directory-backed remote store for offline replays.
//!
//! Layout under the root directory:
//!
//! ```text
//! <session_id>/session.json
//! <session_id>/segment-0001.json
//! <session_id>/complete.json
//! <session_id>/route.png
//! ```
//!
//! Every file is written to a temp file in the same directory and renamed
//! into place, so a crash never leaves a half-written segment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs_err as fs;
use rand::RngCore;
use runtrack_engine::{ApiError, RemoteStore, ServerErrorKind};
use runtrack_protocol::{
    CompletionReceipt, CompletionRequest, CompletionSummary, SegmentAck, SegmentUpload, SessionId,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const SESSION_FILE: &str = "session.json";
const COMPLETE_FILE: &str = "complete.json";
const ROUTE_IMAGE_FILE: &str = "route.png";
const SEGMENT_PREFIX: &str = "segment-";

#[derive(Serialize)]
struct SessionRecord<'a> {
    session_id: &'a SessionId,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CompletionRecord<'a> {
    session_id: &'a SessionId,
    summary: &'a CompletionSummary,
    route_image: Option<&'a str>,
    completed_at: DateTime<Utc>,
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn existing_session_dir(&self, session_id: &SessionId) -> Result<PathBuf, ApiError> {
        let dir = self.session_dir(session_id);
        if dir.join(SESSION_FILE).is_file() {
            Ok(dir)
        } else {
            Err(ApiError::Server(ServerErrorKind::NotFound))
        }
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn create_session(&self) -> Result<SessionId, ApiError> {
        let session_id = SessionId::parse(make_session_id())
            .map_err(|err| ApiError::Unknown(err.to_string()))?;

        let dir = self.session_dir(&session_id);
        fs::create_dir_all(&dir).map_err(io_error)?;
        let record = SessionRecord {
            session_id: &session_id,
            created_at: Utc::now(),
        };
        write_json(&dir.join(SESSION_FILE), &record)?;
        debug!(session_id = %session_id, dir = %dir.display(), "Local session created");
        Ok(session_id)
    }

    async fn append_segment(&self, upload: &SegmentUpload) -> Result<SegmentAck, ApiError> {
        upload
            .validate()
            .map_err(|err| ApiError::Unknown(err.to_string()))?;
        let dir = self.existing_session_dir(&upload.session_id)?;
        let index = count_segments(&dir)? + 1;
        let segment_id = format!("{}{:04}", SEGMENT_PREFIX, index);

        write_json(&dir.join(format!("{}.json", segment_id)), upload)?;
        Ok(SegmentAck {
            segment_id,
            saved_count: upload.points.len(),
        })
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, ApiError> {
        let dir = self.existing_session_dir(&request.session_id)?;

        let image_path = match request.artifact.as_deref() {
            Some(bytes) => {
                let path = dir.join(ROUTE_IMAGE_FILE);
                atomic_write(&path, bytes)?;
                Some(path)
            }
            None => None,
        };
        let record = CompletionRecord {
            session_id: &request.session_id,
            summary: &request.summary,
            route_image: image_path.as_ref().map(|_| ROUTE_IMAGE_FILE),
            completed_at: Utc::now(),
        };
        write_json(&dir.join(COMPLETE_FILE), &record)?;

        Ok(CompletionReceipt {
            map_image_url: image_path.map(|path| format!("file://{}", path.display())),
        })
    }
}

fn make_session_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "local-{}-{:08x}",
        Utc::now().timestamp_millis(),
        random.next_u32()
    )
}

fn count_segments(dir: &Path) -> Result<usize, ApiError> {
    let mut count = 0;
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(SEGMENT_PREFIX) && name.ends_with(".json") {
            count += 1;
        }
    }
    Ok(count)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ApiError> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| ApiError::Unknown(format!("Failed to serialize: {}", err)))?;
    atomic_write(path, &content)
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), ApiError> {
    let parent_dir = path
        .parent()
        .ok_or_else(|| ApiError::Unknown("Output path has no parent directory".to_string()))?;
    let mut temp_file = NamedTempFile::new_in(parent_dir).map_err(io_error)?;
    temp_file.write_all(contents).map_err(io_error)?;
    temp_file.flush().map_err(io_error)?;
    temp_file
        .persist(path)
        .map_err(|err| io_error(err.error))?;
    Ok(())
}

fn io_error(err: std::io::Error) -> ApiError {
    ApiError::Unknown(format!("Local store I/O error: {}", err))
}
