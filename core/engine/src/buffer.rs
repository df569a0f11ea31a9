//! Accumulation buffer for unflushed points.
//!
//! A flush is two-phase: [`AccumulationBuffer::prepare_flush`] copies the
//! current contents into an upload, and [`AccumulationBuffer::acknowledge`]
//! removes exactly the points that upload carried once the backend confirms
//! it. Anything pushed in between survives into the next flush; a failed
//! flush simply never acknowledges.

use runtrack_protocol::{RawPoint, RunningMetrics, SegmentUpload, SessionId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoSession,
    EmptyBuffer,
    NoMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingFlush {
    pub upload: SegmentUpload,
    generation: u64,
}

impl PendingFlush {
    pub fn point_count(&self) -> usize {
        self.upload.points.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccumulationBuffer {
    points: Vec<RawPoint>,
    metrics: Option<RunningMetrics>,
    generation: u64,
}

impl AccumulationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: RawPoint, metrics: RunningMetrics) {
        self.points.push(point);
        self.metrics = Some(metrics);
    }

    /// Refreshes the metrics sent with the next flush without adding a point.
    pub fn update_metrics(&mut self, metrics: RunningMetrics) {
        self.metrics = Some(metrics);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[RawPoint] {
        &self.points
    }

    pub fn prepare_flush(
        &self,
        session_id: Option<&SessionId>,
        is_stopped: bool,
    ) -> Result<PendingFlush, SkipReason> {
        let session_id = session_id.ok_or(SkipReason::NoSession)?;
        if self.points.is_empty() {
            return Err(SkipReason::EmptyBuffer);
        }
        let metrics = self.metrics.clone().ok_or(SkipReason::NoMetrics)?;

        Ok(PendingFlush {
            upload: SegmentUpload {
                session_id: session_id.clone(),
                points: self.points.clone(),
                metrics,
                is_stopped,
            },
            generation: self.generation,
        })
    }

    /// Drops the points carried by a confirmed flush. Returns how many were
    /// removed; a stale acknowledgement (buffer cleared since) removes nothing.
    pub fn acknowledge(&mut self, flush: &PendingFlush) -> usize {
        if flush.generation != self.generation {
            return 0;
        }
        let sent = flush.point_count().min(self.points.len());
        self.points.drain(..sent);
        self.generation = self.generation.wrapping_add(1);
        sent
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.metrics = None;
        self.generation = self.generation.wrapping_add(1);
    }
}
