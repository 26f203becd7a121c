use crate::{Result, TrajectoryError};
use core::ops::RangeInclusive;
use derive_more::{AsRef, Deref, Into};
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How the frames of a segment are filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum InterpolationMode {
    /// Interpolate between the keyframes at both ends of the segment.
    Linear,
    /// Follow the scene through the video.
    Tracked,
}

/// An inclusive range of frames sharing one interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub mode: InterpolationMode,
    /// Whether the segment was edited and must be recomputed.
    pub dirty: bool,
}

impl Segment {
    /// Creates a dirty segment.
    pub fn new(start: usize, end: usize, mode: InterpolationMode) -> Self {
        Self {
            start,
            end,
            mode,
            dirty: true,
        }
    }

    pub fn linear(start: usize, end: usize) -> Self {
        Self::new(start, end, InterpolationMode::Linear)
    }

    pub fn tracked(start: usize, end: usize) -> Self {
        Self::new(start, end, InterpolationMode::Tracked)
    }

    #[must_use]
    pub fn dirty(self, dirty: bool) -> Self {
        Self { dirty, ..self }
    }

    pub fn frames(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.frames().contains(&frame)
    }
}

/// The segments of one clip, sorted by their first frame.
///
/// Consecutive segments may share their boundary frame, which is how the editor joins two
/// segments on a keyframe, but may not overlap any further. Gaps between segments are allowed
/// and leave the frames in them untouched.
#[derive(Debug, Clone, PartialEq, Default, AsRef, Deref, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Segments(Vec<Segment>);

impl Segments {
    pub fn new(mut segments: Vec<Segment>, frame_count: usize) -> Result<Self> {
        segments.sort_by_key(|segment| (segment.start, segment.end));
        for segment in &segments {
            if segment.start > segment.end {
                return Err(TrajectoryError::malformed(format!(
                    "segment [{}, {}] ends before it starts",
                    segment.start, segment.end
                )));
            }
            if segment.end >= frame_count {
                return Err(TrajectoryError::FrameIndex {
                    frame: segment.end,
                    frame_count,
                });
            }
        }
        if let Some(pair) = segments.windows(2).find(|pair| pair[1].start < pair[0].end) {
            return Err(TrajectoryError::malformed(format!(
                "segments [{}, {}] and [{}, {}] overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
        Ok(Self(segments))
    }

    pub fn dirty(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.0.iter().filter(|segment| segment.dirty)
    }
}
