use core::ops::RangeInclusive;
use traj_core::{InterpolationMode, Segments};

/// The frames that no dirty segment covers, in increasing order.
///
/// These frames keep their previous trajectory and callers can report them as unchanged.
pub fn update_free_zones(segments: &Segments, frame_count: usize) -> Vec<usize> {
    let covered = dirty_cover(segments, frame_count);
    (0..frame_count).filter(|&t| !covered[t]).collect()
}

/// Whether each frame lies in a dirty segment.
pub fn dirty_cover(segments: &Segments, frame_count: usize) -> Vec<bool> {
    let mut covered = vec![false; frame_count];
    for segment in segments.dirty() {
        for t in segment.frames() {
            if let Some(covered) = covered.get_mut(t) {
                *covered = true;
            }
        }
    }
    covered
}

/// The frame ranges to track, joining dirty tracked segments that share a boundary frame.
pub fn tracking_ranges(segments: &Segments) -> Vec<RangeInclusive<usize>> {
    let mut ranges: Vec<RangeInclusive<usize>> = Vec::new();
    for segment in segments
        .dirty()
        .filter(|segment| segment.mode == InterpolationMode::Tracked)
    {
        match ranges.last_mut() {
            Some(range) if *range.end() == segment.start => {
                *range = *range.start()..=segment.end;
            }
            _ => ranges.push(segment.frames()),
        }
    }
    ranges
}

#[cfg(test)]
mod test {
    use super::*;
    use traj_core::Segment;

    fn segments() -> Segments {
        Segments::new(
            vec![
                Segment::tracked(0, 3),
                Segment::tracked(3, 6),
                Segment::linear(6, 8).dirty(false),
                Segment::tracked(10, 12),
                Segment::linear(12, 14),
            ],
            16,
        )
        .unwrap()
    }

    #[test]
    fn free_zones_complement_dirty_segments() {
        let segments = segments();
        let free = update_free_zones(&segments, 16);
        assert_eq!(free, vec![7, 8, 9, 15]);
        assert_eq!(update_free_zones(&segments, 16), free);
        assert_eq!(
            update_free_zones(&Segments::default(), 4),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn tracked_segments_join_on_shared_frames() {
        assert_eq!(tracking_ranges(&segments()), vec![0..=6, 10..=12]);
    }
}
