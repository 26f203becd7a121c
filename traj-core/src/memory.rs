use crate::{CameraModel, FrameData, MapResolution, Pixel, Result, TrajectoryError};
use nalgebra::Vector3;

/// Frame maps held in memory.
///
/// Every map starts zeroed with all pixels valid. The builder methods fill the maps from closures,
/// which makes it easy to describe a synthetic clip in a few lines.
#[derive(Debug, Clone)]
pub struct InMemoryFrames<C> {
    map_resolution: MapResolution,
    feature_resolution: MapResolution,
    feature_len: usize,
    down_scale_factor: f64,
    positions: Vec<Vec<Vector3<f64>>>,
    flows: Vec<Vec<Vector3<f64>>>,
    features: Vec<Vec<f32>>,
    masks: Vec<Vec<bool>>,
    cameras: Vec<C>,
}

impl<C: Clone> InMemoryFrames<C> {
    pub fn new(
        frame_count: usize,
        map_resolution: MapResolution,
        feature_resolution: MapResolution,
        feature_len: usize,
        camera: C,
    ) -> Self {
        let map_pixels = map_resolution.pixel_count();
        let feature_pixels = feature_resolution.pixel_count();
        Self {
            map_resolution,
            feature_resolution,
            feature_len,
            down_scale_factor: 1.0,
            positions: vec![vec![Vector3::zeros(); map_pixels]; frame_count],
            flows: vec![vec![Vector3::zeros(); map_pixels]; frame_count],
            features: vec![vec![0.0; feature_pixels * feature_len]; frame_count],
            masks: vec![vec![true; feature_pixels]; frame_count],
            cameras: vec![camera; frame_count],
        }
    }
}

impl<C> InMemoryFrames<C> {
    #[must_use]
    pub fn down_scale_factor(self, down_scale_factor: f64) -> Self {
        Self {
            down_scale_factor,
            ..self
        }
    }

    #[must_use]
    pub fn positions_from(mut self, mut f: impl FnMut(usize, Pixel) -> Vector3<f64>) -> Self {
        let res = self.map_resolution;
        for (frame, map) in self.positions.iter_mut().enumerate() {
            for (index, value) in map.iter_mut().enumerate() {
                *value = f(frame, res.pixel(index));
            }
        }
        self
    }

    #[must_use]
    pub fn flows_from(mut self, mut f: impl FnMut(usize, Pixel) -> Vector3<f64>) -> Self {
        let res = self.map_resolution;
        for (frame, map) in self.flows.iter_mut().enumerate() {
            for (index, value) in map.iter_mut().enumerate() {
                *value = f(frame, res.pixel(index));
            }
        }
        self
    }

    /// Fills the descriptors. The closure writes into a zeroed descriptor slice.
    #[must_use]
    pub fn features_from(mut self, mut f: impl FnMut(usize, Pixel, &mut [f32])) -> Self {
        let res = self.feature_resolution;
        let len = self.feature_len;
        for (frame, map) in self.features.iter_mut().enumerate() {
            if len == 0 {
                continue;
            }
            for (index, descriptor) in map.chunks_exact_mut(len).enumerate() {
                f(frame, res.pixel(index), descriptor);
            }
        }
        self
    }

    #[must_use]
    pub fn validity_from(mut self, mut f: impl FnMut(usize, Pixel) -> bool) -> Self {
        let res = self.feature_resolution;
        for (frame, mask) in self.masks.iter_mut().enumerate() {
            for (index, valid) in mask.iter_mut().enumerate() {
                *valid = f(frame, res.pixel(index));
            }
        }
        self
    }

    #[must_use]
    pub fn cameras_from(mut self, mut f: impl FnMut(usize) -> C) -> Self {
        for (frame, camera) in self.cameras.iter_mut().enumerate() {
            *camera = f(frame);
        }
        self
    }

    fn map_index(&self, frame: usize, pixel: Pixel, res: MapResolution) -> Result<usize> {
        if frame >= self.positions.len() {
            return Err(TrajectoryError::FrameIndex {
                frame,
                frame_count: self.positions.len(),
            });
        }
        if !res.contains(pixel) {
            return Err(TrajectoryError::malformed(format!(
                "pixel {:?} lies outside of a {}x{} map",
                pixel, res.width, res.height
            )));
        }
        Ok(res.index(pixel))
    }
}

impl<C: CameraModel + Clone> FrameData for InMemoryFrames<C> {
    type Camera = C;

    fn frame_count(&self) -> usize {
        self.positions.len()
    }

    fn map_resolution(&self) -> MapResolution {
        self.map_resolution
    }

    fn feature_resolution(&self) -> MapResolution {
        self.feature_resolution
    }

    fn down_scale_factor(&self) -> f64 {
        self.down_scale_factor
    }

    fn position(&self, frame: usize, pixel: Pixel) -> Result<Vector3<f64>> {
        let index = self.map_index(frame, pixel, self.map_resolution)?;
        Ok(self.positions[frame][index])
    }

    fn flow(&self, frame: usize, pixel: Pixel) -> Result<Vector3<f64>> {
        let index = self.map_index(frame, pixel, self.map_resolution)?;
        Ok(self.flows[frame][index])
    }

    fn feature(&self, frame: usize, pixel: Pixel) -> Result<&[f32]> {
        let index = self.map_index(frame, pixel, self.feature_resolution)?;
        let len = self.feature_len;
        Ok(&self.features[frame][index * len..(index + 1) * len])
    }

    fn validity_mask(&self, frame: usize) -> Result<&[bool]> {
        self.check_frame(frame)?;
        Ok(&self.masks[frame])
    }

    fn camera(&self, frame: usize) -> Result<C> {
        self.check_frame(frame)?;
        Ok(self.cameras[frame].clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Ray;
    use nalgebra::{Point2, UnitVector3};

    #[derive(Debug, Clone)]
    struct Overhead;

    impl CameraModel for Overhead {
        fn ray(&self, screen: Point2<f64>) -> Ray {
            Ray {
                origin: Vector3::new(screen.x, screen.y, 0.0),
                direction: UnitVector3::new_normalize(Vector3::z()),
            }
        }

        fn project(&self, point: &Vector3<f64>) -> Option<Point2<f64>> {
            Some(Point2::new(point.x, point.y))
        }
    }

    fn frames() -> InMemoryFrames<Overhead> {
        InMemoryFrames::new(
            3,
            MapResolution::new(4, 4),
            MapResolution::new(2, 2),
            2,
            Overhead,
        )
        .positions_from(|t, p| Vector3::new(p.x as f64, p.y as f64, t as f64))
        .features_from(|_, p, d| {
            d[0] = p.x as f32;
            d[1] = p.y as f32;
        })
        .validity_from(|t, p| t != 1 || p.x == 0)
    }

    #[test]
    fn sampling() {
        let frames = frames();
        assert_eq!(frames.frame_count(), 3);
        assert_eq!(
            frames.position(2, Pixel::new(3, 1)).unwrap(),
            Vector3::new(3.0, 1.0, 2.0)
        );
        assert_eq!(frames.feature(0, Pixel::new(1, 0)).unwrap(), &[1.0, 0.0]);
        assert_eq!(
            frames.position_at(1, Point2::new(0.5, 1.0)).unwrap(),
            Vector3::new(2.0, 3.0, 1.0)
        );
        assert!(frames.is_valid(1, Pixel::new(0, 1)).unwrap());
        assert!(!frames.is_valid(1, Pixel::new(1, 1)).unwrap());
    }

    #[test]
    fn out_of_range() {
        let frames = frames();
        assert_eq!(
            frames.flow(3, Pixel::new(0, 0)),
            Err(TrajectoryError::FrameIndex {
                frame: 3,
                frame_count: 3
            })
        );
        assert!(frames.position(0, Pixel::new(4, 0)).is_err());
        assert!(frames.camera(5).is_err());
    }
}
