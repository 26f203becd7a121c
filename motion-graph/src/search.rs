use crate::{shortest_paths, CsrBuilder};
use float_ord::FloatOrd;
use log::*;
use std::time::Instant;
use traj_core::nalgebra::{Point2, Vector3};
use traj_core::{
    CameraModel, FrameData, KeyframePosition, MapResolution, Pixel, PositionKeyframe, Result,
    TrajectoryError,
};

/// The raw track found through a frame range.
///
/// Every vector holds one entry per frame of the range, starting at frame `first`.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPath {
    pub first: usize,
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    /// The chosen pixel of every frame, at feature resolution.
    pub pixels: Vec<Pixel>,
    /// The total weight of the path between the source and the sink.
    pub cost: f64,
}

impl MotionPath {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn last(&self) -> usize {
        self.first + self.len() - 1
    }
}

/// A keyframe of the range, expressed on screen.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    t: usize,
    screen: Point2<f64>,
}

struct Node<'a> {
    pixel: Pixel,
    position: Vector3<f64>,
    flow: Vector3<f64>,
    descriptor: &'a [f32],
    cost: f64,
}

/// Searches the layered motion graph of a frame range.
///
/// Only the proximity term is enabled by default. The two feature terms compare the descriptors
/// of consecutive nodes and the descriptor of the destination node with its bounding keyframes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionGraphSearch {
    pub proximity_weight: f64,
    pub feature_similarity_weight: f64,
    pub target_feature_similarity_weight: f64,
    /// The fraction of the pixels of a frame discarded before building the graph.
    pub prune_nodes: f64,
}

impl Default for MotionGraphSearch {
    fn default() -> Self {
        Self {
            proximity_weight: 1.0,
            feature_similarity_weight: 0.0,
            target_feature_similarity_weight: 0.0,
            prune_nodes: 0.9,
        }
    }
}

impl MotionGraphSearch {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn proximity_weight(self, proximity_weight: f64) -> Self {
        Self {
            proximity_weight,
            ..self
        }
    }

    #[must_use]
    pub fn feature_similarity_weight(self, feature_similarity_weight: f64) -> Self {
        Self {
            feature_similarity_weight,
            ..self
        }
    }

    #[must_use]
    pub fn target_feature_similarity_weight(self, target_feature_similarity_weight: f64) -> Self {
        Self {
            target_feature_similarity_weight,
            ..self
        }
    }

    #[must_use]
    pub fn prune_nodes(self, prune_nodes: f64) -> Self {
        Self {
            prune_nodes,
            ..self
        }
    }

    /// The number of candidate pixels kept in a frame of `resolution`.
    pub fn nodes_per_frame(&self, resolution: MapResolution) -> usize {
        let keep = (1.0 - self.prune_nodes).clamp(0.0, 1.0);
        ((resolution.pixel_count() as f64 * keep).floor() as usize).max(1)
    }

    /// Finds the track through `first..=last` anchored on the keyframes of that range.
    ///
    /// Keyframes outside of the range are ignored. World keyframes are projected onto the screen
    /// of their frame to pick their pixel.
    pub fn search<F: FrameData>(
        &self,
        frames: &F,
        keyframes: &[PositionKeyframe],
        first: usize,
        last: usize,
    ) -> Result<MotionPath> {
        frames.check_frame(last)?;
        if first > last {
            return Err(TrajectoryError::malformed(format!(
                "empty search range {}..={}",
                first, last
            )));
        }
        let anchors = anchors(frames, keyframes, first, last)?;
        if anchors.is_empty() {
            return Err(TrajectoryError::malformed(format!(
                "no position keyframe to track from in {}..={}",
                first, last
            )));
        }

        let fres = frames.feature_resolution();
        let (pixels, cost) = if anchors.len() == last - first + 1 {
            debug!("every frame of {}..={} is keyframed", first, last);
            let pixels = anchors.iter().map(|a| fres.screen_pixel(a.screen)).collect();
            (pixels, 0.0)
        } else {
            self.shortest_track(frames, &anchors, first, last)?
        };

        let mut path = sample_path(frames, first, pixels, cost)?;
        fix_keyframes(frames, &anchors, &mut path)?;
        for anchor in &anchors {
            let ray = frames.camera(anchor.t)?.ray(anchor.screen);
            debug!(
                "keyframe ray at frame {} passes {} from the track",
                anchor.t,
                ray.distance_to(&path.positions[anchor.t - first])
            );
        }
        Ok(path)
    }

    fn shortest_track<F: FrameData>(
        &self,
        frames: &F,
        anchors: &[Anchor],
        first: usize,
        last: usize,
    ) -> Result<(Vec<Pixel>, f64)> {
        let start = Instant::now();
        let fres = frames.feature_resolution();
        let descriptors = anchors
            .iter()
            .map(|a| frames.feature(a.t, fres.screen_pixel(a.screen)))
            .collect::<Result<Vec<_>>>()?;

        let mut layers = Vec::with_capacity(last - first + 1);
        for t in first..=last {
            let layer = match anchors.binary_search_by_key(&t, |a| a.t) {
                Ok(ix) => vec![self.keyframe_node(frames, anchors[ix], descriptors[ix])?],
                Err(ix) => {
                    // The keyframes on both sides of the frame, when they exist.
                    let bounding = &descriptors[ix.saturating_sub(1)..(ix + 1).min(anchors.len())];
                    self.candidate_nodes(frames, t, bounding)?
                }
            };
            if layer.is_empty() {
                info!("frame {} has no valid candidate pixel", t);
                return Err(TrajectoryError::NoPathFound { first, last });
            }
            layers.push(layer);
        }

        // Node 0 is the source, then every layer in order, then the sink.
        let mut offsets = Vec::with_capacity(layers.len());
        let mut node_count = 1;
        for layer in &layers {
            offsets.push(node_count);
            node_count += layer.len();
        }
        let sink = node_count;
        node_count += 1;
        let edge_count = layers[0].len()
            + layers
                .windows(2)
                .map(|pair| pair[0].len() * pair[1].len())
                .sum::<usize>()
            + layers[layers.len() - 1].len();
        info!(
            "motion graph over {}..={} has {} nodes and {} edges",
            first, last, node_count, edge_count
        );

        let mut builder = CsrBuilder::with_capacity(node_count, edge_count);
        for ix in 0..layers[0].len() {
            builder.push(0, offsets[0] + ix, 1.0);
        }
        for (l, pair) in layers.windows(2).enumerate() {
            for (i, from) in pair[0].iter().enumerate() {
                for (j, to) in pair[1].iter().enumerate() {
                    builder.push(offsets[l] + i, offsets[l + 1] + j, self.weight(from, to));
                }
            }
        }
        let last_layer = layers.len() - 1;
        for ix in 0..layers[last_layer].len() {
            builder.push(offsets[last_layer] + ix, sink, 1.0);
        }
        if builder.clamped() > 0 {
            warn!(
                "clamped {} negative motion graph weights to zero",
                builder.clamped()
            );
        }
        if builder.dropped() > 0 {
            warn!(
                "dropped {} motion graph edges with a non-finite weight",
                builder.dropped()
            );
        }
        let graph = builder.build();

        let paths = shortest_paths(&graph, 0);
        let route = paths
            .path_to(sink)
            .ok_or(TrajectoryError::NoPathFound { first, last })?;
        let pixels = route[1..route.len() - 1]
            .iter()
            .zip(&layers)
            .zip(&offsets)
            .map(|((&node, layer), &offset)| layer[node - offset].pixel)
            .collect();
        info!(
            "found a track of cost {} through {}..={} in {} seconds",
            paths.distances[sink],
            first,
            last,
            start.elapsed().as_secs_f64()
        );
        Ok((pixels, paths.distances[sink]))
    }

    fn keyframe_node<'a, F: FrameData>(
        &self,
        frames: &'a F,
        anchor: Anchor,
        descriptor: &'a [f32],
    ) -> Result<Node<'a>> {
        Ok(Node {
            pixel: frames.feature_resolution().screen_pixel(anchor.screen),
            position: frames.position_at(anchor.t, anchor.screen)?,
            flow: Vector3::zeros(),
            descriptor,
            cost: 0.0,
        })
    }

    /// The valid pixels of frame `t` that look the most like its bounding keyframes.
    ///
    /// Invalid pixels are never candidates, even when too few valid pixels remain to fill the
    /// node budget. A frame without any valid pixel therefore disconnects the graph and the
    /// search fails with [`TrajectoryError::NoPathFound`] instead of routing through pixels
    /// that only score the worst cost.
    fn candidate_nodes<'a, F: FrameData>(
        &self,
        frames: &'a F,
        t: usize,
        bounding: &[&[f32]],
    ) -> Result<Vec<Node<'a>>> {
        let fres = frames.feature_resolution();
        let mres = frames.map_resolution();
        let mask = frames.validity_mask(t)?;

        let mut scored = Vec::new();
        for (index, pixel) in fres.pixels().enumerate() {
            if !mask.get(index).copied().unwrap_or(false) {
                continue;
            }
            let descriptor = frames.feature(t, pixel)?;
            let cost = bounding
                .iter()
                .map(|target| squared_distance(descriptor, target))
                .fold(f64::INFINITY, f64::min);
            scored.push((FloatOrd(cost), index, descriptor));
        }
        scored.sort_unstable_by_key(|&(cost, index, _)| (cost, index));
        scored.truncate(self.nodes_per_frame(fres));

        scored
            .into_iter()
            .map(|(FloatOrd(cost), index, descriptor)| {
                let pixel = fres.pixel(index);
                let map_pixel = mres.rescale(pixel, fres);
                Ok(Node {
                    pixel,
                    position: frames.position(t, map_pixel)?,
                    flow: frames.flow(t, map_pixel)?,
                    descriptor,
                    cost,
                })
            })
            .collect()
    }

    fn weight(&self, from: &Node, to: &Node) -> f64 {
        let mut weight =
            self.proximity_weight * (from.position + from.flow - to.position).norm_squared();
        if self.feature_similarity_weight != 0.0 {
            weight +=
                self.feature_similarity_weight * squared_distance(from.descriptor, to.descriptor);
        }
        if self.target_feature_similarity_weight != 0.0 {
            weight += self.target_feature_similarity_weight * to.cost;
        }
        weight
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| {
            let d = f64::from(a) - f64::from(b);
            d * d
        })
        .sum()
}

fn anchors<F: FrameData>(
    frames: &F,
    keyframes: &[PositionKeyframe],
    first: usize,
    last: usize,
) -> Result<Vec<Anchor>> {
    let mut anchors = keyframes
        .iter()
        .filter(|k| (first..=last).contains(&k.t))
        .map(|k| {
            let screen = match k.position {
                KeyframePosition::Screen(screen) => screen,
                KeyframePosition::World(world) => {
                    frames.camera(k.t)?.project(&world).ok_or_else(|| {
                        TrajectoryError::malformed(format!(
                            "position keyframe at frame {} is behind the camera",
                            k.t
                        ))
                    })?
                }
            };
            Ok(Anchor {
                t: k.t,
                screen: Point2::new(screen.x.clamp(0.0, 1.0), screen.y.clamp(0.0, 1.0)),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    anchors.sort_by_key(|a| a.t);
    if let Some(pair) = anchors.windows(2).find(|pair| pair[0].t == pair[1].t) {
        return Err(TrajectoryError::malformed(format!(
            "two keyframes share frame {}",
            pair[0].t
        )));
    }
    Ok(anchors)
}

fn sample_path<F: FrameData>(
    frames: &F,
    first: usize,
    pixels: Vec<Pixel>,
    cost: f64,
) -> Result<MotionPath> {
    let fres = frames.feature_resolution();
    let mres = frames.map_resolution();
    let mut positions = Vec::with_capacity(pixels.len());
    let mut velocities = Vec::with_capacity(pixels.len());
    for (k, &pixel) in pixels.iter().enumerate() {
        let map_pixel = mres.rescale(pixel, fres);
        positions.push(frames.position(first + k, map_pixel)?);
        velocities.push(frames.flow(first + k, map_pixel)?);
    }
    Ok(MotionPath {
        first,
        positions,
        velocities,
        pixels,
        cost,
    })
}

/// Samples the keyframes at full map resolution and replaces their flow by the one of a
/// neighbor when it cannot be trusted.
fn fix_keyframes<F: FrameData>(frames: &F, anchors: &[Anchor], path: &mut MotionPath) -> Result<()> {
    let first = path.first;
    let last = path.last();
    let is_keyframe = |t: usize| anchors.binary_search_by_key(&t, |a| a.t).is_ok();
    let fres = frames.feature_resolution();
    for anchor in anchors {
        let t = anchor.t;
        let k = t - first;
        path.positions[k] = frames.position_at(t, anchor.screen)?;
        path.velocities[k] = frames.flow_at(t, anchor.screen)?;

        let prev_blocked = t == first || is_keyframe(t - 1);
        let next_blocked = t == last || is_keyframe(t + 1);
        if prev_blocked && next_blocked {
            continue;
        }
        if !frames.is_valid(t, fres.screen_pixel(anchor.screen))? {
            path.velocities[k] = if prev_blocked {
                path.velocities[k + 1]
            } else if next_blocked {
                path.velocities[k - 1]
            } else {
                (path.velocities[k - 1] + path.velocities[k + 1]) / 2.0
            };
            trace!("replaced the unsafe flow of keyframe {}", t);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nodes_per_frame() {
        let res = MapResolution::new(10, 10);
        assert_eq!(MotionGraphSearch::new().prune_nodes(0.5).nodes_per_frame(res), 50);
        assert_eq!(MotionGraphSearch::new().prune_nodes(0.0).nodes_per_frame(res), 100);
        assert_eq!(MotionGraphSearch::new().nodes_per_frame(MapResolution::new(4, 4)), 1);
        assert_eq!(MotionGraphSearch::new().prune_nodes(1.0).nodes_per_frame(res), 1);
    }

    #[test]
    fn descriptor_distance() {
        assert_eq!(squared_distance(&[1.0, 2.0], &[1.0, 4.0]), 4.0);
        assert_eq!(squared_distance(&[], &[]), 0.0);
    }
}
