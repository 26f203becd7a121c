use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use traj_core::nalgebra::{Rotation3, Vector3};
use traj_core::{Result, TrajectoryError};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// An editing session: one canvas of one clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct SessionId {
    pub clip: String,
    pub canvas: String,
}

impl SessionId {
    pub fn new(clip: impl Into<String>, canvas: impl Into<String>) -> Self {
        Self {
            clip: clip.into(),
            canvas: canvas.into(),
        }
    }
}

/// The last solved trajectory of a session, one entry per frame in every array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TrajectoryState {
    /// Positions in the scaled scene space of the clip.
    pub positions: Vec<Vector3<f64>>,
    pub velocities: Vec<Vector3<f64>>,
    pub orientations: Vec<Rotation3<f64>>,
    pub matching_weights: Vec<f64>,
}

/// A partial update of a [`TrajectoryState`].
///
/// Missing arrays are left untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateUpdate {
    pub positions: Option<Vec<Vector3<f64>>>,
    pub velocities: Option<Vec<Vector3<f64>>>,
    pub orientations: Option<Vec<Rotation3<f64>>>,
    pub matching_weights: Option<Vec<f64>>,
}

impl StateUpdate {
    pub fn orientations(orientations: Vec<Rotation3<f64>>) -> Self {
        Self {
            orientations: Some(orientations),
            ..Self::default()
        }
    }
}

impl TrajectoryState {
    /// A state at the origin with identity orientations and no matching confidence.
    pub fn new(frame_count: usize) -> Self {
        Self {
            positions: vec![Vector3::zeros(); frame_count],
            velocities: vec![Vector3::zeros(); frame_count],
            orientations: vec![Rotation3::identity(); frame_count],
            matching_weights: vec![0.0; frame_count],
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Writes `update` into the state.
    ///
    /// With `indices`, the k-th entry of every updated array goes to frame `indices[k]`.
    /// Without, every updated array replaces the stored one and must have the same length.
    /// The update is checked as a whole before anything is written.
    pub fn apply(&mut self, update: &StateUpdate, indices: Option<&[usize]>) -> Result<()> {
        let frame_count = self.len();
        let expected = match indices {
            Some(indices) => {
                if let Some(&frame) = indices.iter().find(|&&frame| frame >= frame_count) {
                    return Err(TrajectoryError::FrameIndex { frame, frame_count });
                }
                indices.len()
            }
            None => frame_count,
        };
        let lengths = [
            ("positions", update.positions.as_ref().map(Vec::len)),
            ("velocities", update.velocities.as_ref().map(Vec::len)),
            ("orientations", update.orientations.as_ref().map(Vec::len)),
            ("matching weights", update.matching_weights.as_ref().map(Vec::len)),
        ];
        for (name, len) in lengths {
            match len {
                Some(len) if len != expected => {
                    return Err(TrajectoryError::malformed(format!(
                        "update has {} {} where {} are expected",
                        len, name, expected
                    )));
                }
                _ => {}
            }
        }

        write(&mut self.positions, update.positions.as_deref(), indices);
        write(&mut self.velocities, update.velocities.as_deref(), indices);
        write(&mut self.orientations, update.orientations.as_deref(), indices);
        write(
            &mut self.matching_weights,
            update.matching_weights.as_deref(),
            indices,
        );
        Ok(())
    }
}

fn write<T: Copy>(stored: &mut [T], values: Option<&[T]>, indices: Option<&[usize]>) {
    match (values, indices) {
        (Some(values), Some(indices)) => {
            for (&frame, &value) in indices.iter().zip(values) {
                stored[frame] = value;
            }
        }
        (Some(values), None) => stored.copy_from_slice(values),
        (None, _) => {}
    }
}

/// The trajectory states of every open session.
///
/// Each session has its own lock, so solves of different sessions never wait on each other while
/// two solves of the same session are serialized.
#[derive(Debug, Default)]
pub struct TrajectoryStore {
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<TrajectoryState>>>>,
}

impl TrajectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state of `session`, created at the origin if the session is new.
    ///
    /// Fails if the session was opened on a clip of a different length.
    pub fn session(
        &self,
        session: &SessionId,
        frame_count: usize,
    ) -> Result<Arc<Mutex<TrajectoryState>>> {
        let state = self
            .sessions
            .lock()
            .entry(session.clone())
            .or_insert_with(|| {
                info!(
                    "opening trajectory state for clip {} canvas {} with {} frames",
                    session.clip, session.canvas, frame_count
                );
                Arc::new(Mutex::new(TrajectoryState::new(frame_count)))
            })
            .clone();
        let len = state.lock().len();
        if len != frame_count {
            return Err(TrajectoryError::malformed(format!(
                "session {}/{} holds {} frames, not {}",
                session.clip, session.canvas, len, frame_count
            )));
        }
        Ok(state)
    }

    /// A copy of the state of `session`.
    pub fn get(&self, session: &SessionId, frame_count: usize) -> Result<TrajectoryState> {
        Ok(self.session(session, frame_count)?.lock().clone())
    }

    /// Merges `update` into the state of `session`, see [`TrajectoryState::apply`].
    pub fn merge(
        &self,
        session: &SessionId,
        frame_count: usize,
        update: &StateUpdate,
        indices: Option<&[usize]>,
    ) -> Result<()> {
        self.session(session, frame_count)?
            .lock()
            .apply(update, indices)
    }

    /// Forgets the state of `session`, the next access starts over at the origin.
    pub fn clear(&self, session: &SessionId) -> bool {
        self.sessions.lock().remove(session).is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn session() -> SessionId {
        SessionId::new("clip", "canvas")
    }

    #[test]
    fn new_sessions_start_at_the_origin() {
        let store = TrajectoryStore::new();
        let state = store.get(&session(), 4).unwrap();
        assert_eq!(state, TrajectoryState::new(4));
        assert!(state.orientations.iter().all(|r| *r == Rotation3::identity()));
        assert!(store.get(&session(), 5).is_err());
    }

    #[test]
    fn indexed_merges_only_touch_their_frames() {
        let store = TrajectoryStore::new();
        let update = StateUpdate {
            positions: Some(vec![Vector3::x(), Vector3::y()]),
            matching_weights: Some(vec![0.5, 1.0]),
            ..StateUpdate::default()
        };
        store.merge(&session(), 4, &update, Some(&[1, 3])).unwrap();
        let state = store.get(&session(), 4).unwrap();
        assert_eq!(
            state.positions,
            vec![Vector3::zeros(), Vector3::x(), Vector3::zeros(), Vector3::y()]
        );
        assert_eq!(state.matching_weights, vec![0.0, 0.5, 0.0, 1.0]);
        assert_eq!(state.velocities, vec![Vector3::zeros(); 4]);
    }

    #[test]
    fn whole_merges_replace_arrays() {
        let store = TrajectoryStore::new();
        let rotation = Rotation3::from_euler_angles(0.1, 0.2, 0.3);
        store
            .merge(
                &session(),
                3,
                &StateUpdate::orientations(vec![rotation; 3]),
                None,
            )
            .unwrap();
        assert_eq!(store.get(&session(), 3).unwrap().orientations, vec![rotation; 3]);
    }

    #[test]
    fn bad_updates_leave_the_state_alone() {
        let store = TrajectoryStore::new();
        let update = StateUpdate {
            positions: Some(vec![Vector3::x(); 2]),
            velocities: Some(vec![Vector3::x(); 3]),
            ..StateUpdate::default()
        };
        assert!(matches!(
            store.merge(&session(), 4, &update, Some(&[0, 1])),
            Err(TrajectoryError::MalformedInput(_))
        ));
        assert_eq!(
            store.merge(
                &session(),
                4,
                &StateUpdate::orientations(vec![Rotation3::identity()]),
                Some(&[4])
            ),
            Err(TrajectoryError::FrameIndex {
                frame: 4,
                frame_count: 4
            })
        );
        assert!(store
            .merge(&session(), 4, &StateUpdate::orientations(vec![]), None)
            .is_err());
        assert_eq!(store.get(&session(), 4).unwrap(), TrajectoryState::new(4));
    }

    #[test]
    fn cleared_sessions_start_over() {
        let store = TrajectoryStore::new();
        store
            .merge(
                &session(),
                2,
                &StateUpdate {
                    positions: Some(vec![Vector3::x(); 2]),
                    ..StateUpdate::default()
                },
                None,
            )
            .unwrap();
        assert!(store.clear(&session()));
        assert!(!store.clear(&session()));
        assert_eq!(store.get(&session(), 2).unwrap(), TrajectoryState::new(2));
    }
}
