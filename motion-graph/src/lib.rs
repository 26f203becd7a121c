//! # Motion Graph
//!
//! Finds a plausible 3d point track through a range of frames of a video, anchored on the position
//! keyframes placed by the user.
//!
//! Every frame of the range contributes a layer of candidate nodes. A keyframed frame contributes
//! exactly one node, the keyframe pixel. Any other frame contributes the candidate pixels that look
//! the most like the keyframes around it, restricted to the pixels whose flow is valid. Edges only
//! connect a layer to the next one, so the graph is a layered DAG:
//!
//! ```text
//!            frame t         frame t + 1
//!
//!               o ------------> o
//!   source --> o  \ ---------> o --> ... --> sink
//!               o -----------> o
//! ```
//!
//! The weight of the edge from node `i` to node `j` measures how far the position of `i`, advected
//! by its own flow, lands from the position of `j`. The cheapest path from the source to the sink
//! picks one pixel per frame, and sampling the position and flow maps along it gives the raw track.
//!
//! The graph is stored in compressed sparse row form ([`CsrGraph`]) with its edge count known ahead
//! of construction, and searched with [`shortest_paths`].

mod csr;
mod dijkstra;
mod search;

pub use csr::*;
pub use dijkstra::*;
pub use search::*;
