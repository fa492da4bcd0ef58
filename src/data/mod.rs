//! Labelled buffers and the containers that accumulate sweeps into them.
//!
//! - [`Axis`] and [`Dataset`] are the labelled primitives.
//! - [`LineContainer`] fills a 1-D buffer point by point.
//! - [`SurfaceContainer`] stacks lines into a 2-D buffer.
//! - [`VolumeContainer`] stacks surfaces into a 3-D buffer.
//!
//! Containers share the [`Accumulator`] state machine and publish `changed` /
//! `completed` notifications. [`link`] wires a container to a higher-rank one so
//! that every completed source is ingested automatically.

pub mod axis;
pub mod dataset;
pub mod events;
pub mod fill;
pub mod line;
pub mod link;
pub mod meta;
mod persist;
pub mod slice;
pub mod surface;
pub mod volume;

pub use axis::{Axis, AxisSource};
pub use dataset::{Dataset, MAX_RANK};
pub use events::{ContainerEvent, EventKind, SubscriptionId, Subscribers};
pub use fill::{Accumulator, FillState};
pub use line::LineContainer;
pub use link::{link, shared, unlink, Shared, SliceConsumer, SourceLink};
pub use meta::Metadata;
pub use slice::{FrameSlice, LineSlice, SliceSource};
pub use surface::{SurfaceContainer, SurfaceLayout};
pub use volume::{VolumeContainer, VolumeLayout};
