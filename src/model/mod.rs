//! Data model shared by the store, the engine and the outer surfaces.

pub mod lifecycle;
pub mod meeting;
pub mod subscription;

pub use lifecycle::{LifecycleState, MeetingOutcome};
pub use meeting::{ArtifactRef, MeetingDescriptor, MeetingId, MeetingRecord};
pub use subscription::{HostUser, SubscriptionRecord, SubscriptionState};
