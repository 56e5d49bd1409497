//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod assignment;
pub mod blocked_pair;
pub mod couple;
pub mod course;
pub mod course_pairing;
pub mod envelope;
pub mod event;
pub mod match_plan;

// Re-export specific types to avoid conflicts
pub use assignment::{Column as AssignmentColumn, Entity as Assignment, Model as AssignmentModel};
pub use blocked_pair::{
    Column as BlockedPairColumn, Entity as BlockedPair, Model as BlockedPairModel,
};
pub use couple::{
    Column as CoupleColumn, CoupleRole, CoupleStatus, Entity as Couple, Model as CoupleModel,
};
pub use course::Course;
pub use course_pairing::{
    Column as CoursePairingColumn, Entity as CoursePairing, Model as CoursePairingModel,
};
pub use envelope::{
    Column as EnvelopeColumn, Entity as Envelope, EnvelopeState, Model as EnvelopeModel,
};
pub use event::{Column as EventColumn, Entity as Event, Model as EventModel};
pub use match_plan::{
    Column as MatchPlanColumn, Entity as MatchPlan, Model as MatchPlanModel, PlanStatus,
};
