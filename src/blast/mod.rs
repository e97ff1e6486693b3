//! Blast campaigns — bulk outbound template sends.

pub mod dispatcher;
pub mod model;
pub mod scheduler;
pub mod service;

pub use dispatcher::{BlastDispatcher, DispatchOrigin};
pub use model::{Blast, BlastStatus, BlastUpdate, ComponentParams, NewBlast};
pub use scheduler::{BlastScheduler, spawn_template_sync};
pub use service::BlastService;
