//! Onboard autonomy core: GNSS parsing, correction link, position store,
//! waypoint queue, navigator state machine, motor translator, and the
//! supervisor that stitches them together (§2).

pub mod clock;
pub mod config;
pub mod correction_link;
pub mod error;
pub mod geo;
pub mod motor;
pub mod navigator;
pub mod parser;
pub mod position_store;
pub mod receiver;
pub mod supervisor;
pub mod waypoint_queue;

pub use config::RoverConfig;
pub use navigator::Navigator;
pub use position_store::PositionStore;
pub use supervisor::Supervisor;
pub use waypoint_queue::WaypointQueue;
