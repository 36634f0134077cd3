//! Ceremony orchestration: the round state machine, the MPC coordinator,
//! and the deadline sweeper.

pub mod coordinator;
pub mod fsm;
pub mod sweeper;

pub use coordinator::{MpcCoordinator, Round2Info};
pub use fsm::CeremonyFsm;
pub use sweeper::TimeoutSweeper;
