// Position lifecycle and order execution module
pub mod executor;
pub mod position_manager;

pub use executor::{
    calculate_position_size, LiveExecutor, OrderExecutor, SimulatedExecutor,
};
pub use position_manager::{ExitReason, LadderRung, PositionConfig, PositionManager};
