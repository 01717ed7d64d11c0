// Quantity tracking
pub mod measurement;
pub mod quantity;

// Stage workflow
pub mod production_order;
pub mod stage;

// Process module records
pub mod process_record;

pub use production_order::{CreateProductionOrder, NewStage, OrderStatus, ProductionOrder};
pub use quantity::StageQuantities;
pub use stage::{HoldKind, HoldReason, ProcessType, Stage, StageAction, StageStatus};
