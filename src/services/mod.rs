// Stage workflow
pub mod production_orders;
pub mod stage_locks;

// Process module synchronization
pub mod process_mirror;
