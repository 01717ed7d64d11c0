pub mod process_record;
pub mod production_order;
