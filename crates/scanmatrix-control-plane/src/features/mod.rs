pub mod assignment_scheduling;
pub mod instance_orchestration;
pub mod lookups;
pub mod observability;
pub mod storage;
