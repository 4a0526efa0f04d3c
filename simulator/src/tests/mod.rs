//! Test modules for the simulator crate

mod test_utils;

mod autoscaler_tests;
mod central_queue_tests;
mod resource_manager_tests;
mod simulation_tests;
mod task_tests;
mod workload_tests;
