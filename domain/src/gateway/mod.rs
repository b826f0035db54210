pub mod queue_api;
