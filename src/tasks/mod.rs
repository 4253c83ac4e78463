pub mod crsf_task;
pub mod fast_loop;
