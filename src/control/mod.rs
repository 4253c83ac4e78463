pub mod arming;
pub mod clock;
pub mod flight_loop;
pub mod gesture;
pub mod mixer;
pub mod pid;
