pub mod faulty_log;
pub mod helpers;
