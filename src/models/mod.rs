pub mod attendance;
pub mod employee;
pub mod kra;
pub mod leave;
pub mod menu;
pub mod payslip;
pub mod task;
