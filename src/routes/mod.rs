pub mod attendance;
pub mod auth;
pub mod employees;
pub mod health;
pub mod kpi;
pub mod kra;
pub mod leaves;
pub mod menu;
pub mod payslips;
pub mod tasks;
