pub mod capture;
pub mod configuration;
pub mod controller;
pub mod decode;
pub mod error_handling;
pub mod flow_reconstruction;
pub mod session_management;
pub mod storage;
