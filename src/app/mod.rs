pub mod normalize_use_case;
pub mod ports;
pub mod resolution_use_case;
pub mod run_use_case;
pub mod services;
