pub mod balancing;
pub mod config;
pub mod dataset;
pub mod error;

pub use balancing::class_balancer::{
    run_balancing, BalanceReport, ClassBalancer, ClassReport, ClassState,
};
pub use config::{BalanceConfig, TransformSettings};
pub use error::{AugmentError, BalanceError, BalanceResult};
