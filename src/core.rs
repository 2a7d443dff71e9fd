//! # Core Module / 核心模块
//!
//! This module contains the orchestration engine: the matrix data model and
//! configuration, the server provisioner and suite runner seams, the job
//! executor, the matrix scheduler and the result aggregator.
//!
//! 此模块包含编排引擎：矩阵数据模型与配置、服务器准备器和套件运行器接口、
//! 作业执行器、矩阵调度器以及结果汇总器。

pub mod aggregator;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod planner;
pub mod provisioner;
pub mod scheduler;
pub mod suite;

// Re-exports
pub use aggregator::{aggregate, AggregateResult};
pub use config::MatrixConfig;
pub use models::{JobOutcome, JobResult, MatrixCell, Mode, ServerVersion, SuiteReport};
pub use planner::expand;
pub use scheduler::MatrixScheduler;
