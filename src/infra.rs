//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for the orchestrator,
//! including command execution, port allocation, file system operations,
//! diagnostic logging and i18n support.
//!
//! 此模块为编排器提供基础设施服务，
//! 包括命令执行、端口分配、文件系统操作、诊断日志和国际化支持。

pub mod command;
pub mod fs;
pub mod logging;
pub mod ports;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
