//! # XMPP E2E Matrix Library / XMPP E2E 矩阵库
//!
//! This library provides the orchestration engine behind the `xmpp-e2e-matrix`
//! tool: it stands up version-pinned server instances, runs a client library's
//! end-to-end suite against them across a runtime × server-version matrix, and
//! folds every job into a single verdict.
//!
//! 此库为 `xmpp-e2e-matrix` 工具提供编排引擎：
//! 它启动指定版本的服务器实例，在运行时 × 服务器版本矩阵上针对这些实例运行客户端库的端到端测试套件，
//! 并将所有作业汇总为单一结论。
//!
//! ## Modules / 模块
//!
//! - `core` - Matrix model, provisioning, suite execution, scheduling and aggregation
//! - `infra` - Process spawning, port allocation, file system helpers and logging
//! - `reporting` - Console, HTML and JSON reports plus the coverage sink
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 矩阵模型、服务器准备、套件执行、调度与汇总
//! - `infra` - 进程派生、端口分配、文件系统辅助和日志
//! - `reporting` - 控制台、HTML 与 JSON 报告以及覆盖率接收端
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use crate::core::aggregator;
pub use crate::core::config;
pub use crate::core::models;
pub use crate::core::scheduler;

/// Resolves the UI locale for this process.
///
/// An explicit choice (from `--lang` or the configuration file) wins. Otherwise
/// the system locale is detected; the full tag (e.g. "zh-CN") is tried first,
/// then the bare language code, and finally "en".
pub fn resolve_locale(explicit: Option<&str>) -> String {
    let available_locales = rust_i18n::available_locales!();

    let candidate = explicit
        .map(str::to_string)
        .or_else(sys_locale::get_locale)
        .unwrap_or_else(|| "en".to_string());

    if available_locales.contains(&candidate.as_str()) {
        return candidate;
    }

    candidate
        .split('-')
        .next()
        .filter(|lang_code| available_locales.contains(lang_code))
        .unwrap_or("en")
        .to_string()
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
