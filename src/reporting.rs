//! # Reporting Module / 报告模块
//!
//! This module handles everything a run hands to the outside world: colored,
//! localized console summaries, HTML and JSON reports, and the coverage sink
//! that receives the merged coverage blobs.
//!
//! 此模块处理一次运行交给外部的全部内容：彩色本地化的控制台摘要、
//! HTML 与 JSON 报告，以及接收合并覆盖率数据的覆盖率接收端。

pub mod console;
pub mod coverage;
pub mod html;
pub mod json;

// Re-export common reporting functions
pub use console::{print_failure_details, print_plan, print_summary};
pub use coverage::{publish_best_effort, CoverageSink, DirectoryCoverageSink};
pub use html::generate_html_report;
pub use json::write_json_report;
