//! # Commands Module / 命令模块
//!
//! One module per subcommand of the CLI.
//!
//! CLI 的每个子命令对应一个模块。

pub mod init;
pub mod plan;
pub mod run;
