//! # Matrix Expansion Planner / 矩阵展开计划模块
//!
//! This module turns the declared matrix into the ordered list of cells to run,
//! and optionally splits that list across several CI runners.
//!
//! 此模块将声明的矩阵转换为有序的待运行单元列表，并可选择在多个 CI 运行器之间拆分该列表。

use crate::core::config::MatrixConfig;
use crate::core::models::MatrixCell;
use anyhow::{bail, Result};

/// Expands the configuration into matrix cells.
///
/// The cartesian product is enumerated in declaration order (runtime outermost,
/// then server version, then mode), `exclude` filters are applied, and `include`
/// entries are appended in declaration order. A combination that appears twice
/// keeps its first position. Identical configurations always yield identical
/// sequences.
///
/// 按声明顺序枚举笛卡尔积（运行时在最外层，其次是服务器版本，最后是模式），
/// 应用 `exclude` 过滤器，并按声明顺序追加 `include` 条目。重复的组合保留首次出现的位置。
pub fn expand(config: &MatrixConfig) -> Vec<MatrixCell> {
    let matrix = &config.matrix;
    let mut cells: Vec<MatrixCell> = Vec::new();

    let product = matrix.runtimes.iter().flat_map(|runtime| {
        matrix.servers.iter().flat_map(move |server| {
            matrix.modes
                .iter()
                .map(move |mode| MatrixCell::new(0, runtime.clone(), server.clone(), *mode))
        })
    });

    for cell in product {
        if matrix.exclude.iter().any(|filter| filter.matches(&cell)) {
            continue;
        }
        push_unique(&mut cells, cell);
    }

    for extra in &matrix.include {
        push_unique(
            &mut cells,
            MatrixCell::new(0, extra.runtime.clone(), extra.server.clone(), extra.mode),
        );
    }

    for (index, cell) in cells.iter_mut().enumerate() {
        cell.index = index;
    }
    cells
}

fn push_unique(cells: &mut Vec<MatrixCell>, cell: MatrixCell) {
    if !cells.iter().any(|existing| existing.same_combination(&cell)) {
        cells.push(cell);
    }
}

/// Represents the cells this runner is responsible for.
/// 表示当前运行器负责的矩阵单元。
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Cells to execute, in expansion order.
    /// 要执行的单元，按展开顺序排列。
    pub cells: Vec<MatrixCell>,
    /// Size of the full expansion before sharding.
    /// 分片前完整展开的大小。
    pub total_cells: usize,
    /// Whether the cells are distributed across multiple runners (CI environment).
    /// 单元是否分布在多个运行器上（CI 环境）。
    pub is_distributed: bool,
}

impl ExecutionPlan {
    pub fn end_to_end_count(&self) -> usize {
        self.cells.iter().filter(|c| c.mode.requires_server()).count()
    }

    pub fn coverage_only_count(&self) -> usize {
        self.cells.len() - self.end_to_end_count()
    }
}

/// Creates an execution plan for the given configuration.
/// Cells keep their original `index` so sharded reports line up with the full
/// matrix.
///
/// # Arguments
/// * `config` - The matrix configuration
/// * `total_runners` - Optional total number of runners for distributed execution
/// * `runner_index` - Optional index of this runner (0-based)
pub fn plan_execution(
    config: &MatrixConfig,
    total_runners: Option<usize>,
    runner_index: Option<usize>,
) -> Result<ExecutionPlan> {
    let expanded = expand(config);
    let total_cells = expanded.len();

    let (cells, is_distributed) = match (total_runners, runner_index) {
        (Some(total), Some(index)) => {
            if total == 0 {
                bail!("--total-runners must be at least 1.");
            }
            if index >= total {
                bail!("Runner index must be less than total runners.");
            }
            let cells = expanded
                .into_iter()
                .filter(|cell| cell.index % total == index)
                .collect();
            (cells, true)
        }
        (None, None) => (expanded, false),
        _ => bail!("Both --total-runners and --runner-index must be provided."),
    };

    Ok(ExecutionPlan {
        cells,
        total_cells,
        is_distributed,
    })
}
