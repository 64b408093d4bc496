//! Task table loading.
//!
//! ```text
//! #     G0    n
//! small 10.0  100
//! big   500.0 100000
//! ```
//!
//! The header's first token is the literal `#`. `G0, G1, ...` columns form
//! the target vector; every other column pins a parameter for that row.

use at_types::{AtResult, FeedDict, ParamValue, TaskFileError, TaskSpec};
use std::path::Path;

const HEADER_MARKER: &str = "#";

/// Parse a whitespace-separated task table.
pub fn parse_task_table(contents: &str) -> AtResult<Vec<TaskSpec>> {
    let mut rows = contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty());

    let (_, header) = rows.next().ok_or(TaskFileError::MissingHeader)?;
    if header[0] != HEADER_MARKER {
        return Err(TaskFileError::InvalidHeader {
            found: header[0].to_string(),
        }
        .into());
    }

    // Targets are G0, G1, ... up to the first missing index.
    let mut target_columns = Vec::new();
    while let Some(col) = header.iter().position(|h| *h == format!("G{}", target_columns.len())) {
        target_columns.push(col);
    }

    let mut tasks = Vec::new();
    for (line, tokens) in rows {
        if tokens.len() != header.len() {
            return Err(TaskFileError::RowWidth {
                line,
                expected: header.len(),
                found: tokens.len(),
            }
            .into());
        }

        let mut targets = Vec::with_capacity(target_columns.len());
        for &col in &target_columns {
            let value = tokens[col].parse::<f64>().map_err(|_| TaskFileError::InvalidTarget {
                line,
                column: header[col].to_string(),
                value: tokens[col].to_string(),
            })?;
            targets.push(value);
        }

        let fixed: FeedDict = header
            .iter()
            .zip(&tokens)
            .enumerate()
            .skip(1)
            .filter(|(col, _)| !target_columns.contains(col))
            .map(|(_, (name, value))| (name.to_string(), ParamValue::from(*value)))
            .collect();

        tasks.push(TaskSpec::new(tokens[0], targets).with_fixed(fixed));
    }

    Ok(tasks)
}

/// Read and parse a task table from disk.
pub fn load_tasks<P: AsRef<Path>>(path: P) -> AtResult<Vec<TaskSpec>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let tasks = parse_task_table(&contents)?;
    tracing::info!("Loaded {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}
