use crate::ingest::parse_period;
use crate::storage::repository::PeriodRange;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Import {
        max_pages: Option<usize>,
        page_size: Option<usize>,
        offset: Option<u64>,
    },
    Status {
        job_id: Option<String>,
    },
    Jobs,
    Well {
        code: i64,
        range: PeriodRange,
    },
    Field {
        code: i64,
    },
    Count,
    Stats,
    List {
        page: u64,
        size: u64,
    },
    Export {
        path: Option<PathBuf>,
        batch_size: Option<u64>,
    },
    Ping,
    Help,
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
import [max_pages] [page_size] [offset]  后台导入（同一时刻只允许一个）
status [job_id]                         查看任务状态（默认当前/最近任务）
jobs                                    列出任务历史
well <well_code> [start|-] [end]        按井号查询（按周期倒序，可选周期区间）
field <field_code>                      按油田查询
count                                   记录总数
stats                                   聚合统计
list [page] [size]                      分页列出（page 从 0 开始）
export [path] [batch_size]              导出 CSV
ping                                    检查上游数据源
help | quit";

const WELL_USAGE: &str = "用法: well <well_code> [start|-] [end]，周期形如 2024-01 或 2024-01-15";

/// "-" 表示该端不限
fn parse_bound(raw: Option<&&str>) -> Result<Option<String>, AppCommand> {
    match raw {
        None | Some(&"-") => Ok(None),
        Some(s) => parse_period(s)
            .map(Some)
            .ok_or_else(|| AppCommand::Unknown(WELL_USAGE.to_string())),
    }
}

fn parse_well(parts: &[&str]) -> Result<AppCommand, AppCommand> {
    let code = parse_code(parts, WELL_USAGE)?;
    let start = parse_bound(parts.get(2))?;
    let end = parse_bound(parts.get(3))?;
    Ok(AppCommand::Well {
        code,
        range: PeriodRange::new(start, end),
    })
}

fn parse_code(parts: &[&str], usage: &str) -> Result<i64, AppCommand> {
    parts
        .get(1)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| AppCommand::Unknown(usage.to_string()))
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Unknown("".to_string()));
        }

        match parts[0] {
            "import" => {
                let max_pages = parts.get(1).and_then(|s| s.parse::<usize>().ok());
                let page_size = parts.get(2).and_then(|s| s.parse::<usize>().ok()).filter(|n| *n > 0);
                let offset = parts.get(3).and_then(|s| s.parse::<u64>().ok());
                if parts.len() > 1 && max_pages.is_none() {
                    return Ok(AppCommand::Unknown(
                        "用法: import [max_pages] [page_size] [offset]".to_string(),
                    ));
                }
                Ok(AppCommand::Import {
                    max_pages,
                    page_size,
                    offset,
                })
            }
            "status" => Ok(AppCommand::Status {
                job_id: parts.get(1).map(|s| s.to_string()),
            }),
            "jobs" => Ok(AppCommand::Jobs),
            "well" => Ok(parse_well(&parts).unwrap_or_else(|usage| usage)),
            "field" => Ok(parse_code(&parts, "用法: field <field_code>")
                .map(|code| AppCommand::Field { code })
                .unwrap_or_else(|usage| usage)),
            "count" => Ok(AppCommand::Count),
            "stats" => Ok(AppCommand::Stats),
            "list" => {
                let page = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                let size = parts
                    .get(2)
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(20);
                Ok(AppCommand::List { page, size })
            }
            "export" => Ok(AppCommand::Export {
                path: parts.get(1).map(PathBuf::from),
                batch_size: parts.get(2).and_then(|s| s.parse().ok()).filter(|n: &u64| *n > 0),
            }),
            "ping" => Ok(AppCommand::Ping),
            "help" | "h" => Ok(AppCommand::Help),
            "quit" | "q" | "exit" => Ok(AppCommand::Quit),
            _ => Ok(AppCommand::Unknown(format!("未知命令: {}", parts[0]))),
        }
    }
}
