pub mod app_command;

pub use app_command::{AppCommand, HELP_TEXT};

use crate::config::AppConfig;
use crate::jobs::{ImportJobManager, JobSnapshot};
use crate::model::ProductionRecord;
use crate::session::ProductionSource;
use crate::storage::repository::ProductionRepository;
use anyhow::Context;
use sea_orm::DatabaseConnection;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

/// 控制台命令执行所需的共享对象
pub struct CommandContext {
    pub db: Arc<DatabaseConnection>,
    pub manager: Arc<ImportJobManager>,
    pub source: Arc<dyn ProductionSource>,
    pub config: AppConfig,
}

fn format_record(r: &ProductionRecord) -> String {
    format!(
        "{}  well={} ({}) field={} ({}) days={} oil={:.3} gas={:.3} liquids={:.3} water={:.3}",
        r.production_period,
        r.well_code,
        r.well_name,
        r.field_code,
        r.field_name,
        r.days_on_production,
        r.oil_kbd,
        r.gas_mmcfd,
        r.liquids_kbd,
        r.water_kbd
    )
}

fn format_records(records: &[ProductionRecord]) -> String {
    if records.is_empty() {
        return "(no records)".to_string();
    }
    let mut out = String::new();
    for r in records {
        let _ = writeln!(out, "{}", format_record(r));
    }
    let _ = write!(out, "{} record(s)", records.len());
    out
}

fn format_job(snap: &JobSnapshot) -> String {
    let j = &snap.job;
    let mut out = format!(
        "{} [{}] total={} new={} dup={} failed={} pages={} ({} failed)",
        j.job_id,
        j.status,
        j.total_records,
        j.new_records,
        j.duplicate_records,
        j.failed_records,
        j.pages_processed,
        j.pages_failed
    );
    if let Some(p) = snap.progress_percentage {
        let _ = write!(out, " progress={:.1}%", p);
    }
    if let Some(t) = snap.execution_time_seconds {
        let _ = write!(out, " elapsed={:.1}s", t);
    }
    if let Some(status) = j.data_status {
        let _ = write!(out, " data={}", status);
    }
    if let Some(err) = &j.error {
        let _ = write!(out, " error={}", err);
    }
    out
}

/// 用命令参数覆盖默认导入配置后启动任务，返回 job_id
fn start_import(
    ctx: &CommandContext,
    max_pages: Option<usize>,
    page_size: Option<usize>,
    offset: Option<u64>,
) -> anyhow::Result<String> {
    let mut config = ctx.config.import.clone();
    if max_pages.is_some() {
        config.max_pages = max_pages;
    }
    if let Some(size) = page_size {
        config.page_size = size;
    }
    if let Some(offset) = offset {
        config.start_offset = offset;
    }
    Ok(ctx.manager.start_import(config)?)
}

/// 单命令模式：import 会等到本次启动的任务结束，并附上最终状态
pub async fn execute_and_wait(
    ctx: &CommandContext,
    cmd: AppCommand,
    poll: Duration,
) -> anyhow::Result<String> {
    match cmd {
        AppCommand::Import {
            max_pages,
            page_size,
            offset,
        } => {
            let job_id = start_import(ctx, max_pages, page_size, offset)?;
            let done = ctx.manager.wait_for(&job_id, poll).await?;
            Ok(format!("import started: {}\n{}", job_id, format_job(&done)))
        }
        other => execute(ctx, other).await,
    }
}

/// 执行一条命令并返回要打印的文本
pub async fn execute(ctx: &CommandContext, cmd: AppCommand) -> anyhow::Result<String> {
    match cmd {
        AppCommand::Import {
            max_pages,
            page_size,
            offset,
        } => {
            let job_id = start_import(ctx, max_pages, page_size, offset)?;
            Ok(format!("import started: {}", job_id))
        }
        AppCommand::Status { job_id } => {
            let snap = match job_id {
                Some(id) => ctx.manager.get_status(&id)?,
                None => match ctx
                    .manager
                    .active_job()
                    .or_else(|| ctx.manager.list_jobs().into_iter().next())
                {
                    Some(s) => s,
                    None => return Ok("no import jobs yet".to_string()),
                },
            };
            Ok(format_job(&snap))
        }
        AppCommand::Jobs => {
            let jobs = ctx.manager.list_jobs();
            if jobs.is_empty() {
                return Ok("no import jobs yet".to_string());
            }
            Ok(jobs.iter().map(format_job).collect::<Vec<_>>().join("\n"))
        }
        AppCommand::Well { code, range } => {
            let records =
                ProductionRepository::get_by_well_code_in_range(&ctx.db, code, &range).await?;
            Ok(format_records(&records))
        }
        AppCommand::Field { code } => {
            let records = ProductionRepository::get_by_field_code(&ctx.db, code).await?;
            Ok(format_records(&records))
        }
        AppCommand::Count => {
            let n = ProductionRepository::count(&ctx.db).await?;
            Ok(format!("{} record(s)", n))
        }
        AppCommand::Stats => {
            let stats = ProductionRepository::statistics(&ctx.db).await?;
            Ok(serde_json::to_string_pretty(&stats)?)
        }
        AppCommand::List { page, size } => {
            let listing = ProductionRepository::list_page(&ctx.db, page, size).await?;
            let mut out = format_records(&listing.items);
            let _ = write!(
                out,
                "\npage {}/{} (size {}, total {})",
                listing.page,
                listing.pages.saturating_sub(1),
                listing.size,
                listing.total
            );
            Ok(out)
        }
        AppCommand::Export { path, batch_size } => {
            let dest = path.unwrap_or_else(|| ctx.config.export_path.clone());
            let batch = batch_size.unwrap_or(ctx.config.export_batch_size);
            let written = ProductionRepository::export_stream(&ctx.db, &dest, batch)
                .await
                .with_context(|| format!("export to {} failed", dest.display()))?;
            Ok(format!("exported to {}", written.display()))
        }
        AppCommand::Ping => {
            ctx.source
                .probe()
                .await
                .with_context(|| format!("source {} unreachable", ctx.source.name()))?;
            Ok(format!("source {} ok", ctx.source.name()))
        }
        AppCommand::Help => Ok(HELP_TEXT.to_string()),
        AppCommand::Quit => Ok(String::new()),
        AppCommand::Unknown(msg) => Ok(msg),
    }
}
