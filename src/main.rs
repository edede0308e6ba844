use anyhow::Context;
use chrono::Local;
use log::{info, warn};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use wellsync::commands::{self, AppCommand, CommandContext};
use wellsync::jobs::ImportJobManager;
use wellsync::{session, storage, AppConfig};

fn init_logging() -> anyhow::Result<()> {
    let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let log_dir = std::path::PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("app-{}.log", ts));
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("cannot create {}", log_path.display()))?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Warn)
        .filter_module("wellsync", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .init();
    Ok(())
}

fn parse_command(line: &str) -> AppCommand {
    line.parse::<AppCommand>()
        .unwrap_or_else(|_| AppCommand::Unknown(format!("无法解析命令: {}", line)))
}

/// 单命令模式：import 会等待任务结束再退出
async fn run_once(ctx: &CommandContext, cmd: AppCommand) -> anyhow::Result<()> {
    let out = commands::execute_and_wait(ctx, cmd, Duration::from_millis(500)).await?;
    println!("{}", out);
    Ok(())
}

async fn repl(ctx: &CommandContext) -> anyhow::Result<()> {
    println!("wellsync console, type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let cmd = parse_command(&line);
        if cmd == AppCommand::Quit {
            break;
        }
        if cmd == AppCommand::Unknown(String::new()) {
            continue;
        }
        match commands::execute(ctx, cmd).await {
            Ok(out) => println!("{}", out),
            Err(e) => {
                warn!("command `{}` failed: {:#}", line.trim(), e);
                println!("error: {:#}", e);
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    // .env 不存在时直接用系统环境变量
    if let Err(e) = dotenv::dotenv() {
        info!(".env not loaded: {}", e);
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(parent) = config
        .database_url
        .strip_prefix("sqlite://")
        .and_then(|p| std::path::Path::new(p.split('?').next().unwrap_or(p)).parent())
    {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Arc::new(
        storage::establish_connection(&config.database_url)
            .await
            .with_context(|| format!("cannot open database {}", config.database_url))?,
    );
    let source = session::build_source(&config.source)
        .await
        .context("cannot initialise upstream source")?;
    info!("Using upstream source {}", source.name());

    let manager = Arc::new(
        ImportJobManager::new(db.clone(), source.clone(), config.job_history_limit)
            .await
            .context("cannot load import job history")?,
    );
    let ctx = CommandContext {
        db,
        manager,
        source,
        config,
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        repl(&ctx).await
    } else {
        run_once(&ctx, parse_command(&args.join(" "))).await
    }
}
