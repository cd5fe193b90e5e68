//! uninstall 命令 - 运行卸载程序并监视到结束

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::modules::common::utils;
use crate::modules::supervisor::{EntrySnapshot, RunOptions, UninstallEntry, UninstallStatus};
use crate::modules::target::command::CommandTarget;
use crate::modules::target::registry;
use crate::modules::target::{InstallerKind, UninstallTarget};

/// 控制线程轮询任务状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
pub struct UninstallCommand {
    /// 程序名称（在注册表卸载项中查找）
    pub target: Option<String>,

    /// 直接指定卸载命令，不查找注册表
    #[arg(long)]
    pub uninstall_string: Option<String>,

    /// 静默卸载命令（配合 --uninstall-string）
    #[arg(long)]
    pub quiet_string: Option<String>,

    /// 卸载程序类型 (generic/msi/nsis/inno)，默认根据命令推测
    #[arg(long)]
    pub kind: Option<InstallerKind>,

    /// 安装目录，用于找回脱离进程树的卸载进程
    #[arg(long)]
    pub install_location: Option<String>,

    /// 可用时使用静默卸载
    #[arg(long, env = "UNINSTALL_WORKER_QUIET", default_value_t = true, action = clap::ArgAction::Set)]
    pub quiet: bool,

    /// 静默卸载无响应时自动结束
    #[arg(long, env = "UNINSTALL_WORKER_AUTO_KILL")]
    pub auto_kill: bool,

    /// 一般性失败后自动重试一次
    #[arg(long, env = "UNINSTALL_WORKER_RETRY")]
    pub retry: bool,

    /// 模拟运行，不启动卸载程序
    #[arg(long, env = "UNINSTALL_WORKER_SIMULATE")]
    pub simulate: bool,

    /// 输出格式 (table/json)
    #[arg(long, default_value = "table")]
    pub format: String,
}

impl UninstallCommand {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            prefer_quiet: self.quiet,
            auto_kill_stuck_quiet: self.auto_kill,
            retry_failed_quiet: self.retry,
            simulate: self.simulate,
        }
    }
}

pub async fn execute(cmd: UninstallCommand) -> Result<()> {
    let target = resolve_target(&cmd)?;
    let options = cmd.run_options();

    println!("=== 卸载程序: {} ===", target.display_name());
    println!("  - 类型: {}", target.installer_kind());
    if let Some(command) = target.uninstall_string() {
        println!("  - 卸载命令: {}", command);
    }
    if let Some(location) = target.install_location() {
        println!("  - 安装位置: {}", location);
    }
    println!("  - 按 Ctrl+C 结束卸载\n");

    let entry = Arc::new(UninstallEntry::new(target));

    let interrupt_entry = entry.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n  - 收到中断，正在结束卸载进程...");
            interrupt_entry.request_skip(true);
        }
    });

    let mut launches = 0u32;
    while !entry.finished() {
        // 重试复位后由这里再次启动
        if entry.status() == UninstallStatus::Waiting && !entry.is_running() {
            if launches > 0 {
                println!("  - 卸载失败，重试一次...");
            }
            entry.start(options)?;
            launches += 1;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    interrupt.abort();

    let snapshot = entry.snapshot();
    match cmd.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        _ => print_table(&snapshot),
    }

    if snapshot.status == UninstallStatus::Failed {
        bail!(
            "{} 卸载失败: {}",
            snapshot.name,
            snapshot.last_error.unwrap_or_default()
        );
    }

    Ok(())
}

fn resolve_target(cmd: &UninstallCommand) -> Result<Arc<dyn UninstallTarget>> {
    if let Some(command) = &cmd.uninstall_string {
        let name = cmd.target.clone().unwrap_or_else(|| command.clone());
        let mut target = CommandTarget::new(name, command.as_str());
        if let Some(kind) = cmd.kind {
            target = target.with_kind(kind);
        }
        if let Some(quiet) = &cmd.quiet_string {
            target = target.with_quiet_uninstall_string(quiet.as_str());
        }
        if let Some(location) = &cmd.install_location {
            target = target.with_install_location(location.as_str());
        }
        return Ok(Arc::new(target));
    }

    let Some(name) = &cmd.target else {
        bail!("请指定程序名称或 --uninstall-string");
    };

    match registry::find_registry_target(name)? {
        Some(mut target) => {
            tracing::info!("找到卸载项: {}", target.full_path());
            if let Some(kind) = cmd.kind {
                target.kind = kind;
            }
            if target.install_location.is_none() {
                target.install_location = cmd.install_location.clone();
            }
            Ok(Arc::new(target))
        }
        None => bail!("未找到程序: {}", name),
    }
}

fn print_table(snapshot: &EntrySnapshot) {
    println!("\n{}", "=".repeat(60));
    println!("{:<12} {}", "名称", utils::truncate_string(&snapshot.name, 46));
    println!("{:<12} {}", "状态", snapshot.status);
    println!("{:<12} {}", "静默", if snapshot.silent_mode { "是" } else { "否" });
    if let Some(error) = &snapshot.last_error {
        println!("{:<12} {}", "错误", error);
    }
    if let (Some(start), Some(end)) = (snapshot.started_at, snapshot.finished_at) {
        let elapsed = (end - start).to_std().unwrap_or_default();
        println!("{:<12} {}", "用时", utils::format_duration(elapsed));
    }
    println!("{}", "=".repeat(60));
}
