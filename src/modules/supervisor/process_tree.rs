//! 卸载进程树跟踪

use std::collections::{HashMap, HashSet, VecDeque};

use super::blacklist::ProcessBlacklist;
use super::system::{ProcessHost, ProcessInfo};
use crate::modules::common::utils;
use crate::modules::target::InstallerKind;

/// Windows Installer 服务进程名
pub const MSI_SERVICE_PROCESS_NAME: &str = "msiexec";

/// 当前被视为卸载操作一部分的进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedProcess {
    pub pid: u32,
    pub name: String,
}

impl WatchedProcess {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

impl From<&ProcessInfo> for WatchedProcess {
    fn from(info: &ProcessInfo) -> Self {
        Self::new(info.pid, info.name.clone())
    }
}

/// 每轮轮询重建监视集合
pub struct ProcessTreeTracker<'a> {
    kind: InstallerKind,
    install_location: Option<String>,
    pre_launch: HashSet<u32>,
    blacklist: &'a ProcessBlacklist,
}

impl<'a> ProcessTreeTracker<'a> {
    pub fn new(
        kind: InstallerKind,
        install_location: Option<&str>,
        pre_launch: HashSet<u32>,
        blacklist: &'a ProcessBlacklist,
    ) -> Self {
        let install_location = install_location
            .map(utils::normalize_path)
            .filter(|location| !location.is_empty());

        Self {
            kind,
            install_location,
            pre_launch,
            blacklist,
        }
    }

    /// 启动卸载程序前的系统进程快照
    pub fn snapshot_pids(host: &dyn ProcessHost) -> HashSet<u32> {
        host.processes().iter().map(|process| process.pid).collect()
    }

    /// 计算本轮的监视集合；返回空表示进程树已全部结束
    pub fn refresh(
        &self,
        host: &mut dyn ProcessHost,
        watched: &[WatchedProcess],
    ) -> Vec<WatchedProcess> {
        host.refresh();
        let all = host.processes();

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for process in &all {
            if let Some(parent) = process.parent {
                children.entry(parent).or_default().push(process.pid);
            }
        }

        let mut candidates: Vec<u32> = watched.iter().map(|process| process.pid).collect();
        let mut roots: Vec<u32> = candidates.clone();

        // MSI 服务会替卸载程序启动辅助进程，这些进程不挂在根进程下
        if self.kind == InstallerKind::MsiExec {
            roots.extend(
                all.iter()
                    .filter(|process| process.normalized_name() == MSI_SERVICE_PROCESS_NAME)
                    .map(|process| process.pid),
            );
        }

        let mut visited: HashSet<u32> = HashSet::new();
        let mut queue: VecDeque<u32> = roots.into_iter().collect();
        while let Some(pid) = queue.pop_front() {
            if !visited.insert(pid) {
                continue;
            }
            if let Some(kids) = children.get(&pid) {
                for kid in kids {
                    candidates.push(*kid);
                    queue.push_back(*kid);
                }
            }
        }

        let mut seen = HashSet::new();
        let mut result: Vec<WatchedProcess> = candidates
            .into_iter()
            .filter(|pid| seen.insert(*pid))
            .filter(|pid| !self.pre_launch.contains(pid))
            .filter_map(|pid| host.process(pid))
            .filter(|info| !self.blacklist.contains(&info.name))
            .map(|info| WatchedProcess::from(&info))
            .collect();

        if result.is_empty() {
            if let Some(location) = &self.install_location {
                result = all
                    .iter()
                    .filter(|process| !self.pre_launch.contains(&process.pid))
                    .filter(|process| !self.blacklist.contains(&process.name))
                    .filter(|process| references_location(process, location))
                    .map(WatchedProcess::from)
                    .collect();

                if !result.is_empty() {
                    tracing::debug!(
                        "按安装目录找回 {} 个进程: {}",
                        result.len(),
                        describe(&result)
                    );
                }
            }
        }

        result
    }
}

fn references_location(process: &ProcessInfo, location: &str) -> bool {
    process
        .exe
        .as_deref()
        .map(|exe| utils::path_contains(exe, location))
        .unwrap_or(false)
        || process
            .command_line
            .as_deref()
            .map(|cmd| utils::path_contains(cmd, location))
            .unwrap_or(false)
}

/// 结束所有被监视的进程；MSI 卸载额外结束 msiexec 进程
///
/// 单个进程结束失败（已退出、权限不足）不会中断其余进程的处理。
pub fn kill_processes(host: &mut dyn ProcessHost, processes: &[WatchedProcess], kind: InstallerKind) {
    for process in processes {
        match host.kill(process.pid) {
            Ok(()) => tracing::warn!("已结束进程 {} (PID {})", process.name, process.pid),
            Err(e) => tracing::debug!("结束进程 {} 失败: {}", process.pid, e),
        }
    }

    if kind == InstallerKind::MsiExec {
        host.refresh();
        let msi_processes: Vec<ProcessInfo> = host
            .processes()
            .into_iter()
            .filter(|process| process.normalized_name() == MSI_SERVICE_PROCESS_NAME)
            .collect();

        for process in msi_processes {
            match host.kill(process.pid) {
                Ok(()) => tracing::warn!("已结束 msiexec (PID {})", process.pid),
                Err(e) => tracing::debug!("结束 msiexec {} 失败: {}", process.pid, e),
            }
        }
    }
}

pub fn describe(processes: &[WatchedProcess]) -> String {
    processes
        .iter()
        .map(|process| format!("{}({})", process.name, process.pid))
        .collect::<Vec<_>>()
        .join(", ")
}
