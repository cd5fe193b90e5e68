//! 操作系统能力接口：进程枚举/结束、CPU 与 IO 计数器
//!
//! 卸载循环只依赖这里的 trait，真实实现基于 sysinfo，测试使用 `testing` 中的假实现。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

use super::blacklist::{self, ProcessBlacklist};
use super::options::PollTiming;
use crate::modules::common::error::UninstallerError;
use crate::modules::common::utils;
use crate::modules::target::msi;

/// 一个进程的身份信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub command_line: Option<String>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            parent: None,
            name: name.into(),
            exe: None,
            command_line: None,
        }
    }

    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_exe(mut self, exe: impl Into<String>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = Some(command_line.into());
        self
    }

    /// 规范化后的进程名，用于黑名单与计数器
    pub fn normalized_name(&self) -> String {
        utils::normalize_process_name(&self.name)
    }
}

/// 进程枚举与结束
pub trait ProcessHost: Send {
    /// 重新读取系统进程表
    fn refresh(&mut self);

    /// 当前存活的所有进程
    fn processes(&self) -> Vec<ProcessInfo>;

    /// 查询单个进程；已退出或无法访问时返回 None
    fn process(&self, pid: u32) -> Option<ProcessInfo>;

    fn kill(&mut self, pid: u32) -> Result<(), UninstallerError>;
}

/// 计数器的一次原始读数（累计值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub cpu_time: Duration,
    pub io_bytes: u64,
    pub taken_at: Instant,
}

/// 按进程名打开的 CPU / IO 计数器
pub trait ActivityCounters: Send {
    /// 一轮读取前调用，刷新底层数据
    fn refresh(&mut self) {}

    fn open(&mut self, process_name: &str) -> Result<(), UninstallerError>;

    fn sample(&mut self, process_name: &str) -> Result<CounterSample, UninstallerError>;

    fn close(&mut self, process_name: &str) -> Result<(), UninstallerError>;
}

/// 卸载工作线程需要的全部系统能力
pub trait SystemAccess: Send + Sync {
    fn process_host(&self) -> Box<dyn ProcessHost>;

    fn activity_counters(&self) -> Box<dyn ActivityCounters>;

    /// 当前已注册的 MSI 产品代码
    fn msi_product_codes(&self) -> Result<Vec<String>, UninstallerError>;

    fn blacklist(&self) -> &ProcessBlacklist;

    fn timing(&self) -> PollTiming {
        PollTiming::default()
    }
}

/// 真实系统
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSystem;

impl SystemAccess for NativeSystem {
    fn process_host(&self) -> Box<dyn ProcessHost> {
        Box::new(SysinfoProcessHost::new())
    }

    fn activity_counters(&self) -> Box<dyn ActivityCounters> {
        Box::new(SysinfoCounters::new())
    }

    fn msi_product_codes(&self) -> Result<Vec<String>, UninstallerError> {
        msi::list_product_codes()
    }

    fn blacklist(&self) -> &ProcessBlacklist {
        blacklist::global()
    }
}

fn is_alive(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn to_process_info(pid: Pid, process: &Process) -> ProcessInfo {
    let command_line = if process.cmd().is_empty() {
        None
    } else {
        Some(
            process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
        )
    };

    ProcessInfo {
        pid: pid.as_u32(),
        parent: process.parent().map(|parent| parent.as_u32()),
        name: process.name().to_string_lossy().into_owned(),
        exe: process.exe().map(|exe| exe.to_string_lossy().into_owned()),
        command_line,
    }
}

/// 基于 sysinfo 的进程表
pub struct SysinfoProcessHost {
    system: System,
}

impl SysinfoProcessHost {
    pub fn new() -> Self {
        let mut host = Self {
            system: System::new(),
        };
        host.refresh();
        host
    }
}

impl Default for SysinfoProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHost for SysinfoProcessHost {
    fn refresh(&mut self) {
        let refresh_kind = ProcessRefreshKind::nothing()
            .with_exe(UpdateKind::OnlyIfNotSet)
            .with_cmd(UpdateKind::OnlyIfNotSet);
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);
    }

    fn processes(&self) -> Vec<ProcessInfo> {
        self.system
            .processes()
            .iter()
            .filter(|(_, process)| is_alive(process))
            .map(|(pid, process)| to_process_info(*pid, process))
            .collect()
    }

    fn process(&self, pid: u32) -> Option<ProcessInfo> {
        let pid = Pid::from_u32(pid);
        self.system
            .process(pid)
            .filter(|process| is_alive(process))
            .map(|process| to_process_info(pid, process))
    }

    fn kill(&mut self, pid: u32) -> Result<(), UninstallerError> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or_else(|| UninstallerError::NotFound(format!("进程 {} 已退出", pid)))?;

        if process.kill() {
            Ok(())
        } else {
            Err(UninstallerError::PermissionDenied(format!(
                "无法结束进程 {}",
                pid
            )))
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NamedCounter {
    cpu_time: Duration,
    io_bytes: u64,
    /// 上次刷新时每个 PID 的累计读写字节数
    io_per_pid: HashMap<u32, u64>,
}

/// 把本轮各 PID 的累计 IO 与上轮比较，返回增量并更新 `last`
///
/// 新出现的 PID 只记录基线，已退出的 PID 直接丢弃。
fn accumulate_io(last: &mut HashMap<u32, u64>, current: HashMap<u32, u64>) -> u64 {
    let delta = current
        .iter()
        .filter_map(|(pid, total)| last.get(pid).map(|before| total.saturating_sub(*before)))
        .fold(0u64, u64::saturating_add);
    *last = current;
    delta
}

/// 基于 sysinfo 的计数器
///
/// sysinfo 给出的是两次刷新之间的 CPU 占用率，这里按刷新间隔累加成 CPU 时间。
/// IO 按 PID 记录累计读写字节数，只累加同一 PID 两次刷新之间的增量。同名进程合并统计。
pub struct SysinfoCounters {
    system: System,
    opened: HashMap<String, NamedCounter>,
    last_refresh: Option<Instant>,
}

impl SysinfoCounters {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            opened: HashMap::new(),
            last_refresh: None,
        }
    }

    fn matching<'a>(&'a self, process_name: &'a str) -> impl Iterator<Item = &'a Process> + 'a {
        self.system.processes().values().filter(move |process| {
            is_alive(process)
                && utils::normalize_process_name(&process.name().to_string_lossy()) == process_name
        })
    }

    fn io_totals(&self, process_name: &str) -> HashMap<u32, u64> {
        self.matching(process_name)
            .map(|process| {
                let usage = process.disk_usage();
                (
                    process.pid().as_u32(),
                    usage
                        .total_read_bytes
                        .saturating_add(usage.total_written_bytes),
                )
            })
            .collect()
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityCounters for SysinfoCounters {
    fn refresh(&mut self) {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::nothing().with_cpu().with_disk_usage();
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, refresh_kind);

        let elapsed = self
            .last_refresh
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_refresh = Some(now);

        let names: Vec<String> = self.opened.keys().cloned().collect();
        for name in names {
            let percent: f64 = self
                .matching(&name)
                .map(|process| process.cpu_usage() as f64)
                .sum();
            let totals = self.io_totals(&name);
            let Some(counter) = self.opened.get_mut(&name) else {
                continue;
            };
            counter.io_bytes = counter
                .io_bytes
                .saturating_add(accumulate_io(&mut counter.io_per_pid, totals));
            if percent.is_finite() && percent > 0.0 {
                counter.cpu_time += elapsed.mul_f64(percent / 100.0);
            }
        }
    }

    fn open(&mut self, process_name: &str) -> Result<(), UninstallerError> {
        let name = utils::normalize_process_name(process_name);
        let counter = NamedCounter {
            io_per_pid: self.io_totals(&name),
            ..NamedCounter::default()
        };
        self.opened.insert(name, counter);
        Ok(())
    }

    fn sample(&mut self, process_name: &str) -> Result<CounterSample, UninstallerError> {
        let name = utils::normalize_process_name(process_name);
        let counter = self
            .opened
            .get(&name)
            .ok_or_else(|| UninstallerError::Counter(format!("计数器未打开: {}", name)))?;

        if self.matching(&name).next().is_none() {
            return Err(UninstallerError::Counter(format!("进程已退出: {}", name)));
        }

        Ok(CounterSample {
            cpu_time: counter.cpu_time,
            io_bytes: counter.io_bytes,
            taken_at: self.last_refresh.unwrap_or_else(Instant::now),
        })
    }

    fn close(&mut self, process_name: &str) -> Result<(), UninstallerError> {
        let name = utils::normalize_process_name(process_name);
        self.opened.remove(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_host_sees_current_process() {
        let host = SysinfoProcessHost::new();
        let me = host.process(std::process::id());
        assert!(me.is_some());
        assert!(host
            .processes()
            .iter()
            .any(|process| process.pid == std::process::id()));
    }

    #[test]
    fn sysinfo_host_kill_reports_missing_process() {
        let mut host = SysinfoProcessHost::new();
        let result = host.kill(u32::MAX - 7);
        assert!(result.is_err());
    }

    #[test]
    fn sysinfo_counters_fail_for_unknown_process_name() {
        let mut counters = SysinfoCounters::new();
        counters.open("uninstall-worker-no-such-process").unwrap();
        counters.refresh();
        let sample = counters.sample("uninstall-worker-no-such-process");
        assert!(matches!(sample, Err(UninstallerError::Counter(_))));
        assert!(counters.close("uninstall-worker-no-such-process").is_ok());
    }

    #[test]
    fn sysinfo_counters_sample_current_process() {
        let me = SysinfoProcessHost::new()
            .process(std::process::id())
            .map(|info| info.normalized_name())
            .unwrap_or_default();
        let mut counters = SysinfoCounters::new();
        counters.open(&me).unwrap();
        counters.refresh();
        let first = counters.sample(&me).unwrap();
        counters.refresh();
        let second = counters.sample(&me).unwrap();
        assert!(second.taken_at >= first.taken_at);
        assert!(second.cpu_time >= first.cpu_time);
    }

    #[test]
    fn io_deltas_ignore_lifetime_totals_of_new_processes() {
        let mut last = HashMap::from([(10, 1_000)]);

        // 新进程 20 自启动以来已写了很多，只记基线
        let delta = accumulate_io(&mut last, HashMap::from([(10, 1_500), (20, 50_000_000)]));
        assert_eq!(delta, 500);

        // 10 退出后不再参与，20 的增量照常累加
        let delta = accumulate_io(&mut last, HashMap::from([(20, 50_000_100)]));
        assert_eq!(delta, 100);
        assert_eq!(last, HashMap::from([(20, 50_000_100)]));

        // PID 复用时累计值可能变小
        assert_eq!(accumulate_io(&mut last, HashMap::from([(20, 10)])), 0);
    }

    #[test]
    fn process_info_normalizes_name() {
        let info = ProcessInfo::new(42, "MsiExec.EXE").with_parent(4);
        assert_eq!(info.normalized_name(), "msiexec");
        assert_eq!(info.parent, Some(4));
    }
}
