//! 单个卸载任务的状态机与监视线程
//!
//! 控制线程通过 [`UninstallEntry`] 启动、跳过或查询任务；每次启动创建一个
//! 工作线程，负责启动卸载程序、刷新进程树、检测卡死并判定退出码。

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activity::{ActivitySampler, StallDetector};
use super::exit_code::{classify_exit, ExitOutcome};
use super::options::{PollTiming, RunOptions};
use super::process_tree::{self, ProcessTreeTracker, WatchedProcess};
use super::status::{CancellationRequest, UninstallStatus};
use super::system::{NativeSystem, ProcessHost, SystemAccess};
use crate::modules::common::error::UninstallerError;
use crate::modules::common::utils;
use crate::modules::target::{msi, InstallerKind, LaunchedProcess, UninstallTarget};

#[derive(Debug)]
struct EntryState {
    status: UninstallStatus,
    last_error: Option<Arc<UninstallerError>>,
    finished: bool,
    silent_mode: bool,
    can_retry: bool,
    worker: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
}

impl EntryState {
    fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn finish_with(&mut self, status: UninstallStatus, error: Option<UninstallerError>) {
        self.status = status;
        self.last_error = error.map(Arc::new);
        self.finished = true;
        self.finished_at = Some(Local::now());
    }
}

/// 控制线程与工作线程共享的部分；加锁顺序固定为先 state 后 cancellation
#[derive(Debug)]
struct EntryShared {
    state: Mutex<EntryState>,
    cancellation: Mutex<CancellationRequest>,
}

impl EntryShared {
    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancellation(&self) -> MutexGuard<'_, CancellationRequest> {
        self.cancellation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 卸载任务的只读快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: Uuid,
    pub name: String,
    pub kind: InstallerKind,
    pub status: UninstallStatus,
    pub last_error: Option<String>,
    pub exit_code: Option<i32>,
    pub finished: bool,
    pub silent_mode: bool,
    pub retry_available: bool,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

/// 一个被监视的卸载任务
pub struct UninstallEntry {
    id: Uuid,
    target: Arc<dyn UninstallTarget>,
    system: Arc<dyn SystemAccess>,
    shared: Arc<EntryShared>,
}

impl UninstallEntry {
    pub fn new(target: Arc<dyn UninstallTarget>) -> Self {
        Self::with_system(target, Arc::new(NativeSystem))
    }

    pub fn with_system(target: Arc<dyn UninstallTarget>, system: Arc<dyn SystemAccess>) -> Self {
        let state = EntryState {
            status: UninstallStatus::Waiting,
            last_error: None,
            finished: false,
            silent_mode: target.quiet_uninstall_possible(),
            can_retry: true,
            worker: None,
            started_at: None,
            finished_at: None,
        };

        Self {
            id: Uuid::new_v4(),
            target,
            system,
            shared: Arc::new(EntryShared {
                state: Mutex::new(state),
                cancellation: Mutex::new(CancellationRequest::None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &dyn UninstallTarget {
        self.target.as_ref()
    }

    /// 启动卸载
    ///
    /// 已结束、正在运行或不处于等待状态时什么也不做。只有创建工作线程失败时返回错误，
    /// 其余结果都通过状态体现。
    pub fn start(&self, options: RunOptions) -> Result<(), UninstallerError> {
        let mut state = self.shared.state();
        if state.finished || state.worker_alive() || state.status != UninstallStatus::Waiting {
            return Ok(());
        }
        if let Some(handle) = state.worker.take() {
            let _ = handle.join();
        }

        let name = self.target.display_name().to_string();

        if self.target.is_registered() && !self.target.registry_key_still_exists() {
            tracing::info!("{} 的卸载项已不存在，视为已卸载", name);
            state.finish_with(UninstallStatus::Completed, None);
            return Ok(());
        }

        if self.target.installer_kind() == InstallerKind::MsiExec {
            if let Some(product_key) = self.target.product_key() {
                match self.system.msi_product_codes() {
                    Ok(products) if !msi::contains_product(&products, product_key) => {
                        tracing::info!("{} 的 MSI 产品 {} 已不存在，视为已卸载", name, product_key);
                        state.finish_with(UninstallStatus::Completed, None);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("{} 枚举 MSI 产品失败: {}", name, e);
                        state.finish_with(UninstallStatus::Failed, Some(e));
                        return Ok(());
                    }
                }
            }
        }

        *self.shared.cancellation() = CancellationRequest::None;
        state.status = UninstallStatus::Uninstalling;
        state.last_error = None;
        state.started_at = Some(Local::now());

        let worker = Worker {
            target: self.target.clone(),
            system: self.system.clone(),
            shared: self.shared.clone(),
            options,
            quiet: options.prefer_quiet && state.silent_mode,
        };

        tracing::info!(
            "开始卸载 {} (类型: {}, 静默: {})",
            name,
            self.target.installer_kind(),
            worker.quiet
        );

        match thread::Builder::new()
            .name(format!("uninstall-{}", name))
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                state.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{} 创建卸载线程失败: {}", name, e);
                state.finish_with(
                    UninstallStatus::Failed,
                    Some(UninstallerError::ThreadSpawn(e.to_string())),
                );
                Err(UninstallerError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// 请求跳过；`terminate` 为 true 时同时结束所有被监视的进程
    ///
    /// 正在运行的 MSI 卸载只接受结束请求，单纯跳过会被忽略。
    pub fn request_skip(&self, terminate: bool) {
        let mut state = self.shared.state();
        if state.finished {
            return;
        }

        if state.status == UninstallStatus::Waiting {
            tracing::info!("{} 尚未开始，直接跳过", self.target.display_name());
            state.finish_with(UninstallStatus::Skipped, Some(UninstallerError::Cancelled));
            return;
        }

        if !state.worker_alive() {
            return;
        }

        if self.target.installer_kind() == InstallerKind::MsiExec && !terminate {
            tracing::warn!(
                "{} 是 MSI 卸载，只能结束而不能跳过",
                self.target.display_name()
            );
            return;
        }

        *self.shared.cancellation() = if terminate {
            CancellationRequest::Terminate
        } else {
            CancellationRequest::Skip
        };
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().worker_alive()
    }

    /// 将任务复位为等待状态；不会恢复已用掉的重试机会
    pub fn reset(&self) {
        let mut state = self.shared.state();
        if state.worker_alive() {
            tracing::warn!("{} 仍在运行，忽略复位", self.target.display_name());
            return;
        }
        state.status = UninstallStatus::Waiting;
        state.last_error = None;
        state.finished = false;
        state.finished_at = None;
        *self.shared.cancellation() = CancellationRequest::None;
    }

    pub fn status(&self) -> UninstallStatus {
        self.shared.state().status
    }

    pub fn last_error(&self) -> Option<Arc<UninstallerError>> {
        self.shared.state().last_error.clone()
    }

    pub fn finished(&self) -> bool {
        self.shared.state().finished
    }

    pub fn silent_mode(&self) -> bool {
        self.shared.state().silent_mode
    }

    /// 下次启动时生效
    pub fn set_silent_mode(&self, silent: bool) {
        self.shared.state().silent_mode = silent;
    }

    pub fn cancellation_request(&self) -> CancellationRequest {
        let _state = self.shared.state();
        *self.shared.cancellation()
    }

    pub fn retry_available(&self) -> bool {
        self.shared.state().can_retry
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let state = self.shared.state();
        EntrySnapshot {
            id: self.id,
            name: self.target.display_name().to_string(),
            kind: self.target.installer_kind(),
            status: state.status,
            last_error: state.last_error.as_ref().map(|e| e.to_string()),
            exit_code: state.last_error.as_ref().and_then(|e| e.exit_code()),
            finished: state.finished,
            silent_mode: state.silent_mode,
            retry_available: state.can_retry,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }
}

/// 一次运行失败的原因
#[derive(Debug)]
struct RunFailure {
    error: UninstallerError,
    retryable: bool,
}

impl From<UninstallerError> for RunFailure {
    fn from(error: UninstallerError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// 工作线程持有的上下文
struct Worker {
    target: Arc<dyn UninstallTarget>,
    system: Arc<dyn SystemAccess>,
    shared: Arc<EntryShared>,
    options: RunOptions,
    quiet: bool,
}

impl Worker {
    fn run(self) {
        let timing = self.system.timing();
        let mut sampler =
            ActivitySampler::new(self.system.activity_counters(), timing.sample_interval);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.supervise(&mut sampler, timing)
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!("{} 的卸载线程异常: {}", self.target.display_name(), message);
            Err(UninstallerError::Other(format!("卸载线程异常: {}", message)).into())
        });

        sampler.dispose();
        self.finish(result);
    }

    fn cancellation(&self) -> CancellationRequest {
        *self.shared.cancellation()
    }

    fn supervise(&self, sampler: &mut ActivitySampler, timing: PollTiming) -> Result<(), RunFailure> {
        let kind = self.target.installer_kind();
        let name = self.target.display_name();
        let mut host = self.system.process_host();

        let pre_launch = ProcessTreeTracker::snapshot_pids(host.as_ref());
        let tracker = ProcessTreeTracker::new(
            kind,
            self.target.install_location(),
            pre_launch,
            self.system.blacklist(),
        );

        let mut root: Option<Box<dyn LaunchedProcess>> =
            self.target.run(self.quiet, self.options.simulate)?;

        let mut watched: Vec<WatchedProcess> = match &root {
            Some(process) => {
                let pid = process.pid();
                let process_name = host
                    .process(pid)
                    .map(|info| info.name)
                    .unwrap_or_else(|| name.to_string());
                tracing::debug!("{} 的卸载进程已启动: {} (PID {})", name, process_name, pid);
                vec![WatchedProcess::new(pid, process_name)]
            }
            None => {
                tracing::info!("{} 模拟运行", name);
                Vec::new()
            }
        };

        let sampling = self.quiet
            && self.options.auto_kill_stuck_quiet
            && self.target.quiet_uninstall_possible()
            && root.is_some();
        let mut stall = StallDetector::new(timing.stall_limit);
        let mut simulated = 0u32;

        loop {
            if let Some(process) = root.as_mut() {
                if let Err(e) = process.try_exit_code() {
                    tracing::debug!("{} 查询退出码失败: {}", name, e);
                }
                watched = tracker.refresh(host.as_mut(), &watched);
            }

            match self.cancellation() {
                CancellationRequest::Terminate => {
                    tracing::warn!("{} 被结束: {}", name, process_tree::describe(&watched));
                    process_tree::kill_processes(host.as_mut(), &watched, kind);
                    reap_root(host.as_mut(), root.as_mut(), name);
                    return Ok(());
                }
                CancellationRequest::Skip => {
                    tracing::info!("{} 被跳过", name);
                    return Ok(());
                }
                CancellationRequest::None => {}
            }

            if root.is_none() {
                if simulated >= timing.simulated_iterations {
                    break;
                }
                simulated += 1;
                thread::sleep(timing.idle_sleep);
                continue;
            }

            if watched.is_empty() {
                break;
            }

            if sampling {
                let names: Vec<String> = watched
                    .iter()
                    .map(|process| utils::normalize_process_name(&process.name))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();

                let verdict = sampler.check(&names);
                if stall.record(verdict) {
                    tracing::warn!(
                        "{} 已连续 {} 次无活动，结束进程: {}",
                        name,
                        stall.idle_checks(),
                        process_tree::describe(&watched)
                    );
                    process_tree::kill_processes(host.as_mut(), &watched, kind);
                    reap_root(host.as_mut(), root.as_mut(), name);
                    return Err(UninstallerError::Timeout(format!(
                        "{} 的静默卸载已停止响应",
                        name
                    ))
                    .into());
                }
            } else {
                thread::sleep(timing.idle_sleep);
            }
        }

        let code = match root.as_mut() {
            Some(process) => process.wait_exit_code()?,
            None => 0,
        };
        tracing::debug!("{} 的卸载程序退出码: {}", name, code);

        match classify_exit(kind, code, self.options.retry_failed_quiet) {
            ExitOutcome::Success => Ok(()),
            ExitOutcome::UserCancelled => {
                *self.shared.cancellation() = CancellationRequest::Skip;
                Ok(())
            }
            ExitOutcome::Interrupted => {
                *self.shared.cancellation() = CancellationRequest::Terminate;
                Ok(())
            }
            ExitOutcome::Failed(code) => Err(UninstallerError::ExitCode(code).into()),
            ExitOutcome::Retryable(code) => Err(RunFailure {
                error: UninstallerError::ExitCode(code),
                retryable: true,
            }),
        }
    }

    fn finish(&self, result: Result<(), RunFailure>) {
        let name = self.target.display_name();
        let mut state = self.shared.state();
        let cancellation = std::mem::take(&mut *self.shared.cancellation());

        let retry = if cancellation.is_requested() {
            state.status = UninstallStatus::Skipped;
            state.last_error = Some(Arc::new(UninstallerError::Cancelled));
            false
        } else {
            match result {
                Ok(()) => {
                    state.status = UninstallStatus::Completed;
                    false
                }
                Err(failure) => {
                    tracing::error!("{} 卸载失败: {}", name, failure.error);
                    state.status = UninstallStatus::Failed;
                    state.last_error = Some(Arc::new(failure.error));
                    failure.retryable && state.can_retry
                }
            }
        };

        if retry {
            tracing::info!("{} 将重试一次", name);
            state.status = UninstallStatus::Waiting;
            state.can_retry = false;
            return;
        }

        state.finished = true;
        state.finished_at = Some(Local::now());

        let elapsed = match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Default::default(),
        };
        tracing::info!(
            "{} 卸载结束: {} (用时 {})",
            name,
            state.status,
            utils::format_duration(elapsed)
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 结束进程后回收根进程；根进程仍存活时只做非阻塞查询
fn reap_root(
    host: &mut dyn ProcessHost,
    root: Option<&mut Box<dyn LaunchedProcess>>,
    name: &str,
) {
    let Some(process) = root else {
        return;
    };

    host.refresh();
    let result = if host.process(process.pid()).is_none() {
        process.wait_exit_code().map(Some)
    } else {
        process.try_exit_code()
    };

    match result {
        Ok(code) => tracing::debug!("{} 的根进程已回收: {:?}", name, code),
        Err(e) => tracing::debug!("{} 回收根进程失败: {}", name, e),
    }
}
