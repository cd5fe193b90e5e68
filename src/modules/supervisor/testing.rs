//! 测试用的假进程世界、假计数器与假卸载目标

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::blacklist::ProcessBlacklist;
use super::options::PollTiming;
use super::system::{ActivityCounters, CounterSample, ProcessHost, ProcessInfo, SystemAccess};
use crate::modules::common::error::UninstallerError;
use crate::modules::target::{InstallerKind, LaunchedProcess, UninstallTarget};

/// 被外部结束的进程的退出码
pub const KILLED_EXIT_CODE: i32 = 1;

#[derive(Debug)]
struct FakeProcess {
    info: ProcessInfo,
    alive: bool,
}

#[derive(Debug, Default)]
struct World {
    processes: BTreeMap<u32, FakeProcess>,
    inaccessible: HashSet<u32>,
    kills: Vec<u32>,
    next_pid: u32,
}

/// 可在线程间共享的假进程表
#[derive(Debug, Clone, Default)]
pub struct FakeWorld(Arc<Mutex<World>>);

impl FakeWorld {
    pub fn new() -> Self {
        let world = World {
            next_pid: 1000,
            ..World::default()
        };
        Self(Arc::new(Mutex::new(world)))
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, info: ProcessInfo) {
        let mut world = self.lock();
        world.next_pid = world.next_pid.max(info.pid + 1);
        world
            .processes
            .insert(info.pid, FakeProcess { info, alive: true });
    }

    pub fn spawn(&self, name: &str, parent: Option<u32>) -> u32 {
        let mut world = self.lock();
        let pid = world.next_pid;
        world.next_pid += 1;
        let mut info = ProcessInfo::new(pid, name);
        info.parent = parent;
        world
            .processes
            .insert(pid, FakeProcess { info, alive: true });
        pid
    }

    pub fn exit(&self, pid: u32) {
        if let Some(process) = self.lock().processes.get_mut(&pid) {
            process.alive = false;
        }
    }

    pub fn mark_inaccessible(&self, pid: u32) {
        self.lock().inaccessible.insert(pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.lock()
            .processes
            .get(&pid)
            .map(|process| process.alive)
            .unwrap_or(false)
    }

    pub fn was_killed(&self, pid: u32) -> bool {
        self.lock().kills.contains(&pid)
    }

    pub fn kills(&self) -> Vec<u32> {
        self.lock().kills.clone()
    }

    pub fn process_count(&self) -> usize {
        self.lock().processes.len()
    }
}

pub struct FakeHost {
    world: FakeWorld,
}

impl FakeHost {
    pub fn new(world: FakeWorld) -> Self {
        Self { world }
    }
}

impl ProcessHost for FakeHost {
    fn refresh(&mut self) {}

    fn processes(&self) -> Vec<ProcessInfo> {
        self.world
            .lock()
            .processes
            .values()
            .filter(|process| process.alive)
            .map(|process| process.info.clone())
            .collect()
    }

    fn process(&self, pid: u32) -> Option<ProcessInfo> {
        let world = self.world.lock();
        if world.inaccessible.contains(&pid) {
            return None;
        }
        world
            .processes
            .get(&pid)
            .filter(|process| process.alive)
            .map(|process| process.info.clone())
    }

    fn kill(&mut self, pid: u32) -> Result<(), UninstallerError> {
        let mut world = self.world.lock();
        match world.processes.get_mut(&pid) {
            Some(process) if process.alive => {
                process.alive = false;
                world.kills.push(pid);
                Ok(())
            }
            _ => Err(UninstallerError::NotFound(format!("进程 {} 已退出", pid))),
        }
    }
}

/// 计数器脚本：(进程名, 该进程名的第几次读取) -> 本次新增的 (CPU 毫秒, IO 字节)，None 表示读取失败
pub type CounterScript = Arc<dyn Fn(&str, usize) -> Option<(u64, u64)> + Send + Sync>;

#[derive(Debug, Default)]
pub struct CounterLog {
    pub opened: Vec<String>,
    pub closed: Vec<String>,
}

/// 假计数器，使用虚拟时钟，每次读取相隔 1.1 秒
pub struct FakeCounters {
    script: CounterScript,
    log: Arc<Mutex<CounterLog>>,
    state: BTreeMap<String, (usize, CounterSample)>,
    base: Instant,
}

impl FakeCounters {
    pub const VIRTUAL_INTERVAL: Duration = Duration::from_millis(1100);

    pub fn new(script: CounterScript, log: Arc<Mutex<CounterLog>>) -> Self {
        Self {
            script,
            log,
            state: BTreeMap::new(),
            base: Instant::now(),
        }
    }
}

impl ActivityCounters for FakeCounters {
    fn open(&mut self, process_name: &str) -> Result<(), UninstallerError> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .opened
            .push(process_name.to_string());
        let initial = CounterSample {
            cpu_time: Duration::ZERO,
            io_bytes: 0,
            taken_at: self.base,
        };
        self.state.insert(process_name.to_string(), (0, initial));
        Ok(())
    }

    fn sample(&mut self, process_name: &str) -> Result<CounterSample, UninstallerError> {
        let (index, previous) = self
            .state
            .get(process_name)
            .copied()
            .ok_or_else(|| UninstallerError::Counter(format!("计数器未打开: {}", process_name)))?;

        let (cpu_ms, io) = (self.script)(process_name, index)
            .ok_or_else(|| UninstallerError::Counter(format!("计数器失效: {}", process_name)))?;

        let next = CounterSample {
            cpu_time: previous.cpu_time + Duration::from_millis(cpu_ms),
            io_bytes: previous.io_bytes + io,
            taken_at: previous.taken_at + Self::VIRTUAL_INTERVAL,
        };
        self.state
            .insert(process_name.to_string(), (index + 1, next));
        Ok(next)
    }

    fn close(&mut self, process_name: &str) -> Result<(), UninstallerError> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .closed
            .push(process_name.to_string());
        self.state.remove(process_name);
        Ok(())
    }
}

pub fn idle_script() -> CounterScript {
    Arc::new(|_: &str, _: usize| Some((0, 0)))
}

/// 测试用的快速节奏
pub fn fast_timing() -> PollTiming {
    PollTiming {
        idle_sleep: Duration::from_millis(2),
        sample_interval: Duration::from_millis(1),
        stall_limit: 30,
        simulated_iterations: 3,
    }
}

pub struct FakeSystem {
    pub world: FakeWorld,
    pub counter_script: CounterScript,
    pub counter_log: Arc<Mutex<CounterLog>>,
    pub msi_products: Result<Vec<String>, String>,
    pub blacklist: ProcessBlacklist,
    pub timing: PollTiming,
}

impl FakeSystem {
    pub fn new(world: FakeWorld) -> Self {
        Self {
            world,
            counter_script: idle_script(),
            counter_log: Arc::new(Mutex::new(CounterLog::default())),
            msi_products: Ok(Vec::new()),
            blacklist: ProcessBlacklist::from_browsers(["chrome", "firefox"]),
            timing: fast_timing(),
        }
    }

    pub fn with_counter_script(mut self, script: CounterScript) -> Self {
        self.counter_script = script;
        self
    }

    pub fn with_msi_products(mut self, products: Result<Vec<String>, String>) -> Self {
        self.msi_products = products;
        self
    }

    pub fn opened_counters(&self) -> Vec<String> {
        self.counter_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .opened
            .clone()
    }

    pub fn closed_counters(&self) -> Vec<String> {
        self.counter_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .closed
            .clone()
    }
}

impl SystemAccess for FakeSystem {
    fn process_host(&self) -> Box<dyn ProcessHost> {
        Box::new(FakeHost::new(self.world.clone()))
    }

    fn activity_counters(&self) -> Box<dyn ActivityCounters> {
        Box::new(FakeCounters::new(
            self.counter_script.clone(),
            self.counter_log.clone(),
        ))
    }

    fn msi_product_codes(&self) -> Result<Vec<String>, UninstallerError> {
        self.msi_products.clone().map_err(UninstallerError::Msi)
    }

    fn blacklist(&self) -> &ProcessBlacklist {
        &self.blacklist
    }

    fn timing(&self) -> PollTiming {
        self.timing
    }
}

/// 根进程脚本：存活的轮询次数（None 表示不会自行退出）与退出码
#[derive(Debug, Clone, Copy)]
pub struct RootScript {
    pub lifetime: Option<u32>,
    pub exit_code: i32,
}

impl RootScript {
    pub fn exits_after(polls: u32, exit_code: i32) -> Self {
        Self {
            lifetime: Some(polls),
            exit_code,
        }
    }

    pub fn runs_forever() -> Self {
        Self {
            lifetime: None,
            exit_code: 0,
        }
    }
}

pub struct FakeLaunched {
    world: FakeWorld,
    pid: u32,
    script: RootScript,
    reaped: Arc<Mutex<Vec<u32>>>,
}

impl FakeLaunched {
    fn final_code(&self) -> i32 {
        if self.world.was_killed(self.pid) {
            KILLED_EXIT_CODE
        } else {
            self.script.exit_code
        }
    }
}

impl LaunchedProcess for FakeLaunched {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>, UninstallerError> {
        if !self.world.is_alive(self.pid) {
            return Ok(Some(self.final_code()));
        }

        match self.script.lifetime {
            Some(0) => {
                self.world.exit(self.pid);
                Ok(Some(self.final_code()))
            }
            Some(remaining) => {
                self.script.lifetime = Some(remaining - 1);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn wait_exit_code(&mut self) -> Result<i32, UninstallerError> {
        self.world.exit(self.pid);
        self.reaped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.pid);
        Ok(self.final_code())
    }
}

pub struct FakeTarget {
    pub name: String,
    pub kind: InstallerKind,
    pub quiet_possible: bool,
    pub registered: bool,
    pub key_exists: AtomicBool,
    pub install_location: Option<String>,
    pub product_key: Option<String>,
    pub root_name: String,
    pub fail_launch: bool,
    /// run() 直接 panic
    pub panic_on_launch: bool,
    world: FakeWorld,
    scripts: Mutex<VecDeque<RootScript>>,
    default_script: RootScript,
    launches: AtomicU32,
    launched_pids: Mutex<Vec<u32>>,
    quiet_requests: Mutex<Vec<bool>>,
    reaped: Arc<Mutex<Vec<u32>>>,
}

impl FakeTarget {
    pub fn new(world: FakeWorld, kind: InstallerKind, script: RootScript) -> Self {
        Self {
            name: "Demo".to_string(),
            kind,
            quiet_possible: true,
            registered: true,
            key_exists: AtomicBool::new(true),
            install_location: None,
            product_key: None,
            root_name: match kind {
                InstallerKind::MsiExec => "msiexec.exe".to_string(),
                _ => "uninst.exe".to_string(),
            },
            fail_launch: false,
            panic_on_launch: false,
            world,
            scripts: Mutex::new(VecDeque::new()),
            default_script: script,
            launches: AtomicU32::new(0),
            launched_pids: Mutex::new(Vec::new()),
            quiet_requests: Mutex::new(Vec::new()),
            reaped: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 依次为后续每次启动指定脚本，用完后回到默认脚本
    pub fn with_scripts(self, scripts: Vec<RootScript>) -> Self {
        *self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = scripts.into();
        self
    }

    pub fn with_product_key(mut self, key: &str) -> Self {
        self.product_key = Some(key.to_string());
        self
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn last_pid(&self) -> Option<u32> {
        self.launched_pids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .copied()
    }

    /// 已被 wait_exit_code 回收的根进程
    pub fn reaped_pids(&self) -> Vec<u32> {
        self.reaped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn quiet_requests(&self) -> Vec<bool> {
        self.quiet_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl UninstallTarget for FakeTarget {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_registered(&self) -> bool {
        self.registered
    }

    fn registry_key_still_exists(&self) -> bool {
        self.key_exists.load(Ordering::SeqCst)
    }

    fn installer_kind(&self) -> InstallerKind {
        self.kind
    }

    fn quiet_uninstall_possible(&self) -> bool {
        self.quiet_possible
    }

    fn uninstall_string(&self) -> Option<&str> {
        Some("uninst.exe")
    }

    fn quiet_uninstall_string(&self) -> Option<&str> {
        Some("uninst.exe /S")
    }

    fn install_location(&self) -> Option<&str> {
        self.install_location.as_deref()
    }

    fn product_key(&self) -> Option<&str> {
        self.product_key.as_deref()
    }

    fn run(
        &self,
        prefer_quiet: bool,
        simulate: bool,
    ) -> Result<Option<Box<dyn LaunchedProcess>>, UninstallerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.quiet_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prefer_quiet);

        if self.panic_on_launch {
            panic!("卸载程序描述已损坏");
        }
        if self.fail_launch {
            return Err(UninstallerError::Launch("uninst.exe: 找不到文件".to_string()));
        }
        if simulate {
            return Ok(None);
        }

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or(self.default_script);
        let pid = self.world.spawn(&self.root_name, None);
        self.launched_pids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(pid);

        Ok(Some(Box::new(FakeLaunched {
            world: self.world.clone(),
            pid,
            script,
            reaped: self.reaped.clone(),
        })))
    }
}
