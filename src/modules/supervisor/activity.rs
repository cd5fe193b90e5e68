//! 卸载进程活跃度采样与停滞判定

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use super::system::{ActivityCounters, CounterSample};

/// CPU 占用超过该百分比视为仍在工作
pub const CPU_BUSY_PERCENT: f64 = 1.0;

/// IO 吞吐超过该字节数每秒视为仍在工作
pub const IO_BUSY_BYTES_PER_SEC: f64 = 10240.0;

/// 两次读数之间的速率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityRate {
    pub cpu_percent: f64,
    pub io_bytes_per_sec: f64,
}

impl ActivityRate {
    pub fn calculate(previous: &CounterSample, current: &CounterSample) -> Self {
        let elapsed = current
            .taken_at
            .saturating_duration_since(previous.taken_at)
            .as_secs_f64();
        if elapsed <= 0.0 {
            return Self {
                cpu_percent: 0.0,
                io_bytes_per_sec: 0.0,
            };
        }

        let cpu = current
            .cpu_time
            .saturating_sub(previous.cpu_time)
            .as_secs_f64();
        let io = current.io_bytes.saturating_sub(previous.io_bytes) as f64;

        Self {
            cpu_percent: cpu / elapsed * 100.0,
            io_bytes_per_sec: io / elapsed,
        }
    }

    pub fn is_working(&self) -> bool {
        self.cpu_percent > CPU_BUSY_PERCENT || self.io_bytes_per_sec > IO_BUSY_BYTES_PER_SEC
    }
}

/// 一轮采样的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityVerdict {
    /// 至少一个进程在工作
    Working,
    /// 读到了数据，但全部空闲
    Stalled,
    /// 没有任何计数器可读
    NoData,
}

#[derive(Debug, Clone, Copy)]
struct TrackedCounter {
    last: CounterSample,
}

/// 按进程名维护计数器，每轮读取两次并比较
pub struct ActivitySampler {
    counters: Box<dyn ActivityCounters>,
    tracked: HashMap<String, TrackedCounter>,
    interval: Duration,
}

impl ActivitySampler {
    pub fn new(counters: Box<dyn ActivityCounters>, interval: Duration) -> Self {
        Self {
            counters,
            tracked: HashMap::new(),
            interval,
        }
    }

    /// 对给定的进程名做一轮采样，发现第一个工作中的进程即返回
    pub fn check(&mut self, names: &[String]) -> ActivityVerdict {
        let stale: Vec<String> = self
            .tracked
            .keys()
            .filter(|name| !names.contains(name))
            .cloned()
            .collect();
        for name in stale {
            self.release(&name);
        }

        self.counters.refresh();
        for name in names {
            if self.tracked.contains_key(name) {
                continue;
            }
            if let Err(e) = self.counters.open(name) {
                tracing::debug!("无法打开计数器 {}: {}", name, e);
                continue;
            }
            match self.counters.sample(name) {
                Ok(baseline) => {
                    self.tracked.insert(
                        name.clone(),
                        TrackedCounter { last: baseline },
                    );
                }
                Err(e) => {
                    tracing::debug!("计数器基线读取失败 {}: {}", name, e);
                    let _ = self.counters.close(name);
                }
            }
        }

        thread::sleep(self.interval);
        self.counters.refresh();

        let mut sampled = false;
        let mut tracked_names: Vec<String> = self.tracked.keys().cloned().collect();
        tracked_names.sort();

        for name in tracked_names {
            let current = match self.counters.sample(&name) {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::debug!("计数器读取失败 {}: {}", name, e);
                    self.release(&name);
                    continue;
                }
            };

            let Some(counter) = self.tracked.get_mut(&name) else {
                continue;
            };
            let rate = ActivityRate::calculate(&counter.last, &current);
            counter.last = current;
            sampled = true;

            if rate.is_working() {
                tracing::trace!(
                    "{} 仍在工作: CPU {:.2}%, IO {:.0} B/s",
                    name,
                    rate.cpu_percent,
                    rate.io_bytes_per_sec
                );
                return ActivityVerdict::Working;
            }
        }

        if sampled {
            ActivityVerdict::Stalled
        } else {
            ActivityVerdict::NoData
        }
    }

    pub fn tracked_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracked.keys().cloned().collect();
        names.sort();
        names
    }

    fn release(&mut self, name: &str) {
        self.tracked.remove(name);
        if let Err(e) = self.counters.close(name) {
            tracing::debug!("关闭计数器失败 {}: {}", name, e);
        }
    }

    /// 关闭所有计数器
    pub fn dispose(&mut self) {
        let names: Vec<String> = self.tracked.keys().cloned().collect();
        for name in names {
            self.release(&name);
        }
    }
}

impl Drop for ActivitySampler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 连续空闲计数
#[derive(Debug, Clone, Copy)]
pub struct StallDetector {
    idle_checks: u32,
    limit: u32,
}

impl StallDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            idle_checks: 0,
            limit,
        }
    }

    /// 记录一轮结论，连续空闲超过上限时返回 true
    pub fn record(&mut self, verdict: ActivityVerdict) -> bool {
        match verdict {
            ActivityVerdict::Stalled => self.idle_checks += 1,
            ActivityVerdict::Working | ActivityVerdict::NoData => self.idle_checks = 0,
        }
        self.idle_checks > self.limit
    }

    pub fn idle_checks(&self) -> u32 {
        self.idle_checks
    }
}
