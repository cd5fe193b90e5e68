use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 启动卸载时的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// 可用时优先走静默卸载
    pub prefer_quiet: bool,
    /// 静默卸载卡死时自动结束
    pub auto_kill_stuck_quiet: bool,
    /// 一般性失败后允许自动重试一次
    pub retry_failed_quiet: bool,
    /// 模拟运行，不启动真实进程
    pub simulate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            prefer_quiet: true,
            auto_kill_stuck_quiet: false,
            retry_failed_quiet: false,
            simulate: false,
        }
    }
}

/// 轮询节奏与卡死判定阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// 不采样时每轮的休眠时间
    pub idle_sleep: Duration,
    /// 采样时两次计数器读取的间隔
    pub sample_interval: Duration,
    /// 连续判定为卡死的次数超过该值即结束进程
    pub stall_limit: u32,
    /// 模拟模式下空转的轮数
    pub simulated_iterations: u32,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(1000),
            sample_interval: Duration::from_millis(1100),
            stall_limit: 30,
            simulated_iterations: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_options_fill_missing_fields_with_defaults() {
        let options: RunOptions = serde_json::from_str(r#"{"simulate": true}"#).unwrap();
        assert!(options.simulate);
        assert!(options.prefer_quiet);
        assert!(!options.retry_failed_quiet);
    }

    #[test]
    fn default_timing_allows_about_33_seconds_of_inactivity() {
        let timing = PollTiming::default();
        let budget = timing.sample_interval * (timing.stall_limit + 1);
        assert!(budget >= Duration::from_secs(33));
        assert!(budget < Duration::from_secs(35));
    }
}
