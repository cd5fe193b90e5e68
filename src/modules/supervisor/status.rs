use serde::{Deserialize, Serialize};

/// 单个卸载任务的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UninstallStatus {
    /// 等待启动（含重试前的复位）
    #[default]
    Waiting,
    /// 卸载程序正在运行
    Uninstalling,
    Completed,
    Failed,
    Skipped,
}

impl UninstallStatus {
    /// 是否为终止状态
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UninstallStatus::Completed | UninstallStatus::Failed | UninstallStatus::Skipped
        )
    }
}

impl std::fmt::Display for UninstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UninstallStatus::Waiting => write!(f, "等待中"),
            UninstallStatus::Uninstalling => write!(f, "卸载中"),
            UninstallStatus::Completed => write!(f, "已完成"),
            UninstallStatus::Failed => write!(f, "失败"),
            UninstallStatus::Skipped => write!(f, "已跳过"),
        }
    }
}

/// 控制线程发出的取消请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CancellationRequest {
    #[default]
    None,
    /// 停止等待，不结束进程
    Skip,
    /// 结束所有被监视的进程后停止
    Terminate,
}

impl CancellationRequest {
    pub fn is_requested(self) -> bool {
        self != CancellationRequest::None
    }
}
