//! 卸载程序退出码判定

use crate::modules::target::InstallerKind;

/// 0xC000013A，进程被控制台 Ctrl+C / Ctrl+Break 中断
pub const STATUS_CONTROL_C_EXIT: i32 = 0xC000_013A_u32 as i32;

/// ERROR_INSTALL_USEREXIT，用户取消了 MSI 操作
pub const MSI_USER_EXIT: i32 = 1602;

/// 找不到文件/路径、拒绝访问、命令无法识别，重试也不会成功
const NON_RETRYABLE_CODES: &[i32] = &[2, 3, 5, 9009];

/// 退出码判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// 卸载程序报告用户取消，按跳过处理
    UserCancelled,
    /// 被控制台中断，按结束处理
    Interrupted,
    /// 失败且不重试
    Failed(i32),
    /// 失败，允许重试一次
    Retryable(i32),
}

impl ExitOutcome {
    /// 失败类结果对应的退出码
    pub fn error_code(self) -> Option<i32> {
        match self {
            ExitOutcome::Failed(code) | ExitOutcome::Retryable(code) => Some(code),
            _ => None,
        }
    }
}

/// 按卸载程序类型解释退出码
pub fn classify_exit(kind: InstallerKind, code: i32, retry_on_failure: bool) -> ExitOutcome {
    match (kind, code) {
        (_, 0) => ExitOutcome::Success,
        (InstallerKind::MsiExec, MSI_USER_EXIT) => ExitOutcome::UserCancelled,
        (InstallerKind::Nsis, 1 | 2) => ExitOutcome::UserCancelled,
        (_, STATUS_CONTROL_C_EXIT) => ExitOutcome::Interrupted,
        (_, code) if NON_RETRYABLE_CODES.contains(&code) => ExitOutcome::Failed(code),
        (_, code) if retry_on_failure => ExitOutcome::Retryable(code),
        (_, code) => ExitOutcome::Failed(code),
    }
}
