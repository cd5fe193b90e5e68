use thiserror::Error;

#[derive(Error, Debug)]
pub enum UninstallerError {
    #[error("注册表错误: {0}")]
    Registry(String),

    #[error("文件系统错误: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("MSI 错误: {0}")]
    Msi(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("启动卸载程序失败: {0}")]
    Launch(String),

    #[error("卸载程序返回错误代码 {0}")]
    ExitCode(i32),

    #[error("超时: {0}")]
    Timeout(String),

    #[error("卸载已被用户取消")]
    Cancelled,

    #[error("性能计数器错误: {0}")]
    Counter(String),

    #[error("进程查询失败: {0}")]
    Process(String),

    #[error("创建卸载线程失败: {0}")]
    ThreadSpawn(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl UninstallerError {
    /// 卸载程序返回的原始退出码（仅 ExitCode 变体）
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitCode(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
