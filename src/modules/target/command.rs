use std::process::{Child, Command, ExitStatus};

use super::{InstallerKind, LaunchedProcess, UninstallTarget};
use crate::modules::common::error::UninstallerError;
use crate::modules::common::utils;

#[cfg(unix)]
const SIGINT: i32 = 2;

/// std::process::Child 包装
pub struct ChildProcess {
    child: Child,
    exit_code: Option<i32>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            exit_code: None,
        }
    }
}

impl LaunchedProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_exit_code(&mut self) -> Result<Option<i32>, UninstallerError> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }

        let status = self.child.try_wait()?;
        self.exit_code = status.map(exit_status_code);
        Ok(self.exit_code)
    }

    fn wait_exit_code(&mut self) -> Result<i32, UninstallerError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let code = exit_status_code(self.child.wait()?);
        self.exit_code = Some(code);
        Ok(code)
    }
}

/// 把退出状态折算成 Windows 风格的退出码
fn exit_status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use crate::modules::supervisor::exit_code::STATUS_CONTROL_C_EXIT;
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            // SIGINT 等同于控制台 Ctrl+C 中断
            return if signal == SIGINT {
                STATUS_CONTROL_C_EXIT
            } else {
                128 + signal
            };
        }
    }

    -1
}

/// 选择实际执行的卸载命令
///
/// 静默模式优先使用 QuietUninstallString；MSI 没有静默命令时追加 `/qn /norestart`。
pub fn resolve_launch_command(
    kind: InstallerKind,
    uninstall_string: Option<&str>,
    quiet_uninstall_string: Option<&str>,
    quiet: bool,
) -> Option<String> {
    if quiet {
        if let Some(quiet_cmd) = quiet_uninstall_string.filter(|s| !s.trim().is_empty()) {
            return Some(quiet_cmd.trim().to_string());
        }

        if kind == InstallerKind::MsiExec {
            if let Some(cmd) = uninstall_string.filter(|s| !s.trim().is_empty()) {
                let lower = cmd.to_lowercase();
                if lower.contains("/q") {
                    return Some(cmd.trim().to_string());
                }
                return Some(format!("{} /qn /norestart", cmd.trim()));
            }
        }
    }

    uninstall_string
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
}

/// 启动命令行，返回根进程句柄
pub fn spawn_command(command_line: &str) -> Result<ChildProcess, UninstallerError> {
    let (program, args) = utils::split_command_line(command_line)
        .ok_or_else(|| UninstallerError::Launch(format!("无效的卸载命令: {}", command_line)))?;

    let mut command = Command::new(&program);

    #[cfg(windows)]
    {
        // 卸载程序自行解析参数，原样传递
        use std::os::windows::process::CommandExt;
        if !args.is_empty() {
            command.raw_arg(&args);
        }
    }

    #[cfg(not(windows))]
    {
        command.args(args.split_whitespace());
    }

    let child = command
        .spawn()
        .map_err(|e| UninstallerError::Launch(format!("{}: {}", program, e)))?;

    tracing::info!("已启动卸载程序: {} (PID {})", command_line, child.id());
    Ok(ChildProcess::new(child))
}

/// 由已解析好的命令行构成的卸载目标
#[derive(Debug, Clone)]
pub struct CommandTarget {
    pub name: String,
    pub kind: InstallerKind,
    pub uninstall_string: String,
    pub quiet_uninstall_string: Option<String>,
    pub install_location: Option<String>,
    pub product_key: Option<String>,
}

impl CommandTarget {
    pub fn new(name: impl Into<String>, uninstall_string: impl Into<String>) -> Self {
        let uninstall_string = uninstall_string.into();
        let kind = InstallerKind::guess_from_command(&uninstall_string);
        let product_key = match kind {
            InstallerKind::MsiExec => super::msi::extract_product_code(&uninstall_string),
            _ => None,
        };

        Self {
            name: name.into(),
            kind,
            uninstall_string,
            quiet_uninstall_string: None,
            install_location: None,
            product_key,
        }
    }

    pub fn with_kind(mut self, kind: InstallerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_quiet_uninstall_string(mut self, quiet: impl Into<String>) -> Self {
        self.quiet_uninstall_string = Some(quiet.into());
        self
    }

    pub fn with_install_location(mut self, location: impl Into<String>) -> Self {
        self.install_location = Some(location.into());
        self
    }
}

impl UninstallTarget for CommandTarget {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_registered(&self) -> bool {
        false
    }

    fn registry_key_still_exists(&self) -> bool {
        true
    }

    fn installer_kind(&self) -> InstallerKind {
        self.kind
    }

    fn quiet_uninstall_possible(&self) -> bool {
        self.quiet_uninstall_string.is_some() || self.kind == InstallerKind::MsiExec
    }

    fn uninstall_string(&self) -> Option<&str> {
        Some(&self.uninstall_string)
    }

    fn quiet_uninstall_string(&self) -> Option<&str> {
        self.quiet_uninstall_string.as_deref()
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
        let quiet = prefer_quiet && self.quiet_uninstall_possible();
        let command = resolve_launch_command(
            self.kind,
            Some(&self.uninstall_string),
            self.quiet_uninstall_string.as_deref(),
            quiet,
        )
        .ok_or_else(|| UninstallerError::NotFound(format!("{} 没有卸载命令", self.name)))?;

        if simulate {
            tracing::info!("[模拟] 跳过执行: {}", command);
            return Ok(None);
        }

        let child = spawn_command(&command)?;
        Ok(Some(Box::new(child)))
    }
}
