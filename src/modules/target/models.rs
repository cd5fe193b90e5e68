use serde::{Deserialize, Serialize};

/// 卸载程序类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallerKind {
    /// 普通 exe 卸载程序
    #[default]
    Generic,
    /// Windows Installer (msiexec)
    MsiExec,
    /// NSIS 打包的卸载程序
    Nsis,
    /// Inno Setup 打包的卸载程序
    InnoSetup,
}

impl InstallerKind {
    /// 根据卸载命令推测类型
    pub fn guess_from_command(command: &str) -> Self {
        let lower = command.to_lowercase();

        if lower.contains("msiexec") {
            InstallerKind::MsiExec
        } else if lower.contains("unins000.exe") {
            InstallerKind::InnoSetup
        } else if lower.contains("uninst.exe") {
            InstallerKind::Nsis
        } else {
            InstallerKind::Generic
        }
    }
}

impl std::fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallerKind::Generic => write!(f, "Generic"),
            InstallerKind::MsiExec => write!(f, "MsiExec"),
            InstallerKind::Nsis => write!(f, "NSIS"),
            InstallerKind::InnoSetup => write!(f, "InnoSetup"),
        }
    }
}

impl std::str::FromStr for InstallerKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "generic" => Ok(InstallerKind::Generic),
            "msi" | "msiexec" => Ok(InstallerKind::MsiExec),
            "nsis" => Ok(InstallerKind::Nsis),
            "inno" | "innosetup" => Ok(InstallerKind::InnoSetup),
            other => Err(format!("未知的卸载程序类型: {}", other)),
        }
    }
}
