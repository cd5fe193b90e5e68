use super::command::{resolve_launch_command, spawn_command};
use super::{msi, InstallerKind, LaunchedProcess, UninstallTarget};
use crate::modules::common::error::UninstallerError;

/// 卸载项所在的注册表根键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryHive {
    LocalMachine,
    CurrentUser,
}

impl std::fmt::Display for RegistryHive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryHive::LocalMachine => write!(f, "HKLM"),
            RegistryHive::CurrentUser => write!(f, "HKCU"),
        }
    }
}

/// 注册表中的卸载项
#[derive(Debug, Clone)]
pub struct RegistryTarget {
    pub hive: RegistryHive,
    pub key_path: String,
    pub name: String,
    pub kind: InstallerKind,
    pub uninstall_string: Option<String>,
    pub quiet_uninstall_string: Option<String>,
    pub install_location: Option<String>,
    pub product_key: Option<String>,
}

impl RegistryTarget {
    /// 完整的注册表路径，如 `HKLM\SOFTWARE\...\Uninstall\{GUID}`
    pub fn full_path(&self) -> String {
        format!("{}\\{}", self.hive, self.key_path)
    }

    /// 由卸载项的键名和各字段推断类型与产品代码
    #[allow(clippy::too_many_arguments)]
    pub fn from_values(
        hive: RegistryHive,
        key_path: String,
        key_name: &str,
        name: String,
        uninstall_string: Option<String>,
        quiet_uninstall_string: Option<String>,
        install_location: Option<String>,
        windows_installer: bool,
    ) -> Self {
        let guessed = uninstall_string
            .as_deref()
            .map(InstallerKind::guess_from_command)
            .unwrap_or_default();
        let kind = if windows_installer {
            InstallerKind::MsiExec
        } else {
            guessed
        };

        let product_key = match kind {
            InstallerKind::MsiExec => msi::extract_product_code(key_name).or_else(|| {
                uninstall_string
                    .as_deref()
                    .and_then(msi::extract_product_code)
            }),
            _ => None,
        };

        Self {
            hive,
            key_path,
            name,
            kind,
            uninstall_string,
            quiet_uninstall_string,
            install_location: install_location.filter(|s| !s.trim().is_empty()),
            product_key,
        }
    }
}

impl UninstallTarget for RegistryTarget {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn is_registered(&self) -> bool {
        true
    }

    fn registry_key_still_exists(&self) -> bool {
        key_exists(self.hive, &self.key_path)
    }

    fn installer_kind(&self) -> InstallerKind {
        self.kind
    }

    fn quiet_uninstall_possible(&self) -> bool {
        self.quiet_uninstall_string.is_some() || self.kind == InstallerKind::MsiExec
    }

    fn uninstall_string(&self) -> Option<&str> {
        self.uninstall_string.as_deref()
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
            self.uninstall_string.as_deref(),
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

/// 从注册表读取所有卸载项
pub fn list_registry_targets() -> Result<Vec<RegistryTarget>, UninstallerError> {
    #[cfg(windows)]
    {
        list_registry_targets_impl()
    }

    #[cfg(not(windows))]
    {
        Ok(Vec::new())
    }
}

/// 按名称查找卸载项（不区分大小写的包含匹配）
pub fn find_registry_target(name: &str) -> Result<Option<RegistryTarget>, UninstallerError> {
    let name_lower = name.to_lowercase();
    let targets = list_registry_targets()?;

    // 完全匹配优先
    if let Some(exact) = targets.iter().find(|t| t.name.to_lowercase() == name_lower) {
        return Ok(Some(exact.clone()));
    }

    Ok(targets
        .into_iter()
        .find(|t| t.name.to_lowercase().contains(&name_lower)))
}

#[cfg(windows)]
fn key_exists(hive: RegistryHive, key_path: &str) -> bool {
    use winreg::enums::*;
    use winreg::RegKey;

    let root = match hive {
        RegistryHive::LocalMachine => RegKey::predef(HKEY_LOCAL_MACHINE),
        RegistryHive::CurrentUser => RegKey::predef(HKEY_CURRENT_USER),
    };
    root.open_subkey(key_path).is_ok()
}

#[cfg(not(windows))]
fn key_exists(_hive: RegistryHive, _key_path: &str) -> bool {
    false
}

#[cfg(windows)]
fn list_registry_targets_impl() -> Result<Vec<RegistryTarget>, UninstallerError> {
    use winreg::enums::*;
    use winreg::RegKey;

    let paths = [
        (
            RegistryHive::LocalMachine,
            HKEY_LOCAL_MACHINE,
            r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
        ),
        (
            RegistryHive::LocalMachine,
            HKEY_LOCAL_MACHINE,
            r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
        ),
        (
            RegistryHive::CurrentUser,
            HKEY_CURRENT_USER,
            r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
        ),
    ];

    let mut targets = Vec::new();

    for (hive, hkey, path) in &paths {
        let key = match RegKey::predef(*hkey).open_subkey(path) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("无法打开注册表路径 {}: {}", path, e);
                continue;
            }
        };

        for key_name in key.enum_keys().filter_map(|k| k.ok()) {
            let Ok(subkey) = key.open_subkey(&key_name) else {
                continue;
            };

            // 必须有 DisplayName
            let Ok(name) = subkey.get_value::<String, _>("DisplayName") else {
                continue;
            };

            let uninstall_string: Option<String> = subkey.get_value("UninstallString").ok();
            if uninstall_string.is_none() {
                continue;
            }

            let windows_installer = subkey
                .get_value::<u32, _>("WindowsInstaller")
                .map(|v| v == 1)
                .unwrap_or(false);

            targets.push(RegistryTarget::from_values(
                *hive,
                format!(r"{}\{}", path, key_name),
                &key_name,
                name,
                uninstall_string,
                subkey.get_value("QuietUninstallString").ok(),
                subkey.get_value("InstallLocation").ok(),
                windows_installer,
            ));
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNINSTALL_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

    #[test]
    fn from_values_marks_windows_installer_entries_as_msi() {
        let target = RegistryTarget::from_values(
            RegistryHive::LocalMachine,
            format!(r"{}\{{23170F69-40C1-2702-2201-000001000000}}", UNINSTALL_KEY),
            "{23170F69-40C1-2702-2201-000001000000}",
            "7-Zip".to_string(),
            Some("MsiExec.exe /I{23170F69-40C1-2702-2201-000001000000}".to_string()),
            None,
            Some(String::new()),
            true,
        );

        assert_eq!(target.kind, InstallerKind::MsiExec);
        assert_eq!(
            target.product_key.as_deref(),
            Some("{23170F69-40C1-2702-2201-000001000000}")
        );
        assert_eq!(target.install_location, None);
        assert!(target.quiet_uninstall_possible());
        assert!(target.full_path().starts_with(r"HKLM\SOFTWARE"));
    }

    #[test]
    fn from_values_guesses_kind_from_uninstall_string() {
        let target = RegistryTarget::from_values(
            RegistryHive::CurrentUser,
            format!(r"{}\Demo", UNINSTALL_KEY),
            "Demo",
            "Demo".to_string(),
            Some(r#""C:\Program Files\Demo\uninst.exe""#.to_string()),
            Some(r#""C:\Program Files\Demo\uninst.exe" /S"#.to_string()),
            Some(r"C:\Program Files\Demo".to_string()),
            false,
        );

        assert_eq!(target.kind, InstallerKind::Nsis);
        assert_eq!(target.product_key, None);
        assert_eq!(target.install_location(), Some(r"C:\Program Files\Demo"));
    }

    #[cfg(windows)]
    #[test]
    fn key_exists_detects_missing_key() {
        assert!(key_exists(RegistryHive::LocalMachine, UNINSTALL_KEY));
        assert!(!key_exists(
            RegistryHive::CurrentUser,
            r"SOFTWARE\uninstall-worker-test-key-that-does-not-exist"
        ));
    }
}
