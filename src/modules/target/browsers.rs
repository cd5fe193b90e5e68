use crate::modules::common::utils;

/// 从浏览器启动命令中取出进程名，如 `"C:\...\chrome.exe" --flag` -> `chrome`
pub fn process_name_from_command(command: &str) -> Option<String> {
    let (program, _) = utils::split_command_line(command)?;
    let file_name = program
        .rsplit(['\\', '/'])
        .next()
        .filter(|name| !name.is_empty())?;
    Some(utils::normalize_process_name(file_name))
}

/// 列出已安装 Web 浏览器的进程名（已规范化）
pub fn list_browser_process_names() -> Vec<String> {
    #[cfg(windows)]
    {
        list_browser_process_names_impl()
    }

    #[cfg(not(windows))]
    {
        Vec::new()
    }
}

#[cfg(windows)]
fn list_browser_process_names_impl() -> Vec<String> {
    use winreg::enums::*;
    use winreg::RegKey;

    let paths = [
        (HKEY_LOCAL_MACHINE, r"SOFTWARE\Clients\StartMenuInternet"),
        (
            HKEY_LOCAL_MACHINE,
            r"SOFTWARE\WOW6432Node\Clients\StartMenuInternet",
        ),
        (HKEY_CURRENT_USER, r"SOFTWARE\Clients\StartMenuInternet"),
    ];

    let mut names = Vec::new();

    for (hkey, path) in &paths {
        let key = match RegKey::predef(*hkey).open_subkey(path) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("无法打开注册表路径 {}: {}", path, e);
                continue;
            }
        };

        for browser in key.enum_keys().filter_map(|k| k.ok()) {
            let command: Option<String> = key
                .open_subkey(format!(r"{}\shell\open\command", browser))
                .and_then(|subkey| subkey.get_value(""))
                .ok();

            if let Some(name) = command.as_deref().and_then(process_name_from_command) {
                names.push(name);
            }
        }
    }

    names.sort();
    names.dedup();
    names
}
