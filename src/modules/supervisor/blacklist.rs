use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::modules::common::utils;
use crate::modules::target::browsers;

/// 资源管理器外壳，卸载程序经常重启它
pub const SHELL_PROCESS_NAME: &str = "explorer";

/// 永远不视为卸载进程、也不会被结束的进程名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessBlacklist {
    names: BTreeSet<String>,
}

impl ProcessBlacklist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| utils::normalize_process_name(name.as_ref()))
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// 浏览器进程名加上资源管理器
    pub fn from_browsers<I, S>(browser_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blacklist = Self::new(browser_names);
        blacklist.names.insert(SHELL_PROCESS_NAME.to_string());
        blacklist
    }

    pub fn contains(&self, process_name: &str) -> bool {
        self.names
            .contains(&utils::normalize_process_name(process_name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// 进程级共享的黑名单，首次访问时检测已安装的浏览器
pub fn global() -> &'static ProcessBlacklist {
    static BLACKLIST: OnceLock<ProcessBlacklist> = OnceLock::new();
    BLACKLIST.get_or_init(|| {
        let blacklist = ProcessBlacklist::from_browsers(browsers::list_browser_process_names());
        tracing::debug!(
            "进程黑名单: {}",
            blacklist.names().collect::<Vec<_>>().join(", ")
        );
        blacklist
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_browsers_always_includes_shell() {
        let blacklist = ProcessBlacklist::from_browsers(["Chrome.exe", "firefox"]);
        assert!(blacklist.contains("chrome"));
        assert!(blacklist.contains("FIREFOX.EXE"));
        assert!(blacklist.contains("explorer.exe"));
        assert!(!blacklist.contains("uninst"));
        assert_eq!(blacklist.len(), 3);
    }

    #[test]
    fn global_blacklist_is_shared() {
        let first = global() as *const ProcessBlacklist;
        let second = global() as *const ProcessBlacklist;
        assert_eq!(first, second);
        assert!(global().contains(SHELL_PROCESS_NAME));
    }
}
