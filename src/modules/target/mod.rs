//! 卸载目标描述（由上层调度器提供）
//!
//! 这里只定义 supervisor 需要消费的接口，以及几个现成的实现：
//! 直接给出命令行的 [`command::CommandTarget`]，和 Windows 注册表中的
//! [`registry::RegistryTarget`]。

pub mod browsers;
pub mod command;
pub mod models;
pub mod msi;
pub mod registry;

use crate::modules::common::error::UninstallerError;
pub use models::InstallerKind;

/// 已启动的卸载程序根进程
pub trait LaunchedProcess: Send {
    fn pid(&self) -> u32;

    /// 非阻塞查询退出码，进程仍在运行时返回 None
    fn try_exit_code(&mut self) -> Result<Option<i32>, UninstallerError>;

    /// 阻塞等待进程退出并返回退出码
    fn wait_exit_code(&mut self) -> Result<i32, UninstallerError>;
}

/// 一个待卸载的产品
pub trait UninstallTarget: Send + Sync {
    fn display_name(&self) -> &str;

    /// 是否来自注册表卸载项
    fn is_registered(&self) -> bool;

    /// 注册表卸载项是否仍然存在
    fn registry_key_still_exists(&self) -> bool;

    fn installer_kind(&self) -> InstallerKind;

    fn quiet_uninstall_possible(&self) -> bool;

    fn uninstall_string(&self) -> Option<&str>;

    fn quiet_uninstall_string(&self) -> Option<&str>;

    fn install_location(&self) -> Option<&str>;

    /// MSI 产品代码，形如 `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
    fn product_key(&self) -> Option<&str>;

    /// 启动卸载程序；仅在模拟模式下返回 None
    fn run(
        &self,
        prefer_quiet: bool,
        simulate: bool,
    ) -> Result<Option<Box<dyn LaunchedProcess>>, UninstallerError>;
}
