pub mod browsers;
pub mod msi;
pub mod uninstall;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 运行一个卸载程序并监视到结束
    Uninstall(uninstall::UninstallCommand),

    /// 列出不会被视为卸载进程的浏览器与外壳进程
    Browsers(browsers::BrowsersCommand),

    /// 列出已注册的 MSI 产品代码
    Msi(msi::MsiCommand),
}
