//! browsers 命令 - 查看进程黑名单

use anyhow::Result;
use clap::Parser;

use crate::modules::supervisor::blacklist;

#[derive(Parser, Debug)]
pub struct BrowsersCommand {
    /// 输出格式 (table/json)
    #[arg(long, default_value = "table")]
    pub format: String,
}

pub async fn execute(cmd: BrowsersCommand) -> Result<()> {
    let names: Vec<&str> = blacklist::global().names().collect();
    tracing::debug!("进程黑名单共 {} 项", names.len());

    match cmd.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&names)?),
        _ => {
            println!("\n{}", "=".repeat(40));
            println!("不视为卸载进程的进程名");
            println!("{}", "=".repeat(40));
            for name in &names {
                println!("  {}", name);
            }
            println!("{}", "=".repeat(40));
            println!("总计: {} 个\n", names.len());
        }
    }

    Ok(())
}
