//! msi 命令 - 列出已注册的 MSI 产品

use anyhow::Result;
use clap::Parser;

use crate::modules::target::msi;

#[derive(Parser, Debug)]
pub struct MsiCommand {
    /// 输出格式 (table/json)
    #[arg(long, default_value = "table")]
    pub format: String,

    /// 只显示包含该关键字的产品代码
    #[arg(short, long)]
    pub search: Option<String>,
}

pub async fn execute(cmd: MsiCommand) -> Result<()> {
    let mut products = msi::list_product_codes()?;
    if let Some(keyword) = &cmd.search {
        let keyword = keyword.to_uppercase();
        products.retain(|code| code.contains(&keyword));
    }
    products.sort();

    match cmd.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&products)?),
        _ => {
            println!("\n{}", "=".repeat(42));
            println!("{:<40}", "产品代码");
            println!("{}", "=".repeat(42));
            for code in &products {
                println!("{:<40}", code);
            }
            println!("{}", "=".repeat(42));
            println!("总计: {} 个产品\n", products.len());
        }
    }

    Ok(())
}
