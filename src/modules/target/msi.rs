use std::sync::OnceLock;

use regex::Regex;

use crate::modules::common::error::UninstallerError;

fn product_code_regex() -> Option<&'static Regex> {
    static PRODUCT_CODE: OnceLock<Option<Regex>> = OnceLock::new();
    PRODUCT_CODE
        .get_or_init(|| {
            Regex::new(r"\{[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}")
                .ok()
        })
        .as_ref()
}

/// 从 `MsiExec.exe /X{GUID}` 形式的命令中提取产品代码（统一大写）
pub fn extract_product_code(command: &str) -> Option<String> {
    product_code_regex()?
        .find(command)
        .map(|m| m.as_str().to_uppercase())
}

/// 将注册表中压缩存储的 GUID 还原为 `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
///
/// 前三段按字符整体反转，其余 8 个字节逐字节交换高低位。
pub fn unpack_guid(packed: &str) -> Option<String> {
    let packed = packed.trim();
    if packed.len() != 32 || !packed.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let reversed = |s: &str| s.chars().rev().collect::<String>();
    let swapped_pairs = |s: &str| {
        s.as_bytes()
            .chunks(2)
            .map(|pair| format!("{}{}", pair[1] as char, pair[0] as char))
            .collect::<String>()
    };

    let guid = format!(
        "{{{}-{}-{}-{}-{}}}",
        reversed(&packed[0..8]),
        reversed(&packed[8..12]),
        reversed(&packed[12..16]),
        swapped_pairs(&packed[16..20]),
        swapped_pairs(&packed[20..32]),
    );

    Some(guid.to_uppercase())
}

/// 判断产品代码是否仍在已注册的 MSI 产品列表中
pub fn contains_product(products: &[String], product_key: &str) -> bool {
    products
        .iter()
        .any(|code| code.eq_ignore_ascii_case(product_key.trim()))
}

/// 枚举当前已注册的 MSI 产品代码
pub fn list_product_codes() -> Result<Vec<String>, UninstallerError> {
    #[cfg(windows)]
    {
        list_product_codes_impl()
    }

    #[cfg(not(windows))]
    {
        Ok(Vec::new())
    }
}

#[cfg(windows)]
fn list_product_codes_impl() -> Result<Vec<String>, UninstallerError> {
    use winreg::enums::*;
    use winreg::RegKey;

    // 按机器安装与按用户安装的产品分别登记在两处
    let paths = [
        (HKEY_LOCAL_MACHINE, r"SOFTWARE\Classes\Installer\Products"),
        (HKEY_CURRENT_USER, r"SOFTWARE\Microsoft\Installer\Products"),
    ];

    let mut codes = Vec::new();
    let mut any_opened = false;

    for (hkey, path) in &paths {
        match RegKey::predef(*hkey).open_subkey(path) {
            Ok(key) => {
                any_opened = true;
                codes.extend(
                    key.enum_keys()
                        .filter_map(|k| k.ok())
                        .filter_map(|packed| unpack_guid(&packed)),
                );
            }
            Err(e) => {
                tracing::debug!("无法打开注册表路径 {}: {}", path, e);
            }
        }
    }

    if !any_opened {
        return Err(UninstallerError::Msi("无法读取 MSI 产品注册信息".to_string()));
    }

    codes.sort();
    codes.dedup();
    Ok(codes)
}
