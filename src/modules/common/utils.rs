use std::time::Duration;

/// 规范化路径（统一斜杠、合并连续反斜杠、去掉末尾分隔符）
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().trim_matches('"').replace('/', "\\");

    while normalized.contains("\\\\") {
        normalized = normalized.replace("\\\\", "\\");
    }

    while normalized.len() > 3 && normalized.ends_with('\\') {
        normalized.pop();
    }

    normalized
}

/// 不区分大小写的包含判断，路径分隔符按 normalize_path 统一
pub fn path_contains(haystack: &str, needle: &str) -> bool {
    let needle = normalize_path(needle).to_lowercase();
    if needle.is_empty() {
        return false;
    }

    normalize_path(haystack).to_lowercase().contains(&needle)
}

/// 规范化进程名：小写并去掉 .exe 后缀
pub fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => lower,
    }
}

/// 在原串上按 ASCII 忽略大小写查找，返回的偏移可直接用于切片原串
fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// 拆分命令行为 (程序, 参数字符串)
///
/// 兼容 `"C:\Program Files\App\uninst.exe" /S` 与 `msiexec /x{GUID}` 两种写法。
pub fn split_command_line(command: &str) -> Option<(String, String)> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(stripped) = trimmed.strip_prefix('"') {
        let end_idx = stripped.find('"')?;
        let program = stripped[..end_idx].trim().to_string();
        let args = stripped[end_idx + 1..].trim().to_string();
        if program.is_empty() {
            return None;
        }
        return Some((program, args));
    }

    // 无引号时，优先匹配到 .exe 结尾，兼容带空格但未加引号的路径
    if let Some(exe_idx) = find_ascii_case_insensitive(trimmed, ".exe") {
        let end = exe_idx + 4;
        let at_boundary = trimmed[end..]
            .chars()
            .next()
            .map(|c| c.is_whitespace())
            .unwrap_or(true);
        if at_boundary {
            return Some((
                trimmed[..end].to_string(),
                trimmed[end..].trim().to_string(),
            ));
        }
    }

    match trimmed.split_once(char::is_whitespace) {
        Some((program, args)) => Some((program.to_string(), args.trim().to_string())),
        None => Some((trimmed.to_string(), String::new())),
    }
}

/// 格式化耗时
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}时{:02}分{:02}秒", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}分{:02}秒", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}秒", secs, duration.subsec_millis() / 100)
    }
}

/// 按字符截断，用于表格输出
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let chars: String = s.chars().take(max_len.saturating_sub(2)).collect();
        format!("{}..", chars)
    } else {
        s.to_string()
    }
}
