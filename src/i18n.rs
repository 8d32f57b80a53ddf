// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持中文（默认）和英文
// 用途: 通知模板渲染
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"zh-CN" 或 "en"）
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 是否为支持的语言
pub fn is_supported_locale(locale: &str) -> bool {
    rust_i18n::available_locales!().iter().any(|l| *l == locale)
}

/// 翻译消息（无参数，使用当前语言）
///
/// # 示例
/// ```no_run
/// use emergency_dispatch::i18n::t;
/// let msg = t("common.success");
/// ```
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（带参数，使用当前语言）
///
/// # 示例
/// ```no_run
/// use emergency_dispatch::i18n::t_with_args;
/// let msg = t_with_args("notification.deadline_reminder", &[("product", "阿莫西林")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    substitute(rust_i18n::t!(key).to_string(), args)
}

/// 按指定语言翻译（不修改全局语言，供通知渲染使用）
pub fn t_in_locale(locale: &str, key: &str, args: &[(&str, &str)]) -> String {
    substitute(rust_i18n::t!(key, locale = locale).to_string(), args)
}

fn substitute(mut template: String, args: &[(&str, &str)]) -> String {
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        template = template.replace(&placeholder, v);
    }
    template
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // rust-i18n 的 locale 为全局状态，且 Rust 测试默认并行执行；
    // 为避免测试互相干扰，这里对 i18n 相关测试串行化。
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(current_locale(), "en");

        // 恢复默认语言
        set_locale("zh-CN");
        assert_eq!(current_locale(), "zh-CN");
    }

    #[test]
    fn test_translate_simple() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("zh-CN");
        assert_eq!(t("common.success"), "操作成功");

        set_locale("en");
        assert_eq!(t("common.success"), "Operation successful");

        set_locale("zh-CN");
    }

    #[test]
    fn test_translate_in_locale_with_args() {
        let msg = t_in_locale(
            "en",
            "notification.deadline_reminder",
            &[
                ("dispenser", "Amina"),
                ("product", "Amoxicillin"),
                ("quantity", "12"),
                ("branch", "B01"),
                ("deadline", "2026-03-01 10:00"),
            ],
        );
        assert!(msg.contains("Amina"));
        assert!(msg.contains("12 x Amoxicillin"));
        assert!(msg.contains("2026-03-01 10:00"));
        assert!(!msg.contains("%{"));
    }

    #[test]
    fn test_supported_locales() {
        assert!(is_supported_locale("zh-CN"));
        assert!(is_supported_locale("en"));
        assert!(!is_supported_locale("fr"));
    }
}
