//! User-visible message templates keyed by stable codes.
//!
//! Skills and the callback handler resolve reply text through this map so
//! wording lives in one place.

/// Resolve a message code to its template. Unknown codes fall back to the
/// generic apology.
pub fn user_message(code: &str) -> &'static str {
    match code {
        "timeout" => "请求超时，请稍后重试",
        "connection_error" => "服务连接异常，请稍后重试",
        "missing_params" => "缺少必要信息，请补充后重试",
        "record_not_found" => "未找到目标记录，请先查询确认",
        "permission_denied" => "权限不足，请联系管理员",
        "pending_action_expired" => "操作已过期，请重新发起",
        "pending_action_not_found" => "操作已过期，请重新发起",
        "callback_processed" => "已处理",
        "batch_cancelled" => "好的，已取消本次批量操作。",
        "rate_limit" => "请求过于频繁，请稍后重试",
        _ => "抱歉，处理时出现问题，请稍后重试",
    }
}

/// Batch result summaries. `remaining` counts failed + skipped entries.
pub fn batch_message(code: &str, total: usize, succeeded: usize, failed: usize) -> String {
    match code {
        "batch_all_succeeded" => format!("批量操作完成，共 {total} 条全部成功。"),
        "batch_partial_success" => {
            format!("批量操作部分完成：成功 {succeeded} 条，失败 {failed} 条。")
        }
        "batch_all_failed" => format!("批量操作失败，共 {total} 条均未执行成功。"),
        _ => user_message(code).to_string(),
    }
}

pub fn batch_retry_hint(remaining: usize) -> String {
    format!("还有 {remaining} 条未完成，可点击重试继续执行。")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve() {
        assert_eq!(user_message("timeout"), "请求超时，请稍后重试");
        assert_eq!(user_message("pending_action_expired"), "操作已过期，请重新发起");
    }

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(user_message("nope"), "抱歉，处理时出现问题，请稍后重试");
    }

    #[test]
    fn batch_messages_interpolate_counts() {
        assert!(batch_message("batch_partial_success", 3, 1, 1).contains("成功 1 条"));
        assert!(batch_message("batch_all_succeeded", 3, 3, 0).contains("共 3 条"));
        assert!(batch_retry_hint(2).contains("2 条"));
    }
}
