//! Reply personalization: tone/length transforms over the fallback text
//! and the first paragraph block.
//!
//! Disabled by default. Chit-chat replies are never transformed — the
//! pool text is already conversational and double-styling reads wrong.

use cf_domain::types::{Block, RenderedResponse, ReplyPreferences};

const FRIENDLY_OPENERS: &[&str] = &["好的～", "收到～"];

/// Apply tone/length preferences in place.
pub fn personalize(response: &mut RenderedResponse, prefs: &ReplyPreferences) {
    if response.meta.get("chitchat").map(String::as_str) == Some("true") {
        return;
    }

    let mut text = response.text_fallback.clone();

    if prefs.length == "short" {
        text = text
            .lines()
            .take(2)
            .collect::<Vec<_>>()
            .join("\n");
    }

    if prefs.tone == "friendly" && !text.is_empty() {
        // Deterministic opener pick so identical replies stay identical.
        let opener = FRIENDLY_OPENERS[text.chars().count() % FRIENDLY_OPENERS.len()];
        if !FRIENDLY_OPENERS.iter().any(|o| text.starts_with(o)) {
            text = format!("{opener}{text}");
        }
    }

    if text != response.text_fallback {
        response.text_fallback = text.clone();
        if let Some(Block::Paragraph { text: first }) = response.blocks.first_mut() {
            *first = text;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(tone: &str, length: &str) -> ReplyPreferences {
        ReplyPreferences {
            tone: tone.into(),
            length: length.into(),
        }
    }

    #[test]
    fn short_length_keeps_two_lines() {
        let mut r = RenderedResponse::text("第一行\n第二行\n第三行\n第四行");
        personalize(&mut r, &prefs("", "short"));
        assert_eq!(r.text_fallback, "第一行\n第二行");
        match &r.blocks[0] {
            Block::Paragraph { text } => assert_eq!(text, "第一行\n第二行"),
            other => panic!("expected paragraph, got {other:?}"),
        }
    }

    #[test]
    fn friendly_tone_prefixes_deterministically() {
        let mut a = RenderedResponse::text("查询完成");
        let mut b = RenderedResponse::text("查询完成");
        personalize(&mut a, &prefs("friendly", ""));
        personalize(&mut b, &prefs("friendly", ""));
        assert_eq!(a.text_fallback, b.text_fallback);
        assert!(FRIENDLY_OPENERS.iter().any(|o| a.text_fallback.starts_with(o)));
    }

    #[test]
    fn chitchat_is_exempt() {
        let mut r = RenderedResponse::text("你好呀，我是小敬。");
        r.meta.insert("chitchat".into(), "true".into());
        personalize(&mut r, &prefs("friendly", "short"));
        assert_eq!(r.text_fallback, "你好呀，我是小敬。");
    }

    #[test]
    fn default_prefs_change_nothing() {
        let mut r = RenderedResponse::text("查询完成\n共 5 条");
        personalize(&mut r, &ReplyPreferences::default());
        assert_eq!(r.text_fallback, "查询完成\n共 5 条");
    }
}
