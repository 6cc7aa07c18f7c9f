//! Keyword intent parser — the rule fallback when the planner is
//! unavailable or under-confident.
//!
//! Scores each candidate skill by verb/noun keyword hits and returns the
//! best match with a confidence proportional to the hit strength.

pub struct KeywordIntentParser;

struct SkillKeywords {
    skill: &'static str,
    strong: &'static [&'static str],
    weak: &'static [&'static str],
}

const TABLE: &[SkillKeywords] = &[
    SkillKeywords {
        skill: "CreateSkill",
        strong: &["新增", "新建", "创建", "录入", "添加一条"],
        weak: &["登记"],
    },
    SkillKeywords {
        skill: "DeleteSkill",
        strong: &["删除", "删掉", "移除这条"],
        weak: &[],
    },
    SkillKeywords {
        skill: "UpdateSkill",
        strong: &["更新", "修改", "改成", "变更", "结案", "归档", "终本"],
        weak: &["补充", "登记进展"],
    },
    SkillKeywords {
        skill: "QuerySkill",
        strong: &["查", "查询", "搜索", "找", "看看", "列出", "有哪些", "多少条"],
        weak: &["案件", "合同", "开庭", "截止"],
    },
    SkillKeywords {
        skill: "ChitchatSkill",
        strong: &["你好", "您好", "早上好", "晚上好", "谢谢", "在吗"],
        weak: &["哈哈", "辛苦"],
    },
];

impl KeywordIntentParser {
    pub fn new() -> Self {
        Self
    }

    /// Best-scoring skill with a rough confidence. Queries with no hits
    /// fall back to `QuerySkill` at low confidence — a lookup is the
    /// least destructive default.
    pub fn parse(&self, query: &str) -> (String, f64) {
        let mut best: Option<(&'static str, u32)> = None;
        for entry in TABLE {
            let mut score = 0u32;
            for kw in entry.strong {
                if query.contains(kw) {
                    score += 3;
                }
            }
            for kw in entry.weak {
                if query.contains(kw) {
                    score += 1;
                }
            }
            if score > 0 && best.is_none_or(|(_, s)| score > s) {
                best = Some((entry.skill, score));
            }
        }
        match best {
            Some((skill, score)) => {
                let confidence = (0.5 + 0.1 * score as f64).min(0.95);
                (skill.to_owned(), confidence)
            }
            None => ("QuerySkill".to_owned(), 0.3),
        }
    }
}

impl Default for KeywordIntentParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_verbs_win() {
        let (skill, conf) = KeywordIntentParser::new().parse("新增一个案件");
        assert_eq!(skill, "CreateSkill");
        assert!(conf > 0.5);
    }

    #[test]
    fn close_words_route_to_update() {
        let (skill, _) = KeywordIntentParser::new().parse("这个案子结案了");
        assert_eq!(skill, "UpdateSkill");
    }

    #[test]
    fn no_hits_default_to_query() {
        let (skill, conf) = KeywordIntentParser::new().parse("嗯");
        assert_eq!(skill, "QuerySkill");
        assert!(conf < 0.5);
    }

    #[test]
    fn query_nouns_are_weak_signals() {
        let (skill, _) = KeywordIntentParser::new().parse("明天开庭安排");
        assert_eq!(skill, "QuerySkill");
    }
}
