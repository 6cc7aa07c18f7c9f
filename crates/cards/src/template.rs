//! The card-template engine.
//!
//! Exactly two constructs over plain-text fragments:
//! - `{{ name }}` — replaced with the string form of `name` (missing →
//!   empty string);
//! - `{{#if name}}…{{/if}}` — body kept iff `name` resolves to a
//!   non-blank, non-`"—"` string.
//!
//! No recursion, no loops: one conditional pass, one substitution pass,
//! then blank-line collapsing. Rendered outputs are cached by
//! `(path, value-fingerprint)`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};

use cf_domain::{Error, Result};

pub type TemplateParams = BTreeMap<String, String>;

fn is_truthy(value: Option<&String>) -> bool {
    match value {
        Some(v) => {
            let trimmed = v.trim();
            !trimmed.is_empty() && trimmed != "—"
        }
        None => false,
    }
}

/// Render a template string against params: conditional pass, then
/// substitution pass, then collapse runs of blank lines.
pub fn render_str(template: &str, params: &TemplateParams) -> String {
    // Pass 1: {{#if name}}…{{/if}} blocks (non-greedy, dotall).
    let if_re = Regex::new(r"(?s)\{\{#if\s+([A-Za-z0-9_.]+)\s*\}\}(.*?)\{\{/if\}\}")
        .expect("static regex");
    let after_if = if_re.replace_all(template, |caps: &regex::Captures<'_>| {
        if is_truthy(params.get(&caps[1])) {
            caps[2].to_owned()
        } else {
            String::new()
        }
    });

    // Pass 2: {{ name }} substitution.
    let var_re = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static regex");
    let substituted = var_re.replace_all(&after_if, |caps: &regex::Captures<'_>| {
        params.get(&caps[1]).cloned().unwrap_or_default()
    });

    // Collapse 3+ consecutive newlines down to a single blank line.
    let collapse_re = Regex::new(r"\n{3,}").expect("static regex");
    collapse_re.replace_all(&substituted, "\n\n").into_owned()
}

fn fingerprint(params: &TemplateParams) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in params {
        hasher.update(k.as_bytes());
        hasher.update([0]);
        hasher.update(v.as_bytes());
        hasher.update([0]);
    }
    hex::encode(&hasher.finalize()[..16])
}

/// File-backed engine with a bounded render cache.
pub struct TemplateEngine {
    root: PathBuf,
    cache: Mutex<HashMap<(String, String), Arc<String>>>,
    cache_size: usize,
}

impl TemplateEngine {
    pub fn new(root: impl Into<PathBuf>, cache_size: usize) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
            cache_size: cache_size.max(8),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load(&self, rel_path: &str) -> Result<String> {
        if rel_path.contains("..") || rel_path.starts_with('/') {
            return Err(Error::Template(format!("unsafe template path: {rel_path}")));
        }
        let full = self.root.join(rel_path);
        std::fs::read_to_string(&full)
            .map_err(|_| Error::Template(format!("template not found: {rel_path}")))
    }

    /// Render a fragment file, consulting the output cache.
    pub fn render_file(&self, rel_path: &str, params: &TemplateParams) -> Result<String> {
        let key = (rel_path.to_owned(), fingerprint(params));
        if let Some(cached) = self.cache.lock().get(&key) {
            return Ok((**cached).clone());
        }
        let template = self.load(rel_path)?;
        let rendered = render_str(&template, params);
        let mut cache = self.cache.lock();
        if cache.len() >= self.cache_size {
            cache.clear();
        }
        cache.insert(key, Arc::new(rendered.clone()));
        Ok(rendered)
    }

    /// Render a fragment file, falling back to an embedded default when
    /// the file is missing.
    pub fn render_or_default(
        &self,
        rel_path: &str,
        default_template: &str,
        params: &TemplateParams,
    ) -> String {
        match self.render_file(rel_path, params) {
            Ok(rendered) => rendered,
            Err(_) => render_str(default_template, params),
        }
    }

    /// Render a JSON layout fragment and parse it post-substitution.
    pub fn render_layout(
        &self,
        rel_path: &str,
        params: &TemplateParams,
    ) -> Result<serde_json::Value> {
        let rendered = self.render_file(rel_path, params)?;
        serde_json::from_str(&rendered)
            .map_err(|e| Error::Template(format!("{rel_path}: bad JSON after substitution: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn params(pairs: &[(&str, &str)]) -> TemplateParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn variables_substitute_and_missing_is_empty() {
        let out = render_str("你好 {{ name }}，编号 {{missing}}。", &params(&[("name", "张三")]));
        assert_eq!(out, "你好 张三，编号 。");
    }

    #[test]
    fn if_blocks_gate_on_non_blank() {
        let tpl = "{{#if warning}}⚠ {{ warning }}\n{{/if}}正文";
        assert_eq!(
            render_str(tpl, &params(&[("warning", "已存在同案号")])),
            "⚠ 已存在同案号\n正文"
        );
        assert_eq!(render_str(tpl, &params(&[])), "正文");
        assert_eq!(render_str(tpl, &params(&[("warning", "—")])), "正文");
        assert_eq!(render_str(tpl, &params(&[("warning", "  ")])), "正文");
    }

    #[test]
    fn blank_lines_collapse() {
        let tpl = "a\n{{#if x}}b{{/if}}\n\n\n\nc";
        assert_eq!(render_str(tpl, &params(&[])), "a\n\nc");
    }

    #[test]
    fn file_rendering_uses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("action")).unwrap();
        let mut f = std::fs::File::create(dir.path().join("action/confirm.md")).unwrap();
        write!(f, "{{{{ title }}}}：{{{{ target }}}}").unwrap();

        let engine = TemplateEngine::new(dir.path(), 16);
        let p = params(&[("title", "删除确认"), ("target", "rec1")]);
        let first = engine.render_file("action/confirm.md", &p).unwrap();
        assert_eq!(first, "删除确认：rec1");

        // Second render hits the cache even if the file disappears.
        std::fs::remove_file(dir.path().join("action/confirm.md")).unwrap();
        let second = engine.render_file("action/confirm.md", &p).unwrap();
        assert_eq!(second, first);

        // A different fingerprint misses the cache (and now fails).
        let other = params(&[("title", "删除确认"), ("target", "rec2")]);
        assert!(engine.render_file("action/confirm.md", &other).is_err());
    }

    #[test]
    fn layout_json_parses_after_substitution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("wrapper")).unwrap();
        std::fs::write(
            dir.path().join("wrapper/card.json"),
            "{\"header\": \"{{ title }}\", \"theme\": \"blue\"}",
        )
        .unwrap();
        let engine = TemplateEngine::new(dir.path(), 16);
        let value = engine
            .render_layout("wrapper/card.json", &params(&[("title", "查询结果")]))
            .unwrap();
        assert_eq!(value["header"], "查询结果");
    }

    #[test]
    fn traversal_is_blocked() {
        let engine = TemplateEngine::new("/tmp/nonexistent", 16);
        assert!(engine.render_file("../etc/passwd", &params(&[])).is_err());
    }
}
