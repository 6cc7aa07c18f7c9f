//! `caseflow config validate`.

use std::path::Path;

use cf_domain::config::{Config, ConfigSeverity};

/// Returns `true` when the config has no error-severity issues.
pub fn validate(path: &str) -> bool {
    let config = match Config::load(Path::new(path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load {path}: {e}");
            return false;
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("{path}: OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}
