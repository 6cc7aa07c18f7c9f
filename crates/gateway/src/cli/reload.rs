//! `caseflow reload-config` — posts to the running server's admin
//! endpoint so the rebuild happens in-process, keeping in-flight
//! requests alive.

use cf_domain::{Error, Result};

pub async fn run(server: &str) -> Result<()> {
    let url = format!("{}/v1/admin/reload", server.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .send()
        .await
        .map_err(|e| Error::Connection(format!("{url}: {e}")))?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    if status.is_success() {
        let skills = body
            .get("skills")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        println!("config reloaded ({skills} skills registered)");
        Ok(())
    } else {
        Err(Error::Other(format!("reload failed: {status} {body}")))
    }
}
