//! Commands that talk to a running gateway over HTTP.

use {
    anyhow::{Context, Result},
    courier_protocol::{ApiResponse, ApiStatus, SendBody, SentData, StatusReport},
    serde_json::Value,
};

pub const DEFAULT_URL: &str = "http://127.0.0.1:3000";

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

pub async fn status(url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let report: StatusReport = client
        .get(endpoint(url, "/status"))
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {url}"))?
        .json()
        .await
        .context("unexpected /status response")?;

    println!("{}", render_status(&report));
    Ok(())
}

fn render_status(report: &StatusReport) -> String {
    let mut out = format!(
        "session: {} (backend: {}, since {})",
        report.status,
        report.backend,
        report.timestamp.to_rfc3339()
    );
    if let Some(code) = &report.pairing_code {
        out.push_str(&format!("\npairing code: {code}"));
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("\nerror: {error}"));
    }
    if !report.configured {
        out.push_str("\ncredentials: not configured (simulation mode)");
    }
    out
}

pub async fn send(url: &str, to: String, message: String) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(endpoint(url, "/send"))
        .json(&SendBody { to, message })
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {url}"))?;

    let body: ApiResponse<SentData> = resp.json().await.context("unexpected /send response")?;
    match (body.status, body.data) {
        (ApiStatus::Success, Some(data)) => {
            let id = data.message_id.as_deref().unwrap_or("-");
            println!("sent to {} (message id {id})", data.to);
            Ok(())
        },
        _ => anyhow::bail!("send failed: {}", body.message),
    }
}

/// POST a command endpoint (`/connect`, `/disconnect`) and print its reply.
pub async fn command(url: &str, path: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let resp = client
        .post(endpoint(url, path))
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {url}"))?;
    let ok = resp.status().is_success();
    let body: Value = resp.json().await.context("unexpected response")?;

    let message = body["message"].as_str().unwrap_or_default();
    if !ok {
        anyhow::bail!("{path} failed: {message}");
    }
    println!("{message}");
    if let Some(code) = body["pairing_code"].as_str() {
        println!("pairing code: {code}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {chrono::Utc, courier_protocol::Phase};

    use super::*;

    fn report(status: Phase) -> StatusReport {
        StatusReport {
            connected: status.is_connected(),
            status,
            timestamp: Utc::now(),
            service: "whatsapp_business_api".into(),
            backend: "simulation".into(),
            configured: false,
            has_token: false,
            has_phone_id: false,
            pairing_code: None,
            error: None,
        }
    }

    #[test]
    fn endpoint_joins_paths() {
        assert_eq!(endpoint("http://h:1/", "/status"), "http://h:1/status");
        assert_eq!(endpoint("http://h:1", "/send"), "http://h:1/send");
    }

    #[test]
    fn renders_pairing_code() {
        let mut r = report(Phase::Pairing);
        r.pairing_code = Some("ABCD-1234".into());
        let text = render_status(&r);
        assert!(text.starts_with("session: pairing (backend: simulation"));
        assert!(text.contains("pairing code: ABCD-1234"));
        assert!(text.contains("simulation mode"));
    }

    #[test]
    fn renders_error() {
        let mut r = report(Phase::Errored);
        r.error = Some("unauthorized: bad token".into());
        r.configured = true;
        let text = render_status(&r);
        assert!(text.contains("error: unauthorized: bad token"));
        assert!(!text.contains("simulation mode"));
    }
}
