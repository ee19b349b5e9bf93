use std::time::Duration;

use reqwest::Client;

const DISABLE_SYSTEM_PROXY_ENV: &str = "PARLEY_DISABLE_SYSTEM_PROXY";

pub(crate) fn build_http_client(timeout: Option<Duration>) -> Client {
    let mut builder = Client::builder();
    if should_disable_system_proxy() {
        builder = builder.no_proxy();
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Falling back to default HTTP client: {}", e);
        Client::new()
    })
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}
