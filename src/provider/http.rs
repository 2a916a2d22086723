use super::ProviderError;
use std::time::Duration;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// POSTs a JSON body and decodes the JSON response. Non-2xx statuses
/// surface as `ProviderError::Http` carrying status and body so the
/// router can log them before falling back.
pub fn post_json(
    provider: &str,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
    timeout: Duration,
) -> Result<serde_json::Value, ProviderError> {
    let mut request = ureq::post(url).timeout(timeout);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    let response = request
        .send_json(body.clone())
        .map_err(|err| map_request_error(provider, err))?;
    response
        .into_json::<serde_json::Value>()
        .map_err(|err| ProviderError::Parse {
            provider: provider.to_string(),
            reason: format!("invalid response JSON: {err}"),
        })
}

fn map_request_error(provider: &str, error: ureq::Error) -> ProviderError {
    match error {
        ureq::Error::Status(status, response) => ProviderError::Http {
            provider: provider.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        other => ProviderError::Transport {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}
