use serde::de::DeserializeOwned;

use docindex_core::{Error, Result};

/// Sends `req` and decodes a JSON body, classifying failures by status.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    req: reqwest::RequestBuilder,
) -> Result<T> {
    let resp = req.send().await.map_err(|e| Error::transient(provider, e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::from_status(provider, status.as_u16(), &body));
    }
    resp.json::<T>()
        .await
        .map_err(|e| Error::provider(provider, format!("malformed response: {e}")))
}
