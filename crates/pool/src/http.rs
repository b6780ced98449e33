//! Response handling shared by the HTTP clients in this crate.

/// Error type of an HTTP client that maps non-2xx answers to a status
/// plus body variant.
pub(crate) trait HttpApiError: From<reqwest::Error> {
    fn from_status(status: u16, body: String) -> Self;
}

/// Pass 2xx responses through; turn anything else into an API error
/// carrying the response body.
pub(crate) async fn ensure_success<E: HttpApiError>(response: reqwest::Response) -> Result<reqwest::Response, E> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(E::from_status(status.as_u16(), body));
    }
    Ok(response)
}

pub(crate) async fn parse_response<T, E>(response: reqwest::Response) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
    E: HttpApiError,
{
    let response = ensure_success::<E>(response).await?;
    Ok(response.json::<T>().await?)
}
