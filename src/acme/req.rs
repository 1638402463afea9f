use eyre::WrapErr as _;

use super::api::Problem;

pub(crate) type ReqResult<T> = std::result::Result<T, Problem>;

pub(crate) async fn req_get(client: &reqwest::Client, url: &str) -> eyre::Result<reqwest::Response> {
    log::trace!("GET {url}");
    client
        .get(url)
        .send()
        .await
        .wrap_err_with(|| format!("GET {url} failed"))
}

pub(crate) async fn req_head(client: &reqwest::Client, url: &str) -> eyre::Result<reqwest::Response> {
    log::trace!("HEAD {url}");
    client
        .head(url)
        .send()
        .await
        .wrap_err_with(|| format!("HEAD {url} failed"))
}

pub(crate) async fn req_post(
    client: &reqwest::Client,
    url: &str,
    body: String,
) -> eyre::Result<reqwest::Response> {
    log::trace!("POST {url} {body}");
    client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/jose+json")
        .body(body)
        .send()
        .await
        .wrap_err_with(|| format!("POST {url} failed"))
}

/// Passes successful responses through and turns everything else into a [`Problem`].
pub(crate) async fn req_handle_error(res: reqwest::Response) -> ReqResult<reqwest::Response> {
    let status = res.status();

    if status.is_success() {
        return Ok(res);
    }

    let is_problem_json = res
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/problem+json"));

    let body = req_safe_read_body(res).await;

    let problem = if is_problem_json {
        serde_json::from_str(&body).unwrap_or_else(|err| {
            Problem::new(
                "problemJsonFail",
                Some(format!(
                    "Failed to deserialize application/problem+json ({err}) body: {body}"
                )),
            )
        })
    } else {
        Problem::new("httpReqError", Some(format!("{status} body: {body}")))
    };

    Err(problem)
}

pub(crate) fn req_expect_header(res: &reqwest::Response, name: &str) -> ReqResult<String> {
    res.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Problem::new(format!("Missing header: {name}"), None))
}

pub(crate) async fn req_safe_read_body(res: reqwest::Response) -> String {
    // letsencrypt sometimes closes the TLS abruptly causing io error
    // even though we did capture the body.
    res.text().await.unwrap_or_default()
}
