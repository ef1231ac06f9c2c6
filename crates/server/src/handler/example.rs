//! Example application: computes the natural logarithm of `x`.
//!
//! Enter an invalid or non-positive `x` to see the failure logged.

use axum::body::Body;
use axum::extract::Query;
use axum::http::{Request, Response, StatusCode, header};
use serde::Deserialize;

const TEMPLATE: &str = r#"
<form>
    <p>ln <input name="x" value="{x}"> = {y}</p>
    <p><input type="submit" value="Compute"></p>
</form>
"#;

#[derive(Debug, thiserror::Error)]
pub enum ExampleError {
    #[error("invalid query string: {0}")]
    Query(String),

    #[error("could not convert {0:?} to float")]
    NotANumber(String),

    #[error("math domain error: ln({0})")]
    Domain(f64),
}

#[derive(Debug, Deserialize)]
struct Params {
    x: Option<String>,
}

pub async fn example_app(request: Request<Body>) -> Result<Response<Body>, ExampleError> {
    let (status, body) = match request.uri().path() {
        "/" => (StatusCode::OK, compute(&request)?),
        _ => (StatusCode::NOT_FOUND, "404 Not Found".to_string()),
    };

    let body = body.into_bytes();
    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .map_err(|e| ExampleError::Query(e.to_string()))?;
    Ok(response)
}

fn compute(request: &Request<Body>) -> Result<String, ExampleError> {
    let Query(params) = Query::<Params>::try_from_uri(request.uri())
        .map_err(|e| ExampleError::Query(e.body_text()))?;
    let x = match params.x {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| ExampleError::NotANumber(raw.clone()))?,
        None => 1.0,
    };
    if x <= 0.0 || x.is_nan() {
        return Err(ExampleError::Domain(x));
    }
    let y = x.ln();
    tracing::info!(target: "example", "ln {x} = {y}");

    Ok(TEMPLATE
        .replace("{x}", &format!("{x:.2}"))
        .replace("{y}", &format!("{y:.2}")))
}
