use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failure taxonomy for the render endpoint. Clients only ever see the three
/// fixed messages below; render-path detail stays in the server logs.
#[derive(Debug)]
pub enum PdfError {
    /// Request body carried no usable `url`.
    UrlRequired,
    /// The shared browser instance never launched (or is gone).
    BrowserNotReady,
    /// Anything that went wrong between opening a tab and producing bytes.
    Render(anyhow::Error),
}

impl IntoResponse for PdfError {
    fn into_response(self) -> Response {
        match self {
            PdfError::UrlRequired => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": "URL required" }))).into_response()
            }
            PdfError::BrowserNotReady => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Browser not ready" })),
            )
                .into_response(),
            PdfError::Render(err) => {
                tracing::error!("PDF generation error: {err:#}");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "PDF generation failed" })),
                )
                    .into_response()
            }
        }
    }
}

// This enables using `?` on functions that return `Result<_, anyhow::Error>` to turn them into
// `Result<_, PdfError>`. That way you don't need to do that manually.
impl<E> From<E> for PdfError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Render(err.into())
    }
}
