//! The render pipeline: navigate, wait for the page to stabilize, print.
//!
//! Navigation waits for the load lifecycle, not for network idle; content
//! fetched after load is covered by the DOM readiness probe, which is bounded
//! by `SETTLE_DELAY_MS`. Pages that keep loading via late XHR may need that
//! budget raised.

use std::time::Duration;

use anyhow::{Result, bail};
use axum::{
    Json,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chromiumoxide::{
    Page,
    cdp::browser_protocol::{
        emulation::SetEmulatedMediaParams,
        page::{PrintToPdfParams, PrintToPdfParamsBuilder},
    },
};
use serde::{Deserialize, Deserializer};
use tokio::time::Instant;

use crate::AppState;
use crate::cnfg::AppConfig;
use crate::error::PdfError;

// CDP takes paper sizes and margins in inches; the templates and config speak
// CSS pixels, converted at the usual 96px/in.
const PX_PER_INCH: f64 = 96.0;
const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;
const MARGIN_PX: f64 = 20.0;

const READY_POLL_INTERVAL_MS: u64 = 100;

#[derive(Deserialize)]
pub struct GeneratePdfRequest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, rename = "proposalCode", deserialize_with = "lenient_string")]
    pub proposal_code: Option<String>,
    #[serde(default, rename = "clientName", deserialize_with = "lenient_string")]
    pub client_name: Option<String>,
}

// A field of the wrong JSON type counts as absent rather than bubbling up as
// a framework deserialization error, so `{"url": 42}` still gets the 400.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_owned)))
}

pub async fn generate_pdf(
    State(state): State<AppState>,
    Json(request): Json<GeneratePdfRequest>,
) -> Result<Response, PdfError> {
    let url = request
        .url
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(str::to_owned)
        .ok_or(PdfError::UrlRequired)?;

    tracing::info!(url = %url, "generating PDF");

    let session = state.pool.open_session().await?;
    let rendered = render_pdf(session.page(), &url, &request, &state.config).await;
    session.close().await;

    let bytes = rendered?;
    tracing::info!(url = %url, size = bytes.len(), "PDF generated");

    Ok(pdf_response(bytes))
}

async fn render_pdf(
    page: &Page,
    url: &str,
    request: &GeneratePdfRequest,
    config: &AppConfig,
) -> Result<Vec<u8>> {
    let timeout = Duration::from_millis(config.navigation_timeout_ms);
    tokio::time::timeout(timeout, async {
        page.goto(url).await?;
        page.wait_for_navigation().await?;
        anyhow::Ok(())
    })
    .await
    .map_err(|_| {
        anyhow::anyhow!(
            "navigation to {url} timed out after {}ms",
            config.navigation_timeout_ms
        )
    })??;

    // Print-media styling applies to the capture, not the on-screen layout.
    page.execute(SetEmulatedMediaParams::builder().media("print").build())
        .await?;

    wait_for_render_ready(page, config.settle_delay_ms).await;

    let bytes = page.pdf(pdf_params(request, config.header_height_px)).await?;
    validate_pdf(bytes, url)
}

// The engine can report success and still hand back nothing (e.g. a tab torn
// down mid-export); an empty document must never reach the client as a 200.
fn validate_pdf(bytes: Vec<u8>, url: &str) -> Result<Vec<u8>> {
    if bytes.is_empty() {
        bail!("browser returned an empty PDF for {url}");
    }
    Ok(bytes)
}

const READY_PROBE_JS: &str = r#"
(() => {
    if (!document.body) return false;
    if (document.readyState !== "complete") return false;
    if (document.fonts && document.fonts.status !== "loaded") return false;
    return Array.from(document.images).every((img) => img.complete);
})()
"#;

/// Polls the page until fonts and images report loaded, bounded by the settle
/// budget. The capture proceeds either way once the budget is spent.
async fn wait_for_render_ready(page: &Page, budget_ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(budget_ms);

    loop {
        let ready = match page.evaluate(READY_PROBE_JS).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(err) => {
                tracing::debug!("readiness probe failed: {err}");
                false
            }
        };

        if ready {
            return;
        }
        if Instant::now() >= deadline {
            tracing::debug!("settle budget spent before page reported ready");
            return;
        }

        tokio::time::sleep(Duration::from_millis(READY_POLL_INTERVAL_MS)).await;
    }
}

fn pdf_params(request: &GeneratePdfRequest, header_height_px: u32) -> PrintToPdfParams {
    let header_height = f64::from(header_height_px);

    PrintToPdfParamsBuilder::default()
        .paper_width(A4_WIDTH_IN)
        .paper_height(A4_HEIGHT_IN)
        .print_background(true)
        .display_header_footer(true)
        .header_template(header_template(
            request.proposal_code.as_deref().unwrap_or(""),
            request.client_name.as_deref().unwrap_or(""),
            header_height_px,
        ))
        .footer_template(FOOTER_TEMPLATE)
        .margin_top(header_height / PX_PER_INCH)
        .margin_bottom(MARGIN_PX / PX_PER_INCH)
        .margin_left(MARGIN_PX / PX_PER_INCH)
        .margin_right(MARGIN_PX / PX_PER_INCH)
        .build()
}

fn header_template(proposal_code: &str, client_name: &str, height_px: u32) -> String {
    format!(
        r#"<div style="width:100%; height:{height_px}px; padding:20px; box-sizing:border-box; font-size:10px; font-family: Arial, sans-serif;">
  <div style="font-size:14px; font-weight:bold;">Proposal code: {proposal_code} - {client_name}</div>
</div>"#
    )
}

const FOOTER_TEMPLATE: &str = r#"<div style="width:100%; font-size:8px; text-align:center; padding:5px;">
  Page <span class="pageNumber"></span> of <span class="totalPages"></span>
</div>"#;

fn pdf_response(bytes: Vec<u8>) -> Response {
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/pdf"),
        ),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=proposal.pdf"),
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(bytes.len())),
    ];

    (StatusCode::OK, headers, bytes).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GeneratePdfRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn absent_url_deserializes_as_none() {
        let request = parse(json!({}));
        assert_eq!(request.url, None);
    }

    #[test]
    fn null_and_non_string_urls_deserialize_as_none() {
        assert_eq!(parse(json!({ "url": null })).url, None);
        assert_eq!(parse(json!({ "url": 42 })).url, None);
        assert_eq!(parse(json!({ "url": ["https://a"] })).url, None);
    }

    #[test]
    fn full_payload_deserializes() {
        let request = parse(json!({
            "url": "https://example.com/proposal",
            "proposalCode": "P-2024-017",
            "clientName": "Acme Corp",
        }));
        assert_eq!(request.url.as_deref(), Some("https://example.com/proposal"));
        assert_eq!(request.proposal_code.as_deref(), Some("P-2024-017"));
        assert_eq!(request.client_name.as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn header_interpolates_code_and_client() {
        let html = header_template("P-2024-017", "Acme Corp", 80);
        assert!(html.contains("Proposal code: P-2024-017 - Acme Corp"));
        assert!(html.contains("height:80px"));
    }

    #[test]
    fn header_never_renders_undefined_or_null() {
        let request = parse(json!({ "url": "https://example.com" }));
        let html = header_template(
            request.proposal_code.as_deref().unwrap_or(""),
            request.client_name.as_deref().unwrap_or(""),
            80,
        );
        assert!(html.contains("Proposal code:  - "));
        assert!(!html.contains("undefined"));
        assert!(!html.contains("null"));
    }

    #[test]
    fn footer_uses_engine_page_counters() {
        assert!(FOOTER_TEMPLATE.contains(r#"<span class="pageNumber">"#));
        assert!(FOOTER_TEMPLATE.contains(r#"<span class="totalPages">"#));
    }

    #[test]
    fn pdf_params_match_a4_with_header_margins() {
        let request = parse(json!({ "url": "https://example.com" }));
        let params = pdf_params(&request, 80);

        assert_eq!(params.paper_width, Some(A4_WIDTH_IN));
        assert_eq!(params.paper_height, Some(A4_HEIGHT_IN));
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.display_header_footer, Some(true));
        assert!((params.margin_top.unwrap() - 80.0 / 96.0).abs() < 1e-9);
        assert!((params.margin_bottom.unwrap() - 20.0 / 96.0).abs() < 1e-9);
        assert!((params.margin_left.unwrap() - 20.0 / 96.0).abs() < 1e-9);
        assert!((params.margin_right.unwrap() - 20.0 / 96.0).abs() < 1e-9);
    }

    #[test]
    fn empty_export_output_is_a_failure() {
        assert!(validate_pdf(Vec::new(), "https://example.com").is_err());
    }

    #[test]
    fn non_empty_export_output_passes_through() {
        let bytes = b"%PDF-1.7 fake".to_vec();
        assert_eq!(
            validate_pdf(bytes.clone(), "https://example.com").unwrap(),
            bytes
        );
    }

    #[test]
    fn pdf_response_sets_download_headers() {
        let bytes = b"%PDF-1.7 fake".to_vec();
        let response = pdf_response(bytes.clone());

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION.as_str()],
            "attachment; filename=proposal.pdf"
        );
        assert_eq!(
            headers[header::CONTENT_LENGTH.as_str()],
            bytes.len().to_string().as_str()
        );
    }
}
