use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    response::{Html, Redirect},
    routing::{get, post},
    Router,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    models::{ShareFile, SharePayload},
    AppState,
};

/// Reserved share-intake path, matched exactly by the router.
pub const SHARE_PATH: &str = "/share";
/// The add-transaction screen the browser is redirected to.
pub const INTAKE_PATH: &str = "/add";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(SHARE_PATH, post(intercept_share))
        .route(INTAKE_PATH, get(intake_screen))
}

/// Intercepts a Web Share Target POST: extracts the multipart payload,
/// stores it under a fresh share id and answers with a 303 so the browser
/// issues a clean GET to the intake screen instead of resubmitting.
///
/// Nothing here may block the user from reaching the app: every failure
/// degrades to a redirect without a share id.
async fn intercept_share(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Redirect {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            warn!("Rejected share request body: {}", e);
            return Redirect::to(INTAKE_PATH);
        }
    };

    match consume_share(&state, multipart).await {
        Ok(share_id) => {
            info!("Intercepted share {}", share_id);
            Redirect::to(&format!("{}?shareId={}", INTAKE_PATH, share_id))
        }
        Err(e) => {
            warn!("Share interception failed: {}", e);
            Redirect::to(INTAKE_PATH)
        }
    }
}

async fn consume_share(state: &AppState, mut multipart: Multipart) -> anyhow::Result<String> {
    let mut payload = SharePayload::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => payload.title = non_empty(field.text().await?),
            "text" => payload.text = non_empty(field.text().await?),
            "url" => payload.shared_url = non_empty(field.text().await?),
            "images" => {
                let file_name = field.file_name().unwrap_or("shared-file").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                // The full binary content has to be captured here; the
                // request body is gone once this handler returns.
                let data = field.bytes().await?.to_vec();
                payload.files.push(ShareFile {
                    name: file_name,
                    mime,
                    size: data.len() as i64,
                    data,
                });
            }
            other => debug!("Ignoring unexpected share field {:?}", other),
        }
    }

    let share_id = Uuid::new_v4().to_string();
    let record = state.store.save(&share_id, payload).await?;

    // The redirect only exists after save has resolved, so the pull path
    // is already valid. Any page open right now also hears about it
    // directly; if none is, the store copy waits for the round trip.
    state.relay.push_shared_data(record);

    Ok(share_id)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Placeholder for the add-transaction screen. The real UI lives in the
/// PWA; the redirect target still has to resolve.
async fn intake_screen() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Add Transaction</title>
</head>
<body>
    <main id="intake">Loading shared data…</main>
</body>
</html>"#,
    )
}
