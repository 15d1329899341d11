//! Serves the static API description. Loaded once at startup; when the file
//! is missing or unusable the routes are simply not mounted.

use std::{path::Path, sync::Arc};

use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum DocsError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("api description must be a mapping at the top level")]
    NotAMapping,
    #[error("api description is empty")]
    Empty,
}

/// Parsed API description, kept as pre-rendered JSON.
#[derive(Debug)]
pub struct ApiDocs {
    json: String,
}

impl ApiDocs {
    pub fn from_yaml(src: &str) -> Result<Self, DocsError> {
        let doc: serde_json::Value = serde_yaml::from_str(src)?;
        match doc.as_object() {
            None => Err(DocsError::NotAMapping),
            Some(map) if map.is_empty() => Err(DocsError::Empty),
            Some(_) => Ok(Self {
                json: serde_json::to_string(&doc)?,
            }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, DocsError> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml(&src)
    }

    /// Never fails: problems are logged and the docs stay disabled.
    pub fn load(path: &Path) -> Option<Arc<Self>> {
        match Self::from_file(path) {
            Ok(docs) => {
                info!(path = %path.display(), "api docs loaded");
                Some(Arc::new(docs))
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "api description not found or invalid; /api-docs disabled"
                );
                None
            }
        }
    }

    pub fn json(&self) -> &str {
        &self.json
    }
}

const UI_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>API documentation</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js" crossorigin></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: "/swagger.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>
"##;

/// Mounts `/api-docs` and `/swagger.json` only when a description is loaded.
pub fn router(docs: Option<&Arc<ApiDocs>>) -> Router<AppState> {
    if docs.is_none() {
        return Router::new();
    }
    Router::new()
        .route("/api-docs", get(ui))
        .route("/swagger.json", get(raw))
}

async fn ui() -> Html<&'static str> {
    Html(UI_PAGE)
}

async fn raw(State(state): State<AppState>) -> impl IntoResponse {
    // the route only exists when docs are present
    let body = state
        .docs
        .as_ref()
        .map(|d| d.json().to_string())
        .unwrap_or_else(|| "{}".to_string());
    ([(header::CONTENT_TYPE, "application/json")], body)
}
