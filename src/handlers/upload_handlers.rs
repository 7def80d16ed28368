//! Upload form and upload endpoint.
//!
//! - GET  /        -> HTML form
//! - POST /upload  -> multipart (`course`, `file`), 302 to the public URL

use crate::{
    errors::TransitError,
    services::{AppState, upload_service::FormFile},
};
use axum::{
    extract::{Multipart, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::io;
use tracing::info;

const UPLOAD_FORM_HTML: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>File Transit Storage</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style type="text/css">
     body { margin: 40px auto; max-width: 650px; line-height: 1.6; font: 18px sans-serif; color: #444; padding: 0 10px }
     h1, h2, h3 { line-height: 1.2 }
    </style>
  </head>
  <body>
    <h1>For all your file transit needs</h1>
    <form method="POST" action="/upload" enctype="multipart/form-data">
      Course: <input type="text" name="course" /> <br/>
      Upload File: <input type="file" name="file" /> <br />
      <input type="submit" name="submit" value="Let's Rock and Roll" />
    </form>
  </body>
</html>"#;

/// Optional query fallback for clients that send `file` before `course`.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub course: Option<String>,
}

/// `GET /`
pub async fn upload_form() -> Html<&'static str> {
    Html(UPLOAD_FORM_HTML)
}

/// `POST /upload`
///
/// The file is streamed into the store as soon as its field arrives, so the
/// namespace must already be known: a `course` field sent before `file`
/// wins, then `?course=`. Fields after `file` are ignored.
pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Response, TransitError> {
    let mut course = query.course.unwrap_or_default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| TransitError::MalformedForm(err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("course") => {
                course = field
                    .text()
                    .await
                    .map_err(|err| TransitError::MalformedForm(err.body_text()))?;
            }
            Some("file") => {
                let file = FormFile {
                    file_name: field.file_name().map(str::to_string),
                    body: field.map_err(io::Error::other).boxed(),
                };
                let receipt = state.uploads.upload(file, &course).await?;
                info!(
                    bucket = %receipt.bucket,
                    key = %receipt.key,
                    namespace = %receipt.key.namespace,
                    size_bytes = receipt.object.size_bytes,
                    "stored upload"
                );
                return Ok((StatusCode::FOUND, [(header::LOCATION, receipt.url)]).into_response());
            }
            _ => {}
        }
    }

    Err(TransitError::NoFileProvided)
}
