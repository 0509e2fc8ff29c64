use axum::extract::{Path, Query, State};
use axum::response::Html;

use super::error::StreamError;
use super::stream::{resolve_media, MediaQuery};
use crate::upstream::FileHandle;
use crate::AppState;

/// HTML player page for a media path. Resolves and verifies like the stream route, but never
/// reads file contents.
pub(crate) async fn handle(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Html<String>, StreamError> {
    let (_checkout, file) = resolve_media(&state, &path, query).await?;
    Ok(Html(render_page(&file)))
}

fn render_page(file: &FileHandle) -> String {
    let src = format!("/{}{}", file.token(), file.message_id);
    let title = html_escape(
        file.file_name
            .as_deref()
            .unwrap_or("media"),
    );
    let src = html_escape(&src);
    let mime_type = file.mime_type.as_deref().unwrap_or_default();
    let mime_attr = html_escape(mime_type);

    let player = if mime_type.starts_with("video/") {
        format!(r#"<video src="{src}" type="{mime_attr}" controls autoplay playsinline></video>"#)
    } else if mime_type.starts_with("audio/") {
        format!(r#"<audio src="{src}" type="{mime_attr}" controls autoplay></audio>"#)
    } else {
        format!(r#"<a href="{src}" download>Download {title}</a>"#)
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<h1>{title}</h1>
{player}
<p><a href="{src}">Direct link</a></p>
</body>
</html>
"#
    )
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
