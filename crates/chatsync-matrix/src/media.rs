//! Media gateway: uploads and `mxc://` resolution.

use chatsync_core::{AdapterError, AdapterErrorCategory, Attachment, AttachmentKind, LocalMedia};
use tracing::debug;
use url::Url;

use crate::transport::MatrixTransport;

const MXC_SCHEME: &str = "mxc";

/// Resolves `mxc://` content URIs against a homeserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrls {
    homeserver: Url,
}

impl MediaUrls {
    pub fn new(homeserver: &str) -> Result<Self, AdapterError> {
        let homeserver = Url::parse(homeserver).map_err(|err| {
            AdapterError::new(
                AdapterErrorCategory::Config,
                "invalid_homeserver_url",
                format!("invalid homeserver URL '{homeserver}': {err}"),
            )
        })?;
        if homeserver.cannot_be_a_base() {
            return Err(AdapterError::new(
                AdapterErrorCategory::Config,
                "invalid_homeserver_url",
                format!("homeserver URL cannot be a base: {homeserver}"),
            ));
        }
        Ok(Self { homeserver })
    }

    /// HTTP download URL for `uri`.
    ///
    /// `http(s)` URLs pass through; malformed `mxc://` URIs resolve to `None`.
    pub fn resolve(&self, uri: &str) -> Option<String> {
        let parsed = Url::parse(uri).ok()?;
        match parsed.scheme() {
            "http" | "https" => Some(uri.to_owned()),
            MXC_SCHEME => {
                let server = parsed.host_str().filter(|host| !host.is_empty())?;
                let media_id = parsed.path().trim_start_matches('/');
                if media_id.is_empty() || media_id.contains('/') {
                    return None;
                }
                let mut resolved = self.homeserver.clone();
                resolved
                    .path_segments_mut()
                    .ok()?
                    .pop_if_empty()
                    .extend(["_matrix", "client", "v1", "media", "download", server, media_id]);
                Some(resolved.into())
            }
            _ => None,
        }
    }
}

/// Read a local file, upload it and describe the result as an attachment.
pub async fn upload_local_media<T>(transport: &T, media: &LocalMedia) -> Result<Attachment, AdapterError>
where
    T: MatrixTransport + ?Sized,
{
    let file_name = media.display_name();
    let bytes = tokio::fs::read(&media.path).await.map_err(|err| {
        AdapterError::new(
            AdapterErrorCategory::Storage,
            "media_read_failed",
            format!("failed to read {}: {err}", media.path.display()),
        )
    })?;
    let size = bytes.len() as u64;

    let url = transport
        .upload(bytes, &media.mime_type, &file_name)
        .await
        .map_err(AdapterError::from)?;
    debug!(file_name = %file_name, size, url = %url, "uploaded media");

    let mime_type = media.mime_type.clone();
    let attachment = match AttachmentKind::from_mime_type(&mime_type) {
        AttachmentKind::Image => Attachment::Image {
            url,
            size,
            mime_type,
            width: media.width,
            height: media.height,
            file_name: Some(file_name),
        },
        AttachmentKind::Video => Attachment::Video {
            url,
            size,
            mime_type,
            width: media.width,
            height: media.height,
            duration_ms: media.duration_ms,
            file_name: Some(file_name),
        },
        AttachmentKind::Audio => Attachment::Audio {
            url,
            size,
            mime_type,
            duration_ms: media.duration_ms,
            file_name: Some(file_name),
        },
        AttachmentKind::File => Attachment::File {
            url,
            size,
            mime_type,
            file_name,
        },
    };
    Ok(attachment)
}
