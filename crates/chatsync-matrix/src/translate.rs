//! Translation between Matrix event content and core messages.

use chatsync_core::{
    Attachment, AttachmentKind, EventOrigin, IncomingEvent, Message, MessageStatus,
};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::events::{MediaContent, MediaInfo, MessageContent, ROOM_MESSAGE, RawTimelineEvent, STICKER};

/// Content key carrying every attachment of a multi-attachment message.
pub const ATTACHMENTS_KEY: &str = "dev.chatsync.attachments";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Translate a room event into a message; `None` for anything that is not displayable.
pub fn message_from_event(event: &RawTimelineEvent) -> Option<Message> {
    if event.is_redacted() || event.is_state() {
        return None;
    }
    let id = event
        .event_id
        .clone()
        .or_else(|| event.unsigned.transaction_id.clone())?;

    let content: MessageContent = match serde_json::from_value(event.content.clone()) {
        Ok(content) => content,
        Err(err) => {
            debug!(event_id = %id, error = %err, "undecodable message content");
            return None;
        }
    };

    let (text, attachments) = match event.event_type.as_str() {
        ROOM_MESSAGE => message_body(content)?,
        STICKER => {
            let sticker = MediaContent {
                msgtype: "m.image".to_owned(),
                body: content.body.unwrap_or_default(),
                url: content.url?,
                filename: content.filename,
                info: content.info.unwrap_or_default(),
            };
            (None, vec![attachment_from_media(&sticker)])
        }
        _ => return None,
    };

    Some(Message {
        id,
        sender_id: event.sender.clone(),
        status: MessageStatus::Sent,
        timestamp_ms: event.origin_server_ts,
        text,
        attachments,
    })
}

/// Wrap a room event as a classifier input.
pub fn incoming_event(
    room_id: &str,
    event: &RawTimelineEvent,
    origin: EventOrigin,
    local_status: Option<MessageStatus>,
) -> IncomingEvent {
    IncomingEvent {
        room_id: room_id.to_owned(),
        event_id: event.event_id.clone(),
        sender_id: event.sender.clone(),
        origin,
        local_status,
        timestamp_ms: event.origin_server_ts,
        message: message_from_event(event),
    }
}

fn message_body(content: MessageContent) -> Option<(Option<String>, Vec<Attachment>)> {
    let msgtype = content.msgtype.clone()?;
    match msgtype.as_str() {
        "m.image" | "m.video" | "m.audio" | "m.file" => {
            let caption = caption(content.body.as_deref(), content.filename.as_deref());
            let attachments = if content.attachments.is_empty() {
                let single = MediaContent {
                    msgtype: msgtype.clone(),
                    body: content.body.unwrap_or_default(),
                    url: content.url?,
                    filename: content.filename,
                    info: content.info.unwrap_or_default(),
                };
                vec![attachment_from_media(&single)]
            } else {
                content.attachments.iter().map(attachment_from_media).collect()
            };
            Some((caption, attachments))
        }
        // m.text, m.notice, m.emote and unknown msgtypes with a body
        _ => content.body.map(|body| (Some(body), Vec::new())),
    }
}

/// A media `body` that differs from `filename` is a caption.
fn caption(body: Option<&str>, filename: Option<&str>) -> Option<String> {
    let (body, filename) = (body?, filename?);
    (body != filename && !body.trim().is_empty()).then(|| body.to_owned())
}

fn attachment_from_media(media: &MediaContent) -> Attachment {
    let MediaInfo {
        size,
        mimetype,
        w,
        h,
        duration,
    } = media.info.clone();
    let url = media.url.clone();
    let size = size.unwrap_or(0);
    let mime_type = mimetype.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_owned());
    let file_name = media
        .filename
        .clone()
        .or_else(|| Some(media.body.clone()).filter(|body| !body.is_empty()));

    let kind = match media.msgtype.as_str() {
        "m.image" => AttachmentKind::Image,
        "m.video" => AttachmentKind::Video,
        "m.audio" => AttachmentKind::Audio,
        "m.file" => AttachmentKind::File,
        _ => AttachmentKind::from_mime_type(&mime_type),
    };

    match kind {
        AttachmentKind::Image => Attachment::Image {
            url,
            size,
            mime_type,
            width: w,
            height: h,
            file_name,
        },
        AttachmentKind::Video => Attachment::Video {
            url,
            size,
            mime_type,
            width: w,
            height: h,
            duration_ms: duration,
            file_name,
        },
        AttachmentKind::Audio => Attachment::Audio {
            url,
            size,
            mime_type,
            duration_ms: duration,
            file_name,
        },
        AttachmentKind::File => Attachment::File {
            url,
            size,
            mime_type,
            file_name: file_name.unwrap_or_else(|| "file".to_owned()),
        },
    }
}

fn msgtype_for(kind: AttachmentKind) -> &'static str {
    match kind {
        AttachmentKind::Image => "m.image",
        AttachmentKind::Video => "m.video",
        AttachmentKind::Audio => "m.audio",
        AttachmentKind::File => "m.file",
    }
}

fn media_content(attachment: &Attachment) -> MediaContent {
    let kind = attachment.kind();
    let file_name = attachment
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| msgtype_for(kind).trim_start_matches("m.").to_owned());
    let mut info = MediaInfo {
        size: Some(attachment.size()),
        mimetype: Some(attachment.mime_type().to_owned()),
        ..MediaInfo::default()
    };
    match attachment {
        Attachment::Image { width, height, .. } => {
            info.w = *width;
            info.h = *height;
        }
        Attachment::Video {
            width,
            height,
            duration_ms,
            ..
        } => {
            info.w = *width;
            info.h = *height;
            info.duration = *duration_ms;
        }
        Attachment::Audio { duration_ms, .. } => info.duration = *duration_ms,
        Attachment::File { .. } => {}
    }

    MediaContent {
        msgtype: msgtype_for(kind).to_owned(),
        body: file_name.clone(),
        url: attachment.url().to_owned(),
        filename: Some(file_name),
        info,
    }
}

fn media_json(media: &MediaContent) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("msgtype".into(), json!(media.msgtype));
    map.insert("body".into(), json!(media.body));
    map.insert("url".into(), json!(media.url));
    if let Some(filename) = &media.filename {
        map.insert("filename".into(), json!(filename));
    }

    let mut info = Map::new();
    let fields = [
        ("size", media.info.size.map(Value::from)),
        ("mimetype", media.info.mimetype.clone().map(Value::from)),
        ("w", media.info.w.map(Value::from)),
        ("h", media.info.h.map(Value::from)),
        ("duration", media.info.duration.map(Value::from)),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            info.insert(key.into(), value);
        }
    }
    map.insert("info".into(), Value::Object(info));
    map
}

/// Build outgoing `m.room.message` content for a caption and attachment set.
///
/// The first attachment is encoded as the standard media msgtype so other clients
/// render it; with more than one, the full list goes under [`ATTACHMENTS_KEY`].
pub fn message_content(text: Option<&str>, attachments: &[Attachment]) -> Value {
    let Some(first) = attachments.first() else {
        return json!({
            "msgtype": "m.text",
            "body": text.unwrap_or_default(),
        });
    };

    let mut primary = media_content(first);
    if let Some(caption) = text.filter(|caption| !caption.trim().is_empty()) {
        primary.body = caption.to_owned();
    }
    let mut content = media_json(&primary);

    if attachments.len() > 1 {
        let all: Vec<Value> = attachments
            .iter()
            .map(|attachment| Value::Object(media_json(&media_content(attachment))))
            .collect();
        content.insert(ATTACHMENTS_KEY.into(), Value::Array(all));
    }
    Value::Object(content)
}
