use super::{OutputTransformer, TransformContext, TransformError};
use crate::message::{Message, Part, Role};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Moves inline `data:image/...;base64,` images in model output to the
/// conversation's file store.
pub struct Base64ImageToLocalFile;

/// `(extension, payload)` of a base64 image data URL
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:image/")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    let extension = match mime {
        "jpeg" => "jpg",
        "svg+xml" => "svg",
        other => other,
    };
    Some((extension, payload))
}

#[async_trait]
impl OutputTransformer for Base64ImageToLocalFile {
    fn name(&self) -> &'static str {
        "base64_image_to_local_file"
    }

    async fn transform(
        &self,
        ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role != Role::Assistant {
                out.push(message);
                continue;
            }
            let mut parts = Vec::with_capacity(message.parts.len());
            for part in &message.parts {
                let Part::Image { url } = part else {
                    parts.push(part.clone());
                    continue;
                };
                let Some((extension, payload)) = parse_data_url(url) else {
                    parts.push(part.clone());
                    continue;
                };
                let bytes = STANDARD
                    .decode(payload.trim())
                    .map_err(|e| TransformError::new(self.name(), e.to_string()))?;
                let path = ctx
                    .files
                    .save(ctx.conversation_id, &bytes, extension)
                    .await
                    .map_err(|e| TransformError::new(self.name(), e.to_string()))?;
                parts.push(Part::image(path));
            }
            out.push(Message { parts, ..message });
        }
        Ok(out)
    }
}
