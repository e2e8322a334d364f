use super::{InputTransformer, TransformContext, TransformError};
use crate::message::{Message, Part, Role};
use async_trait::async_trait;

/// Inlines attached documents as text for the model
pub struct DocumentAsPrompt;

fn local_path(url: &str) -> &str {
    url.strip_prefix("file://").unwrap_or(url)
}

fn render(name: &str, content: &str) -> String {
    format!("## user sent a file: {name}\n<content>\n```\n{content}\n```\n</content>\n")
}

#[async_trait]
impl InputTransformer for DocumentAsPrompt {
    fn name(&self) -> &'static str {
        "document_as_prompt"
    }

    async fn transform(
        &self,
        _ctx: &TransformContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, TransformError> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role != Role::User
                || !message.parts.iter().any(|p| matches!(p, Part::Document { .. }))
            {
                out.push(message);
                continue;
            }
            let mut documents = Vec::new();
            let mut rest = Vec::new();
            for part in &message.parts {
                match part {
                    Part::Document { url, name, .. } => {
                        let content = tokio::fs::read_to_string(local_path(url))
                            .await
                            .map_err(|e| TransformError::new(self.name(), format!("{name}: {e}")))?;
                        documents.push(Part::text(render(name, &content)));
                    }
                    other => rest.push(other.clone()),
                }
            }
            documents.extend(rest);
            out.push(Message {
                parts: documents,
                ..message
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::test_support::plain_context;
    use std::io::Write;

    #[tokio::test]
    async fn test_document_prepended_as_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "line one").unwrap();
        let url = format!("file://{}", file.path().display());
        let message = Message::new(
            Role::User,
            vec![Part::text("summarize"), Part::document(url, "notes.txt", "text/plain")],
        );

        let out = DocumentAsPrompt
            .transform(&plain_context(), vec![message])
            .await
            .unwrap();
        assert_eq!(out[0].parts.len(), 2);
        let text = out[0].to_text();
        assert!(text.starts_with("## user sent a file: notes.txt"));
        assert!(text.contains("line one"));
        assert!(text.ends_with("summarize"));
    }

    #[tokio::test]
    async fn test_unreadable_document_fails() {
        let message = Message::new(
            Role::User,
            vec![Part::document("/nonexistent/threadline.txt", "gone.txt", "text/plain")],
        );
        let err = DocumentAsPrompt
            .transform(&plain_context(), vec![message])
            .await
            .unwrap_err();
        assert_eq!(err.transformer, "document_as_prompt");
        assert!(err.message.contains("gone.txt"));
    }
}
