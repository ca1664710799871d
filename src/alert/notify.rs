/// Notification delivery for alert events.
///
/// The pipelines talk to a `Notifier` trait: destination list, subject,
/// body, optional attached raster. Delivery failure is returned as a plain
/// message for the caller to log as a warning — a broken mail relay must
/// never abort a run that has already computed and persisted valid state.

use std::fs;
use std::path::Path;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::logging::{self, DataSource};

pub trait Notifier {
    /// Sends one notification. `Err` carries a human-readable reason and
    /// is a warning, not a run failure.
    fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// SMTP delivery
// ---------------------------------------------------------------------------

/// Delivers alerts over authenticated SMTP with STARTTLS.
pub struct SmtpNotifier {
    pub host: String,
    pub from: String,
    pub username: String,
    pub password: String,
}

impl SmtpNotifier {
    fn build_message(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<Message, String> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| format!("bad sender address '{}': {}", self.from, e))?;
        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| format!("bad recipient address '{}': {}", recipient, e))?;
            builder = builder.to(to);
        }

        match attachment {
            None => builder
                .body(body.to_string())
                .map_err(|e| format!("cannot build message: {}", e)),
            Some(path) => {
                let bytes =
                    fs::read(path).map_err(|e| format!("cannot read attachment {}: {}", path.display(), e))?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("raster.asc")
                    .to_string();
                // The rasters we attach are ASCII grid documents.
                let content_type = ContentType::parse("text/plain")
                    .map_err(|e| format!("content type: {}", e))?;
                let part = Attachment::new(file_name).body(bytes, content_type);
                builder
                    .multipart(
                        MultiPart::mixed()
                            .singlepart(SinglePart::plain(body.to_string()))
                            .singlepart(part),
                    )
                    .map_err(|e| format!("cannot build message: {}", e))
            }
        }
    }
}

impl Notifier for SmtpNotifier {
    fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), String> {
        if recipients.is_empty() {
            return Err("no recipients configured".to_string());
        }
        let message = self.build_message(recipients, subject, body, attachment)?;
        let transport = SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| format!("cannot reach relay {}: {}", self.host, e))?
            .credentials(SmtpCredentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .build();
        transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| format!("delivery via {} failed: {}", self.host, e))
    }
}

// ---------------------------------------------------------------------------
// Log-only delivery
// ---------------------------------------------------------------------------

/// Stands in when SMTP is unconfigured (no credentials or recipients) and
/// during replay runs: the event is logged instead of mailed, so the rest
/// of the pipeline behaves identically.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
    ) -> Result<(), String> {
        logging::info(
            DataSource::Smtp,
            None,
            &format!(
                "notification (log only) to [{}]: {} — {}{}",
                recipients.join(", "),
                subject,
                body,
                attachment
                    .map(|p| format!(" (attachment {})", p.display()))
                    .unwrap_or_default()
            ),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpNotifier {
        SmtpNotifier {
            host: "smtp.example.org".to_string(),
            from: "alerts@example.org".to_string(),
            username: "alerts".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_message_builds_without_attachment() {
        let msg = smtp().build_message(
            &["ops@example.org".to_string()],
            "Rainfall alert",
            "threshold crossed",
            None,
        );
        assert!(msg.is_ok());
    }

    #[test]
    fn test_bad_recipient_is_a_delivery_problem_not_a_panic() {
        let err = smtp()
            .build_message(&["not an address".to_string()], "s", "b", None)
            .unwrap_err();
        assert!(err.contains("bad recipient"));
    }

    #[test]
    fn test_missing_attachment_file_reported() {
        let err = smtp()
            .build_message(
                &["ops@example.org".to_string()],
                "s",
                "b",
                Some(Path::new("/nonexistent/sum24.asc")),
            )
            .unwrap_err();
        assert!(err.contains("attachment"));
    }

    #[test]
    fn test_empty_recipient_list_is_refused() {
        let err = smtp().send(&[], "s", "b", None).unwrap_err();
        assert!(err.contains("no recipients"));
    }

    #[test]
    fn test_log_notifier_always_succeeds() {
        let result = LogNotifier.send(
            &["ops@example.org".to_string()],
            "Rainfall alert",
            "threshold crossed",
            None,
        );
        assert!(result.is_ok());
    }
}
