use std::future::Future;
use std::path::Path;
use std::time::Duration;

use lettre::{
    message::{header::{ContentType, ContentTypeErr}, Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        response::{Category, Code, Detail, Severity},
        Error as SmtpError,
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};

use crate::{attach::Attachment, render::RenderedEmail, MergeError, Result};

/// Encryption mode for an SMTP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    None,
    StartTls,
    Tls,
}

/// Named SMTP send profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpProfile {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    /// RFC 5322 from address used for all sent messages.
    pub from: String,
}

/// SMTP account credentials retrieved from the OS keychain.
#[derive(Debug, Clone, Default)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

/// One rendered row plus its resolved attachments.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub email: RenderedEmail,
    pub attachments: Vec<Attachment>,
}

/// Mail transport collaborator.
///
/// A failed send is returned as an error carrying a readable reason; the
/// caller decides what that means for the row.
pub trait Mailer {
    fn send(&self, mail: &OutgoingMail) -> impl Future<Output = Result<()>> + Send;
}

/// Serialize `profiles` to a pretty-printed JSON file at `path` (creates or overwrites).
pub fn save_profiles(profiles: &[SmtpProfile], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| MergeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::to_writer_pretty(file, profiles).map_err(|e| MergeError::ProfileJson {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Deserialize profiles from a JSON file at `path`.
pub fn load_profiles(path: &Path) -> Result<Vec<SmtpProfile>> {
    let file = std::fs::File::open(path).map_err(|e| MergeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_reader(file).map_err(|e| MergeError::ProfileJson {
        path: path.to_path_buf(),
        source: e,
    })
}

const KEYRING_SERVICE: &str = "sheetmerge";

/// Store SMTP credentials in the OS keychain for `profile_name`.
///
/// Both `username` and `password` are stored in a single keyring entry,
/// separated by a newline.
pub fn store_credential(profile_name: &str, username: &str, password: &str) -> Result<()> {
    let entry =
        keyring::Entry::new(KEYRING_SERVICE, profile_name).map_err(|e| MergeError::Keyring {
            reason: e.to_string(),
        })?;
    let value = format!("{username}\n{password}");
    entry
        .set_password(&value)
        .map_err(|e| MergeError::Keyring {
            reason: e.to_string(),
        })
}

/// Retrieve SMTP credentials from the OS keychain for `profile_name`.
pub fn retrieve_credential(profile_name: &str) -> Result<SmtpCredentials> {
    let entry =
        keyring::Entry::new(KEYRING_SERVICE, profile_name).map_err(|e| MergeError::Keyring {
            reason: e.to_string(),
        })?;
    let value = entry.get_password().map_err(|e| MergeError::Keyring {
        reason: e.to_string(),
    })?;
    let (username, password) = value
        .split_once('\n')
        .ok_or_else(|| MergeError::Keyring {
            reason: format!("malformed credential entry for profile '{profile_name}'"),
        })?;
    Ok(SmtpCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Remove SMTP credentials from the OS keychain for `profile_name`.
pub fn delete_credential(profile_name: &str) -> Result<()> {
    let entry =
        keyring::Entry::new(KEYRING_SERVICE, profile_name).map_err(|e| MergeError::Keyring {
            reason: e.to_string(),
        })?;
    entry
        .delete_credential()
        .map_err(|e| MergeError::Keyring {
            reason: e.to_string(),
        })
}

/// Open an SMTP connection and verify the server is reachable (no message sent).
pub async fn test_connection(profile: &SmtpProfile, credentials: &SmtpCredentials) -> Result<()> {
    let transport = build_transport(profile, credentials)?;
    transport
        .test_connection()
        .await
        .map_err(|e| MergeError::SmtpConnect {
            reason: e.to_string(),
        })?;
    Ok(())
}

/// [`Mailer`] over an SMTP relay.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(profile: &SmtpProfile, credentials: &SmtpCredentials) -> Result<Self> {
        Ok(Self {
            transport: build_transport(profile, credentials)?,
            from: profile.from.clone(),
        })
    }
}

impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let message = build_message(mail, &self.from)?;
        send_with_retry(&self.transport, message)
            .await
            .map_err(|e| MergeError::SmtpSend {
                recipient: mail.email.to.clone(),
                reason: e.to_string(),
            })
    }
}

/// Build a lettre async SMTP transport from the given profile and credentials.
///
/// An empty username means an unauthenticated relay.
fn build_transport(
    profile: &SmtpProfile,
    credentials: &SmtpCredentials,
) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let connect_err = |e: SmtpError| MergeError::SmtpConnect {
        reason: e.to_string(),
    };
    let mut builder = match profile.encryption {
        Encryption::Tls => {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&profile.host).map_err(connect_err)?
        }
        Encryption::StartTls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&profile.host)
                .map_err(connect_err)?
        }
        Encryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&profile.host),
    }
    .port(profile.port);
    if !credentials.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            credentials.username.clone(),
            credentials.password.clone(),
        ));
    }
    Ok(builder.build())
}

/// Build a lettre [`Message`] from an [`OutgoingMail`] and a from-address.
///
/// Produces `multipart/alternative` when an HTML body is present, plain text
/// otherwise. Attachments are wrapped in an outer `multipart/mixed`.
fn build_message(mail: &OutgoingMail, from: &str) -> Result<Message> {
    let email = &mail.email;
    let send_err = |reason: String| MergeError::SmtpSend {
        recipient: email.to.clone(),
        reason,
    };

    let from_mbox = from
        .parse::<Mailbox>()
        .map_err(|e| send_err(format!("invalid from address '{from}': {e}")))?;
    let to_mbox = email
        .to
        .parse::<Mailbox>()
        .map_err(|e| send_err(format!("invalid to address '{}': {e}", email.to)))?;

    let builder = Message::builder()
        .from(from_mbox)
        .to(to_mbox)
        .subject(&email.subject);

    let body = match &email.html_body {
        Some(html) => Some(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(email.text_body.clone()))
                .singlepart(SinglePart::html(html.clone())),
        ),
        None => None,
    };

    let message = match (body, mail.attachments.is_empty()) {
        (Some(alt), true) => builder.multipart(alt),
        (None, true) => builder.body(email.text_body.clone()),
        (alt, false) => {
            let mut mixed = match alt {
                Some(alt) => MultiPart::mixed().multipart(alt),
                None => MultiPart::mixed().singlepart(SinglePart::plain(email.text_body.clone())),
            };
            for attachment in &mail.attachments {
                let part = mime_attachment(attachment)
                    .map_err(|e| send_err(format!("invalid attachment type: {e}")))?;
                mixed = mixed.singlepart(part);
            }
            builder.multipart(mixed)
        }
    };

    message.map_err(|e| send_err(format!("failed to build message: {e}")))
}

fn mime_attachment(attachment: &Attachment) -> std::result::Result<SinglePart, ContentTypeErr> {
    let content_type = ContentType::parse(&attachment.content_type)
        .or_else(|_| ContentType::parse("application/octet-stream"))?;
    Ok(MimeAttachment::new(attachment.filename.clone()).body(attachment.bytes.clone(), content_type))
}

/// Send `message`, retrying up to 3 times on transient SMTP errors (421, 452).
async fn send_with_retry(
    transport: &AsyncSmtpTransport<Tokio1Executor>,
    message: Message,
) -> std::result::Result<(), SmtpError> {
    const MAX_ATTEMPTS: u32 = 3;
    const RETRY_DELAY: Duration = Duration::from_millis(500);

    let mut attempt = 1;
    loop {
        match transport.send(message.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt < MAX_ATTEMPTS && is_transient_error(&e) => {
                tracing::debug!(attempt, error = %e, "transient SMTP error, retrying");
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Return `true` for SMTP 421/452 replies (service unavailable, insufficient storage).
fn is_transient_error(err: &SmtpError) -> bool {
    err.is_transient() && err.status().is_some_and(is_retryable_code)
}

fn is_retryable_code(code: Code) -> bool {
    code.severity == Severity::TransientNegativeCompletion
        && matches!(
            (code.category, code.detail),
            (Category::Connections, Detail::One) | (Category::MailSystem, Detail::Two)
        )
}
