#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sheetmerge_lib::attach::{Attachment, DocumentConverter, DocumentId};
use sheetmerge_lib::merge::{BatchResult, Host, Preview};
use sheetmerge_lib::smtp::{Mailer, OutgoingMail};
use sheetmerge_lib::MergeError;

/// Records every mail; fails recipients listed in `reject`.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub reject: Vec<String>,
    /// Set after the first successful send, to simulate an interrupt.
    pub cancel_after_first: Option<Arc<AtomicBool>>,
}

impl RecordingMailer {
    pub fn rejecting(addresses: &[&str]) -> Self {
        Self {
            reject: addresses.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.email.to.clone())
            .collect()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.email.subject.clone())
            .collect()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> sheetmerge_lib::Result<()> {
        if self.reject.contains(&mail.email.to) {
            return Err(MergeError::SmtpSend {
                recipient: mail.email.to.clone(),
                reason: "550 mailbox unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(mail.clone());
        if let Some(flag) = &self.cancel_after_first {
            flag.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Converts ids starting with `ok`; anything else is "not found".
#[derive(Default)]
pub struct FakeConverter {
    pub calls: Mutex<Vec<String>>,
}

impl DocumentConverter for FakeConverter {
    async fn convert(&self, id: &DocumentId) -> sheetmerge_lib::Result<Attachment> {
        self.calls.lock().unwrap().push(id.to_string());
        if id.as_str().starts_with("ok") {
            Ok(Attachment {
                filename: format!("{id}.pdf"),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-1.4".to_vec(),
            })
        } else {
            Err(MergeError::Conversion {
                document_id: id.to_string(),
                reason: "document not found".into(),
            })
        }
    }
}

/// Answers the confirmation with a fixed value and keeps what it was shown.
pub struct ScriptedHost {
    pub answer: bool,
    pub previews: Vec<Preview>,
    pub reports: Vec<BatchResult>,
}

impl ScriptedHost {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            previews: Vec::new(),
            reports: Vec::new(),
        }
    }
}

impl Host for ScriptedHost {
    fn confirm(&mut self, preview: &Preview) -> bool {
        self.previews.push(preview.clone());
        self.answer
    }

    fn report(&mut self, result: &BatchResult) {
        self.reports.push(result.clone());
    }
}
