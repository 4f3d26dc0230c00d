//! Shared test utilities for the playground-gallery test suite.
//!
//! Fixtures for documents, screenshots and opened stores, plus a scripted
//! in-memory mail transport that records every session it is asked to open.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let (_tmp, store) = open_store();
//! let token = store.new_request().unwrap();
//! let entry = store.put_gallery(submission(&token, "Plasma"), &tiny_png()).unwrap();
//! ```

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;

use crate::blob::BlobStore;
use crate::document::{Document, Program};
use crate::mail::{Email, SendError, Session, Transport};
use crate::publish::PublishStore;
use crate::token::TokenMinter;
use crate::types::GalleryEntry;

// =========================================================================
// Fixtures
// =========================================================================

/// A valid 3x2 PNG.
pub fn tiny_png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(3, 2, image::Rgb([200, 40, 90]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// A document with a single default program that passes publication checks.
pub fn sample_document() -> Document {
    Document {
        version: 1,
        title: "Plasma".into(),
        description: "Animated plasma on a full-screen quad".into(),
        programs: vec![Program {
            version: 1,
            name: "default".into(),
            vertex: "attribute vec3 position;\nvoid main() { gl_Position = vec4(position, 1.0); }"
                .into(),
            fragment: "void main() { gl_FragColor = vec4(1.0, 0.3, 0.6, 1.0); }".into(),
            is_default: true,
        }],
        javascript: String::new(),
        creation_time: None,
        authors: Vec::new(),
    }
}

/// An in-memory publish store whose screenshots live in a temp directory.
pub fn open_store() -> (TempDir, PublishStore) {
    let tmp = TempDir::new().unwrap();
    let screenshots = BlobStore::open(tmp.path().join("screenshots")).unwrap();
    let store = PublishStore::open_in_memory(screenshots, TokenMinter::default()).unwrap();
    (tmp, store)
}

/// A gallery submission for `token` with every text field filled in.
pub fn submission(token: &str, title: &str) -> GalleryEntry {
    GalleryEntry {
        token: Some(token.to_string()),
        document: "aaaaaaaaaa".into(),
        title: title.to_string(),
        description: format!("{title} description"),
        author: "Ana".into(),
        license: "CC BY".into(),
        ..Default::default()
    }
}

/// A rendered-looking e-mail addressed to `to`.
pub fn email_to(to: &str) -> Email {
    Email {
        from: "noreply@example.org".into(),
        to: to.to_string(),
        message: format!("To: {to}\r\nSubject: test\r\n\r\nhello\r\n").into_bytes(),
    }
}

// =========================================================================
// Fake mail transport
// =========================================================================

/// Everything a [`FakeTransport`] was asked to do.
#[derive(Debug, Default)]
pub struct TransportLog {
    /// Recipients delivered, one list per opened session.
    pub sessions: Vec<Vec<String>>,
    /// Every recipient a send was attempted for, in order.
    pub attempted: Vec<String>,
    pub resets: usize,
    pub quits: usize,
}

#[derive(Debug, Clone, Default)]
struct Script {
    rejected: HashSet<String>,
    breaking: HashSet<String>,
    failing_reset: bool,
    refuse_connections: bool,
}

/// Scripted [`Transport`]: rejects or breaks on chosen recipients.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    script: Arc<Script>,
    log: Arc<Mutex<TransportLog>>,
}

impl FakeTransport {
    fn edit(mut self, change: impl FnOnce(&mut Script)) -> Self {
        change(Arc::make_mut(&mut self.script));
        self
    }

    /// Sending to `to` fails recoverably.
    pub fn reject(self, to: &str) -> Self {
        let to = to.to_string();
        self.edit(|s| {
            s.rejected.insert(to);
        })
    }

    /// Sending to `to` breaks the connection.
    pub fn break_on(self, to: &str) -> Self {
        let to = to.to_string();
        self.edit(|s| {
            s.breaking.insert(to);
        })
    }

    pub fn failing_reset(self) -> Self {
        self.edit(|s| s.failing_reset = true)
    }

    pub fn refusing_connections(self) -> Self {
        self.edit(|s| s.refuse_connections = true)
    }

    pub fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock().unwrap()
    }
}

impl Transport for FakeTransport {
    type Session = FakeSession;

    fn connect(&self) -> Result<FakeSession, SendError> {
        if self.script.refuse_connections {
            return Err(SendError::Connection("connection refused".into()));
        }
        let mut log = self.log();
        log.sessions.push(Vec::new());
        let index = log.sessions.len() - 1;
        Ok(FakeSession {
            transport: self.clone(),
            index,
        })
    }
}

pub struct FakeSession {
    transport: FakeTransport,
    index: usize,
}

impl Session for FakeSession {
    fn send(&mut self, email: &Email) -> Result<(), SendError> {
        let script = &self.transport.script;
        let mut log = self.transport.log.lock().unwrap();
        log.attempted.push(email.to.clone());
        if script.breaking.contains(&email.to) {
            return Err(SendError::Connection(format!("{} hung up", email.to)));
        }
        if script.rejected.contains(&email.to) {
            return Err(SendError::Recoverable(format!("550 {} unknown", email.to)));
        }
        log.sessions[self.index].push(email.to.clone());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SendError> {
        self.transport.log.lock().unwrap().resets += 1;
        if self.transport.script.failing_reset {
            return Err(SendError::Connection("RSET failed".into()));
        }
        Ok(())
    }

    fn quit(self) {
        self.transport.log.lock().unwrap().quits += 1;
    }
}
