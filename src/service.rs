//! Request-level operations of the gallery.
//!
//! [`GalleryService`] is the surface an HTTP layer calls into: it validates
//! decoded request bodies, drives the blob stores and the [`PublishStore`] in
//! order, and hands token e-mails to the mail dispatcher. It owns no state of
//! its own beyond the handles it was built with.

use crate::blob::{BlobError, BlobStore};
use crate::config::{GalleryConfig, GalleryLimits, MailConfig};
use crate::digest::{self, Digest};
use crate::document::{Author, Document, DocumentError};
use crate::mail::dispatcher::Mailer;
use crate::mail::{EmailAddress, MailError, TokenEmail};
use crate::publish::{PublishStore, StoreError, ViewOutcome};
use crate::screenshot::{self, ScreenshotError};
use crate::token::TokenMinter;
use crate::types::{GalleryEntry, SortKey};
use chrono::{Datelike, Utc};
use thiserror::Error;

/// Author name used when a token request does not give one.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid e-mail address")]
    InvalidEmail,
    #[error("Empty title specified")]
    EmptyTitle,
    #[error("Invalid token")]
    InvalidToken,
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl ServiceError {
    /// Whether the request itself was at fault (a 400 rather than a 500).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidEmail
                | ServiceError::EmptyTitle
                | ServiceError::InvalidToken
                | ServiceError::Document(_)
                | ServiceError::Screenshot(_)
                | ServiceError::Store(StoreError::UnknownToken)
                | ServiceError::Blob(BlobError::NotFound(_))
        )
    }
}

/// Body of a publish token request.
#[derive(Debug, Clone, Default)]
pub struct TokenRequest {
    pub email: String,
    pub title: String,
    /// Name to greet the requester with; empty means anonymous.
    pub author: String,
}

/// Body of a publication (first or repeated) under a token.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub token: String,
    pub author: String,
    pub license: String,
    /// `data:image/png;base64,...`
    pub screenshot: String,
    pub document: Document,
}

/// Result of a publication.
#[derive(Debug, Clone)]
pub struct Published {
    /// The document as stored, with the new author recorded.
    pub document: Document,
    pub entry: GalleryEntry,
}

/// Listing parameters as they arrive from a query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GalleryQuery {
    pub page: u32,
    pub limit: Option<u32>,
    pub sort: SortKey,
    pub reversed: bool,
}

impl GalleryQuery {
    /// Parse raw query values. Unparsable numbers fall back to defaults.
    pub fn from_params(
        page: Option<&str>,
        limit: Option<&str>,
        sort: Option<&str>,
        order: Option<&str>,
    ) -> Self {
        Self {
            page: page.and_then(|p| p.parse().ok()).unwrap_or(0),
            limit: limit.and_then(|l| l.parse().ok()),
            sort: sort.map(SortKey::from_param).unwrap_or_default(),
            reversed: order == Some("reverse"),
        }
    }

    /// Page size after applying the configured default and cap.
    pub fn effective_limit(&self, limits: &GalleryLimits) -> u32 {
        self.limit
            .unwrap_or(limits.default_limit)
            .min(limits.max_limit)
    }
}

pub struct GalleryService {
    documents: BlobStore,
    store: PublishStore,
    mailer: Mailer,
    limits: GalleryLimits,
    mail: MailConfig,
}

impl GalleryService {
    pub fn new(
        documents: BlobStore,
        store: PublishStore,
        mailer: Mailer,
        limits: GalleryLimits,
        mail: MailConfig,
    ) -> Self {
        Self {
            documents,
            store,
            mailer,
            limits,
            mail,
        }
    }

    /// Open both blob stores and the database under `config.data_root`.
    pub fn open(config: &GalleryConfig, mailer: Mailer) -> Result<Self, ServiceError> {
        let documents = BlobStore::open(config.documents_dir())?;
        let screenshots = BlobStore::open(config.screenshots_dir())?;
        let minter = TokenMinter::new(config.tokens.initial_length, config.tokens.collision_limit);
        let store = PublishStore::open(&config.database_path(), screenshots, minter)?;
        Ok(Self::new(
            documents,
            store,
            mailer,
            config.gallery.clone(),
            config.mail.clone(),
        ))
    }

    pub fn store(&self) -> &PublishStore {
        &self.store
    }

    pub fn documents(&self) -> &BlobStore {
        &self.documents
    }

    /// Reserve a token and queue the e-mail that delivers it.
    ///
    /// The token is returned for callers that are not the public request
    /// path (the admin CLI, tests); it must never be echoed to the requester,
    /// who proves ownership of the address by receiving it.
    pub fn request_token(&self, request: &TokenRequest) -> Result<String, ServiceError> {
        if !request.email.contains('@') {
            return Err(ServiceError::InvalidEmail);
        }
        if request.title.is_empty() {
            return Err(ServiceError::EmptyTitle);
        }
        let name = if request.author.is_empty() {
            ANONYMOUS_AUTHOR
        } else {
            request.author.as_str()
        };

        let token = self.store.new_request()?;
        let to = EmailAddress {
            name: name.to_string(),
            address: request.email.clone(),
        };
        let from = self.mail.sender();
        let rendered = TokenEmail {
            token: &token,
            title: &request.title,
            to: &to,
            from: &from,
            public_host: &self.mail.public_host,
        }
        .render();

        let queued = rendered.and_then(|email| self.mailer.enqueue(email));
        if let Err(error) = queued {
            tracing::warn!(%error, "token e-mail not queued, releasing reservation");
            self.store.delete_request(&token)?;
            return Err(error.into());
        }

        tracing::info!(title = %request.title, "publish token requested");
        Ok(token)
    }

    /// Publish, or republish, the document held by a token.
    pub fn publish(&self, request: PublishRequest) -> Result<Published, ServiceError> {
        if request.token.is_empty() {
            return Err(ServiceError::InvalidToken);
        }

        let screenshot = screenshot::decode_data_url(&request.screenshot)?;
        screenshot::validate_png(&screenshot)?;

        let mut document = request.document;
        document.validate_publication()?;

        let author = Author {
            name: request.author,
            license: request.license,
            year: Utc::now().year(),
        };
        document.prepare(author.clone())?;

        let digest = document.store(&self.documents)?;

        let entry = GalleryEntry {
            token: Some(request.token),
            document: digest.to_string(),
            title: document.title.clone(),
            description: document.description.clone(),
            author: author.name,
            license: author.license,
            ..Default::default()
        };
        let entry = self.store.put_gallery(entry, &screenshot)?;

        Ok(Published { document, entry })
    }

    /// One page of the published gallery.
    pub fn gallery(&self, query: &GalleryQuery) -> Result<Vec<GalleryEntry>, ServiceError> {
        let limit = query.effective_limit(&self.limits);
        Ok(self
            .store
            .gallery(query.page, limit, query.sort, query.reversed)?)
    }

    /// Count a view of an entry, once per client address and lineage.
    pub fn record_view(
        &self,
        parent: i64,
        id: i64,
        real_ip: Option<&str>,
        remote_addr: &str,
    ) -> Result<ViewOutcome, ServiceError> {
        let ip = digest::client_ip(real_ip, remote_addr);
        Ok(self
            .store
            .record_view(parent, id, &digest::ip_hash(ip))?)
    }

    /// Raw document JSON by digest.
    pub fn document(&self, digest: &str) -> Result<Vec<u8>, ServiceError> {
        Ok(self.documents.retrieve(digest)?)
    }

    /// Raw screenshot PNG by digest.
    pub fn screenshot(&self, digest: &str) -> Result<Vec<u8>, ServiceError> {
        Ok(self.store.screenshots().retrieve(digest)?)
    }

    /// Store a document JSON outside the publish flow.
    pub fn put_document(&self, document: &Document) -> Result<Digest, ServiceError> {
        document.validate()?;
        Ok(document.store(&self.documents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::dispatcher::{BatchPolicy, MailQueue, queue};
    use crate::test_helpers::{sample_document, tiny_png};
    use crate::types::EntryState;
    use base64::{Engine as _, engine::general_purpose};
    use std::time::Duration;
    use tempfile::TempDir;

    fn data_url(png: &[u8]) -> String {
        format!(
            "{}{}",
            screenshot::DATA_URL_PREFIX,
            general_purpose::STANDARD.encode(png)
        )
    }

    fn open_service(capacity: usize) -> (TempDir, GalleryService, MailQueue) {
        let tmp = TempDir::new().unwrap();
        let config = GalleryConfig {
            data_root: tmp.path().join("data"),
            ..GalleryConfig::default()
        };
        let (mailer, queue) = queue(capacity);
        let service = GalleryService::open(&config, mailer).unwrap();
        (tmp, service, queue)
    }

    /// Rows in the on-disk gallery table, reservations included.
    fn gallery_rows(tmp: &TempDir) -> i64 {
        let conn = rusqlite::Connection::open(tmp.path().join("data/gallery.db")).unwrap();
        conn.query_row("SELECT COUNT(*) FROM gallery", [], |row| row.get(0))
            .unwrap()
    }

    fn token_request(title: &str) -> TokenRequest {
        TokenRequest {
            email: "ana@example.org".into(),
            title: title.into(),
            author: "Ana".into(),
        }
    }

    fn publish_request(token: &str) -> PublishRequest {
        PublishRequest {
            token: token.into(),
            author: "Ana".into(),
            license: "CC BY".into(),
            screenshot: data_url(&tiny_png()),
            document: sample_document(),
        }
    }

    // =========================================================================
    // Token requests
    // =========================================================================

    #[test]
    fn token_request_queues_email_with_token() {
        let (_tmp, service, queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();

        let batch = queue
            .next_batch(&BatchPolicy {
                size: 1,
                window: Duration::ZERO,
            })
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].to, "ana@example.org");
        let text = String::from_utf8_lossy(&batch[0].message).into_owned();
        assert!(text.contains(&token));
        assert!(text.contains("New Publishing Token for 'Plasma'"));
        assert_eq!(
            service.store().entry_by_token(&token).unwrap().unwrap().state,
            EntryState::New
        );
    }

    #[test]
    fn token_request_validates_fields() {
        let (_tmp, service, _queue) = open_service(8);
        let mut request = token_request("Plasma");
        request.email = "nobody".into();
        assert!(matches!(
            service.request_token(&request),
            Err(ServiceError::InvalidEmail)
        ));

        let mut request = token_request("");
        request.email = "ana@example.org".into();
        assert!(matches!(
            service.request_token(&request),
            Err(ServiceError::EmptyTitle)
        ));
    }

    #[test]
    fn missing_author_is_greeted_as_anonymous() {
        let (_tmp, service, queue) = open_service(8);
        let mut request = token_request("Plasma");
        request.author.clear();
        service.request_token(&request).unwrap();

        let batch = queue
            .next_batch(&BatchPolicy {
                size: 1,
                window: Duration::ZERO,
            })
            .unwrap();
        assert!(String::from_utf8_lossy(&batch[0].message).contains("Hi Anonymous!"));
    }

    #[test]
    fn unrenderable_email_releases_reservation() {
        let (tmp, service, _queue) = open_service(8);
        let mut request = token_request("Plasma");
        request.email = "not an address@".into();

        let result = service.request_token(&request);
        assert!(matches!(
            result,
            Err(ServiceError::Mail(MailError::Address { .. }))
        ));
        assert_eq!(gallery_rows(&tmp), 0);
    }

    #[test]
    fn closed_mail_queue_releases_reservation() {
        let (tmp, service, queue) = open_service(8);
        drop(queue);
        let result = service.request_token(&token_request("Plasma"));
        assert!(matches!(result, Err(ServiceError::Mail(MailError::Closed))));
        assert_eq!(gallery_rows(&tmp), 0);
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    #[test]
    fn publish_stores_document_and_entry() {
        let (_tmp, service, _queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();
        let published = service.publish(publish_request(&token)).unwrap();

        assert_eq!(published.entry.state, EntryState::Published);
        assert_eq!(published.entry.title, "Plasma");
        assert_eq!(published.entry.author, "Ana");
        assert_eq!(published.document.authors.len(), 1);
        assert_eq!(published.document.authors[0].year, Utc::now().year());

        let stored: Document =
            serde_json::from_slice(&service.document(&published.entry.document).unwrap()).unwrap();
        assert_eq!(stored, published.document);
        assert_eq!(
            service.screenshot(&published.entry.screenshot).unwrap(),
            tiny_png()
        );
    }

    #[test]
    fn republish_by_same_author_keeps_one_attribution() {
        let (_tmp, service, _queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();
        let first = service.publish(publish_request(&token)).unwrap();

        let mut again = publish_request(&token);
        again.document = first.document.clone();
        again.document.description = "Now with more plasma".into();
        let second = service.publish(again).unwrap();

        assert_eq!(second.document.authors.len(), 1);
        assert_eq!(second.entry.parent, first.entry.id);
        assert_ne!(second.entry.document, first.entry.document);
    }

    #[test]
    fn publish_rejects_bad_screenshots() {
        let (_tmp, service, _queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();

        let mut request = publish_request(&token);
        request.screenshot = "data:image/jpeg;base64,AAAA".into();
        assert!(matches!(
            service.publish(request),
            Err(ServiceError::Screenshot(ScreenshotError::NotPngDataUrl))
        ));

        let mut request = publish_request(&token);
        request.screenshot = data_url(b"definitely not a png");
        let err = service.publish(request).unwrap_err();
        assert!(matches!(err, ServiceError::Screenshot(ScreenshotError::Image(_))));
        assert!(err.is_client_error());
    }

    #[test]
    fn publish_requires_description_and_token() {
        let (_tmp, service, _queue) = open_service(8);
        let mut request = publish_request("");
        assert!(matches!(
            service.publish(request.clone()),
            Err(ServiceError::InvalidToken)
        ));

        request.token = "abcdef".into();
        request.document.description.clear();
        assert!(matches!(
            service.publish(request),
            Err(ServiceError::Document(DocumentError::MissingDescription))
        ));
    }

    #[test]
    fn publish_with_unknown_token_is_client_error() {
        let (_tmp, service, _queue) = open_service(8);
        let err = service.publish(publish_request("nosuch")).unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::UnknownToken)));
        assert!(err.is_client_error());
    }

    #[test]
    fn invalid_license_is_rejected() {
        let (_tmp, service, _queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();
        let mut request = publish_request(&token);
        request.license = "GPL".into();
        assert!(matches!(
            service.publish(request),
            Err(ServiceError::Document(DocumentError::InvalidLicense(_)))
        ));
    }

    // =========================================================================
    // Listing and views
    // =========================================================================

    #[test]
    fn query_limits_are_defaulted_and_clamped() {
        let limits = GalleryLimits::default();
        assert_eq!(GalleryQuery::default().effective_limit(&limits), 10);

        let query =
            GalleryQuery::from_params(Some("2"), Some("500"), Some("views"), Some("reverse"));
        assert_eq!(query.page, 2);
        assert_eq!(query.effective_limit(&limits), 50);
        assert_eq!(query.sort, SortKey::Views);
        assert!(query.reversed);
    }

    #[test]
    fn unparsable_query_values_fall_back() {
        let query = GalleryQuery::from_params(Some("x"), Some("-3"), Some("title"), Some("up"));
        assert_eq!(query, GalleryQuery::default());
    }

    #[test]
    fn views_are_counted_once_per_client() {
        let (_tmp, service, _queue) = open_service(8);
        let token = service.request_token(&token_request("Plasma")).unwrap();
        let entry = service.publish(publish_request(&token)).unwrap().entry;

        let first = service
            .record_view(entry.parent, entry.id, None, "10.0.0.1:5000")
            .unwrap();
        let again = service
            .record_view(entry.parent, entry.id, None, "10.0.0.1:6000")
            .unwrap();
        let proxied = service
            .record_view(entry.parent, entry.id, Some("10.0.0.2"), "127.0.0.1:80")
            .unwrap();

        assert_eq!(first, ViewOutcome::Counted);
        assert_eq!(again, ViewOutcome::Duplicate);
        assert_eq!(proxied, ViewOutcome::Counted);

        let listed = service.gallery(&GalleryQuery::default()).unwrap();
        assert_eq!(listed[0].views, 2);
    }
}
