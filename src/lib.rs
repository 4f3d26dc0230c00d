//! # Playground Gallery
//!
//! The storage and publishing backend of the WebGL playground gallery. Authors
//! request a publish token by e-mail, publish documents (shader programs plus
//! a screenshot) under that token, and republish new versions with the same
//! token at any time. Visitors browse the gallery and their views are counted
//! once per client address.
//!
//! # Architecture: Blobs, Rows, Mail
//!
//! ```text
//! request token  →  PublishStore::new_request  →  TokenEmail  →  MailDispatcher  →  SMTP
//! publish        →  Document → documents/       →  PublishStore::put_gallery (screenshot → screenshots/)
//! browse         →  PublishStore::gallery       →  GalleryEntry JSON
//! view           →  ip_hash(client_ip)          →  PublishStore::record_view
//! ```
//!
//! - **Blobs** are immutable and content-addressed: a document or screenshot
//!   is named by a 10-symbol folded SHA-1 digest and never rewritten.
//! - **Rows** carry everything mutable. Each publication under a token
//!   inserts a new row and demotes the previous one to a revision, inside one
//!   database transaction.
//! - **Mail** is sent off the request path by a single dispatcher thread in
//!   small batches over one SMTP session each.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`digest`] | Folded SHA-1 short digests, digest validation, client IP hashing |
//! | [`blob`] | Content-addressed blob store with collision resolution and two-level fan-out |
//! | [`document`] | Playground document model, validation and author attribution |
//! | [`screenshot`] | PNG data-URL decoding and validation |
//! | [`schema`] | SQLite schema and `user_version`-keyed migrations |
//! | [`token`] | Random letter tokens with an adaptive, never-shrinking length |
//! | [`publish`] | Token reservation, publication lifecycle, listing and view accounting |
//! | [`mail`] | Token e-mail rendering, batching dispatcher and SMTP transport |
//! | [`service`] | Request-level operations tying the above together |
//! | [`config`] | `gallery.toml` loading, validation and merging over stock defaults |
//! | [`types`] | Gallery row types shared by the store, the service and the CLI |
//! | [`output`] | CLI output formatting for the admin commands |
//!
//! # Design Decisions
//!
//! ## Stage, Then Link
//!
//! Blob writes go to a temporary file inside the store and are hard-linked to
//! their final name. The link either creates the name or fails because it
//! already exists, so concurrent writers of the same digest cannot clobber
//! each other and readers never see a half-written blob. A name taken by
//! different bytes is a digest collision; the data is re-hashed with a salt
//! until a free or identical name turns up.
//!
//! ## One Published Row Per Token
//!
//! Republishing demotes the current row with a guarded `UPDATE ... WHERE id,
//! token, state` and only inserts the new version when exactly one row was
//! demoted. Two racing republications cannot both win; the loser gets
//! [`publish::StoreError::Conflict`] and nothing it wrote is kept.
//!
//! ## Views Per Lineage
//!
//! Every version of a document shares the `parent` of the lineage root, and
//! views are deduplicated on `(root, ip_hash)`. The counter is carried forward
//! on republication, so a new version keeps the audience of the old one.

pub mod blob;
pub mod config;
pub mod digest;
pub mod document;
pub mod mail;
pub mod output;
pub mod publish;
pub mod schema;
pub mod screenshot;
pub mod service;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
