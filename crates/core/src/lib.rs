//! Core domain types and shared logic for shelfsheet.
//!
//! This crate defines the data model and media rules used by every other crate:
//! - The entry sheet aggregate (sheets, products, attachments)
//! - Image dimension sniffing from raw container bytes
//! - Media payload decoding and per-kind validation policies
//! - Host allowlisting for already-hosted media
//! - Shared configuration

pub mod config;
pub mod error;
pub mod hosts;
pub mod media;
pub mod sheet;
pub mod sniff;
pub mod validate;

pub use error::{Error, Result};
pub use hosts::HostAllowlist;
pub use media::{DataPayload, MediaKind, MediaSource};
pub use sheet::{Attachment, AttachmentOwner, Product, PromoMaterial, Sheet, SheetStatus};
pub use sniff::{Dimensions, ImageFormat, sniff};
pub use validate::{MediaPolicy, MediaValidator, ValidationError};
