//! Shared vocabulary for Netbridge.
//!
//! Every layer above this crate speaks in these types:
//!
//! - **Identity** ([`AccountId`], [`NickName`], [`StationId`]): who we are
//!   and which lobby/room we currently occupy.
//! - **Operations** ([`Operation`], [`Scope`]): the names attached to
//!   lobby/room completion events.
//! - **Settings** ([`Settings`], [`SettingsFactory`]): the common
//!   session-creation record, extensible per backend without downcasts.
//! - **Events** ([`NetworkEvent`], [`OperationOutcome`]): the seven
//!   notifications every backend raises and the facade republishes.
//!
//! # Architecture
//!
//! ```text
//! Session (facade)  ← republishes NetworkEvent, mirrors identity
//!     ↕
//! Backend (handlers) ← raises NetworkEvent, consumes Settings
//!     ↕
//! Protocol (this crate) ← plain data, no I/O
//! ```

mod error;
mod event;
mod settings;
mod types;

pub use error::ProtocolError;
pub use event::{NetworkEvent, OperationOutcome};
pub use settings::{PropertyMap, Settings, SettingsFactory};
pub use types::{AccountId, NickName, Operation, Scope, StationId};
