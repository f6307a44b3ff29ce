//! Herald — scheduled Slack message dispatch.
//!
//! Queue a text message for a channel at a future time; a fixed-interval
//! dispatch loop delivers each due message exactly once per run and records
//! the outcome (`sent` or `failed`) durably. Workspace credentials come from
//! a one-time OAuth installation or a static bot token.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod slack;

pub mod delivery;
pub mod oauth;

pub mod dispatch;
pub mod http;
