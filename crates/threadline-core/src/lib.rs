//! Conversation store logic and backend trait definitions for Threadline.
//!
//! This crate defines the "port" (`ConversationBackend`) that the
//! infrastructure layer implements, plus everything that sits on top of it:
//! record encoding, the degrading `ConversationStore`, and prompt-context
//! rendering. It depends only on `threadline-types` -- never on
//! `threadline-infra` or any network crate.

pub mod conversation;
