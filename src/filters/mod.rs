//! Representations and standalone behaviors of individual filter rules.

pub mod cosmetic;
pub mod modifiers;
pub mod network;
