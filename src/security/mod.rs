//! Authorization and rate limiting for chat-triggered operations.
//!
//! [`PermissionEvaluator`] decides who may run staff commands and post CODE
//! alerts; [`CooldownTracker`] enforces per-actor command cooldowns.

pub mod cooldown;
pub mod policy;

pub use cooldown::{CooldownPolicy, CooldownTracker};
pub use policy::{
    evaluate, AccessRule, Grant, Permission, PermissionEvaluator, PermissionSet, Principal,
};
