//! Actor-based collection and forwarding pipeline
//!
//! Each long-running component is an independent async task controlled
//! through a cloneable handle and an mpsc command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ┌────────────────────┐               ┌──────────────────────────┐
//!   │ PollSchedulerActor │ tick          │ NotificationListenerActor│
//!   └─────────┬──────────┘               └────────────┬─────────────┘
//!             │ run_cycle                             │ per notification
//!   ┌─────────▼──────────┐                            │
//!   │  PollOrchestrator  │ fan-out, one task/device   │
//!   └─────────┬──────────┘                            │
//!             │ one batch per cycle                   │ one event per batch
//!             └──────────────┐          ┌─────────────┘
//!                        ┌───▼──────────▼───┐
//!                        │    Forwarder     │ Envelope → HEC
//!                        └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for on-demand poll cycles

pub mod listener;
pub mod messages;
pub mod poller;
pub mod scheduler;
