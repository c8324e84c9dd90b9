//! `armsight-middleware` – plumbing between the perception producer, the
//! servo, and whoever is watching.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.  Carries progress and fault events.
//! - [`snapshot`] – latest-value perception channel built on Tokio watch.
//!   Readers always see one complete snapshot, never a torn update.

pub mod bus;
pub mod snapshot;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use snapshot::{PerceptionHub, PerceptionSnapshot};
