//! Domain types shared by the relay: the streamer roster, the live event
//! handed to the notifier and the subscription reconciliation plan.

pub mod live_event;
pub mod reconcile;
pub mod roster;

pub use live_event::{LiveEventParts, NormalizedLiveEvent};
pub use reconcile::{DesiredSubscription, ExistingSubscription, KeptSubscription, ReconcilePlan};
pub use roster::{RosterError, StreamerConfig, StreamerRoster};
