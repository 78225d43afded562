//! Pure diff between the configured streamers and the subscriptions Twitch
//! currently holds. Network effects live in the app crate.

use std::collections::{HashMap, HashSet, VecDeque};

/// A configured streamer whose login has been resolved to a broadcaster id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSubscription {
    pub streamer_name: String,
    pub broadcaster_id: String,
}

/// The parts of a remote subscription the diff cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingSubscription {
    pub id: String,
    pub broadcaster_id: String,
}

/// Existing subscription claimed by a configured streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptSubscription {
    pub streamer_name: String,
    pub subscription_id: String,
    pub broadcaster_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub create: Vec<DesiredSubscription>,
    pub keep: Vec<KeptSubscription>,
    pub delete: Vec<ExistingSubscription>,
}

impl ReconcilePlan {
    /// Builds the plan. Each desired broadcaster claims at most one existing
    /// subscription with the same broadcaster id; whatever is left unclaimed
    /// is scheduled for deletion in the order Twitch listed it.
    pub fn compute(desired: &[DesiredSubscription], actual: Vec<ExistingSubscription>) -> Self {
        let mut unclaimed: HashMap<&str, VecDeque<usize>> = HashMap::new();
        for (index, subscription) in actual.iter().enumerate() {
            unclaimed
                .entry(subscription.broadcaster_id.as_str())
                .or_default()
                .push_back(index);
        }

        let mut claimed = vec![false; actual.len()];
        let mut seen: HashSet<&str> = HashSet::new();
        let mut plan = Self::default();

        for streamer in desired {
            if !seen.insert(streamer.broadcaster_id.as_str()) {
                continue;
            }

            match unclaimed
                .get_mut(streamer.broadcaster_id.as_str())
                .and_then(VecDeque::pop_front)
            {
                Some(index) => {
                    claimed[index] = true;
                    plan.keep.push(KeptSubscription {
                        streamer_name: streamer.streamer_name.clone(),
                        subscription_id: actual[index].id.clone(),
                        broadcaster_id: streamer.broadcaster_id.clone(),
                    });
                }
                None => plan.create.push(streamer.clone()),
            }
        }

        plan.delete = actual
            .into_iter()
            .zip(claimed)
            .filter_map(|(subscription, claimed)| (!claimed).then_some(subscription))
            .collect();

        plan
    }

    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}
