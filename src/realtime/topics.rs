//! Reference-counted broadcast topics keyed by resource ref.
//!
//! The registry is owned by the realtime connection and only ever touched
//! behind its mutex: the inbound dispatch path publishes into it while
//! query-level attach/detach calls mutate the listener counts, so both
//! sides must serialize on the same lock.

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::types::ChangeEvent;

/// Buffered events per topic before slow receivers start lagging.
const TOPIC_CHANNEL_CAPACITY: usize = 64;

struct Topic {
    sender: broadcast::Sender<ChangeEvent>,
    listener_count: usize,
}

#[derive(Default)]
pub(crate) struct TopicRegistry {
    topics: HashMap<String, Topic>,
}

impl TopicRegistry {
    /// Registers interest in `reference`, lazily creating the topic, and
    /// returns a receiver on its broadcast channel.
    pub fn attach(&mut self, reference: &str) -> broadcast::Receiver<ChangeEvent> {
        let topic = self
            .topics
            .entry(reference.to_owned())
            .or_insert_with(|| Topic {
                sender: broadcast::channel(TOPIC_CHANNEL_CAPACITY).0,
                listener_count: 0,
            });
        topic.listener_count += 1;
        topic.sender.subscribe()
    }

    pub fn detach(&mut self, reference: &str) {
        if let Some(topic) = self.topics.get_mut(reference) {
            topic.listener_count = topic.listener_count.saturating_sub(1);
        }
    }

    /// Removes the topic if it still has no listeners. Returns true when a
    /// removal happened, which is the signal to issue an `unsubscribe`
    /// control message.
    pub fn remove_if_idle(&mut self, reference: &str) -> bool {
        match self.topics.get(reference) {
            Some(topic) if topic.listener_count == 0 => {
                self.topics.remove(reference);
                true
            }
            _ => false,
        }
    }

    /// Delivers `change` to the topic matching its own ref and, when the
    /// record carries an id, to the `ref/{id}` topic with the ref rewritten
    /// to the document path. Refs with no registered topic are no-ops; the
    /// event is dropped and recovery relies on the next baseline pull.
    pub fn publish(&self, change: &ChangeEvent) {
        if let Some(topic) = self.topics.get(&change.reference) {
            let _ = topic.sender.send(change.clone());
        }

        let Some(id) = change.record_id() else {
            return;
        };
        let document_ref = format!("{}/{}", change.reference, id);
        if let Some(topic) = self.topics.get(&document_ref) {
            let mut document_change = change.clone();
            document_change.reference = document_ref;
            let _ = topic.sender.send(document_change);
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self, reference: &str) -> usize {
        self.topics
            .get(reference)
            .map(|topic| topic.listener_count)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn contains(&self, reference: &str) -> bool {
        self.topics.contains_key(reference)
    }
}
