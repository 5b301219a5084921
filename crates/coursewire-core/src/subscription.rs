// Subscription resolution and scope filtering
//
// A connection's subscription is fixed at handshake time: the channel set,
// the optional course/room scope, and the optional queue-id filter list.
// The same filter rules are applied by the SQL poller (as WHERE clauses) and
// by the in-memory sources (via `Subscription::matches`).

use crate::channel::Channel;
use std::collections::BTreeSet;

/// Scope and channel selection negotiated for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    channels: BTreeSet<Channel>,
    /// Restrict change-log events to this course (global events still pass).
    pub course_id: Option<i64>,
    /// Restrict queue-scoped events to this room's reference id.
    pub room_id: Option<i64>,
    /// Restrict events to these reference ids. Applied unconditionally by
    /// reference-id equality, though only meaningful for queue channels.
    pub queue_ids: Vec<i64>,
}

impl Subscription {
    pub fn new(channels: BTreeSet<Channel>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    /// Resolve the requested channel set from raw `channels` parameter values.
    ///
    /// Each value may itself be a comma-separated list. Entries are
    /// lower-cased, matched against the allow-list, and de-duplicated.
    /// An empty result falls back to {rooms, progress}.
    pub fn resolve_channels(raw_values: &[String]) -> BTreeSet<Channel> {
        let mut channels = BTreeSet::new();
        for value in raw_values {
            for piece in value.split(',') {
                let piece = piece.trim().to_ascii_lowercase();
                if piece.is_empty() {
                    continue;
                }
                if let Some(channel) = Channel::parse(&piece) {
                    channels.insert(channel);
                }
            }
        }
        if channels.is_empty() {
            channels.insert(Channel::Rooms);
            channels.insert(Channel::Progress);
        }
        channels
    }

    /// Resolve queue-id filters from raw `queue_id` parameter values.
    ///
    /// Accepts repeated parameters and comma-separated lists. Non-numeric and
    /// non-positive entries are silently dropped; duplicates collapse,
    /// preserving first-seen order.
    pub fn resolve_queue_ids(raw_values: &[String]) -> Vec<i64> {
        let mut ids = Vec::new();
        for value in raw_values {
            for piece in value.split(',') {
                let piece = piece.trim();
                if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                    continue;
                }
                match piece.parse::<i64>() {
                    Ok(id) if id > 0 && !ids.contains(&id) => ids.push(id),
                    _ => {}
                }
            }
        }
        ids
    }

    /// Scope filters parsed as integers; zero and negative values mean "no
    /// filter" and collapse to `None`.
    pub fn scope_filter(raw: Option<&str>) -> Option<i64> {
        raw.and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
    }

    pub fn with_course(mut self, course_id: Option<i64>) -> Self {
        self.course_id = course_id;
        self
    }

    pub fn with_room(mut self, room_id: Option<i64>) -> Self {
        self.room_id = room_id;
        self
    }

    pub fn with_queues(mut self, queue_ids: Vec<i64>) -> Self {
        self.queue_ids = queue_ids;
        self
    }

    pub fn channels(&self) -> &BTreeSet<Channel> {
        &self.channels
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }

    /// The subscribed subset routed through the change-log poller.
    pub fn change_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .copied()
            .filter(Channel::is_change_log)
            .collect()
    }

    /// Whether the TA-assignment poller is enabled for this connection.
    pub fn ta_enabled(&self) -> bool {
        self.channels.contains(&Channel::TaAccept)
    }

    /// The scope predicate the change-log query encodes in SQL.
    ///
    /// Invariants:
    /// - only subscribed change-log channels pass;
    /// - a course filter admits matching rows and rows with no course
    ///   (global events);
    /// - queue-id filters gate by reference-id equality unconditionally;
    /// - the room filter gates only queue-scoped channels by reference id.
    pub fn matches(&self, channel: Channel, ref_id: Option<i64>, course_id: Option<i64>) -> bool {
        if !channel.is_change_log() || !self.channels.contains(&channel) {
            return false;
        }
        if let Some(course) = self.course_id {
            if course_id.is_some_and(|c| c != course) {
                return false;
            }
        }
        if !self.queue_ids.is_empty() {
            if !ref_id.is_some_and(|r| self.queue_ids.contains(&r)) {
                return false;
            }
        }
        if let Some(room) = self.room_id {
            if channel.is_queue_scoped() && ref_id != Some(room) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn channel_resolution_lowercases_and_dedupes() {
        let channels = Subscription::resolve_channels(&raw(&["Queue,rooms", "queue", "ROOMS"]));
        assert_eq!(
            channels.into_iter().collect::<Vec<_>>(),
            vec![Channel::Rooms, Channel::Queue]
        );
    }

    #[test]
    fn channel_resolution_defaults_when_empty_or_unknown() {
        for input in [&[][..], &raw(&["grades", " , "])[..]] {
            let channels = Subscription::resolve_channels(input);
            assert_eq!(
                channels.into_iter().collect::<Vec<_>>(),
                vec![Channel::Rooms, Channel::Progress]
            );
        }
    }

    #[test]
    fn queue_id_resolution_drops_junk_and_dedupes() {
        let ids = Subscription::resolve_queue_ids(&raw(&["5,abc,7", "0", "-3", "7", "12"]));
        assert_eq!(ids, vec![5, 7, 12]);
    }

    #[test]
    fn scope_filter_ignores_non_positive() {
        assert_eq!(Subscription::scope_filter(Some("9")), Some(9));
        assert_eq!(Subscription::scope_filter(Some("0")), None);
        assert_eq!(Subscription::scope_filter(Some("-4")), None);
        assert_eq!(Subscription::scope_filter(Some("nope")), None);
        assert_eq!(Subscription::scope_filter(None), None);
    }

    #[test]
    fn matches_requires_subscription() {
        let sub = Subscription::new([Channel::Progress].into());
        assert!(sub.matches(Channel::Progress, Some(1), None));
        assert!(!sub.matches(Channel::Rooms, Some(1), None));
        assert!(!sub.matches(Channel::Queue, Some(1), None));
        // ta_accept never flows through the change-log path
        let sub = Subscription::new([Channel::TaAccept].into());
        assert!(!sub.matches(Channel::TaAccept, Some(1), None));
    }

    #[test]
    fn course_filter_admits_global_events() {
        let sub = Subscription::new([Channel::Rooms].into()).with_course(Some(3));
        assert!(sub.matches(Channel::Rooms, Some(1), Some(3)));
        assert!(sub.matches(Channel::Rooms, Some(1), None));
        assert!(!sub.matches(Channel::Rooms, Some(1), Some(4)));
    }

    #[test]
    fn queue_filter_applies_by_ref_id() {
        let sub = Subscription::new([Channel::Queue].into()).with_queues(vec![42]);
        assert!(sub.matches(Channel::Queue, Some(42), None));
        assert!(!sub.matches(Channel::Queue, Some(43), None));
        assert!(!sub.matches(Channel::Queue, None, None));
    }

    #[test]
    fn room_filter_only_gates_queue_scoped_channels() {
        let sub = Subscription::new([Channel::Rooms, Channel::Progress, Channel::Queue].into())
            .with_room(Some(5));
        // rooms/progress pass regardless of reference id
        assert!(sub.matches(Channel::Rooms, Some(7), None));
        assert!(sub.matches(Channel::Progress, Some(7), None));
        // queue events must match the room's reference id
        assert!(sub.matches(Channel::Queue, Some(5), None));
        assert!(!sub.matches(Channel::Queue, Some(7), None));
    }
}
