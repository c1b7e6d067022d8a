use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Rolling behavioral state for one source address.
///
/// `request_count` and `first_seen` cover the address's whole lifetime;
/// the history deques hold at most the profiler's `max_history` most
/// recent entries. Profiles are created on first sight and never evicted
/// while the process runs.
#[derive(Debug, Clone)]
pub struct IpProfile {
    pub ip: String,
    pub request_count: u64,
    /// Epoch seconds of the first observed event.
    pub first_seen: f64,
    /// Arrival times (epoch seconds) of events after the first.
    pub arrivals: VecDeque<f64>,
    pub bytes_sent: VecDeque<u64>,
    /// Gaps between consecutive arrivals, in seconds.
    pub intervals: VecDeque<f64>,
}

impl IpProfile {
    fn new(ip: &str, now: f64) -> Self {
        Self {
            ip: ip.to_string(),
            request_count: 1,
            first_seen: now,
            arrivals: VecDeque::new(),
            bytes_sent: VecDeque::new(),
            intervals: VecDeque::new(),
        }
    }

    fn record(&mut self, bytes_sent: u64, now: f64, max_history: usize) {
        self.request_count += 1;

        // The interval needs two arrivals; the first appended arrival has
        // nothing to measure against.
        if let Some(&last) = self.arrivals.back() {
            self.intervals.push_back(now - last);
        }
        self.arrivals.push_back(now);
        self.bytes_sent.push_back(bytes_sent);

        while self.arrivals.len() > max_history {
            self.arrivals.pop_front();
        }
        while self.bytes_sent.len() > max_history {
            self.bytes_sent.pop_front();
        }
        while self.intervals.len() > max_history {
            self.intervals.pop_front();
        }
    }
}

/// Per-address traffic profiles over a sharded concurrent map.
///
/// Mutation happens under the map's per-key entry guard: concurrent
/// observations of the same address serialize, different addresses
/// proceed in parallel. No I/O anywhere on this path.
pub struct TrafficProfiler {
    profiles: DashMap<String, IpProfile>,
    max_history: usize,
}

impl TrafficProfiler {
    pub fn new(max_history: usize) -> Self {
        Self {
            profiles: DashMap::new(),
            max_history: max_history.max(2),
        }
    }

    /// Fold one event into the address's profile and return a snapshot of
    /// the result.
    ///
    /// The first observation initializes the profile with a count of 1 and
    /// empty histories. Every later observation increments the count and
    /// appends the arrival time, the byte count, and — once two arrivals
    /// exist — the latest inter-arrival gap.
    pub fn observe(&self, ip: &str, bytes_sent: u64, now: f64) -> IpProfile {
        match self.profiles.entry(ip.to_string()) {
            Entry::Occupied(mut occupied) => {
                let profile = occupied.get_mut();
                profile.record(bytes_sent, now, self.max_history);
                profile.clone()
            }
            Entry::Vacant(vacant) => vacant.insert(IpProfile::new(ip, now)).value().clone(),
        }
    }

    /// Number of addresses currently profiled.
    pub fn tracked_addresses(&self) -> usize {
        self.profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_initializes() {
        let profiler = TrafficProfiler::new(100);
        let profile = profiler.observe("10.0.0.1", 500, 1_000.0);
        assert_eq!(profile.request_count, 1);
        assert_eq!(profile.first_seen, 1_000.0);
        assert!(profile.arrivals.is_empty());
        assert!(profile.bytes_sent.is_empty());
        assert!(profile.intervals.is_empty());
    }

    #[test]
    fn test_subsequent_observations_append() {
        let profiler = TrafficProfiler::new(100);
        profiler.observe("10.0.0.1", 500, 1_000.0);
        let second = profiler.observe("10.0.0.1", 600, 1_000.5);
        assert_eq!(second.request_count, 2);
        assert_eq!(second.arrivals, vec![1_000.5]);
        assert_eq!(second.bytes_sent, vec![600]);
        // One arrival on record: nothing to measure an interval against.
        assert!(second.intervals.is_empty());

        let third = profiler.observe("10.0.0.1", 700, 1_000.7);
        assert_eq!(third.request_count, 3);
        assert_eq!(third.intervals.len(), 1);
        assert!((third.intervals[0] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_addresses_are_independent() {
        let profiler = TrafficProfiler::new(100);
        profiler.observe("10.0.0.1", 1, 1_000.0);
        profiler.observe("10.0.0.1", 1, 1_001.0);
        let other = profiler.observe("10.0.0.2", 1, 1_002.0);
        assert_eq!(other.request_count, 1);
        assert_eq!(profiler.tracked_addresses(), 2);
    }

    #[test]
    fn test_history_is_capped_but_count_is_not() {
        let profiler = TrafficProfiler::new(10);
        let mut last = profiler.observe("10.0.0.1", 1, 0.0);
        for i in 1..50 {
            last = profiler.observe("10.0.0.1", i, i as f64);
        }
        assert_eq!(last.request_count, 50);
        assert_eq!(last.first_seen, 0.0);
        assert_eq!(last.arrivals.len(), 10);
        assert_eq!(last.bytes_sent.len(), 10);
        assert_eq!(last.intervals.len(), 10);
        // The ring keeps the newest entries.
        assert_eq!(*last.arrivals.back().unwrap(), 49.0);
    }

    #[test]
    fn test_concurrent_observations_same_address() {
        use std::sync::Arc;

        let profiler = Arc::new(TrafficProfiler::new(1_000));
        let mut handles = Vec::new();
        for t in 0..8 {
            let profiler = profiler.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    profiler.observe("10.0.0.1", 1, (t * 100 + i) as f64);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let profile = profiler.observe("10.0.0.1", 1, 10_000.0);
        assert_eq!(profile.request_count, 801);
    }
}
