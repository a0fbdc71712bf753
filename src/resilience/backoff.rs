//! Fixed backoff schedule for dialing backends.
//!
//! Attempt 1 runs immediately. Attempts 2–6 wait 1s, 7–9 wait 3s and
//! every later attempt waits 5s.

use std::time::Duration;

/// Dial and handshake attempts share this ceiling.
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Delay before `attempt` (1-based). `None` for the first attempt.
pub fn connect_backoff(attempt: u32) -> Option<Duration> {
    let secs = match attempt {
        0 | 1 => return None,
        2..=6 => 1,
        7..=9 => 3,
        _ => 5,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        assert_eq!(connect_backoff(1), None);
        let delays: Vec<u64> = (2..=MAX_CONNECT_ATTEMPTS)
            .map(|a| connect_backoff(a).unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 1, 1, 1, 1, 3, 3, 3, 5]);
        assert_eq!(connect_backoff(25), Some(Duration::from_secs(5)));
    }
}
