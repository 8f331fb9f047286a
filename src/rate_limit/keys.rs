//! Counter store key layout
//!
//! All keys live under `rate_limit:{caller_id}:`. Window keys end with the
//! window start (Unix seconds) so housekeeping can recover it by parsing.

const PREFIX: &str = "rate_limit";

/// Key of a caller's request counter for one fixed window
pub fn window_key(caller_id: &str, window_start: i64) -> String {
    format!("{}:{}:window:{}", PREFIX, caller_id, window_start)
}

/// Key of the set indexing a caller's window keys
pub fn window_index_key(caller_id: &str) -> String {
    format!("{}:{}:requests", PREFIX, caller_id)
}

/// Key of a caller's running cost for a `YYYY-MM` month label
pub fn cost_key(caller_id: &str, month: &str) -> String {
    format!("{}:{}:cost:{}", PREFIX, caller_id, month)
}

/// Window start encoded in a window key, if the key is well formed
pub fn parse_window_start(key: &str) -> Option<i64> {
    let (_, last) = key.rsplit_once(':')?;
    last.parse().ok()
}
