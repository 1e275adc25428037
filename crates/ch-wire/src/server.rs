//! Deterministic group → server mapping.
//!
//! Group traffic is sharded across a fixed fleet of `s{N}.chatango.com`
//! hosts. The shard is content-addressed from the group name alone so that
//! every client derives the same host with no directory service: two
//! base-36 values are read out of the (normalized) name, reduced to a
//! fraction, and walked against the cumulative weights below.

/// `(server number, weight)` pairs in walk order. 67 entries.
const SERVER_WEIGHTS: [(&str, u32); 67] = [
    ("5", 75),
    ("6", 75),
    ("7", 75),
    ("8", 75),
    ("16", 75),
    ("17", 75),
    ("18", 75),
    ("9", 95),
    ("11", 95),
    ("12", 95),
    ("13", 95),
    ("14", 95),
    ("15", 95),
    ("19", 101),
    ("23", 101),
    ("24", 101),
    ("25", 101),
    ("26", 101),
    ("28", 104),
    ("29", 104),
    ("30", 104),
    ("31", 104),
    ("32", 104),
    ("33", 104),
    ("35", 95),
    ("36", 95),
    ("37", 95),
    ("38", 95),
    ("39", 95),
    ("40", 95),
    ("41", 95),
    ("42", 95),
    ("43", 95),
    ("44", 95),
    ("45", 95),
    ("46", 95),
    ("47", 95),
    ("48", 95),
    ("49", 95),
    ("50", 95),
    ("52", 110),
    ("53", 110),
    ("55", 110),
    ("57", 110),
    ("58", 110),
    ("59", 110),
    ("60", 110),
    ("61", 110),
    ("62", 110),
    ("63", 110),
    ("64", 110),
    ("65", 110),
    ("66", 110),
    ("68", 110),
    ("71", 116),
    ("72", 116),
    ("73", 116),
    ("74", 116),
    ("75", 116),
    ("76", 116),
    ("77", 116),
    ("78", 116),
    ("79", 116),
    ("80", 116),
    ("81", 116),
    ("82", 116),
    ("84", 116),
];

/// The server number serving `group`.
pub fn server_number(group: &str) -> &'static str {
    let name: String = group
        .chars()
        .map(|c| if c == '_' || c == '-' { 'q' } else { c })
        .collect();

    let first = &name[..name.len().min(5)];
    let Some(a) = base36(first) else {
        return "5";
    };

    // Up to three further characters select the divisor, clamped to at
    // least 1000 so short names still spread across the fleet.
    let b = if name.len() > 6 {
        let slice = &name[6..name.len().min(9)];
        base36(slice).map_or(1000, |v| v.max(1000))
    } else {
        1000
    };

    let r = (a % b) as f64 / b as f64;
    let total: u32 = SERVER_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut cumulative = 0.0;
    for (server, weight) in SERVER_WEIGHTS {
        cumulative += f64::from(weight) / f64::from(total);
        if r <= cumulative {
            return server;
        }
    }
    "5"
}

/// WebSocket URL for a group room.
pub fn group_url(group: &str) -> String {
    format!("ws://s{}.chatango.com:8080/", server_number(group))
}

/// WebSocket URL of the private-message endpoint.
pub fn private_url() -> String {
    "ws://c1.chatango.com:8080/".to_owned()
}

fn base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}
