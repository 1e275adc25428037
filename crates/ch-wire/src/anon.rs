//! Anonymous-name arithmetic.
//!
//! An anonymous sender is displayed as `anonNNNN` where each digit is
//! `(seed_digit + uid_digit) mod 10` over the last four digits of the
//! message's embedded seed and the sender's numeric user id. The seed can
//! be reconstructed from a displayed name by reversing the digit sums.

/// Derive the display name for an anonymous user.
pub fn anon_name(seed: u32, uid: u64) -> String {
    let seed_digits = last_four(u64::from(seed));
    let uid_digits = last_four(uid);
    let mut name = String::from("anon");
    for (s, u) in seed_digits.iter().zip(&uid_digits) {
        name.push(char::from(b'0' + (s + u) % 10));
    }
    name
}

/// Reconstruct the seed that, combined with `uid`, produces `name`.
///
/// Only the trailing four characters of `name` participate; non-digit
/// characters (the `anon` prefix) yield seed digit 0.
pub fn create_anon_seed(name: &str, uid: u64) -> u32 {
    let uid_digits = last_four(uid);
    let tail: Vec<u8> = name
        .bytes()
        .rev()
        .take(4)
        .map(|b| if b.is_ascii_digit() { b - b'0' } else { 0 })
        .collect();
    let mut seed: u32 = 0;
    for (i, u) in uid_digits.iter().enumerate() {
        // tail is reversed; digit i of the name is tail[3 - i]
        let n = tail.get(3 - i).copied().unwrap_or(0);
        let d = (10 + n - u) % 10;
        seed = seed * 10 + u32::from(d);
    }
    seed
}

/// The last four decimal digits of `n`, most significant first.
fn last_four(n: u64) -> [u8; 4] {
    let n = n % 10_000;
    [
        (n / 1000) as u8,
        (n / 100 % 10) as u8,
        (n / 10 % 10) as u8,
        (n % 10) as u8,
    ]
}
