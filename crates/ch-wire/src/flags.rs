//! Flag bit constants and diffing.
//!
//! Three independent 64-bit bitmask spaces travel on the wire: group
//! configuration flags (`ok`, `groupflagsupdate`), per-message channel
//! flags (badges, color channels, premium styling), and per-moderator
//! access flags (`mods`). Diffing old against new yields the granted and
//! revoked sets.

/// Group configuration flags.
pub mod group {
    pub const LIST_TAXONOMY: u64 = 1 << 0;
    pub const NO_ANONS: u64 = 1 << 2;
    pub const NO_FLAGGING: u64 = 1 << 3;
    pub const NO_COUNTER: u64 = 1 << 4;
    pub const NO_IMAGES: u64 = 1 << 5;
    pub const NO_LINKS: u64 = 1 << 6;
    pub const NO_VIDEOS: u64 = 1 << 7;
    pub const NO_STYLED_TEXT: u64 = 1 << 8;
    pub const NO_LINKS_CHATANGO: u64 = 1 << 9;
    pub const NO_BROADCAST_WITH_BW: u64 = 1 << 10;
    pub const RATE_LIMIT_REGIME: u64 = 1 << 11;
    pub const CHANNELS_DISABLED: u64 = 1 << 13;
    pub const NLP_SINGLE_MSG: u64 = 1 << 14;
    pub const NLP_MSG_QUEUE: u64 = 1 << 15;
    pub const BROADCAST_MODE: u64 = 1 << 16;
    pub const CLOSED_IF_NO_MODS: u64 = 1 << 17;
    pub const IS_CLOSED: u64 = 1 << 18;
    pub const SHOW_MOD_ICONS: u64 = 1 << 19;
    pub const MODS_CHOOSE_VISIBILITY: u64 = 1 << 20;
    pub const NLP_NGRAM: u64 = 1 << 21;
    pub const NO_PROXIES: u64 = 1 << 22;
    pub const HAS_XML: u64 = 1 << 28;
    pub const UNSAFE: u64 = 1 << 29;
}

/// Per-message channel flags.
pub mod channel {
    pub const PREMIUM: u64 = 1 << 2;
    pub const BACKGROUND: u64 = 1 << 3;
    pub const MEDIA: u64 = 1 << 4;
    pub const CENSORED: u64 = 1 << 5;
    pub const SHIELD_BADGE: u64 = 1 << 6;
    pub const STAFF_BADGE: u64 = 1 << 7;
    pub const RED: u64 = 1 << 8;
    pub const ORANGE: u64 = 1 << 9;
    pub const GREEN: u64 = 1 << 10;
    pub const CYAN: u64 = 1 << 11;
    pub const BLUE: u64 = 1 << 12;
    pub const PURPLE: u64 = 1 << 13;
    pub const PINK: u64 = 1 << 14;
    pub const MOD: u64 = 1 << 15;
}

/// Moderator access flags.
pub mod access {
    pub const DELETED: u64 = 1 << 0;
    pub const EDIT_MODS: u64 = 1 << 1;
    pub const EDIT_MOD_VISIBILITY: u64 = 1 << 2;
    pub const EDIT_BW: u64 = 1 << 3;
    pub const EDIT_RESTRICTIONS: u64 = 1 << 4;
    pub const EDIT_GROUP: u64 = 1 << 5;
    pub const SEE_COUNTER: u64 = 1 << 6;
    pub const SEE_MOD_CHANNEL: u64 = 1 << 7;
    pub const SEE_MOD_ACTIONS: u64 = 1 << 8;
    pub const EDIT_NLP: u64 = 1 << 9;
    pub const EDIT_GP_ANNC: u64 = 1 << 10;
    pub const NO_SENDING_LIMITATIONS: u64 = 1 << 13;
    pub const SEE_IPS: u64 = 1 << 14;
    pub const CLOSE_GROUP: u64 = 1 << 15;
    pub const CAN_BROADCAST: u64 = 1 << 16;
    pub const MOD_ICON_VISIBLE: u64 = 1 << 17;
    pub const IS_STAFF: u64 = 1 << 18;
    pub const STAFF_ICON_VISIBLE: u64 = 1 << 19;
}

/// The outcome of diffing two flag bitmasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagDiff {
    pub added: u64,
    pub removed: u64,
}

/// Bits newly set in `new`, and bits cleared from `old`.
pub fn flag_changes(old: u64, new: u64) -> FlagDiff {
    FlagDiff {
        added: new & !old,
        removed: old & !new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_separates_added_from_removed() {
        let d = flag_changes(0b0101_0010, 0b0011_0010);
        assert_eq!(d.added, 0b0010_0000);
        assert_eq!(d.removed, 0b0100_0000);
    }

    #[test]
    fn identical_masks_diff_empty() {
        assert_eq!(flag_changes(0xFF, 0xFF), FlagDiff::default());
    }

    #[test]
    fn diff_covers_high_bits() {
        let old = group::HAS_XML | group::NO_ANONS;
        let new = group::NO_ANONS | group::UNSAFE;
        let d = flag_changes(old, new);
        assert_eq!(d.added, group::UNSAFE);
        assert_eq!(d.removed, group::HAS_XML);
    }
}
