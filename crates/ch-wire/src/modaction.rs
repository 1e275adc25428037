//! Moderator-action log records (`getmodactions` pages).
//!
//! A page is `;`-separated records of seven `,`-separated fields:
//! `id,type,actor,ip,target,time,extra`. The extra field may itself
//! contain commas (the NLP types carry a JSON array), so only the first
//! six commas split.

use crate::flags::group;
use crate::time::ServerTime;
use crate::WireError;

/// One entry in a group's moderation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModAction {
    pub id: u64,
    pub kind: String,
    pub actor: String,
    pub ip: String,
    /// Affected user, when the action has one (`None` on the wire otherwise).
    pub target: Option<String>,
    pub time: ServerTime,
    pub extra: String,
}

impl ModAction {
    pub fn parse(record: &str) -> Result<Self, WireError> {
        let fields: Vec<&str> = record.splitn(7, ',').collect();
        if fields.len() < 7 {
            return Err(WireError::BadRecord(record.to_owned()));
        }
        let id = fields[0]
            .parse()
            .map_err(|_| WireError::BadNumber {
                field: "modaction id",
                value: fields[0].to_owned(),
            })?;
        let target = match fields[4] {
            "" | "None" => None,
            t => Some(t.to_owned()),
        };
        Ok(ModAction {
            id,
            kind: fields[1].to_owned(),
            actor: fields[2].to_owned(),
            ip: fields[3].to_owned(),
            target,
            time: ServerTime::parse(fields[5]).unwrap_or_default(),
            extra: fields[6].to_owned(),
        })
    }

    /// Parse one `modactions` page.
    pub fn parse_page(tail: &str) -> Vec<ModAction> {
        tail.split(';')
            .filter(|r| !r.is_empty())
            .filter_map(|r| ModAction::parse(r).ok())
            .collect()
    }

    /// Human-readable description in the moderation log's voice.
    pub fn describe(&self) -> String {
        let who = format!("{} ({})", self.actor, self.ip);
        let target = self.target.as_deref().unwrap_or("anon");
        match self.kind.as_str() {
            "anon" => {
                if self.extra_is_true() {
                    format!("{who} allowed anons in the group")
                } else {
                    format!("{who} prohibited anons in the group")
                }
            }
            "prxy" => {
                if self.extra_is_true() {
                    format!("{who} allowed proxies and VPNs in the group")
                } else {
                    format!("{who} prohibited proxies and VPNs in the group")
                }
            }
            "chrl" => match self.extra.parse::<u64>() {
                Ok(0) | Err(_) => format!("{who} disabled slow mode"),
                Ok(n) => format!("{who} enabled slow mode restricted to {n} seconds"),
            },
            "enlp" => match self.nlp_flags() {
                Some(0) | None => format!("{who} disabled auto-moderation."),
                Some(flags) => format!(
                    "{who} changed auto-moderation to block {}.",
                    join_and(&nlp_parts(flags))
                ),
            },
            "amod" => format!("{who} made {target} a moderator"),
            "rmod" => format!("{who} removed {target} from moderators"),
            "emod" => format!("{who} changed the moderator permissions of {target}"),
            "annc" => format!("{who} changed the group announcement"),
            "chbw" => format!("{who} changed the banned words"),
            "brdc" => {
                if self.extra_is_true() {
                    format!("{who} enabled broadcast mode")
                } else {
                    format!("{who} disabled broadcast mode")
                }
            }
            "chan" => {
                if self.extra_is_true() {
                    format!("{who} enabled channels in the group")
                } else {
                    format!("{who} disabled channels in the group")
                }
            }
            "cntr" => {
                if self.extra_is_true() {
                    format!("{who} made the visitor counter visible")
                } else {
                    format!("{who} hid the visitor counter")
                }
            }
            "cinm" => {
                if self.extra_is_true() {
                    format!("{who} set the group to close when no moderators are online")
                } else {
                    format!("{who} set the group to stay open without moderators")
                }
            }
            kind => format!("{who} performed action {kind}"),
        }
    }

    fn extra_is_true(&self) -> bool {
        self.extra == "true" || self.extra == "1"
    }

    /// The NLP extra is `[flags,mode]`; only the flags word matters here.
    fn nlp_flags(&self) -> Option<u64> {
        let inner = self.extra.strip_prefix('[')?.strip_suffix(']')?;
        inner.split(',').next()?.trim().parse().ok()
    }
}

fn nlp_parts(flags: u64) -> Vec<&'static str> {
    let mut parts = Vec::new();
    if flags & group::NLP_SINGLE_MSG != 0 {
        parts.push("nonsense messages (basic)");
    }
    if flags & group::NLP_MSG_QUEUE != 0 {
        parts.push("repetitious messages");
    }
    if flags & group::NLP_NGRAM != 0 {
        parts.push("nonsense messages (advanced)");
    }
    parts
}

fn join_and(parts: &[&str]) -> String {
    match parts {
        [] => String::new(),
        [one] => (*one).to_owned(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
