//! Handler kinds: command, message, and type-mask.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ch_client::{Event, event_type};

use crate::context::Context;
use crate::filter::FilterBox;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type EventFn = Arc<dyn Fn(Event, Context) -> HandlerFuture + Send + Sync>;
pub type CommandFn = Arc<dyn Fn(Event, Context, CommandArgs) -> HandlerFuture + Send + Sync>;

/// One registered event handler.
pub trait Handler: Send + Sync + 'static {
    fn check(&self, event: &Event) -> bool;
    fn invoke(&self, event: Event, ctx: Context) -> HandlerFuture;
}

/// The parsed command line of a matched command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    /// The matched command word, lowercased.
    pub command: String,
    /// Whitespace-split fields after the command word.
    pub arguments: Vec<String>,
    /// The raw remainder after the command word.
    pub argument: String,
    pub with_argument: bool,
    pub is_private: bool,
}

/// Matches prefixed commands in (non-self) group and private messages.
pub struct CommandHandler {
    prefix: String,
    commands: Vec<String>,
    filter: Option<FilterBox>,
    callback: CommandFn,
}

impl CommandHandler {
    pub fn new<I, S>(
        prefix: &str,
        commands: I,
        filter: Option<FilterBox>,
        callback: CommandFn,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CommandHandler {
            prefix: prefix.to_owned(),
            commands: commands
                .into_iter()
                .map(|c| c.as_ref().to_lowercase())
                .collect(),
            filter,
            callback,
        }
    }

    fn parse(&self, event: &Event) -> Option<CommandArgs> {
        let kind = event.kind();
        if kind & event_type::ANY_MESSAGE == 0 {
            return None;
        }
        let message = event.message()?;
        if message.user.is_self {
            return None;
        }
        parse_command(
            &self.prefix,
            &self.commands,
            &message.text,
            kind == event_type::PRIVATE_MESSAGE,
        )
    }
}

/// Strip leading whitespace and the prefix; the first field of the
/// remainder must be one of the command words.
fn parse_command(
    prefix: &str,
    commands: &[String],
    text: &str,
    is_private: bool,
) -> Option<CommandArgs> {
    let rest = text.trim_start().strip_prefix(prefix)?;
    let word = rest.split_whitespace().next()?;
    if !commands.iter().any(|c| c.eq_ignore_ascii_case(word)) {
        return None;
    }
    // `word` is the first whitespace-delimited field, so it starts at the
    // first non-space byte of `rest`.
    let word_start = rest.find(word).unwrap_or(0);
    let argument = rest[word_start + word.len()..].trim_start().to_owned();
    Some(CommandArgs {
        command: word.to_lowercase(),
        arguments: argument.split_whitespace().map(str::to_owned).collect(),
        with_argument: !argument.is_empty(),
        argument,
        is_private,
    })
}

impl Handler for CommandHandler {
    fn check(&self, event: &Event) -> bool {
        self.parse(event).is_some()
            && self.filter.as_ref().is_none_or(|f| f.check(event))
    }

    fn invoke(&self, event: Event, ctx: Context) -> HandlerFuture {
        match self.parse(&event) {
            Some(args) => (self.callback)(event, ctx, args),
            None => Box::pin(async {}),
        }
    }
}

/// Matches every (non-self) group and private message.
pub struct MessageHandler {
    filter: Option<FilterBox>,
    callback: EventFn,
}

impl MessageHandler {
    pub fn new(filter: Option<FilterBox>, callback: EventFn) -> Self {
        MessageHandler { filter, callback }
    }
}

impl Handler for MessageHandler {
    fn check(&self, event: &Event) -> bool {
        event.kind() & event_type::ANY_MESSAGE != 0
            && event.message().is_some_and(|m| !m.user.is_self)
            && self.filter.as_ref().is_none_or(|f| f.check(event))
    }

    fn invoke(&self, event: Event, ctx: Context) -> HandlerFuture {
        (self.callback)(event, ctx)
    }
}

/// Matches events whose kind is in the mask.
pub struct TypesHandler {
    mask: u64,
    filter: Option<FilterBox>,
    callback: EventFn,
}

impl TypesHandler {
    pub fn new(mask: u64, filter: Option<FilterBox>, callback: EventFn) -> Self {
        TypesHandler {
            mask,
            filter,
            callback,
        }
    }
}

impl Handler for TypesHandler {
    fn check(&self, event: &Event) -> bool {
        event.kind() & self.mask != 0
            && self.filter.as_ref().is_none_or(|f| f.check(event))
    }

    fn invoke(&self, event: Event, ctx: Context) -> HandlerFuture {
        (self.callback)(event, ctx)
    }
}
