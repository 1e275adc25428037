//! Frame codec for the colon-delimited line protocol.
//!
//! A frame on the wire is `head[:arg1:arg2:…]` followed by exactly one
//! terminator: `\r\n` for ordinary commands or `\x00` for the session
//! commands (`v`, `bauth`, `tlogin`). The distinction matters on send and
//! MUST be preserved; on receive both are stripped.
//!
//! The head is the ASCII prefix up to the first `:`. A frame with an empty
//! head is the server's reply to a keepalive ping.

/// Which byte sequence ends the frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminator {
    #[default]
    CrLf,
    Nul,
}

impl Terminator {
    pub fn as_str(self) -> &'static str {
        match self {
            Terminator::CrLf => "\r\n",
            Terminator::Nul => "\x00",
        }
    }
}

/// One decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub head: String,
    pub args: Vec<String>,
    pub terminator: Terminator,
}

impl Frame {
    /// A `\r\n`-terminated frame (the common case).
    pub fn new<H: Into<String>>(head: H, args: &[&str]) -> Self {
        Frame {
            head: head.into(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            terminator: Terminator::CrLf,
        }
    }

    /// A `\x00`-terminated session frame (`v`, `bauth`, `tlogin`, …).
    pub fn session<H: Into<String>>(head: H, args: &[&str]) -> Self {
        Frame {
            terminator: Terminator::Nul,
            ..Frame::new(head, args)
        }
    }

    /// Decode one received frame. Strips a single trailing `\r\n` or `\x00`
    /// and splits the remainder on `:`. Never fails: unknown heads are the
    /// dispatcher's problem, not the codec's.
    pub fn decode(raw: &str) -> Self {
        let (body, terminator) = if let Some(stripped) = raw.strip_suffix("\r\n") {
            (stripped, Terminator::CrLf)
        } else if let Some(stripped) = raw.strip_suffix('\x00') {
            (stripped, Terminator::Nul)
        } else {
            (raw, Terminator::CrLf)
        };
        match body.split_once(':') {
            Some((head, rest)) => Frame {
                head: head.to_owned(),
                args: rest.split(':').map(str::to_owned).collect(),
                terminator,
            },
            None => Frame {
                head: body.to_owned(),
                args: Vec::new(),
                terminator,
            },
        }
    }

    /// Encode for the wire: fields joined with `:`, terminator appended
    /// with no separator.
    pub fn encode(&self) -> String {
        let mut out = self.head.clone();
        for arg in &self.args {
            out.push(':');
            out.push_str(arg);
        }
        out.push_str(self.terminator.as_str());
        out
    }

    /// The server answers keepalive pings with an empty frame.
    pub fn is_pong(&self) -> bool {
        self.head.is_empty() && self.args.is_empty()
    }

    /// Argument at `i`, or `""` — the protocol treats absent and empty
    /// fields the same way.
    pub fn arg(&self, i: usize) -> &str {
        self.args.get(i).map_or("", String::as_str)
    }

    /// Re-join `args[i..]` with `:`. Message bodies may legally contain
    /// colons, so the tail of a `b`/`msg` frame has to be reassembled.
    pub fn tail(&self, i: usize) -> String {
        self.args.get(i..).unwrap_or(&[]).join(":")
    }
}
