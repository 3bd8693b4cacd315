//! ADC command codec.
//!
//! Wire format: `<type><cmd>[ <from>][ <to>][ <features>]( <param>)*\n`
//!
//! The codec ensures:
//! - Payloads are escaped so a command always fits a single line
//! - Session IDs travel as exactly four base32 characters
//! - Parameter order is preserved (duplicates are legal and looked up
//!   by prefix + position)

use std::fmt;

use crate::constants::{BASE32_ALPHABET, HUB_SID};
use crate::error::{Error, Result};

/// Pack three ASCII command letters into the canonical 24-bit code.
pub const fn fourcc(cmd: &[u8; 3]) -> u32 {
    (cmd[0] as u32) | ((cmd[1] as u32) << 8) | ((cmd[2] as u32) << 16)
}

/// Recognized command codes.
pub mod codes {
    use super::fourcc;

    pub const SUP: u32 = fourcc(b"SUP");
    pub const STA: u32 = fourcc(b"STA");
    pub const INF: u32 = fourcc(b"INF");
    pub const MSG: u32 = fourcc(b"MSG");
    pub const SCH: u32 = fourcc(b"SCH");
    pub const RES: u32 = fourcc(b"RES");
    pub const CTM: u32 = fourcc(b"CTM");
    pub const RCM: u32 = fourcc(b"RCM");
    pub const GPA: u32 = fourcc(b"GPA");
    pub const PAS: u32 = fourcc(b"PAS");
    pub const QUI: u32 = fourcc(b"QUI");
    pub const GET: u32 = fourcc(b"GET");
    pub const GFI: u32 = fourcc(b"GFI");
    pub const SND: u32 = fourcc(b"SND");
    pub const SID: u32 = fourcc(b"SID");
    pub const CMD: u32 = fourcc(b"CMD");
    pub const NAT: u32 = fourcc(b"NAT");
    pub const RNT: u32 = fourcc(b"RNT");
    pub const ZON: u32 = fourcc(b"ZON");
    pub const ZOF: u32 = fourcc(b"ZOF");
    pub const TCP: u32 = fourcc(b"TCP");
    pub const PMI: u32 = fourcc(b"PMI");
}

/// Message type byte preceding the command letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// `B` - broadcast to all hub users; carries a `from` SID.
    Broadcast,
    /// `C` - direct client-client connection; no addressing.
    Client,
    /// `D` - directed to one user; carries `from` and `to` SIDs.
    Direct,
    /// `E` - directed, echoed back to the sender; carries `from` and `to`.
    Echo,
    /// `F` - feature broadcast; carries `from` and a feature filter.
    Feature,
    /// `H` - client to hub; no addressing.
    Hub,
    /// `I` - hub to client; no addressing.
    Info,
    /// `U` - UDP message; addressed by CID instead of SID.
    Udp,
}

impl CommandType {
    /// Map a wire byte to a type, if valid.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'B' => Some(Self::Broadcast),
            b'C' => Some(Self::Client),
            b'D' => Some(Self::Direct),
            b'E' => Some(Self::Echo),
            b'F' => Some(Self::Feature),
            b'H' => Some(Self::Hub),
            b'I' => Some(Self::Info),
            b'U' => Some(Self::Udp),
            _ => None,
        }
    }

    /// The wire byte for this type.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Broadcast => b'B',
            Self::Client => b'C',
            Self::Direct => b'D',
            Self::Echo => b'E',
            Self::Feature => b'F',
            Self::Hub => b'H',
            Self::Info => b'I',
            Self::Udp => b'U',
        }
    }

    /// Whether the header carries a `from` SID.
    fn has_from(self) -> bool {
        matches!(
            self,
            Self::Broadcast | Self::Direct | Self::Echo | Self::Feature
        )
    }

    /// Whether the header carries a `to` SID.
    fn has_to(self) -> bool {
        matches!(self, Self::Direct | Self::Echo)
    }
}

/// A 32-bit session identifier.
///
/// The wire form is exactly four characters of the base32 alphabet,
/// packed little-endian into the integer value. [`Sid::HUB`] is
/// reserved and never assigned to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sid(u32);

impl Sid {
    /// The reserved hub session ID.
    pub const HUB: Sid = Sid(HUB_SID);

    /// Wrap a raw session ID value.
    pub fn new(value: u32) -> Self {
        Sid(value)
    }

    /// Parse a 4-character base32 wire token.
    pub fn parse(token: &str) -> Result<Self> {
        let bytes = token.as_bytes();
        if bytes.len() != 4 {
            return Err(Error::parse(format!("invalid SID length: {token:?}")));
        }
        if !bytes.iter().all(|b| BASE32_ALPHABET.contains(b)) {
            return Err(Error::parse(format!("invalid SID character: {token:?}")));
        }
        Ok(Sid(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
    }

    /// The raw 32-bit value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Whether this is the reserved hub SID.
    pub fn is_hub(self) -> bool {
        self.0 == HUB_SID
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// Whether a feature token is required or excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// `+` - receivers must support the feature.
    Required,
    /// `-` - receivers must not support the feature.
    Excluded,
}

/// Escape a parameter payload for the wire.
///
/// `old` selects the legacy NMDC-bridge form that prepends a plain
/// backslash instead of using the `\s`/`\n`/`\\` alphabet.
pub fn escape(value: &str, old: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ' ' | '\n' | '\\' if old => {
                out.push('\\');
                out.push(c);
            }
            ' ' => out.push_str("\\s"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`] for a single token.
///
/// With `old` set, a backslash passes the following character through
/// verbatim (the legacy encoding prepends a backslash to the raw
/// byte). Otherwise only `\s`, `\n` and `\\` are accepted. A trailing
/// backslash fails in both modes.
pub fn unescape(value: &str, old: bool) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => return Err(Error::parse("escape at end of line")),
            Some(escaped) if old => out.push(escaped),
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(Error::parse(format!("unknown escape: \\{other}")));
            }
        }
    }
    Ok(out)
}

/// A parsed or constructed ADC command.
///
/// The three command letters are stored only as the canonical 24-bit
/// integer; [`Command::letters`] and [`Command::name`] derive the
/// character views from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: u32,
    ctype: CommandType,
    from: Sid,
    to: Sid,
    features: String,
    parameters: Vec<String>,
}

impl Command {
    /// Create an empty command of the given code and type.
    pub fn new(code: u32, ctype: CommandType) -> Self {
        Command {
            code,
            ctype,
            from: Sid::default(),
            to: Sid::default(),
            features: String::new(),
            parameters: Vec::new(),
        }
    }

    /// Create a command addressed to a single session.
    pub fn direct(code: u32, to: Sid, ctype: CommandType) -> Self {
        let mut cmd = Command::new(code, ctype);
        cmd.to = to;
        cmd
    }

    /// Parse a single line (the trailing delimiter may be present).
    ///
    /// With `nmdc` the line uses the `$ADC<cmd>` legacy header: the
    /// type byte is absent and filled in as `C`.
    pub fn parse(line: &str, nmdc: bool) -> Result<Self> {
        let line = line
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(line);
        let line = if nmdc {
            line.strip_suffix('|').unwrap_or(line)
        } else {
            line
        };
        let bytes = line.as_bytes();

        let (ctype, letters, body_start) = if nmdc {
            // "$ADCxxx param..."
            if bytes.len() < 7 {
                return Err(Error::parse("line too short"));
            }
            (CommandType::Client, [bytes[4], bytes[5], bytes[6]], 8)
        } else {
            // "yxxx param..."
            if bytes.len() < 4 {
                return Err(Error::parse("line too short"));
            }
            let ctype = CommandType::from_byte(bytes[0])
                .ok_or_else(|| Error::parse(format!("invalid message type: {}", bytes[0] as char)))?;
            (ctype, [bytes[1], bytes[2], bytes[3]], 5)
        };

        if !letters.iter().all(u8::is_ascii_uppercase) {
            return Err(Error::parse("command letters must be ASCII uppercase"));
        }

        let mut cmd = Command::new(fourcc(&letters), ctype);
        if body_start >= line.len() {
            return Ok(cmd);
        }
        let body = line
            .get(body_start..)
            .ok_or_else(|| Error::parse("malformed header"))?;

        let mut from_set = nmdc;
        let mut to_set = false;
        let mut features_set = false;
        let mut cur = String::new();

        let mut flush = |cmd: &mut Command, cur: &mut String| -> Result<()> {
            if cmd.ctype.has_from() && !from_set {
                cmd.from = Sid::parse(cur)?;
                from_set = true;
            } else if cmd.ctype.has_to() && !to_set {
                cmd.to = Sid::parse(cur)?;
                to_set = true;
            } else if cmd.ctype == CommandType::Feature && !features_set {
                validate_features(cur)?;
                cmd.features = std::mem::take(cur);
                features_set = true;
                return Ok(());
            } else {
                cmd.parameters.push(std::mem::take(cur));
                return Ok(());
            }
            cur.clear();
            Ok(())
        };

        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            match c {
                // Legacy lines use the old escape form: the backslash
                // passes the next character through verbatim.
                '\\' => match chars.next() {
                    None => return Err(Error::parse("escape at end of line")),
                    Some(escaped) if nmdc => cur.push(escaped),
                    Some('s') => cur.push(' '),
                    Some('n') => cur.push('\n'),
                    Some('\\') => cur.push('\\'),
                    Some(other) => {
                        return Err(Error::parse(format!("unknown escape: \\{other}")));
                    }
                },
                ' ' => flush(&mut cmd, &mut cur)?,
                _ => cur.push(c),
            }
        }
        if !cur.is_empty() {
            flush(&mut cmd, &mut cur)?;
        }

        Ok(cmd)
    }

    /// The canonical 24-bit command code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// The three command letters derived from the code.
    pub fn letters(&self) -> [u8; 3] {
        let b = self.code.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    /// The command name as a 3-character string.
    pub fn name(&self) -> String {
        self.letters().iter().map(|&b| b as char).collect()
    }

    /// The 4-character header (type byte + command letters).
    pub fn four_cc(&self) -> String {
        let mut s = String::with_capacity(4);
        s.push(self.ctype.as_byte() as char);
        s.push_str(&self.name());
        s
    }

    /// The message type.
    pub fn command_type(&self) -> CommandType {
        self.ctype
    }

    /// Replace the message type.
    pub fn set_command_type(&mut self, ctype: CommandType) -> &mut Self {
        self.ctype = ctype;
        self
    }

    /// The sender session ID (meaningful for `B`/`D`/`E`/`F`).
    pub fn from(&self) -> Sid {
        self.from
    }

    /// Set the sender session ID.
    pub fn set_from(&mut self, sid: Sid) -> &mut Self {
        self.from = sid;
        self
    }

    /// The recipient session ID (meaningful for `D`/`E`).
    pub fn to(&self) -> Sid {
        self.to
    }

    /// Set the recipient session ID.
    pub fn set_to(&mut self, sid: Sid) -> &mut Self {
        self.to = sid;
        self
    }

    /// The raw feature filter expression (only set for `F`).
    pub fn features(&self) -> &str {
        &self.features
    }

    /// Append a feature token to the filter expression.
    pub fn add_feature(&mut self, feature: &str, kind: FeatureKind) -> &mut Self {
        self.features.push(match kind {
            FeatureKind::Required => '+',
            FeatureKind::Excluded => '-',
        });
        self.features.push_str(feature);
        self
    }

    /// The ordered parameter list.
    pub fn params(&self) -> &[String] {
        &self.parameters
    }

    /// A parameter by position.
    pub fn param(&self, n: usize) -> Option<&str> {
        self.parameters.get(n).map(String::as_str)
    }

    /// Append a named parameter (2-letter code + value).
    pub fn add_param(&mut self, name: &str, value: &str) -> &mut Self {
        let mut param = String::with_capacity(name.len() + value.len());
        param.push_str(name);
        param.push_str(value);
        self.parameters.push(param);
        self
    }

    /// Append a positional parameter stored verbatim.
    pub fn add_positional(&mut self, value: impl Into<String>) -> &mut Self {
        self.parameters.push(value.into());
        self
    }

    /// The value of the first parameter carrying the 2-letter `name`
    /// prefix, scanning from position `start`.
    pub fn named(&self, name: &str, start: usize) -> Option<&str> {
        self.parameters
            .iter()
            .skip(start)
            .find(|p| p.len() >= 2 && p.starts_with(name))
            .map(|p| &p[2..])
    }

    /// All values carrying the 2-letter `name` prefix, in order.
    pub fn named_all(&self, name: &str, start: usize) -> Vec<&str> {
        self.parameters
            .iter()
            .skip(start)
            .filter(|p| p.len() >= 2 && p.starts_with(name))
            .map(|p| &p[2..])
            .collect()
    }

    /// Whether a bare 2-letter flag is present from position `start`.
    pub fn has_flag(&self, name: &str, start: usize) -> bool {
        self.parameters.iter().skip(start).any(|p| p == name)
    }

    /// Serialize using the stored `from` SID.
    pub fn to_line(&self) -> String {
        self.render(self.from, None, false)
    }

    /// Serialize with an explicit sender SID.
    pub fn to_line_from(&self, sid: Sid, nmdc: bool) -> String {
        self.render(sid, None, nmdc)
    }

    /// Serialize with a base32 CID in place of the sender SID
    /// (outbound UDP signalling).
    pub fn to_line_cid(&self, cid: &str) -> String {
        self.render(self.from, Some(cid), false)
    }

    fn render(&self, from: Sid, cid: Option<&str>, nmdc: bool) -> String {
        let mut out = String::new();
        if nmdc {
            out.push_str("$ADC");
            out.push_str(&self.name());
        } else {
            out.push(self.ctype.as_byte() as char);
            out.push_str(&self.name());
        }

        if let Some(cid) = cid {
            out.push(' ');
            out.push_str(cid);
        } else if !nmdc {
            if self.ctype.has_from() {
                out.push(' ');
                out.push_str(&from.to_string());
            }
            if self.ctype.has_to() {
                out.push(' ');
                out.push_str(&self.to.to_string());
            }
            if self.ctype == CommandType::Feature {
                out.push(' ');
                out.push_str(&self.features);
            }
        }

        for param in &self.parameters {
            out.push(' ');
            out.push_str(&escape(param, nmdc));
        }
        out.push(if nmdc { '|' } else { '\n' });
        out
    }
}

/// A feature expression is a concatenation of 5-byte groups, each a
/// `+`/`-` sign followed by a 4-character feature name.
fn validate_features(features: &str) -> Result<()> {
    let bytes = features.as_bytes();
    if bytes.len() % 5 != 0 {
        return Err(Error::parse(format!(
            "invalid feature list length: {features:?}"
        )));
    }
    if !bytes.chunks(5).all(|c| c[0] == b'+' || c[0] == b'-') {
        return Err(Error::parse(format!("invalid feature list: {features:?}")));
    }
    Ok(())
}
