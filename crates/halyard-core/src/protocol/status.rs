//! `STA` status payloads.
//!
//! A status command carries a three-digit decimal at parameter 0:
//! one severity digit followed by a two-digit code from the fixed
//! error table, then a human description at parameter 1.

use super::command::{codes, Command, CommandType};

/// Status severity digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Severity {
    /// Informational, the operation succeeded.
    Success = 0,
    /// The operation failed but the connection may continue.
    Recoverable = 1,
    /// The connection will be terminated.
    Fatal = 2,
}

impl Severity {
    /// Map a decimal digit to a severity.
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Success),
            1 => Some(Self::Recoverable),
            2 => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// The fixed two-digit status code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Generic = 0,
    HubGeneric = 10,
    HubFull = 11,
    HubDisabled = 12,
    LoginGeneric = 20,
    NickInvalid = 21,
    NickTaken = 22,
    BadPassword = 23,
    CidTaken = 24,
    CommandAccess = 25,
    RegisteredOnly = 26,
    InvalidPid = 27,
    BannedGeneric = 30,
    PermBanned = 31,
    TempBanned = 32,
    ProtocolGeneric = 40,
    ProtocolUnsupported = 41,
    ConnectFailed = 42,
    InfMissing = 43,
    BadState = 44,
    FeatureMissing = 45,
    BadIp = 46,
    NoHubHash = 47,
    TransferGeneric = 50,
    FileNotAvailable = 51,
    FilePartNotAvailable = 52,
    SlotsFull = 53,
    NoClientHash = 54,
    HbriTimeout = 55,
    FileAccessDenied = 60,
    UnknownUser = 61,
    TlsRequired = 62,
}

impl StatusCode {
    /// Map a two-digit value to a code from the table.
    pub fn from_code(code: u8) -> Option<Self> {
        use StatusCode::*;
        let v = match code {
            0 => Generic,
            10 => HubGeneric,
            11 => HubFull,
            12 => HubDisabled,
            20 => LoginGeneric,
            21 => NickInvalid,
            22 => NickTaken,
            23 => BadPassword,
            24 => CidTaken,
            25 => CommandAccess,
            26 => RegisteredOnly,
            27 => InvalidPid,
            30 => BannedGeneric,
            31 => PermBanned,
            32 => TempBanned,
            40 => ProtocolGeneric,
            41 => ProtocolUnsupported,
            42 => ConnectFailed,
            43 => InfMissing,
            44 => BadState,
            45 => FeatureMissing,
            46 => BadIp,
            47 => NoHubHash,
            50 => TransferGeneric,
            51 => FileNotAvailable,
            52 => FilePartNotAvailable,
            53 => SlotsFull,
            54 => NoClientHash,
            55 => HbriTimeout,
            60 => FileAccessDenied,
            61 => UnknownUser,
            62 => TlsRequired,
            _ => return None,
        };
        Some(v)
    }
}

/// A decoded `STA` parameter 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub severity: Severity,
    pub code: StatusCode,
}

impl Status {
    /// Encode as the three-digit wire form.
    pub fn encode(self) -> String {
        format!("{}{:02}", self.severity as u8, self.code as u8)
    }

    /// Decode the three-digit wire form of a status parameter.
    pub fn decode(param: &str) -> Option<Self> {
        let bytes = param.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let severity = Severity::from_digit(bytes[0] - b'0')?;
        let code = StatusCode::from_code((bytes[1] - b'0') * 10 + (bytes[2] - b'0'))?;
        Some(Status { severity, code })
    }
}

impl Command {
    /// Build a `STA` command carrying the given status and description.
    pub fn status(severity: Severity, code: StatusCode, description: &str) -> Command {
        let mut cmd = Command::new(codes::STA, CommandType::Client);
        cmd.add_positional(Status { severity, code }.encode());
        cmd.add_positional(description);
        cmd
    }
}
