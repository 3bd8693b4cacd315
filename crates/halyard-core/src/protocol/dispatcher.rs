//! Typed dispatch of parsed ADC commands.
//!
//! A receiver implements [`CommandHandler`] and overrides the methods
//! for the commands it cares about; everything else defaults to a
//! no-op. Unknown command codes are a dedicated [`CommandKind`]
//! variant and are dropped with a debug log, as are lines that fail to
//! parse.

use tracing::debug;

use super::command::{codes, Command};

/// The recognized command vocabulary, tagged by the 24-bit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Sup,
    Sta,
    Inf,
    Msg,
    Sch,
    Res,
    Ctm,
    Rcm,
    Gpa,
    Pas,
    Qui,
    Get,
    Gfi,
    Snd,
    Sid,
    Cmd,
    Nat,
    Rnt,
    Zon,
    Zof,
    Tcp,
    Pmi,
    /// Any code outside the recognized set.
    Unknown(u32),
}

impl CommandKind {
    /// Classify a 24-bit command code.
    pub fn from_code(code: u32) -> Self {
        match code {
            codes::SUP => Self::Sup,
            codes::STA => Self::Sta,
            codes::INF => Self::Inf,
            codes::MSG => Self::Msg,
            codes::SCH => Self::Sch,
            codes::RES => Self::Res,
            codes::CTM => Self::Ctm,
            codes::RCM => Self::Rcm,
            codes::GPA => Self::Gpa,
            codes::PAS => Self::Pas,
            codes::QUI => Self::Qui,
            codes::GET => Self::Get,
            codes::GFI => Self::Gfi,
            codes::SND => Self::Snd,
            codes::SID => Self::Sid,
            codes::CMD => Self::Cmd,
            codes::NAT => Self::Nat,
            codes::RNT => Self::Rnt,
            codes::ZON => Self::Zon,
            codes::ZOF => Self::Zof,
            codes::TCP => Self::Tcp,
            codes::PMI => Self::Pmi,
            other => Self::Unknown(other),
        }
    }
}

/// Receiver of dispatched commands.
///
/// Every method defaults to a no-op so implementations only override
/// the commands they handle.
#[allow(unused_variables)]
pub trait CommandHandler {
    fn on_sup(&mut self, cmd: &Command) {}
    fn on_sta(&mut self, cmd: &Command) {}
    fn on_inf(&mut self, cmd: &Command) {}
    fn on_msg(&mut self, cmd: &Command) {}
    fn on_sch(&mut self, cmd: &Command) {}
    fn on_res(&mut self, cmd: &Command) {}
    fn on_ctm(&mut self, cmd: &Command) {}
    fn on_rcm(&mut self, cmd: &Command) {}
    fn on_gpa(&mut self, cmd: &Command) {}
    fn on_pas(&mut self, cmd: &Command) {}
    fn on_qui(&mut self, cmd: &Command) {}
    fn on_get(&mut self, cmd: &Command) {}
    fn on_gfi(&mut self, cmd: &Command) {}
    fn on_snd(&mut self, cmd: &Command) {}
    fn on_sid(&mut self, cmd: &Command) {}
    fn on_cmd(&mut self, cmd: &Command) {}
    fn on_nat(&mut self, cmd: &Command) {}
    fn on_rnt(&mut self, cmd: &Command) {}
    fn on_zon(&mut self, cmd: &Command) {}
    fn on_zof(&mut self, cmd: &Command) {}
    fn on_tcp(&mut self, cmd: &Command) {}
    fn on_pmi(&mut self, cmd: &Command) {}
}

/// Route a parsed command to the matching handler method.
pub fn dispatch<H: CommandHandler + ?Sized>(handler: &mut H, cmd: &Command) {
    match CommandKind::from_code(cmd.code()) {
        CommandKind::Sup => handler.on_sup(cmd),
        CommandKind::Sta => handler.on_sta(cmd),
        CommandKind::Inf => handler.on_inf(cmd),
        CommandKind::Msg => handler.on_msg(cmd),
        CommandKind::Sch => handler.on_sch(cmd),
        CommandKind::Res => handler.on_res(cmd),
        CommandKind::Ctm => handler.on_ctm(cmd),
        CommandKind::Rcm => handler.on_rcm(cmd),
        CommandKind::Gpa => handler.on_gpa(cmd),
        CommandKind::Pas => handler.on_pas(cmd),
        CommandKind::Qui => handler.on_qui(cmd),
        CommandKind::Get => handler.on_get(cmd),
        CommandKind::Gfi => handler.on_gfi(cmd),
        CommandKind::Snd => handler.on_snd(cmd),
        CommandKind::Sid => handler.on_sid(cmd),
        CommandKind::Cmd => handler.on_cmd(cmd),
        CommandKind::Nat => handler.on_nat(cmd),
        CommandKind::Rnt => handler.on_rnt(cmd),
        CommandKind::Zon => handler.on_zon(cmd),
        CommandKind::Zof => handler.on_zof(cmd),
        CommandKind::Tcp => handler.on_tcp(cmd),
        CommandKind::Pmi => handler.on_pmi(cmd),
        CommandKind::Unknown(code) => {
            debug!(four_cc = %cmd.four_cc(), code, "Dropping unknown command");
        }
    }
}

/// Parse a raw line and dispatch it.
///
/// Lines that fail to parse are debug-logged and dropped. `on_parsed`
/// runs after a successful parse and before dispatch; it is skipped in
/// legacy (`nmdc`) mode.
pub fn dispatch_line<H: CommandHandler + ?Sized>(
    handler: &mut H,
    line: &str,
    nmdc: bool,
    on_parsed: Option<&dyn Fn(&Command)>,
) {
    let cmd = match Command::parse(line, nmdc) {
        Ok(cmd) => cmd,
        Err(err) => {
            debug!(%err, line = %line.trim_end(), "Invalid ADC command");
            return;
        }
    };

    if !nmdc {
        if let Some(callback) = on_parsed {
            callback(&cmd);
        }
    }

    dispatch(handler, &cmd);
}
