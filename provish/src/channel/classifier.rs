//! Output classification for interactive shell sessions.
//!
//! Raw console output is normalized (control sequences, carriage returns,
//! line feeds and whitespace removed) and matched against the finite set of
//! interaction patterns that show up while scripting an installation: shell
//! prompts, sudo password prompts, SSH host-key questions, transfer progress
//! and a fixed list of failure signatures.
//!
//! Everything here is a pure function of its input and can be called from
//! any number of sessions at once.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use vte::{Parser, Perform};

/// Escape remnants whose ESC byte was lost upstream (`[0m`, `[01;32m`,
/// or a literal `\u001b[` text sequence).
static ORPHAN_SEQUENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\\u001b\[[0-9;]*[A-Za-z~]?|\[[0-9]{1,2}(?:;[0-9]{1,2})*[mK]").ok()
});

static ERR_MSG_SPLIT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r":|--").ok());

/// Semantic event derived from a console buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassifiedEvent {
    /// The buffer ends with a shell prompt terminator.
    Ready,
    /// sudo asks for the active account's password.
    PasswordPrompt,
    /// sudo rejected the password ("try again", "incorrect password").
    SudoRetry,
    /// SSH asks to confirm an unknown host key.
    HostKeyConfirm,
    /// A generic yes/no question.
    YesNoPrompt,
    /// "Permission denied", including public-key denial.
    PermissionDenied,
    /// "No such file or directory".
    NoSuchFile,
    /// The command (or the elevation prefix) does not exist.
    CommandNotFound,
    /// A curl-style transfer failure.
    TransferFailed,
    /// A transfer reported 100%.
    TransferComplete,
    /// No route to host, timed out or lost connection.
    Timeout,
    /// None of the above.
    Unrecognized,
}

impl ClassifiedEvent {
    /// Short reason used when the event fails a command.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Ready => "console ready",
            Self::PasswordPrompt => "password prompt",
            Self::SudoRetry => "sudo password rejected",
            Self::HostKeyConfirm => "host key confirmation",
            Self::YesNoPrompt => "yes/no prompt",
            Self::PermissionDenied => "permission denied",
            Self::NoSuchFile => "no such file",
            Self::CommandNotFound => "command not found",
            Self::TransferFailed => "curl failed",
            Self::TransferComplete => "transfer complete",
            Self::Timeout => "connection timed out",
            Self::Unrecognized => "unrecognized output",
        }
    }

    /// Whether this event is a failure signature for a running command.
    ///
    /// `Timeout` is not one: a dropped nested connection still ends at a
    /// prompt, and the session-level read timeout covers a dead channel.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::NoSuchFile | Self::CommandNotFound | Self::TransferFailed
        )
    }
}

impl fmt::Display for ClassifiedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A buffer's normalized form together with its event tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The event this buffer represents.
    pub event: ClassifiedEvent,

    /// The normalized buffer the event was derived from.
    pub normalized: String,
}

impl Classification {
    /// Classify a raw buffer against every predicate.
    pub fn of(raw: &[u8], account: &str) -> Self {
        let normalized = normalize(raw);
        Self {
            event: classify(&normalized, account),
            normalized,
        }
    }

    /// Classify a raw buffer for prompt readiness only.
    pub fn readiness_of(raw: &[u8]) -> Self {
        let normalized = normalize(raw);
        Self {
            event: classify_readiness(&normalized),
            normalized,
        }
    }
}

/// Map a normalized buffer to a single event.
///
/// Predicates are tried in a fixed priority order so that a failure
/// signature printed just before the prompt wins over the prompt itself.
pub fn classify(normalized: &str, account: &str) -> ClassifiedEvent {
    if is_password_prompt(normalized, account) {
        ClassifiedEvent::PasswordPrompt
    } else if is_sudo_retry(normalized) {
        ClassifiedEvent::SudoRetry
    } else if is_command_not_found(normalized) {
        ClassifiedEvent::CommandNotFound
    } else if is_no_such_file(normalized) {
        ClassifiedEvent::NoSuchFile
    } else if is_transfer_failed(normalized) {
        ClassifiedEvent::TransferFailed
    } else if is_console_ready(normalized) {
        ClassifiedEvent::Ready
    } else if is_timeout_indicator(normalized) {
        ClassifiedEvent::Timeout
    } else if is_unknown_host_key_add_confirmation(normalized)
        || is_host_key_confirmation_needed(normalized)
    {
        ClassifiedEvent::HostKeyConfirm
    } else if is_yes_no_prompt(normalized) {
        ClassifiedEvent::YesNoPrompt
    } else if is_permission_denied(normalized) {
        ClassifiedEvent::PermissionDenied
    } else if is_transfer_complete(normalized) {
        ClassifiedEvent::TransferComplete
    } else {
        ClassifiedEvent::Unrecognized
    }
}

/// Map a normalized buffer to `Ready` or `Unrecognized`.
pub fn classify_readiness(normalized: &str) -> ClassifiedEvent {
    if is_console_ready(normalized) {
        ClassifiedEvent::Ready
    } else {
        ClassifiedEvent::Unrecognized
    }
}

/// vte performer that keeps printable text, newlines and tabs.
struct ControlStripper {
    out: String,
}

impl Perform for ControlStripper {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.out.push('\n'),
            b'\t' => self.out.push('\t'),
            _ => {}
        }
    }
}

/// Strip ANSI/VT escape sequences and carriage returns, keeping line breaks.
///
/// Invalid UTF-8 is replaced rather than rejected, so this never fails.
pub fn strip_control(raw: &[u8]) -> String {
    let mut parser = Parser::new();
    let mut stripper = ControlStripper {
        out: String::with_capacity(raw.len()),
    };
    parser.advance(&mut stripper, raw);

    match ORPHAN_SEQUENCE.as_ref() {
        Some(re) => re.replace_all(&stripper.out, "").into_owned(),
        None => stripper.out,
    }
}

/// Normalize a raw buffer: strip control sequences and drop all whitespace.
pub fn normalize(raw: &[u8]) -> String {
    strip_control(raw)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Normalize a text buffer.
pub fn normalize_str(raw: &str) -> String {
    normalize(raw.as_bytes())
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

pub fn is_console_ready(normalized: &str) -> bool {
    normalized.ends_with(['#', '$', '>'])
}

/// sudo prompt for `account`, in English or Chinese locales.
pub fn is_password_prompt(normalized: &str, account: &str) -> bool {
    let account = normalize_str(account);
    normalized.ends_with(&format!("passwordfor{account}:"))
        || normalized.ends_with(&format!("{account}的密码:"))
        || normalized.ends_with(&format!("{account}的密码："))
}

/// Any login-style password prompt.
pub fn is_login_password_prompt(normalized: &str) -> bool {
    normalized.ends_with("assword:") || normalized.ends_with("Password:")
}

pub fn is_sudo_retry(normalized: &str) -> bool {
    let lower = normalized.to_lowercase();
    contains_any(&lower, &["tryagain", "incorrectpassword", "请重试"])
}

pub fn is_key_too_open(normalized: &str) -> bool {
    contains_any(normalized, &["tooopen", "ignorekey"])
}

pub fn is_permission_denied(normalized: &str) -> bool {
    normalized.contains("Permissiondenied")
}

pub fn is_public_key_denied(normalized: &str) -> bool {
    normalized.contains("Permissiondenied(publickey")
}

pub fn is_invalid_key(normalized: &str) -> bool {
    normalized.contains("passphraseforkey")
}

pub fn is_timeout_indicator(normalized: &str) -> bool {
    let lower = normalized.to_lowercase();
    contains_any(
        &lower,
        &[
            "lostconnection",
            "noroutetohost",
            "connectiontimedout",
            "connectiontimeout",
        ],
    )
}

pub fn is_key_login_required(normalized: &str) -> bool {
    normalized.contains("publickey,gssapi-keyex,gssapi-with-mic")
}

pub fn is_connection_refused(normalized: &str) -> bool {
    normalized.contains("Connectionrefused")
}

/// SSH printed a host key fingerprint and wants confirmation.
pub fn is_host_key_confirmation_needed(normalized: &str) -> bool {
    contains_any(normalized, &["fingerprint:", "fingerprintis"])
}

pub fn is_unknown_host_key_add_confirmation(normalized: &str) -> bool {
    normalized.contains("tothelistofknownhosts")
}

pub fn is_yes_no_prompt(normalized: &str) -> bool {
    contains_any(normalized, &["yes/no", "'yes'or'no':"])
}

/// Remove yes/no markers from a normalized buffer.
pub fn clear_yes_no(normalized: &str) -> String {
    normalized.replace("yes/no", "").replace("'yes'or'no':", "")
}

pub fn has_last_login(normalized: &str) -> bool {
    normalized.contains("Lastlogin")
}

pub fn is_no_such_file(normalized: &str) -> bool {
    normalized.to_lowercase().contains("nosuchfileordirectory")
}

/// bash/csh "command not found" and sh/ksh "foo: not found".
pub fn is_command_not_found(normalized: &str) -> bool {
    let lower = normalized.to_lowercase();
    contains_any(&lower, &["commandnotfound", ":notfound"])
}

/// The shell could not find the elevation command itself.
pub fn is_elevation_missing(normalized: &str, elevation_command: &str) -> bool {
    let lower = normalized.to_lowercase();
    let command = elevation_command.trim().to_lowercase();
    lower.contains(&format!("{command}:notfound"))
        || lower.contains(&format!("{command}:commandnotfound"))
}

pub fn is_transfer_complete(normalized: &str) -> bool {
    normalized.contains("100%")
}

/// curl-style error signatures, matched case-insensitively.
pub fn is_transfer_failed(normalized: &str) -> bool {
    let lower = normalized.to_lowercase();
    contains_any(
        &lower,
        &[
            "failedconnectto",
            "connectiontimedout",
            "couldnotreso",
            "connectionrefused",
            "couldn'tconnect",
            "sockettimeout",
            "notinstalled",
            "error",
            "resolvehost",
        ],
    )
}

/// Installation script success marker, matched on un-normalized text.
pub fn is_setup_done(text: &str) -> bool {
    text.contains("setup done") && text.contains("install_success")
}

/// Installation script failure marker, matched on un-normalized text.
pub fn is_setup_failed(text: &str) -> bool {
    text.contains("setup failed")
}

/// Second `:`/`--` separated field of a script error line.
pub fn parse_err_msg(text: &str) -> Option<&str> {
    ERR_MSG_SPLIT.as_ref()?.split(text).nth(1)
}

/// Whether `output` is only a (possibly garbled) echo of `command`.
///
/// Some AIX shells echo a truncated copy of what was typed. The alphabetic
/// characters of one are tested as a subsequence of the other's.
// TODO: tighten this for short commands; their letters are often a
// subsequence of unrelated output, which keeps the exchange in `Sent`.
pub fn is_echo_of(command: &str, output: &str) -> bool {
    let cmd: Vec<char> = command.chars().filter(|c| c.is_alphabetic()).collect();
    let out: Vec<char> = output.chars().filter(|c| c.is_alphabetic()).collect();
    is_subsequence(&cmd, &out) || is_subsequence(&out, &cmd)
}

fn is_subsequence(needle: &[char], haystack: &[char]) -> bool {
    let mut rest = haystack.iter();
    needle.iter().all(|c| rest.any(|h| h == c))
}
