//! Decouples *where* a problem is discovered (compiler or VM) from *how*
//! it's surfaced, so a CLI can print diagnostics while tests just
//! collect them for assertions.

use std::fmt;

use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Runtime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Compile => write!(f, "compile"),
            Phase::Runtime => write!(f, "runtime"),
        }
    }
}

/// What, if anything, follows "[line N] Error" before the message.
/// An error token's lexeme is the scanner's own message, not source
/// text, so it gets no "at" clause at all — matching the source, which
/// only prints "at end" for EOF and "at '<lexeme>'" for every other
/// token kind.
#[derive(Debug, Clone)]
pub enum At {
    End,
    Lexeme(String),
    Omitted,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub phase: Phase,
    pub line: u32,
    pub at: At,
    pub message: String,
    /// Call-stack trace, innermost frame first, as `(line, frame name)`
    /// pairs ("script" for the top-level frame). Empty for compile-time
    /// reports, which have no call stack to unwind.
    pub frames: Vec<(u32, String)>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Compile => {
                write!(f, "[line {}] Error", self.line)?;
                match &self.at {
                    At::End => write!(f, " at end")?,
                    At::Lexeme(lexeme) => write!(f, " at '{}'", lexeme)?,
                    At::Omitted => {}
                }
                write!(f, ": {}", self.message)
            }
            Phase::Runtime => {
                writeln!(f, "{}", self.message)?;
                for (i, (line, name)) in self.frames.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "[line {}] in {}", line, name)?;
                }
                Ok(())
            }
        }
    }
}

impl Report {
    pub fn at_token(phase: Phase, token: &Token, message: impl Into<String>) -> Self {
        let at = match token.kind {
            TokenKind::Eof => At::End,
            TokenKind::Error => At::Omitted,
            _ => At::Lexeme(token.lexeme.to_string()),
        };
        Report {
            phase,
            line: token.line,
            at,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn runtime(line: u32, message: impl Into<String>, frames: Vec<(u32, String)>) -> Self {
        Report {
            phase: Phase::Runtime,
            line,
            at: At::Omitted,
            message: message.into(),
            frames,
        }
    }
}

pub trait Reporter {
    fn report(&mut self, report: Report);
}

/// Prints to stderr in the `[line N] Error at 'lexeme': message` format.
#[derive(Default)]
pub struct CliReporter {
    pub error_count: usize,
}

impl Reporter for CliReporter {
    fn report(&mut self, report: Report) {
        self.error_count += 1;
        eprintln!("{}", report);
    }
}

/// Records reports instead of printing them; used by tests.
#[derive(Default)]
pub struct CollectingReporter {
    pub reports: Vec<Report>,
}

impl Reporter for CollectingReporter {
    fn report(&mut self, report: Report) {
        self.reports.push(report);
    }
}
