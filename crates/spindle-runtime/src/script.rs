//! Line-oriented workload scripts.
//!
//! One command per line, `#` starts a comment. Every command acts on
//! behalf of whichever thread the kernel is currently running, so a
//! script reads as the interleaved story of all its threads.
//!
//! ```text
//! spawn worker high 4096
//! mutex m
//! lock m 10          # wait at most ten ticks
//! tick 3
//! expect worker waiting
//! ```

use crate::error::RuntimeError;
use spindle_kernel::{Priority, ThreadState, Tick, Timeout};
use spindle_machine::{OpenFlags, Whence};

const DEFAULT_STACK_SIZE: usize = 0x1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Spawn {
        name: String,
        priority: Priority,
        stack: usize,
    },
    Sleep(Tick),
    Yield,
    Tick(u32),
    Exit,
    Kill(String),
    Reap(String),

    Mutex(String),
    Lock { mutex: String, timeout: Timeout },
    Unlock(String),
    DeleteMutex(String),

    Pool { name: String, size: usize },
    Alloc { name: String, pool: String, size: usize },
    Free(String),
    DeletePool(String),

    File { path: String, contents: String },
    Poke { buffer: String, text: String },
    Open { name: String, path: String, flags: OpenFlags },
    Read { name: String, fd: String, buffer: String, len: usize },
    Write { name: String, fd: String, buffer: String, len: usize },
    Seek { name: String, fd: String, offset: i64, whence: Whence },
    Close(String),
    /// Deliver up to this many pending I/O completions
    Io(u32),

    Expect { thread: String, state: ThreadState },
    ExpectOwner { mutex: String, owner: Option<String> },
    ExpectFree { pool: String, bytes: usize },
    ExpectValue { name: String, value: i64 },
    ExpectText { buffer: String, text: String },
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub command: Command,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub lines: Vec<Line>,
}

impl Script {
    pub fn parse(source: &str) -> Result<Self, RuntimeError> {
        let mut lines = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let text = raw.split('#').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }
            let number = index + 1;
            let command = parse_command(&mut Tokens::new(text, number))?;
            lines.push(Line { number, command });
        }
        Ok(Self { lines })
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

struct Tokens<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { rest: text, line }
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn try_next(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (token, rest) = trimmed.split_at(end);
        self.rest = rest;
        Some(token)
    }

    fn next(&mut self, what: &str) -> Result<&'a str, RuntimeError> {
        self.try_next()
            .ok_or_else(|| self.error(format!("missing {}", what)))
    }

    fn name(&mut self, what: &str) -> Result<String, RuntimeError> {
        self.next(what).map(str::to_string)
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, RuntimeError> {
        let token = self.next(what)?;
        parse_number(token).ok_or_else(|| self.error(format!("bad {} '{}'", what, token)))
    }

    fn optional_number<T: std::str::FromStr>(
        &mut self,
        what: &str,
    ) -> Result<Option<T>, RuntimeError> {
        match self.try_next() {
            Some(token) => parse_number(token)
                .map(Some)
                .ok_or_else(|| self.error(format!("bad {} '{}'", what, token))),
            None => Ok(None),
        }
    }

    /// Everything after the current position, as written
    fn remainder(&mut self) -> String {
        let text = self.rest.trim().to_string();
        self.rest = "";
        text
    }

    fn finish(&mut self) -> Result<(), RuntimeError> {
        match self.try_next() {
            Some(extra) => Err(self.error(format!("unexpected '{}'", extra))),
            None => Ok(()),
        }
    }
}

/// Decimal or `0x` hexadecimal
fn parse_number<T: std::str::FromStr>(token: &str) -> Option<T> {
    let cleaned = token.replace('_', "");
    match cleaned.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)
            .ok()
            .and_then(|v| v.to_string().parse().ok()),
        None => cleaned.parse().ok(),
    }
}

fn parse_priority(t: &mut Tokens) -> Result<Priority, RuntimeError> {
    match t.next("priority")? {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        other => Err(t.error(format!("unknown priority '{}'", other))),
    }
}

fn parse_state(t: &mut Tokens) -> Result<ThreadState, RuntimeError> {
    match t.next("state")? {
        "ready" => Ok(ThreadState::Ready),
        "running" => Ok(ThreadState::Running),
        "waiting" => Ok(ThreadState::Waiting),
        "dead" => Ok(ThreadState::Dead),
        other => Err(t.error(format!("unknown state '{}'", other))),
    }
}

fn parse_timeout(t: &mut Tokens) -> Result<Timeout, RuntimeError> {
    match t.try_next() {
        None | Some("forever") => Ok(Timeout::Infinite),
        Some("try") => Ok(Timeout::Immediate),
        Some(ticks) => parse_number(ticks)
            .map(Timeout::Ticks)
            .ok_or_else(|| t.error(format!("bad timeout '{}'", ticks))),
    }
}

fn parse_flags(t: &mut Tokens) -> Result<OpenFlags, RuntimeError> {
    let Some(list) = t.try_next() else {
        return Ok(OpenFlags::READ);
    };
    let mut flags = OpenFlags::empty();
    for part in list.split(',') {
        flags |= match part {
            "r" | "read" => OpenFlags::READ,
            "w" | "write" => OpenFlags::WRITE,
            "rw" => OpenFlags::READ | OpenFlags::WRITE,
            "create" => OpenFlags::CREATE,
            "trunc" => OpenFlags::TRUNCATE,
            "append" => OpenFlags::APPEND,
            other => return Err(t.error(format!("unknown open flag '{}'", other))),
        };
    }
    Ok(flags)
}

fn parse_whence(t: &mut Tokens) -> Result<Whence, RuntimeError> {
    match t.try_next() {
        None | Some("start") => Ok(Whence::Start),
        Some("current") => Ok(Whence::Current),
        Some("end") => Ok(Whence::End),
        Some(other) => Err(t.error(format!("unknown origin '{}'", other))),
    }
}

fn parse_command(t: &mut Tokens) -> Result<Command, RuntimeError> {
    let keyword = t.next("command")?;
    let command = match keyword {
        "spawn" => Command::Spawn {
            name: t.name("thread name")?,
            priority: parse_priority(t)?,
            stack: t.optional_number("stack size")?.unwrap_or(DEFAULT_STACK_SIZE),
        },
        "sleep" => Command::Sleep(t.number("tick count")?),
        "yield" => Command::Yield,
        "tick" => Command::Tick(t.optional_number("tick count")?.unwrap_or(1)),
        "exit" => Command::Exit,
        "kill" => Command::Kill(t.name("thread")?),
        "reap" => Command::Reap(t.name("thread")?),

        "mutex" => Command::Mutex(t.name("mutex name")?),
        "lock" => Command::Lock {
            mutex: t.name("mutex")?,
            timeout: parse_timeout(t)?,
        },
        "unlock" => Command::Unlock(t.name("mutex")?),
        "delete-mutex" => Command::DeleteMutex(t.name("mutex")?),

        "pool" => Command::Pool {
            name: t.name("pool name")?,
            size: t.number("pool size")?,
        },
        "alloc" => Command::Alloc {
            name: t.name("buffer name")?,
            pool: t.name("pool")?,
            size: t.number("size")?,
        },
        "free" => Command::Free(t.name("buffer")?),
        "delete-pool" => Command::DeletePool(t.name("pool")?),

        "file" => Command::File {
            path: t.name("path")?,
            contents: t.remainder(),
        },
        "poke" => Command::Poke {
            buffer: t.name("buffer")?,
            text: t.remainder(),
        },
        "open" => Command::Open {
            name: t.name("result name")?,
            path: t.name("path")?,
            flags: parse_flags(t)?,
        },
        "read" | "write" => {
            let name = t.name("result name")?;
            let fd = t.name("descriptor")?;
            let buffer = t.name("buffer")?;
            let len = t.number("length")?;
            if keyword == "read" {
                Command::Read { name, fd, buffer, len }
            } else {
                Command::Write { name, fd, buffer, len }
            }
        }
        "seek" => Command::Seek {
            name: t.name("result name")?,
            fd: t.name("descriptor")?,
            offset: t.number("offset")?,
            whence: parse_whence(t)?,
        },
        "close" => Command::Close(t.name("descriptor")?),
        "io" => Command::Io(t.optional_number("completion count")?.unwrap_or(1)),

        "expect" => Command::Expect {
            thread: t.name("thread")?,
            state: parse_state(t)?,
        },
        "expect-owner" => {
            let mutex = t.name("mutex")?;
            let owner = t.name("owner")?;
            Command::ExpectOwner {
                mutex,
                owner: (owner != "none").then_some(owner),
            }
        }
        "expect-free" => Command::ExpectFree {
            pool: t.name("pool")?,
            bytes: t.number("byte count")?,
        },
        "expect-io" => Command::ExpectValue {
            name: t.name("result name")?,
            value: t.number("value")?,
        },
        "expect-text" => Command::ExpectText {
            buffer: t.name("buffer")?,
            text: t.remainder(),
        },
        "status" => Command::Status,
        other => return Err(t.error(format!("unknown command '{}'", other))),
    };
    t.finish()?;
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_and_comments() {
        let script = Script::parse("\n# setup\nspawn a high   # worker\n\n  tick 3\n").unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.lines[0].number, 3);
        assert_eq!(
            script.lines[0].command,
            Command::Spawn {
                name: "a".into(),
                priority: Priority::High,
                stack: DEFAULT_STACK_SIZE,
            }
        );
        assert_eq!(script.lines[1].command, Command::Tick(3));
    }

    #[test]
    fn numbers_accept_hex_and_separators() {
        let script = Script::parse("pool p 0x400\nalloc b p 1_000").unwrap();
        assert_eq!(
            script.lines[0].command,
            Command::Pool {
                name: "p".into(),
                size: 0x400
            }
        );
        assert!(matches!(
            script.lines[1].command,
            Command::Alloc { size: 1000, .. }
        ));
    }

    #[test]
    fn timeouts() {
        let parse = |s: &str| Script::parse(s).unwrap().lines.remove(0).command;
        assert!(matches!(parse("lock m"), Command::Lock { timeout: Timeout::Infinite, .. }));
        assert!(matches!(parse("lock m try"), Command::Lock { timeout: Timeout::Immediate, .. }));
        assert!(matches!(parse("lock m 7"), Command::Lock { timeout: Timeout::Ticks(7), .. }));
    }

    #[test]
    fn text_arguments_keep_spaces() {
        let script = Script::parse("file /motd hello  there world\npoke b hi there").unwrap();
        assert_eq!(
            script.lines[0].command,
            Command::File {
                path: "/motd".into(),
                contents: "hello  there world".into()
            }
        );
        assert_eq!(
            script.lines[1].command,
            Command::Poke {
                buffer: "b".into(),
                text: "hi there".into()
            }
        );
    }

    #[test]
    fn open_flags_combine() {
        let script = Script::parse("open fd /log w,create,append").unwrap();
        let Command::Open { flags, .. } = &script.lines[0].command else {
            panic!("not an open");
        };
        assert_eq!(
            *flags,
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::APPEND
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = Script::parse("yield\nspawn a urgent").unwrap_err();
        assert!(matches!(err, RuntimeError::Parse { line: 2, .. }));
        let err = Script::parse("tick 1 2").unwrap_err();
        assert_eq!(err.to_string(), "line 1: unexpected '2'");
        assert!(Script::parse("frobnicate").is_err());
        assert!(Script::parse("sleep").is_err());
    }

    #[test]
    fn expect_owner_none() {
        let script = Script::parse("expect-owner m none\nexpect-owner m a").unwrap();
        assert_eq!(
            script.lines[0].command,
            Command::ExpectOwner {
                mutex: "m".into(),
                owner: None
            }
        );
        assert_eq!(
            script.lines[1].command,
            Command::ExpectOwner {
                mutex: "m".into(),
                owner: Some("a".into())
            }
        );
    }
}
